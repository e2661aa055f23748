//! The repair cascade, which fills in missing fields as cheaply as possible.
//!
//! Records that need review go through up to two tiers:
//!
//! 1. **Tier 1** re-parses text we already have, using the [`Tier::Lenient`]
//!    and then [`Tier::Anchored`] parsers. This is free.
//! 2. **Tier 2** sends the record's image to a paid OCR service, and parses
//!    the result the same way.
//!
//! Tier 1 runs for every queued record before any Tier 2 call is made. Tier 2
//! needs an [`ApprovedTier2Queue`], which can only be obtained by calling
//! [`Tier2Queue::approve`] once the caller has decided the cost is acceptable.
//!
//! Repairs only ever fill blank fields, so running the cascade again on its
//! own output is harmless.

use std::{collections::BTreeMap, fmt};

use indicatif::ProgressBar;
use leaky_bucket::RateLimiter;

use crate::{
    extractors::{ImageData, TextExtractor, extract_or_empty},
    key::RecordKey,
    parser::{FieldParser, Tier},
    prelude::*,
    record::{RecordStatus, VoterRecord},
    sources::{ImageIndex, TextIndex},
    store::RecordSet,
};

/// Where a record is in the cascade.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepairState {
    Pending,
    Tier1Attempted,
    Tier2Queued,
    Tier2Attempted,
    Resolved(RecordStatus),
}

/// What happened during a repair run.
#[derive(Clone, Debug, Default)]
pub struct RepairReport {
    /// How many records entered the cascade.
    pub queued: usize,
    /// How many records became `ok` in Tier 1.
    pub fixed_by_tier1: usize,
    /// How many records became `ok` in Tier 2.
    pub fixed_by_tier2: usize,
    /// How many paid OCR calls we made.
    pub paid_calls: usize,
    /// Every state each record passed through, in order.
    pub history: BTreeMap<RecordKey, Vec<RepairState>>,
}

impl RepairReport {
    fn record(&mut self, key: RecordKey, state: RepairState) {
        trace!(%key, ?state, "Repair state");
        self.history.entry(key).or_default().push(state);
    }

    /// The final state of `key`, if it was in the cascade.
    pub fn final_state(&self, key: &RecordKey) -> Option<RepairState> {
        self.history.get(key).and_then(|states| states.last().copied())
    }
}

impl fmt::Display for RepairReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records queued, {} fixed from cached text, {} fixed by paid OCR ({} calls)",
            self.queued, self.fixed_by_tier1, self.fixed_by_tier2, self.paid_calls
        )
    }
}

/// Records waiting for paid OCR. Call [`Tier2Queue::approve`] to run them, or
/// [`Tier2Queue::decline`] to give up on them.
#[derive(Debug)]
#[must_use = "a Tier 2 queue must be approved or declined"]
pub struct Tier2Queue {
    keys: Vec<RecordKey>,
    report: RepairReport,
}

impl Tier2Queue {
    /// How many paid calls we would make, at most.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[RecordKey] {
        &self.keys
    }

    /// The report so far.
    pub fn report(&self) -> &RepairReport {
        &self.report
    }

    /// Allow paid calls for every record in this queue.
    pub fn approve(self) -> ApprovedTier2Queue {
        ApprovedTier2Queue {
            keys: self.keys,
            report: self.report,
        }
    }

    /// Skip paid OCR. Every queued record is left as `needs_review`.
    pub fn decline(self, records: &mut RecordSet) -> RepairReport {
        let mut report = self.report;
        for key in self.keys {
            if let Some(record) = records.get_mut(&key) {
                record.status = RecordStatus::NeedsReview;
            }
            report.record(key, RepairState::Resolved(RecordStatus::NeedsReview));
        }
        report
    }
}

/// A [`Tier2Queue`] that the caller has agreed to pay for.
#[derive(Debug)]
pub struct ApprovedTier2Queue {
    keys: Vec<RecordKey>,
    report: RepairReport,
}

/// Runs the repair tiers.
#[derive(Clone, Debug, Default)]
pub struct RepairCascade {
    parser: FieldParser,
    include_unrecoverable: bool,
}

impl RepairCascade {
    pub fn new(parser: FieldParser) -> Self {
        Self {
            parser,
            include_unrecoverable: false,
        }
    }

    /// Also retry records that an earlier run marked `unrecoverable`.
    pub fn include_unrecoverable(mut self, include: bool) -> Self {
        self.include_unrecoverable = include;
        self
    }

    fn wants(&self, record: &VoterRecord) -> bool {
        match record.status {
            RecordStatus::Ok => false,
            RecordStatus::NeedsReview => true,
            RecordStatus::Unrecoverable => self.include_unrecoverable,
        }
    }

    /// Parse `text` into `record`, filling blanks only. The anchored parser
    /// only runs if a mandatory field is still missing.
    fn apply_text(&self, record: &mut VoterRecord, text: &str) {
        record.note_raw_text(text);
        let filled = record.merge_blanks(&self.parser.parse(text, Tier::Lenient).fields);
        if !filled.is_empty() {
            debug!(key = %record.key, ?filled, "Filled from lenient parse");
        }
        if !record.fields.has_mandatory() {
            let filled =
                record.merge_blanks(&self.parser.parse(text, Tier::Anchored).fields);
            if !filled.is_empty() {
                debug!(key = %record.key, ?filled, "Filled from anchored parse");
            }
        }
    }

    /// Run Tier 1 over every record that needs it, and return the records
    /// that still need paid OCR.
    #[instrument(level = "debug", skip_all)]
    pub fn run_tier1(&self, records: &mut RecordSet, texts: &TextIndex) -> Tier2Queue {
        let mut report = RepairReport::default();
        let keys = records
            .iter()
            .filter(|record| self.wants(record))
            .map(|record| record.key)
            .collect::<Vec<_>>();
        report.queued = keys.len();

        let mut tier2_keys = vec![];
        for key in keys {
            let Some(record) = records.get_mut(&key) else {
                continue;
            };
            report.record(key, RepairState::Pending);
            for text in texts.get(&key) {
                if record.fields.has_mandatory() {
                    break;
                }
                self.apply_text(record, text);
            }
            report.record(key, RepairState::Tier1Attempted);
            if record.status == RecordStatus::Ok {
                report.fixed_by_tier1 += 1;
                report.record(key, RepairState::Resolved(RecordStatus::Ok));
            } else {
                report.record(key, RepairState::Tier2Queued);
                tier2_keys.push(key);
            }
        }
        info!(
            queued = report.queued,
            fixed = report.fixed_by_tier1,
            remaining = tier2_keys.len(),
            "Tier 1 repair finished"
        );
        Tier2Queue {
            keys: tier2_keys,
            report,
        }
    }

    /// Run Tier 2, one paid call at a time, waiting on `limiter` before each
    /// call.
    #[instrument(level = "debug", skip_all, fields(queued = queue.keys.len()))]
    pub async fn run_tier2(
        &self,
        queue: ApprovedTier2Queue,
        records: &mut RecordSet,
        images: &ImageIndex,
        extractor: &dyn TextExtractor,
        limiter: &RateLimiter,
        progress: Option<&ProgressBar>,
    ) -> RepairReport {
        let mut report = queue.report;
        for key in queue.keys {
            let resolved = self
                .repair_one(key, records, images, extractor, limiter, &mut report)
                .await;
            report.record(key, RepairState::Resolved(resolved));
            if let Some(progress) = progress {
                progress.inc(1);
            }
        }
        report
    }

    /// Run Tier 2 for a single record, returning its final status.
    async fn repair_one(
        &self,
        key: RecordKey,
        records: &mut RecordSet,
        images: &ImageIndex,
        extractor: &dyn TextExtractor,
        limiter: &RateLimiter,
        report: &mut RepairReport,
    ) -> RecordStatus {
        let Some(record) = records.get_mut(&key) else {
            return RecordStatus::NeedsReview;
        };
        let Some(path) = images.get(&key) else {
            warn!(%key, "No image to repair from");
            record.status = RecordStatus::Unrecoverable;
            return record.status;
        };

        let text = match ImageData::from_path(path).await {
            Ok(image) => {
                limiter.acquire_one().await;
                report.paid_calls += 1;
                extract_or_empty(extractor, &image).await
            }
            Err(err) => {
                warn!(%key, "Could not read image: {:?}", err);
                String::new()
            }
        };
        report.record(key, RepairState::Tier2Attempted);

        if text.trim().is_empty() {
            record.status = RecordStatus::NeedsReview;
            return record.status;
        }
        self.apply_text(record, &text);
        if record.status == RecordStatus::Ok {
            report.fixed_by_tier2 += 1;
        }
        record.status
    }
}
