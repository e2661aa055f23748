//! The record table, and resuming from it.

use std::{collections::BTreeMap, fmt};

use crate::{
    async_utils::io::{read_csv, write_csv_atomic},
    key::RecordKey,
    prelude::*,
    record::{FlatVoterRecord, RecordStatus, VoterRecord},
};

/// All the records we know about, ordered by key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordSet {
    records: BTreeMap<RecordKey, VoterRecord>,
}

impl RecordSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record. If we already have one with the same key, only its blank
    /// fields are filled in.
    pub fn merge(&mut self, record: VoterRecord) {
        match self.records.get_mut(&record.key) {
            Some(existing) => {
                existing.note_raw_text(&record.raw_text);
                if !existing.fields.merge_blanks(&record.fields).is_empty() {
                    existing.refresh_status();
                }
            }
            None => {
                self.records.insert(record.key, record);
            }
        }
    }

    pub fn get(&self, key: &RecordKey) -> Option<&VoterRecord> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: &RecordKey) -> Option<&mut VoterRecord> {
        self.records.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over records in key order.
    pub fn iter(&self) -> impl Iterator<Item = &VoterRecord> {
        self.records.values()
    }

    /// The highest page number with at least one record. Extraction resumes
    /// on the page after this one.
    pub fn last_completed_page(&self) -> Option<u32> {
        self.records.keys().next_back().map(|key| key.page)
    }

    /// Count records by status.
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in self.records.values() {
            match record.status {
                RecordStatus::Ok => counts.ok += 1,
                RecordStatus::NeedsReview => counts.needs_review += 1,
                RecordStatus::Unrecoverable => counts.unrecoverable += 1,
            }
        }
        counts
    }
}

impl FromIterator<VoterRecord> for RecordSet {
    fn from_iter<I: IntoIterator<Item = VoterRecord>>(iter: I) -> Self {
        let mut set = RecordSet::new();
        for record in iter {
            set.merge(record);
        }
        set
    }
}

/// How many records are in each state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub ok: usize,
    pub needs_review: usize,
    pub unrecoverable: usize,
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ok, {} needs review, {} unrecoverable",
            self.ok, self.needs_review, self.unrecoverable
        )
    }
}

/// A record table stored as a CSV file.
#[derive(Clone, Debug)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the table if it exists, or return an empty set.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub fn load_existing(&self) -> Result<RecordSet> {
        if !self.path.exists() {
            debug!("No existing record table");
            return Ok(RecordSet::new());
        }
        let rows = read_csv::<FlatVoterRecord>(&self.path)?;
        let set = rows
            .into_iter()
            .map(VoterRecord::from_flat)
            .collect::<RecordSet>();
        debug!(
            records = set.len(),
            last_completed_page = ?set.last_completed_page(),
            "Loaded record table"
        );
        Ok(set)
    }

    /// Atomically replace the table with `set`.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub fn save(&self, set: &RecordSet) -> Result<()> {
        write_csv_atomic(&self.path, set.iter().map(VoterRecord::to_flat))?;
        debug!(records = set.len(), "Saved record table");
        Ok(())
    }
}
