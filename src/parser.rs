//! Parsing OCR text from a single record box into fields.
//!
//! There are three tiers, from most to least picky:
//!
//! - [`Tier::Strict`] only believes canonical labels followed by an optional
//!   `:` or `;`.
//! - [`Tier::Lenient`] also accepts labels mangled by OCR (`নাম-`, `নাম.`),
//!   folds `|` and line breaks, and will find an unlabeled voter ID.
//! - [`Tier::Anchored`] does everything [`Tier::Lenient`] does, and then uses
//!   the voter ID as an anchor: the name comes before it and the parent or
//!   spouse comes after it.
//!
//! In every tier, a value runs to the next recognized label or the end of the
//! text, except for the address, which always runs to the end.

use std::{collections::BTreeSet, sync::LazyLock};

use clap::ValueEnum;
use regex::Regex;
use schemars::JsonSchema;

use crate::{
    digits::{is_any_digit, to_bengali_digits},
    prelude::*,
    record::{Field, FieldValues},
};

/// Characters trimmed from the end of every value.
const TRAILING_SEPARATORS: &[char] = &[',', ';', ':', '-', '।', '|'];

/// Characters trimmed from the start of every value.
const LEADING_SEPARATORS: &[char] = &[':', ';', 'ঃ', '-', '–', '=', '.', ',', '|'];

/// Label tokens that are never part of a name.
const NAME_NOISE_WORDS: &[&str] = &["নাম", "ভোটার", "এলাকার", "নং"];

/// Voter IDs are between 10 and 18 digits long.
const VOTER_ID_DIGITS: std::ops::RangeInclusive<usize> = 10..=18;

/// Serial numbers are 3 or 4 digits long.
const SERIAL_DIGITS: std::ops::RangeInclusive<usize> = 3..=4;

/// All the labels we recognize, one named group per label.
static LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<voter_id>ভোটার(?:\s*নং)?)|(?P<name>নাম)|(?P<parent>পিতা|স্বামী)|(?P<mother>মাতা)|(?P<occupation>পেশা)|(?P<dob>জন্ম\s*তারিখ)|(?P<address>ঠিকানা)",
    )
    .expect("failed to compile regex")
});

/// What may follow a label in [`Tier::Strict`].
static STRICT_SEPARATOR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[:;ঃ]?\s*").expect("failed to compile regex"));

/// What may follow a label in the looser tiers.
static LENIENT_SEPARATOR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\s:;ঃ\-–=.]*").expect("failed to compile regex"));

/// A date of birth, in either digit script.
static DATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9০-৯]{2}[/.\-][0-9০-৯]{2}[/.\-][0-9০-৯]{4}")
        .expect("failed to compile regex")
});

/// How hard to try when parsing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum Tier {
    #[default]
    Strict,
    Lenient,
    Anchored,
}

/// Parser settings.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParserConfig {
    /// If this word appears in an address, cut the address off right after
    /// it. Useful when the address is followed by page furniture.
    #[serde(default)]
    pub address_stop_word: Option<String>,
}

/// The result of parsing one box of text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParseResult {
    pub fields: FieldValues,
    /// Fields with no value.
    pub missing: BTreeSet<Field>,
}

impl ParseResult {
    fn from_fields(fields: FieldValues) -> Self {
        let missing = fields.missing();
        Self { fields, missing }
    }
}

/// Parse `text` with the default [`ParserConfig`].
pub fn parse(text: &str, tier: Tier) -> ParseResult {
    FieldParser::default().parse(text, tier)
}

/// The labels we know about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Label {
    VoterId,
    Name,
    ParentOrSpouse,
    Mother,
    Occupation,
    DateOfBirth,
    Address,
}

impl Label {
    /// The field this label introduces.
    fn field(self) -> Field {
        match self {
            Label::VoterId => Field::VoterId,
            Label::Name => Field::Name,
            Label::ParentOrSpouse => Field::ParentOrSpouse,
            Label::Mother => Field::Mother,
            Label::Occupation => Field::Occupation,
            Label::DateOfBirth => Field::DateOfBirth,
            Label::Address => Field::Address,
        }
    }
}

/// A label found in the text.
#[derive(Debug)]
struct LabelHit {
    label: Label,
    /// Byte offset of the label itself.
    start: usize,
    /// Byte offset where the value starts, after any separator.
    value_start: usize,
}

/// A tiered field parser.
#[derive(Clone, Debug, Default)]
pub struct FieldParser {
    config: ParserConfig,
}

impl FieldParser {
    /// Create a parser with the specified settings.
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Parse `text` using `tier`.
    pub fn parse(&self, text: &str, tier: Tier) -> ParseResult {
        if text.trim().is_empty() {
            return ParseResult::from_fields(FieldValues::new());
        }
        let fields = match tier {
            Tier::Strict => self.parse_labeled(text, Tier::Strict),
            Tier::Lenient => self.parse_labeled(&fold_for_lenient(text), Tier::Lenient),
            Tier::Anchored => self.parse_anchored(&fold_for_lenient(text)),
        };
        ParseResult::from_fields(fields)
    }

    /// Label-driven parsing, shared by all tiers.
    fn parse_labeled(&self, text: &str, tier: Tier) -> FieldValues {
        let hits = find_labels(text, tier);
        let mut values = FieldValues::new();

        // Without a voter ID label, an unlabeled voter ID still ends whatever
        // value came before it.
        let unlabeled_voter_id = if tier != Tier::Strict
            && !hits.iter().any(|hit| hit.label == Label::VoterId)
        {
            first_voter_id_run(text)
        } else {
            None
        };

        if let Some(serial) = serial_number(text) {
            values.insert(Field::Serial, serial);
        }

        for (idx, hit) in hits.iter().enumerate() {
            let field = hit.label.field();
            if values.contains(field) {
                continue;
            }
            let mut end = hits.get(idx + 1).map_or(text.len(), |next| next.start);
            if let Some((run_start, _)) = unlabeled_voter_id
                && (hit.value_start..end).contains(&run_start)
            {
                end = run_start;
            }
            let span = &text[hit.value_start..end];
            match hit.label {
                Label::VoterId => {
                    if let Some((start, end)) = digit_runs(span).first() {
                        values.insert(field, to_bengali_digits(&span[*start..*end]));
                    }
                }
                // Dates are found by pattern below.
                Label::DateOfBirth => {}
                Label::Address => {
                    values.insert(field, self.address_value(&text[hit.value_start..]));
                }
                _ => {
                    values.insert(field, clean_value(span));
                }
            }
        }

        if let Some(date) = DATE_REGEX.find(text) {
            values.insert(Field::DateOfBirth, to_bengali_digits(date.as_str()));
        }

        // A voter ID label with no digits after it also falls back to the
        // first run of the right length.
        if tier != Tier::Strict
            && !values.contains(Field::VoterId)
            && let Some((start, end)) = first_voter_id_run(text)
        {
            values.insert(Field::VoterId, to_bengali_digits(&text[start..end]));
        }
        values
    }

    /// Blind parsing around the voter ID. Label values found by the lenient
    /// pass take priority, and the anchor fills in whatever is left.
    fn parse_anchored(&self, text: &str) -> FieldValues {
        let mut values = self.parse_labeled(text, Tier::Lenient);
        let Some((start, end)) = first_voter_id_run(text) else {
            return values;
        };

        let mut anchored = FieldValues::new();
        anchored.insert(Field::VoterId, to_bengali_digits(&text[start..end]));
        anchored.insert(Field::Name, anchored_name(&text[..start]));
        anchored.insert(Field::ParentOrSpouse, anchored_parent(&text[end..]));
        values.merge_blanks(&anchored);
        values
    }

    /// Clean up an address, honoring our stop word.
    fn address_value(&self, raw: &str) -> String {
        let value = clean_value(raw);
        match &self.config.address_stop_word {
            Some(stop_word) if !stop_word.is_empty() => match value.find(stop_word.as_str())
            {
                Some(pos) => value[..pos + stop_word.len()].to_owned(),
                None => value,
            },
            _ => value,
        }
    }
}

/// Replace `|` and line breaks with spaces.
fn fold_for_lenient(text: &str) -> String {
    text.chars()
        .map(|c| if c == '|' || c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

/// Find every label in `text` that `tier` is willing to recognize.
fn find_labels(text: &str, tier: Tier) -> Vec<LabelHit> {
    let mut hits = vec![];
    for caps in LABEL_REGEX.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };

        // A label glued onto another word is part of that word, as in
        // `মাতাব` or `নামিরা`.
        if text[..whole.start()].chars().next_back().is_some_and(is_word_char)
            || text[whole.end()..].chars().next().is_some_and(is_word_char)
        {
            continue;
        }

        let label = if caps.name("voter_id").is_some() {
            Label::VoterId
        } else if caps.name("name").is_some() {
            Label::Name
        } else if caps.name("parent").is_some() {
            Label::ParentOrSpouse
        } else if caps.name("mother").is_some() {
            Label::Mother
        } else if caps.name("occupation").is_some() {
            Label::Occupation
        } else if caps.name("dob").is_some() {
            Label::DateOfBirth
        } else {
            Label::Address
        };

        let rest = &text[whole.end()..];
        let separator_len = if tier == Tier::Strict {
            let after_space = rest.trim_start();
            if after_space.starts_with(['-', '–', '=', '.']) {
                trace!(?label, "Strict parse ignoring label with odd separator");
                continue;
            }
            STRICT_SEPARATOR_REGEX.find(rest).map_or(0, |m| m.end())
        } else {
            LENIENT_SEPARATOR_REGEX.find(rest).map_or(0, |m| m.end())
        };

        hits.push(LabelHit {
            label,
            start: whole.start(),
            value_start: whole.end() + separator_len,
        });
    }
    hits
}

/// Letters and vowel signs. The visarga (`ঃ`) is used as a colon after
/// labels, so it doesn't count.
fn is_word_char(c: char) -> bool {
    c != 'ঃ' && c.is_alphabetic()
}

/// Byte ranges of every maximal run of digits, in either script.
fn digit_runs(text: &str) -> Vec<(usize, usize)> {
    let mut runs = vec![];
    let mut current: Option<usize> = None;
    for (idx, c) in text.char_indices() {
        match (is_any_digit(c), current) {
            (true, None) => current = Some(idx),
            (false, Some(start)) => {
                runs.push((start, idx));
                current = None;
            }
            _ => {}
        }
    }
    if let Some(start) = current {
        runs.push((start, text.len()));
    }
    runs
}

fn run_len(text: &str, (start, end): (usize, usize)) -> usize {
    text[start..end].chars().count()
}

/// The first digit run that is long enough to be a voter ID.
fn first_voter_id_run(text: &str) -> Option<(usize, usize)> {
    digit_runs(text)
        .into_iter()
        .find(|&run| VOTER_ID_DIGITS.contains(&run_len(text, run)))
}

/// The serial number is the first run of digits in the box, if it has the
/// right length.
fn serial_number(text: &str) -> Option<String> {
    let run = *digit_runs(text).first()?;
    SERIAL_DIGITS
        .contains(&run_len(text, run))
        .then(|| to_bengali_digits(&text[run.0..run.1]))
}

/// Collapse whitespace, trim separators and normalize digits.
fn clean_value(raw: &str) -> String {
    let folded = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = folded
        .trim_start_matches(|c: char| c.is_whitespace() || LEADING_SEPARATORS.contains(&c))
        .trim_end_matches(|c: char| {
            c.is_whitespace() || TRAILING_SEPARATORS.contains(&c)
        });
    to_bengali_digits(trimmed)
}

/// Everything before the voter ID, minus the serial and any label noise.
fn anchored_name(before: &str) -> String {
    let mut rest = before.trim_start();
    if let Some(&(0, end)) = digit_runs(rest).first()
        && SERIAL_DIGITS.contains(&run_len(rest, (0, end)))
    {
        rest = &rest[end..];
    }
    let words = rest
        .split_whitespace()
        .filter(|word| {
            let bare = word.trim_matches(|c: char| {
                LEADING_SEPARATORS.contains(&c) || TRAILING_SEPARATORS.contains(&c)
            });
            !bare.is_empty() && !NAME_NOISE_WORDS.contains(&bare)
        })
        .collect::<Vec<_>>();
    clean_value(&words.join(" "))
}

/// Everything after the voter ID, minus a leading parent label, up to the next
/// label.
fn anchored_parent(after: &str) -> String {
    let hits = find_labels(after, Tier::Lenient);
    let lead = after.len()
        - after
            .trim_start_matches(|c: char| {
                c.is_whitespace() || LEADING_SEPARATORS.contains(&c)
            })
            .len();
    let (start, end) = match hits.first() {
        Some(first) if first.label == Label::ParentOrSpouse && first.start == lead => (
            first.value_start,
            hits.get(1).map_or(after.len(), |next| next.start),
        ),
        Some(first) => (0, first.start),
        None => (0, after.len()),
    };
    clean_value(&after[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_parses_labeled_text() {
        let result = parse("0001 নাম: করিম ভোটার নং: 1234567890123 পিতা: রহিম", Tier::Strict);
        let fields = &result.fields;
        assert_eq!(fields.get(Field::Serial), Some("০০০১"));
        assert_eq!(fields.get(Field::Name), Some("করিম"));
        assert_eq!(fields.get(Field::VoterId), Some("১২৩৪৫৬৭৮৯০১২৩"));
        assert_eq!(fields.get(Field::ParentOrSpouse), Some("রহিম"));
        for field in [Field::Serial, Field::Name, Field::VoterId, Field::ParentOrSpouse] {
            assert!(!result.missing.contains(&field));
        }
        assert!(result.missing.contains(&Field::Address));
    }

    #[test]
    fn unlabeled_text_needs_anchored_tier() {
        let text = "0002 জামাল 9876543210987 হামিদ";

        let strict = parse(text, Tier::Strict);
        assert!(!strict.fields.contains(Field::Name));
        assert!(!strict.fields.contains(Field::VoterId));
        assert!(!strict.fields.contains(Field::ParentOrSpouse));

        let anchored = parse(text, Tier::Anchored);
        assert_eq!(anchored.fields.get(Field::Serial), Some("০০০২"));
        assert_eq!(anchored.fields.get(Field::VoterId), Some("৯৮৭৬৫৪৩২১০৯৮৭"));
        assert_eq!(anchored.fields.get(Field::Name), Some("জামাল"));
        assert_eq!(anchored.fields.get(Field::ParentOrSpouse), Some("হামিদ"));
    }

    #[test]
    fn strict_ignores_dashed_labels_but_lenient_accepts_them() {
        let text = "নাম- করিম ভোটার নং: 1234567890";
        let strict = parse(text, Tier::Strict);
        assert!(!strict.fields.contains(Field::Name));
        assert_eq!(strict.fields.get(Field::VoterId), Some("১২৩৪৫৬৭৮৯০"));

        let lenient = parse(text, Tier::Lenient);
        assert_eq!(lenient.fields.get(Field::Name), Some("করিম"));
    }

    #[test]
    fn lenient_finds_unlabeled_voter_id() {
        let text = "নাম: করিম\n1234567890123\nপিতা: রহিম";
        assert!(!parse(text, Tier::Strict).fields.contains(Field::VoterId));
        let lenient = parse(text, Tier::Lenient);
        assert_eq!(lenient.fields.get(Field::VoterId), Some("১২৩৪৫৬৭৮৯০১২৩"));
        assert_eq!(lenient.fields.get(Field::Name), Some("করিম"));
        assert_eq!(lenient.fields.get(Field::ParentOrSpouse), Some("রহিম"));
    }

    #[test]
    fn lenient_folds_pipes() {
        let result = parse("নাম: করিম | ভোটার নং: ১২৩৪৫৬৭৮৯০", Tier::Lenient);
        assert_eq!(result.fields.get(Field::Name), Some("করিম"));
        assert_eq!(result.fields.get(Field::VoterId), Some("১২৩৪৫৬৭৮৯০"));
    }

    #[test]
    fn parses_a_full_box() {
        let text = "0123 নাম: মোছাঃ রহিমা খাতুন\n\
                    ভোটার নং: 150123456789\n\
                    স্বামী: আব্দুল করিম\n\
                    মাতা: জরিনা বেগম\n\
                    পেশা: গৃহিণী, জন্ম তারিখ: 01/02/1985\n\
                    ঠিকানা: ১২ স্টেশন রোড,\nচট্টগ্রাম সিটি";
        let result = parse(text, Tier::Strict);
        let fields = &result.fields;
        assert_eq!(fields.get(Field::Serial), Some("০১২৩"));
        assert_eq!(fields.get(Field::Name), Some("মোছাঃ রহিমা খাতুন"));
        assert_eq!(fields.get(Field::VoterId), Some("১৫০১২৩৪৫৬৭৮৯"));
        assert_eq!(fields.get(Field::ParentOrSpouse), Some("আব্দুল করিম"));
        assert_eq!(fields.get(Field::Mother), Some("জরিনা বেগম"));
        assert_eq!(fields.get(Field::Occupation), Some("গৃহিণী"));
        assert_eq!(fields.get(Field::DateOfBirth), Some("০১/০২/১৯৮৫"));
        assert_eq!(
            fields.get(Field::Address),
            Some("১২ স্টেশন রোড, চট্টগ্রাম সিটি")
        );
        assert!(result.missing.is_empty());
    }

    #[test]
    fn address_stop_word_cuts_address() {
        let parser = FieldParser::new(ParserConfig {
            address_stop_word: Some("চট্টগ্রাম".to_owned()),
        });
        let result = parser.parse("ঠিকানা: ১২ রোড, চট্টগ্রাম ০৪ পৃষ্ঠা", Tier::Strict);
        assert_eq!(result.fields.get(Field::Address), Some("১২ রোড, চট্টগ্রাম"));
    }

    #[test]
    fn glued_labels_are_ignored() {
        let result = parse("পিতামাতা ঠিক নেই", Tier::Strict);
        assert!(!result.fields.contains(Field::Mother));
        assert!(!result.fields.contains(Field::ParentOrSpouse));
    }

    #[test]
    fn names_starting_with_a_label_are_kept() {
        let text = "0001 নাম: মাতাব আলী ভোটার নং: 1234567890123 পিতা: রহিম";
        for tier in [Tier::Strict, Tier::Lenient, Tier::Anchored] {
            let result = parse(text, tier);
            assert_eq!(result.fields.get(Field::Name), Some("মাতাব আলী"), "{tier:?}");
            assert_eq!(result.fields.get(Field::Mother), None, "{tier:?}");
            assert_eq!(result.fields.get(Field::ParentOrSpouse), Some("রহিম"));
        }

        let result = parse("নাম: নামিরা বেগম মাতা: রুবিনা", Tier::Strict);
        assert_eq!(result.fields.get(Field::Name), Some("নামিরা বেগম"));
        assert_eq!(result.fields.get(Field::Mother), Some("রুবিনা"));
    }

    #[test]
    fn visarga_after_label_is_a_separator() {
        let result = parse("নামঃ করিম ভোটার নংঃ 1234567890", Tier::Strict);
        assert_eq!(result.fields.get(Field::Name), Some("করিম"));
        assert_eq!(result.fields.get(Field::VoterId), Some("১২৩৪৫৬৭৮৯০"));
    }

    #[test]
    fn blank_text_has_everything_missing() {
        for tier in [Tier::Strict, Tier::Lenient, Tier::Anchored] {
            let result = parse("  \n ", tier);
            assert!(result.fields.is_empty());
            assert_eq!(result.missing.len(), Field::ALL.len());
        }
    }

    #[test]
    fn serial_needs_three_or_four_digits() {
        assert!(!parse("12 নাম: করিম", Tier::Strict).fields.contains(Field::Serial));
        assert!(!parse("12345 নাম: করিম", Tier::Strict).fields.contains(Field::Serial));
    }

    #[test]
    fn anchored_skips_parent_label_and_stops_at_next_label() {
        let text = "০০৪৫ নাম: সুমন ১৯৮৭৬৫৪৩২১০ পিতা- হাসান মাতা: রুবিনা";
        let result = parse(text, Tier::Anchored);
        assert_eq!(result.fields.get(Field::Name), Some("সুমন"));
        assert_eq!(result.fields.get(Field::ParentOrSpouse), Some("হাসান"));
        assert_eq!(result.fields.get(Field::Mother), Some("রুবিনা"));
    }

    #[test]
    fn anchored_is_a_superset_of_lenient() {
        let texts = [
            "0001 নাম: করিম ভোটার নং: 1234567890123 পিতা: রহিম",
            "0002 জামাল 9876543210987 হামিদ",
            "নাম- করিম ভোটার 12345",
            "",
        ];
        for text in texts {
            let lenient = parse(text, Tier::Lenient);
            let anchored = parse(text, Tier::Anchored);
            for (field, value) in lenient.fields.iter() {
                assert_eq!(anchored.fields.get(field), Some(value), "{text:?}");
            }
        }
    }
}
