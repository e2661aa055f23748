//! Voter records, their fields, and their flat CSV representation.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use schemars::JsonSchema;

use crate::{key::RecordKey, prelude::*};

/// Separator placed between distinct raw texts seen for the same record.
const RAW_TEXT_SEPARATOR: &str = "\n---\n";

/// Split a stored `raw_text` back into the separate OCR texts it was built
/// from. Blank pieces are dropped.
pub fn raw_text_segments(raw_text: &str) -> impl Iterator<Item = &str> {
    raw_text
        .split(RAW_TEXT_SEPARATOR)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
}

/// A named field of a voter record.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    JsonSchema,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Serial,
    Name,
    VoterId,
    ParentOrSpouse,
    Mother,
    Occupation,
    DateOfBirth,
    Address,
}

impl Field {
    /// Every field, in output column order.
    pub const ALL: [Field; 8] = [
        Field::Serial,
        Field::Name,
        Field::VoterId,
        Field::ParentOrSpouse,
        Field::Mother,
        Field::Occupation,
        Field::DateOfBirth,
        Field::Address,
    ];

    /// The fields which must be present for a record to be `ok`.
    pub const MANDATORY: [Field; 2] = [Field::Name, Field::VoterId];

    /// The column name for this field.
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Serial => "serial",
            Field::Name => "name",
            Field::VoterId => "voter_id",
            Field::ParentOrSpouse => "parent_or_spouse",
            Field::Mother => "mother",
            Field::Occupation => "occupation",
            Field::DateOfBirth => "date_of_birth",
            Field::Address => "address",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of field values. Empty values are never stored, so "present" always
/// means "non-empty".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldValues {
    values: BTreeMap<Field, String>,
}

impl FieldValues {
    /// Create an empty set of values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `field` to `value`, unless `value` is blank. Returns true if the
    /// value was stored.
    pub fn insert(&mut self, field: Field, value: impl Into<String>) -> bool {
        let value = value.into();
        if value.trim().is_empty() {
            return false;
        }
        self.values.insert(field, value);
        true
    }

    /// Get the value of `field`, if present.
    pub fn get(&self, field: Field) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    /// Is `field` present?
    pub fn contains(&self, field: Field) -> bool {
        self.values.contains_key(&field)
    }

    /// The fields that have no value.
    pub fn missing(&self) -> BTreeSet<Field> {
        Field::ALL
            .into_iter()
            .filter(|f| !self.values.contains_key(f))
            .collect()
    }

    /// Are all mandatory fields present?
    pub fn has_mandatory(&self) -> bool {
        Field::MANDATORY.iter().all(|f| self.values.contains_key(f))
    }

    /// Are there no values at all?
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over the present fields, in column order.
    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.values.iter().map(|(f, v)| (*f, v.as_str()))
    }

    /// Copy values from `other` into any field we don't have yet. Fields we
    /// already have are never touched. Returns the fields that were filled.
    pub fn merge_blanks(&mut self, other: &FieldValues) -> Vec<Field> {
        let mut filled = vec![];
        for (field, value) in other.iter() {
            if !self.contains(field) && self.insert(field, value) {
                filled.push(field);
            }
        }
        filled
    }
}

/// How far along a record is.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Both mandatory fields are present.
    Ok,
    /// At least one mandatory field is missing.
    #[default]
    NeedsReview,
    /// Missing fields, and no source left to repair them from.
    Unrecoverable,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Ok => write!(f, "ok"),
            RecordStatus::NeedsReview => write!(f, "needs_review"),
            RecordStatus::Unrecoverable => write!(f, "unrecoverable"),
        }
    }
}

/// A single voter's record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoterRecord {
    pub key: RecordKey,
    pub fields: FieldValues,
    /// Every distinct OCR text we've seen for this record, kept for audits.
    pub raw_text: String,
    pub status: RecordStatus,
}

impl VoterRecord {
    /// Create a new record from freshly parsed fields.
    pub fn new(key: RecordKey, fields: FieldValues, raw_text: &str) -> Self {
        let mut record = Self {
            key,
            fields,
            raw_text: String::new(),
            status: RecordStatus::NeedsReview,
        };
        record.note_raw_text(raw_text);
        record.refresh_status();
        record
    }

    /// Recompute `status` from the mandatory fields.
    pub fn refresh_status(&mut self) {
        self.status = if self.fields.has_mandatory() {
            RecordStatus::Ok
        } else {
            RecordStatus::NeedsReview
        };
    }

    /// Fill blank fields from `other`, and update our status.
    pub fn merge_blanks(&mut self, other: &FieldValues) -> Vec<Field> {
        let filled = self.fields.merge_blanks(other);
        self.refresh_status();
        filled
    }

    /// Remember some OCR text, skipping blank text and any segment we've
    /// already seen. `text` may itself be a joined `raw_text`.
    pub fn note_raw_text(&mut self, text: &str) {
        for segment in raw_text_segments(text) {
            if raw_text_segments(&self.raw_text).any(|seen| seen == segment) {
                continue;
            }
            if !self.raw_text.is_empty() {
                self.raw_text.push_str(RAW_TEXT_SEPARATOR);
            }
            self.raw_text.push_str(segment);
        }
    }

    /// Convert to a flat row for CSV output.
    pub fn to_flat(&self) -> FlatVoterRecord {
        let get = |field| self.fields.get(field).map(ToOwned::to_owned);
        FlatVoterRecord {
            page: self.key.page,
            box_number: self.key.box_number,
            serial: get(Field::Serial),
            name: get(Field::Name),
            voter_id: get(Field::VoterId),
            parent_or_spouse: get(Field::ParentOrSpouse),
            mother: get(Field::Mother),
            occupation: get(Field::Occupation),
            date_of_birth: get(Field::DateOfBirth),
            address: get(Field::Address),
            status: Some(self.status),
            raw_text: (!self.raw_text.is_empty()).then(|| self.raw_text.clone()),
        }
    }

    /// Rebuild a record from a flat CSV row.
    pub fn from_flat(flat: FlatVoterRecord) -> Self {
        let mut fields = FieldValues::new();
        let columns = [
            (Field::Serial, flat.serial),
            (Field::Name, flat.name),
            (Field::VoterId, flat.voter_id),
            (Field::ParentOrSpouse, flat.parent_or_spouse),
            (Field::Mother, flat.mother),
            (Field::Occupation, flat.occupation),
            (Field::DateOfBirth, flat.date_of_birth),
            (Field::Address, flat.address),
        ];
        for (field, value) in columns {
            if let Some(value) = value {
                fields.insert(field, value.trim());
            }
        }
        let mut record = Self {
            key: RecordKey::new(flat.page, flat.box_number),
            fields,
            raw_text: flat.raw_text.unwrap_or_default(),
            status: RecordStatus::NeedsReview,
        };
        record.refresh_status();
        // Only the cascade decides a record is unrecoverable, so keep that
        // verdict as long as it's still consistent.
        if record.status == RecordStatus::NeedsReview
            && flat.status == Some(RecordStatus::Unrecoverable)
        {
            record.status = RecordStatus::Unrecoverable;
        }
        record
    }
}

/// A flat version of [`VoterRecord`], one CSV row per record.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct FlatVoterRecord {
    /// The 1-based page number.
    pub page: u32,
    /// The 1-based box number within the page.
    #[serde(rename = "box")]
    pub box_number: u32,
    pub serial: Option<String>,
    pub name: Option<String>,
    pub voter_id: Option<String>,
    pub parent_or_spouse: Option<String>,
    pub mother: Option<String>,
    pub occupation: Option<String>,
    pub date_of_birth: Option<String>,
    pub address: Option<String>,
    /// `ok`, `needs_review` or `unrecoverable`. Recomputed on load.
    #[serde(default)]
    pub status: Option<RecordStatus>,
    /// OCR text seen for this record.
    pub raw_text: Option<String>,
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn values(pairs: &[(Field, &str)]) -> FieldValues {
        let mut values = FieldValues::new();
        for (field, value) in pairs {
            values.insert(*field, *value);
        }
        values
    }

    #[test]
    fn blank_values_are_not_stored() {
        let mut v = FieldValues::new();
        assert!(!v.insert(Field::Name, "   "));
        assert!(!v.contains(Field::Name));
        assert_eq!(v.missing().len(), 8);
    }

    #[test]
    fn status_follows_mandatory_fields() {
        let key = RecordKey::new(3, 1);
        let record = VoterRecord::new(key, values(&[(Field::Name, "করিম")]), "");
        assert_eq!(record.status, RecordStatus::NeedsReview);

        let record = VoterRecord::new(
            key,
            values(&[(Field::Name, "করিম"), (Field::VoterId, "১২৩৪৫৬৭৮৯০")]),
            "",
        );
        assert_eq!(record.status, RecordStatus::Ok);
    }

    #[test]
    fn merge_fills_only_blanks() {
        let mut record = VoterRecord::new(
            RecordKey::new(3, 1),
            values(&[(Field::Name, "করিম")]),
            "",
        );
        let filled = record.merge_blanks(&values(&[
            (Field::Name, "অন্য নাম"),
            (Field::VoterId, "১২৩৪৫৬৭৮৯০"),
        ]));
        assert_eq!(filled, vec![Field::VoterId]);
        assert_eq!(record.fields.get(Field::Name), Some("করিম"));
        assert_eq!(record.status, RecordStatus::Ok);
    }

    #[test]
    fn raw_text_is_appended_once() {
        let mut record = VoterRecord::new(RecordKey::new(3, 1), FieldValues::new(), "a");
        record.note_raw_text("b");
        record.note_raw_text("a");
        record.note_raw_text("  ");
        assert_eq!(record.raw_text, "a\n---\nb");
    }

    #[test]
    fn joined_raw_text_is_not_appended_again() {
        let mut record = VoterRecord::new(RecordKey::new(3, 1), FieldValues::new(), "a");
        record.note_raw_text("b");
        let joined = record.raw_text.clone();
        record.note_raw_text(&joined);
        record.note_raw_text("c\n---\na");
        assert_eq!(record.raw_text, "a\n---\nb\n---\nc");
        assert_eq!(
            raw_text_segments(&record.raw_text).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn flat_rows_keep_unrecoverable_status() {
        let mut record =
            VoterRecord::new(RecordKey::new(5, 2), values(&[(Field::Serial, "০১২")]), "x");
        record.status = RecordStatus::Unrecoverable;
        let restored = VoterRecord::from_flat(record.to_flat());
        assert_eq!(restored, record);
    }

    #[test]
    fn flat_rows_cannot_claim_ok_without_mandatory_fields() {
        let mut flat = VoterRecord::new(RecordKey::new(5, 2), FieldValues::new(), "")
            .to_flat();
        flat.status = Some(RecordStatus::Ok);
        flat.name = Some(String::new());
        let restored = VoterRecord::from_flat(flat);
        assert_eq!(restored.status, RecordStatus::NeedsReview);
        assert!(!restored.fields.contains(Field::Name));
    }

    fn field_strategy() -> impl Strategy<Value = Field> {
        proptest::sample::select(Field::ALL.to_vec())
    }

    fn values_strategy() -> impl Strategy<Value = FieldValues> {
        proptest::collection::vec((field_strategy(), "[a-z ]{0,6}"), 0..8).prop_map(
            |pairs| {
                let mut values = FieldValues::new();
                for (field, value) in pairs {
                    values.insert(field, value);
                }
                values
            },
        )
    }

    proptest! {
        #[test]
        fn merge_never_overwrites(before in values_strategy(), other in values_strategy()) {
            let mut after = before.clone();
            after.merge_blanks(&other);
            for (field, value) in before.iter() {
                prop_assert_eq!(after.get(field), Some(value));
            }
        }

        #[test]
        fn merge_is_idempotent(before in values_strategy(), other in values_strategy()) {
            let mut once = before.clone();
            once.merge_blanks(&other);
            let mut twice = once.clone();
            let filled = twice.merge_blanks(&other);
            prop_assert!(filled.is_empty());
            prop_assert_eq!(twice, once);
        }
    }
}
