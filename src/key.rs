//! Record keys, and deriving them from file paths and table cells.

use std::fmt;

use schemars::JsonSchema;
use thiserror::Error;

use crate::{digits::is_any_digit, digits::to_ascii_digits, prelude::*};

/// Identifies one record box on one page. Page numbers are 1-based (page
/// index + 1) and box numbers are 1-based within their page.
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
pub struct RecordKey {
    /// The 1-based page number.
    pub page: u32,
    /// The 1-based box number within the page.
    #[serde(rename = "box")]
    pub box_number: u32,
}

impl RecordKey {
    /// Create a new key.
    pub fn new(page: u32, box_number: u32) -> Self {
        Self { page, box_number }
    }

    /// Build a key from separate page and box cells, such as `Page_003` and
    /// `Box_01.jpg`.
    pub fn from_names(page_name: &str, box_name: &str) -> Result<Self, KeyError> {
        let locator = format!("{page_name}/{box_name}");
        let page = positive_integer(page_name, &locator, "page")?;
        let box_number = positive_integer(box_name, &locator, "box")?;
        Ok(Self { page, box_number })
    }

    /// The relative path of this key's crop inside a crop directory.
    pub fn crop_path(&self, extension: &str) -> PathBuf {
        PathBuf::from(format!("Page_{:03}", self.page))
            .join(format!("Box_{:02}.{}", self.box_number, extension))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {} box {}", self.page, self.box_number)
    }
}

/// Errors deriving a [`RecordKey`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// The locator did not contain the numbers we need.
    #[error("cannot derive record key from {locator:?}: {reason}")]
    Unparseable {
        locator: String,
        reason: &'static str,
    },
}

/// Derive a key from a path-like locator such as `crops/Page_003/Box_07.jpg`.
///
/// The page number is the first integer in the second-to-last segment, and
/// the box number is the first integer in the last segment. Both `/` and `\`
/// separate segments.
pub fn derive_key(locator: &str) -> Result<RecordKey, KeyError> {
    let segments = locator
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    let [.., page_segment, box_segment] = segments.as_slice() else {
        return Err(KeyError::Unparseable {
            locator: locator.to_owned(),
            reason: "need at least two path segments",
        });
    };
    Ok(RecordKey {
        page: positive_integer(page_segment, locator, "page")?,
        box_number: positive_integer(box_segment, locator, "box")?,
    })
}

/// Return the first maximal run of digits (ASCII or Bengali) in `s` as an
/// integer.
pub fn first_integer(s: &str) -> Option<u32> {
    let start = s.find(is_any_digit)?;
    let run = s[start..]
        .chars()
        .take_while(|&c| is_any_digit(c))
        .collect::<String>();
    to_ascii_digits(&run).parse().ok()
}

fn positive_integer(
    segment: &str,
    locator: &str,
    what: &'static str,
) -> Result<u32, KeyError> {
    match first_integer(segment) {
        Some(n) if n > 0 => Ok(n),
        Some(_) => Err(KeyError::Unparseable {
            locator: locator.to_owned(),
            reason: if what == "page" {
                "page number is zero"
            } else {
                "box number is zero"
            },
        }),
        None => Err(KeyError::Unparseable {
            locator: locator.to_owned(),
            reason: if what == "page" {
                "no page number found"
            } else {
                "no box number found"
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::digits::to_bengali_digits;

    #[test]
    fn derives_key_from_crop_path() {
        assert_eq!(
            derive_key("out/crops/Page_003/Box_07.jpg"),
            Ok(RecordKey::new(3, 7))
        );
        assert_eq!(
            derive_key(r"C:\crops\Page_12\Box_1.png"),
            Ok(RecordKey::new(12, 1))
        );
        assert_eq!(derive_key("Page_০০৫/Box_০২.jpg"), Ok(RecordKey::new(5, 2)));
    }

    #[test]
    fn rejects_unparseable_locators() {
        assert!(matches!(
            derive_key("Box_01.jpg"),
            Err(KeyError::Unparseable { .. })
        ));
        assert!(derive_key("Page/Box_01.jpg").is_err());
        assert!(derive_key("Page_003/cover.jpg").is_err());
        assert!(derive_key("Page_000/Box_01.jpg").is_err());
    }

    #[test]
    fn builds_key_from_table_cells() {
        assert_eq!(
            RecordKey::from_names("Page_004", "Box_11.jpg"),
            Ok(RecordKey::new(4, 11))
        );
        assert_eq!(RecordKey::from_names("4", "11"), Ok(RecordKey::new(4, 11)));
        assert!(RecordKey::from_names("", "11").is_err());
    }

    #[test]
    fn first_integer_takes_first_run() {
        assert_eq!(first_integer("Box_02_v3"), Some(2));
        assert_eq!(first_integer("no digits"), None);
        assert_eq!(first_integer("99999999999999"), None);
    }

    #[test]
    fn keys_order_by_page_then_box() {
        let mut keys = vec![
            RecordKey::new(4, 1),
            RecordKey::new(3, 18),
            RecordKey::new(3, 2),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                RecordKey::new(3, 2),
                RecordKey::new(3, 18),
                RecordKey::new(4, 1)
            ]
        );
    }

    proptest! {
        #[test]
        fn crop_path_round_trips(page in 1u32..5000, box_number in 1u32..100) {
            let key = RecordKey::new(page, box_number);
            let path = Path::new("crops").join(key.crop_path("jpg"));
            prop_assert_eq!(derive_key(&path.to_string_lossy()), Ok(key));
        }

        #[test]
        fn bengali_locators_round_trip(page in 1u32..5000, box_number in 1u32..100) {
            let locator = to_bengali_digits(&format!("Page_{page:03}/Box_{box_number:02}.jpg"));
            prop_assert_eq!(derive_key(&locator), Ok(RecordKey::new(page, box_number)));
        }
    }
}
