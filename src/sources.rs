//! Indexes of the data we can repair records from: cached OCR text, and the
//! cropped box images.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use walkdir::WalkDir;

use crate::{
    key::{RecordKey, derive_key},
    prelude::*,
    record::raw_text_segments,
    store::RecordSet,
};

/// Accepted names for the page column of a raw text cache.
const PAGE_COLUMNS: &[&str] = &["page", "page name"];
/// Accepted names for the box column of a raw text cache.
const BOX_COLUMNS: &[&str] = &["box", "box name"];
/// Accepted names for the text column of a raw text cache.
const TEXT_COLUMNS: &[&str] = &["raw_text", "raw text", "raw extracted text"];

/// A row of the raw text cache, as written by `ocr-crops`.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
pub struct RawTextRow {
    /// The 1-based page number.
    pub page: u32,
    /// The 1-based box number.
    #[serde(rename = "box")]
    pub box_number: u32,
    /// The OCR text for this box.
    pub raw_text: String,
}

/// Cached OCR text for each record. A record may have several texts, each
/// from a separate OCR run, and they are parsed one at a time.
#[derive(Clone, Debug, Default)]
pub struct TextIndex {
    texts: BTreeMap<RecordKey, Vec<String>>,
}

/// Read every row of a raw text cache, including rows with blank text. Rows
/// with unusable keys are skipped with a warning. A file without the columns
/// we need is an error.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub fn read_raw_text_rows(path: &Path) -> Result<Vec<RawTextRow>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open raw text cache {:?}", path))?;
    let headers = rdr
        .headers()
        .with_context(|| format!("Failed to read CSV headers from {:?}", path))?
        .clone();
    let column = |aliases: &[&str]| {
        headers
            .iter()
            .position(|h| aliases.contains(&h.trim().to_lowercase().as_str()))
            .ok_or_else(|| {
                anyhow!(
                    "{:?} has no {} column (found: {})",
                    path,
                    aliases.join(" / "),
                    headers.iter().collect::<Vec<_>>().join(", ")
                )
            })
    };
    let page_col = column(PAGE_COLUMNS)?;
    let box_col = column(BOX_COLUMNS)?;
    let text_col = column(TEXT_COLUMNS)?;

    let mut rows = vec![];
    for (idx, row) in rdr.records().enumerate() {
        let row = row
            .with_context(|| format!("Failed to read CSV row {} from {:?}", idx + 2, path))?;
        let field = |col| row.get(col).unwrap_or_default();
        match RecordKey::from_names(field(page_col), field(box_col)) {
            Ok(key) => rows.push(RawTextRow {
                page: key.page,
                box_number: key.box_number,
                raw_text: field(text_col).to_owned(),
            }),
            Err(err) => warn!("Skipping raw text row {}: {}", idx + 2, err),
        }
    }
    Ok(rows)
}

impl RawTextRow {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.page, self.box_number)
    }
}

impl TextIndex {
    /// Load a raw text cache. Blank text is skipped.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut index = TextIndex::default();
        for row in read_raw_text_rows(path)? {
            index.insert(row.key(), &row.raw_text);
        }
        debug!(texts = index.len(), "Loaded raw text cache");
        Ok(index)
    }

    /// Use the raw text already stored in a record table, split back into
    /// the separate texts it was built from.
    pub fn from_records(records: &RecordSet) -> Self {
        let mut index = TextIndex::default();
        for record in records.iter() {
            index.insert(record.key, &record.raw_text);
        }
        index
    }

    /// Add text for `key`, skipping blank text and texts we already have.
    pub fn insert(&mut self, key: RecordKey, text: &str) {
        for segment in raw_text_segments(text) {
            let texts = self.texts.entry(key).or_default();
            if !texts.iter().any(|seen| seen == segment) {
                texts.push(segment.to_owned());
            }
        }
    }

    /// Add all of `other`'s texts after our own.
    pub fn extend(&mut self, other: TextIndex) {
        for (key, texts) in other.texts {
            for text in texts {
                self.insert(key, &text);
            }
        }
    }

    /// Every text we have for `key`, in the order they were added.
    pub fn get(&self, key: &RecordKey) -> &[String] {
        self.texts.get(key).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// Cropped box images, found by walking a `Page_NNN/Box_NN.ext` tree.
#[derive(Clone, Debug, Default)]
pub struct ImageIndex {
    paths: BTreeMap<RecordKey, PathBuf>,
}

impl ImageIndex {
    /// Index every image file under `root`. Files whose names don't give us a
    /// key are skipped with a warning.
    #[instrument(level = "debug", skip_all, fields(root = %root.display()))]
    pub fn from_dir(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(anyhow!("image directory {:?} does not exist", root));
        }
        let mut index = ImageIndex::default();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry
                .with_context(|| format!("Failed to walk image directory {:?}", root))?;
            if !entry.file_type().is_file() || !is_image(entry.path()) {
                continue;
            }
            let path = entry.path();
            let Some(locator) = key_locator(path) else {
                warn!("Skipping image {:?}: no parent directory", path);
                continue;
            };
            match derive_key(&locator) {
                Ok(key) => {
                    if let Some(previous) = index.paths.insert(key, path.to_owned()) {
                        warn!(
                            "Both {:?} and {:?} are {}; using the latter",
                            previous, path, key
                        );
                    }
                }
                Err(err) => warn!("Skipping image {:?}: {}", path, err),
            }
        }
        debug!(images = index.len(), "Indexed images");
        Ok(index)
    }

    pub fn get(&self, key: &RecordKey) -> Option<&Path> {
        self.paths.get(key).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Iterate over images in key order.
    pub fn iter(&self) -> impl Iterator<Item = (RecordKey, &Path)> {
        self.paths.iter().map(|(key, path)| (*key, path.as_path()))
    }
}

/// Does this look like an image file?
fn is_image(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .is_some_and(|mime| mime.type_() == mime_guess::mime::IMAGE)
}

/// `parent_dir/file_name`, for [`derive_key`].
fn key_locator(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_string_lossy();
    let parent = path.parent()?.file_name()?.to_string_lossy();
    Some(format!("{parent}/{file_name}"))
}
