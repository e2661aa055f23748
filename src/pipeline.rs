//! The batch passes: cropping pages, OCRing crops, and extracting records
//! straight from a document.
//!
//! Each pass runs its units through [`run_pool`], with one extractor per
//! worker.

use std::sync::Arc;

use indicatif::ProgressBar;

use crate::{
    async_utils::io::write_csv_atomic,
    extractors::{ExtractorFactory, ImageData, TextExtractor, extract_or_empty},
    key::RecordKey,
    layout::Layout,
    parser::{FieldParser, Tier},
    pool::{Worker, run_pool},
    prelude::*,
    record::{FieldValues, VoterRecord},
    render::{Renderer, render_boxes},
    sources::{ImageIndex, RawTextRow},
    store::{RecordSet, RecordStore},
};

/// Pages per checkpoint during extraction.
pub const DEFAULT_CHECKPOINT_PAGES: u32 = 5;

/// Renders pages and writes their boxes to disk.
struct CropWorker {
    renderer: Arc<dyn Renderer>,
    layout: Layout,
    out_dir: PathBuf,
}

impl CropWorker {
    async fn crop_page(&self, page_index: u32) -> Result<usize> {
        let boxes = render_boxes(self.renderer.as_ref(), &self.layout, page_index).await?;
        let mut written = 0;
        for box_image in &boxes {
            let Some(image) = &box_image.image else {
                continue;
            };
            let path = self.out_dir.join(box_image.key.crop_path(image.extension()?));
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create {:?}", parent))?;
            }
            tokio::fs::write(&path, &image.data)
                .await
                .with_context(|| format!("failed to write {:?}", path))?;
            written += 1;
        }
        Ok(written)
    }
}

#[async_trait]
impl Worker for CropWorker {
    type Unit = u32;
    type Output = usize;

    async fn process(&mut self, page_index: u32) -> usize {
        match self.crop_page(page_index).await {
            Ok(count) => count,
            Err(err) => {
                warn!(page = page_index + 1, "Could not crop page: {:?}", err);
                0
            }
        }
    }
}

/// Write every box of every non-cover page to `out_dir` as
/// `Page_NNN/Box_NN.png`. Returns the number of crops written.
#[instrument(level = "debug", skip_all, fields(out_dir = %out_dir.display()))]
pub async fn crop_pages(
    renderer: Arc<dyn Renderer>,
    layout: &Layout,
    out_dir: &Path,
    worker_count: usize,
    progress: Option<ProgressBar>,
) -> Result<usize> {
    let page_count = renderer.page_count().await?;
    if page_count == 0 {
        return Err(anyhow!("document has no pages"));
    }
    if let Some(progress) = &progress {
        progress.set_length(u64::from(page_count));
    }
    let layout = layout.clone();
    let out_dir = out_dir.to_owned();
    let counts = run_pool(
        (0..page_count).collect(),
        worker_count,
        move |_| {
            Ok(CropWorker {
                renderer: renderer.clone(),
                layout: layout.clone(),
                out_dir: out_dir.clone(),
            })
        },
        progress,
    )
    .await?;
    Ok(counts.into_iter().sum())
}

/// OCRs crop files.
struct OcrWorker {
    extractor: Box<dyn TextExtractor>,
}

#[async_trait]
impl Worker for OcrWorker {
    type Unit = (RecordKey, PathBuf);
    type Output = RawTextRow;

    async fn process(&mut self, (key, path): (RecordKey, PathBuf)) -> RawTextRow {
        let raw_text = match ImageData::from_path(&path).await {
            Ok(image) => extract_or_empty(self.extractor.as_ref(), &image).await,
            Err(err) => {
                warn!(%key, "Could not read crop: {:?}", err);
                String::new()
            }
        };
        RawTextRow {
            page: key.page,
            box_number: key.box_number,
            raw_text: raw_text.trim().to_owned(),
        }
    }
}

/// OCR every image in `images` and write a raw text cache to `output`.
/// Returns the rows written, sorted by key.
#[instrument(level = "debug", skip_all, fields(output = %output.display()))]
pub async fn ocr_crops(
    images: &ImageIndex,
    extractors: ExtractorFactory,
    output: &Path,
    worker_count: usize,
    progress: Option<ProgressBar>,
) -> Result<Vec<RawTextRow>> {
    if images.is_empty() {
        return Err(anyhow!("no images to OCR"));
    }
    let units = images
        .iter()
        .map(|(key, path)| (key, path.to_owned()))
        .collect::<Vec<_>>();
    let mut rows = run_pool(
        units,
        worker_count,
        move |_| Ok(OcrWorker { extractor: extractors()? }),
        progress,
    )
    .await?;
    rows.sort_by_key(RawTextRow::key);
    write_csv_atomic(output, &rows)?;
    Ok(rows)
}

/// Build records from raw text rows, and merge them into `records`.
pub fn parse_rows(
    records: &mut RecordSet,
    parser: &FieldParser,
    tier: Tier,
    rows: &[RawTextRow],
) {
    for row in rows {
        let parsed = parser.parse(&row.raw_text, tier);
        records.merge(VoterRecord::new(row.key(), parsed.fields, &row.raw_text));
    }
}

/// Renders, OCRs and parses whole pages.
struct PageWorker {
    renderer: Arc<dyn Renderer>,
    layout: Layout,
    parser: FieldParser,
    extractor: Box<dyn TextExtractor>,
}

#[async_trait]
impl Worker for PageWorker {
    type Unit = u32;
    type Output = Vec<VoterRecord>;

    async fn process(&mut self, page_index: u32) -> Vec<VoterRecord> {
        let boxes =
            match render_boxes(self.renderer.as_ref(), &self.layout, page_index).await {
                Ok(boxes) => boxes,
                Err(err) => {
                    // Keep a blank record for every box, so repair can find
                    // them later.
                    warn!(page = page_index + 1, "Could not render page: {:?}", err);
                    return self
                        .layout
                        .boxes_for(page_index)
                        .iter()
                        .map(|rect| {
                            VoterRecord::new(
                                self.layout.key_for(page_index, rect),
                                FieldValues::new(),
                                "",
                            )
                        })
                        .collect();
                }
            };

        let mut records = Vec::with_capacity(boxes.len());
        for box_image in boxes {
            // Boxes off the page still get a blank record for repair to find.
            let text = match &box_image.image {
                Some(image) => extract_or_empty(self.extractor.as_ref(), image).await,
                None => String::new(),
            };
            let parsed = self.parser.parse(&text, Tier::Strict);
            trace!(key = %box_image.key, missing = ?parsed.missing, "Parsed box");
            records.push(VoterRecord::new(box_image.key, parsed.fields, &text));
        }
        records
    }
}

/// Extract records from every page of a document, resuming after the last
/// page already in `store`, and saving a checkpoint every `checkpoint_pages`
/// pages.
pub struct ExtractPass {
    pub renderer: Arc<dyn Renderer>,
    pub layout: Layout,
    pub parser: FieldParser,
    pub extractors: ExtractorFactory,
    pub worker_count: usize,
    pub checkpoint_pages: u32,
}

impl ExtractPass {
    #[instrument(level = "debug", skip_all, fields(table = %store.path().display()))]
    pub async fn run(
        &self,
        store: &RecordStore,
        progress: Option<ProgressBar>,
    ) -> Result<RecordSet> {
        let mut records = store.load_existing()?;
        let page_count = self.renderer.page_count().await?;
        if page_count == 0 {
            return Err(anyhow!("document has no pages"));
        }

        // Page numbers are 1-based, so the last completed page number is also
        // the index of the next page.
        let first_index = records.last_completed_page().unwrap_or(0);
        if first_index >= page_count {
            info!(page_count, "Every page has already been extracted");
            return Ok(records);
        }
        if first_index > 0 {
            info!(page = first_index + 1, "Resuming extraction");
        }
        if let Some(progress) = &progress {
            progress.set_length(u64::from(page_count - first_index));
        }

        let checkpoint_pages = self.checkpoint_pages.max(1);
        let mut batch_start = first_index;
        while batch_start < page_count {
            let batch_end = batch_start.saturating_add(checkpoint_pages).min(page_count);
            let pages = (batch_start..batch_end).collect::<Vec<_>>();

            let renderer = self.renderer.clone();
            let layout = self.layout.clone();
            let parser = self.parser.clone();
            let extractors = self.extractors.clone();
            let outputs = run_pool(
                pages,
                self.worker_count,
                move |_| {
                    Ok(PageWorker {
                        renderer: renderer.clone(),
                        layout: layout.clone(),
                        parser: parser.clone(),
                        extractor: extractors()?,
                    })
                },
                progress.clone(),
            )
            .await?;
            for record in outputs.into_iter().flatten() {
                records.merge(record);
            }

            store.save(&records)?;
            info!(
                last_page = batch_end,
                records = records.len(),
                "Saved checkpoint"
            );
            batch_start = batch_end;
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::{
        record::{Field, RecordStatus},
        render::tests::{BlankRenderer, tiny_layout},
    };

    /// Always returns the same text.
    struct FixedExtractor(&'static str);

    #[async_trait]
    impl TextExtractor for FixedExtractor {
        fn name(&self) -> &str {
            "fixed"
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(5)
        }

        async fn extract(&self, _image: &ImageData) -> Result<String> {
            Ok(self.0.to_owned())
        }
    }

    fn fixed_factory(text: &'static str, created: Arc<AtomicUsize>) -> ExtractorFactory {
        Arc::new(move || {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FixedExtractor(text)) as Box<dyn TextExtractor>)
        })
    }

    fn extract_pass(pages: u32, text: &'static str) -> ExtractPass {
        ExtractPass {
            renderer: Arc::new(BlankRenderer { pages }),
            layout: tiny_layout(),
            parser: FieldParser::default(),
            extractors: fixed_factory(text, Arc::default()),
            worker_count: 2,
            checkpoint_pages: 2,
        }
    }

    #[tokio::test]
    async fn extract_builds_a_record_per_box() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("records.csv"));
        let pass = extract_pass(5, "নাম: করিম ভোটার নং: 1234567890");
        let records = pass.run(&store, None).await.unwrap();

        // Pages 3 to 5 have 4 boxes each. Pages 1 and 2 are covers.
        assert_eq!(records.len(), 12);
        assert_eq!(records.last_completed_page(), Some(5));
        let record = records.get(&RecordKey::new(3, 1)).unwrap();
        assert_eq!(record.fields.get(Field::Name), Some("করিম"));
        assert_eq!(record.status, RecordStatus::Ok);
        assert!(record.raw_text.contains("করিম"));

        assert_eq!(store.load_existing().unwrap(), records);
    }

    #[tokio::test]
    async fn extract_resumes_after_last_page() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("records.csv"));
        extract_pass(4, "নাম: করিম").run(&store, None).await.unwrap();

        let created = Arc::new(AtomicUsize::new(0));
        let mut pass = extract_pass(6, "ভোটার নং: 1234567890");
        pass.extractors = fixed_factory("ভোটার নং: 1234567890", created.clone());
        let records = pass.run(&store, None).await.unwrap();

        // Page 4 was already done, so it is not OCRed again.
        let old = records.get(&RecordKey::new(4, 1)).unwrap();
        assert_eq!(old.fields.get(Field::VoterId), None);
        let new = records.get(&RecordKey::new(6, 1)).unwrap();
        assert_eq!(new.fields.get(Field::VoterId), Some("১২৩৪৫৬৭৮৯০"));
        // Two pages in one batch: one extractor per worker.
        assert_eq!(created.load(Ordering::SeqCst), 2);

        // Nothing left to do.
        let again = pass.run(&store, None).await.unwrap();
        assert_eq!(again, records);
    }

    #[tokio::test]
    async fn unrenderable_pages_get_blank_records() {
        struct BrokenRenderer;

        #[async_trait]
        impl Renderer for BrokenRenderer {
            async fn page_count(&self) -> Result<u32> {
                Ok(3)
            }

            async fn render(&self, _page_index: u32, _dpi: u32) -> Result<image::DynamicImage> {
                Err(anyhow!("renderer timed out"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("records.csv"));
        let mut pass = extract_pass(3, "নাম: করিম");
        pass.renderer = Arc::new(BrokenRenderer);
        let records = pass.run(&store, None).await.unwrap();
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.status == RecordStatus::NeedsReview));
        assert!(records.iter().all(|r| r.fields.is_empty()));
    }

    #[tokio::test]
    async fn boxes_off_the_page_get_blank_records() {
        /// Renders pages with room for only the first box.
        struct SmallRenderer;

        #[async_trait]
        impl Renderer for SmallRenderer {
            async fn page_count(&self) -> Result<u32> {
                Ok(3)
            }

            async fn render(&self, _page_index: u32, _dpi: u32) -> Result<image::DynamicImage> {
                Ok(image::DynamicImage::ImageLuma8(image::GrayImage::from_pixel(
                    10,
                    5,
                    image::Luma([255]),
                )))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("records.csv"));
        let mut pass = extract_pass(3, "নাম: করিম ভোটার নং: 1234567890");
        pass.renderer = Arc::new(SmallRenderer);
        let records = pass.run(&store, None).await.unwrap();

        assert_eq!(records.len(), 4);
        let first = records.get(&RecordKey::new(3, 1)).unwrap();
        assert_eq!(first.status, RecordStatus::Ok);
        for box_number in 2..=4 {
            let record = records.get(&RecordKey::new(3, box_number)).unwrap();
            assert_eq!(record.status, RecordStatus::NeedsReview);
            assert!(record.fields.is_empty());
        }

        // Cropping writes only the box that fits.
        let written = crop_pages(
            Arc::new(SmallRenderer),
            &tiny_layout(),
            &dir.path().join("crops"),
            1,
            None,
        )
        .await
        .unwrap();
        assert_eq!(written, 1);
    }

    #[tokio::test]
    async fn crops_then_ocrs_into_a_sorted_cache() {
        let dir = tempfile::tempdir().unwrap();
        let crops = dir.path().join("crops");
        let written = crop_pages(
            Arc::new(BlankRenderer { pages: 4 }),
            &tiny_layout(),
            &crops,
            3,
            None,
        )
        .await
        .unwrap();
        assert_eq!(written, 8);
        assert!(crops.join("Page_003/Box_01.png").is_file());
        assert!(crops.join("Page_004/Box_04.png").is_file());

        let images = ImageIndex::from_dir(&crops).unwrap();
        let created = Arc::new(AtomicUsize::new(0));
        let output = dir.path().join("raw.csv");
        let rows = ocr_crops(
            &images,
            fixed_factory(" নাম: করিম \n", created.clone()),
            &output,
            3,
            None,
        )
        .await
        .unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 3);
        assert_eq!(rows.len(), 8);
        let keys = rows.iter().map(RawTextRow::key).collect::<Vec<_>>();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(rows[0].raw_text, "নাম: করিম");

        let index = crate::sources::TextIndex::from_csv(&output).unwrap();
        assert_eq!(index.len(), 8);
    }

    #[test]
    fn parse_rows_keeps_existing_values() {
        let mut records = RecordSet::new();
        let rows = vec![
            RawTextRow {
                page: 3,
                box_number: 1,
                raw_text: "নাম: করিম".to_owned(),
            },
            RawTextRow {
                page: 3,
                box_number: 2,
                raw_text: String::new(),
            },
        ];
        parse_rows(&mut records, &FieldParser::default(), Tier::Strict, &rows);
        assert_eq!(records.len(), 2);

        let again = vec![RawTextRow {
            page: 3,
            box_number: 1,
            raw_text: "নাম: জামাল ভোটার নং: 1234567890".to_owned(),
        }];
        parse_rows(&mut records, &FieldParser::default(), Tier::Strict, &again);
        let record = records.get(&RecordKey::new(3, 1)).unwrap();
        assert_eq!(record.fields.get(Field::Name), Some("করিম"));
        assert_eq!(record.fields.get(Field::VoterId), Some("১২৩৪৫৬৭৮৯০"));
        assert_eq!(record.status, RecordStatus::Ok);
    }
}
