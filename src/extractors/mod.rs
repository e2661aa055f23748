//! Text extractors turn an image of a record box into raw text.

use std::{io::Cursor, sync::Arc, time::Duration};

use clap::ValueEnum;
use image::{DynamicImage, ImageFormat};

use crate::{async_utils::with_timeout, config::Config, prelude::*};

pub mod tesseract;
pub mod vision;

/// An encoded image, ready to send to an extractor.
#[derive(Clone, Debug)]
pub struct ImageData {
    /// The MIME type of our data.
    pub mime_type: String,
    /// The encoded image.
    pub data: Vec<u8>,
}

impl ImageData {
    /// Read an image file, guessing its MIME type from the extension.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let mime_type = mime_guess::from_path(path)
            .first()
            .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
            .ok_or_else(|| anyhow!("{:?} does not look like an image", path))?
            .essence_str()
            .to_owned();
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read image {:?}", path))?;
        Ok(Self { mime_type, data })
    }

    /// Encode an in-memory image as PNG.
    pub fn from_image(image: &DynamicImage) -> Result<Self> {
        let mut data = vec![];
        image
            .write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
            .context("failed to encode image as PNG")?;
        Ok(Self {
            mime_type: "image/png".to_owned(),
            data,
        })
    }

    /// A file extension matching our MIME type.
    pub fn extension(&self) -> Result<&'static str> {
        mime_guess::get_mime_extensions_str(&self.mime_type)
            .and_then(|exts| exts.first())
            .copied()
            .ok_or_else(|| anyhow!("cannot determine extension for {}", self.mime_type))
    }
}

/// Something which can OCR an image.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// A short name for log messages.
    fn name(&self) -> &str;

    /// How long to wait for [`TextExtractor::extract`] before giving up.
    fn timeout(&self) -> Duration;

    /// Extract the text from `image`.
    async fn extract(&self, image: &ImageData) -> Result<String>;
}

/// Run `extractor` on `image` with its timeout. Errors and timeouts are
/// logged and treated as empty text, so one bad box never stops a batch.
pub async fn extract_or_empty(extractor: &dyn TextExtractor, image: &ImageData) -> String {
    let result = with_timeout(
        extractor.name(),
        extractor.timeout(),
        extractor.extract(image),
    )
    .await;
    match result {
        Ok(text) => text,
        Err(err) => {
            warn!(extractor = extractor.name(), "Text extraction failed: {:?}", err);
            String::new()
        }
    }
}

/// Builds a fresh extractor for each worker.
pub type ExtractorFactory = Arc<dyn Fn() -> Result<Box<dyn TextExtractor>> + Send + Sync>;

/// The extractors we support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ExtractorKind {
    /// The local `tesseract` CLI. Free.
    Tesseract,
    /// Google Cloud Vision document text detection. Paid, needs an API key.
    Vision,
}

impl ExtractorKind {
    /// Create a new extractor of this kind.
    pub fn create(self, config: &Config) -> Result<Box<dyn TextExtractor>> {
        Ok(match self {
            ExtractorKind::Tesseract => {
                Box::new(tesseract::TesseractExtractor::new(config.tesseract.clone()))
            }
            ExtractorKind::Vision => {
                Box::new(vision::VisionExtractor::new(config.vision.clone())?)
            }
        })
    }

    /// Make a factory for extractors of this kind. We build one extractor up
    /// front so that missing credentials fail before any work starts.
    pub fn factory(self, config: &Config) -> Result<ExtractorFactory> {
        self.create(config)?;
        let config = config.clone();
        Ok(Arc::new(move || self.create(&config)))
    }
}
