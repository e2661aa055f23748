//! Local OCR using the `tesseract` CLI tool.

use std::time::Duration;

use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure, config::TesseractConfig,
    cpu_limit::with_cpu_semaphore, prelude::*,
};

use super::{ImageData, TextExtractor};

/// Extractor wrapping the `tesseract` CLI tool.
pub struct TesseractExtractor {
    config: TesseractConfig,
}

impl TesseractExtractor {
    /// Create a new `tesseract` extractor.
    pub fn new(config: TesseractConfig) -> Self {
        Self { config }
    }

    /// Build the command line for one image.
    fn command(&self, input_path: &Path, output_base: &Path) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.arg(input_path)
            .arg(output_base)
            .arg("-l")
            .arg(&self.config.language);
        if let Some(psm) = self.config.psm {
            cmd.arg("--psm").arg(psm.to_string());
        }
        if let Some(oem) = self.config.oem {
            cmd.arg("--oem").arg(oem.to_string());
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TextExtractor for TesseractExtractor {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    #[instrument(level = "debug", skip_all)]
    async fn extract(&self, image: &ImageData) -> Result<String> {
        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join(format!("input.{}", image.extension()?));
        let output_path = tmpdir.path().join("output.txt");
        tokio::fs::write(&input_path, &image.data)
            .await
            .context("cannot write tesseract input file")?;

        // Run tesseract on the input file. It appends `.txt` to the output
        // path itself.
        let mut cmd = self.command(&input_path, &output_path.with_extension(""));
        let output = with_cpu_semaphore(|| async {
            cmd.output().await.with_context(|| {
                format!("cannot run {:?}", self.config.command)
            })
        })
        .await?;
        check_for_command_failure("tesseract", &output)?;

        // Read the output file.
        let text = tokio::fs::read_to_string(&output_path)
            .await
            .context("cannot read tesseract output file")?;
        trace!(%text, "tesseract output");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, GrayImage, Luma};

    use super::*;

    #[test]
    fn builds_command_line_from_config() {
        let extractor = TesseractExtractor::new(TesseractConfig::default());
        let cmd = extractor.command(Path::new("in.png"), Path::new("out"));
        let args = cmd
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(
            args,
            ["in.png", "out", "-l", "ben", "--psm", "6", "--oem", "1"]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let extractor = TesseractExtractor::new(TesseractConfig {
            command: "definitely-not-tesseract".to_owned(),
            ..TesseractConfig::default()
        });
        let image = ImageData::from_image(&DynamicImage::ImageLuma8(
            GrayImage::from_pixel(4, 4, Luma([255])),
        ))
        .unwrap();
        assert!(extractor.extract(&image).await.is_err());
    }

    #[tokio::test]
    #[ignore = "Requires tesseract with Bengali language data"]
    async fn blank_image_has_no_text() {
        let extractor = TesseractExtractor::new(TesseractConfig::default());
        let image = ImageData::from_image(&DynamicImage::ImageLuma8(
            GrayImage::from_pixel(200, 80, Luma([255])),
        ))
        .unwrap();
        let text = extractor.extract(&image).await.unwrap();
        assert!(text.trim().is_empty());
    }
}
