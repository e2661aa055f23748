//! Rendering PDF pages and cutting them into record boxes.

use std::{collections::BTreeMap, time::Duration};

use image::DynamicImage;
use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, spawn_blocking_propagating_panics, with_timeout},
    cpu_limit::with_cpu_semaphore,
    extractors::ImageData,
    key::RecordKey,
    layout::Layout,
    prelude::*,
};

/// Something which can turn document pages into images.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// The number of pages in the document.
    async fn page_count(&self) -> Result<u32>;

    /// Render the page at 0-based `page_index`.
    async fn render(&self, page_index: u32, dpi: u32) -> Result<DynamicImage>;
}

/// Renders PDF pages using Poppler's `pdfinfo` and `pdftocairo` CLI tools.
pub struct PdfRenderer {
    path: PathBuf,
    password: Option<String>,
    timeout: Duration,
}

impl PdfRenderer {
    /// Create a renderer for the PDF at `path`.
    pub fn new(path: &Path, password: Option<String>, timeout: Duration) -> Result<Self> {
        if !path.is_file() {
            return Err(anyhow!("PDF file {:?} does not exist", path));
        }
        Ok(Self {
            path: path.to_owned(),
            password,
            timeout,
        })
    }
}

#[async_trait]
impl Renderer for PdfRenderer {
    async fn page_count(&self) -> Result<u32> {
        get_pdf_page_count(&self.path, self.password.as_deref(), self.timeout).await
    }

    #[instrument(level = "debug", skip(self), fields(path = %self.path.display()))]
    async fn render(&self, page_index: u32, dpi: u32) -> Result<DynamicImage> {
        let tmpdir = tempfile::TempDir::with_prefix("page")?;
        let out_base = tmpdir.path().join("page");

        // `pdftocairo` uses 1-based, inclusive page ranges. With
        // `-singlefile`, it writes exactly `out_base.png`.
        let page_number = (page_index + 1).to_string();
        let mut cmd = Command::new("pdftocairo");
        cmd.arg("-png")
            .arg("-singlefile")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(&page_number)
            .arg("-l")
            .arg(&page_number);
        if let Some(password) = &self.password {
            cmd.arg("-opw").arg(password);
        }
        cmd.arg(&self.path).arg(&out_base);
        run_tool("pdftocairo", cmd, self.timeout)
            .await
            .with_context(|| {
                format!("failed to render page {} of {:?}", page_number, self.path.display())
            })?;

        let png_path = out_base.with_extension("png");
        spawn_blocking_propagating_panics(move || {
            let image = image::open(&png_path)
                .with_context(|| format!("failed to read rendered page {:?}", png_path));
            // Keep the directory alive until we've read the page.
            drop(tmpdir);
            image
        })
        .await?
    }
}

/// Run one of the Poppler tools under the CPU semaphore, killing it if it
/// takes longer than `timeout`.
async fn run_tool(
    name: &str,
    mut cmd: Command,
    timeout: Duration,
) -> Result<std::process::Output> {
    cmd.kill_on_drop(true);
    let output = with_timeout(
        name,
        timeout,
        with_cpu_semaphore(|| async {
            cmd.output()
                .await
                .with_context(|| format!("failed to run {name}"))
        }),
    )
    .await?;
    check_for_command_failure(name, &output)?;
    Ok(output)
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(
    path: &Path,
    password: Option<&str>,
    timeout: Duration,
) -> Result<u32> {
    let mut cmd = Command::new("pdfinfo");
    if let Some(password) = password {
        cmd.arg("-opw").arg(password);
    }
    cmd.arg(path);
    let output = run_tool("pdfinfo", cmd, timeout)
        .await
        .with_context(|| format!("failed to count pages in {:?}", path.display()))?;

    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    parse_pdfinfo_page_count(&output).with_context(|| {
        format!(
            "failed to parse page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}

/// Find the `Pages:` line in `pdfinfo` output.
fn parse_pdfinfo_page_count(output: &str) -> Result<u32> {
    let mut properties = BTreeMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key, value);
    }
    let page_count = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    Ok(page_count.parse::<u32>()?)
}

/// One record box of a page, ready for OCR.
#[derive(Clone, Debug)]
pub struct BoxImage {
    pub key: RecordKey,
    /// The cropped image, or `None` if the box falls off the page.
    pub image: Option<ImageData>,
}

/// Cut the page at `page_index` into its record boxes. Boxes that fall off
/// the page are logged and returned without an image.
pub fn crop_boxes(layout: &Layout, page_index: u32, page: &DynamicImage) -> Result<Vec<BoxImage>> {
    let mut boxes = vec![];
    for rect in layout.boxes_for(page_index) {
        let key = layout.key_for(page_index, &rect);
        let image = match rect.crop(page) {
            Ok(crop) if layout.grayscale() => Some(ImageData::from_image(
                &DynamicImage::ImageLuma8(crop.to_luma8()),
            )?),
            Ok(crop) => Some(ImageData::from_image(&crop)?),
            Err(err) => {
                warn!(%key, "Box is off the page: {:?}", err);
                None
            }
        };
        boxes.push(BoxImage { key, image });
    }
    Ok(boxes)
}

/// Render a page and crop its boxes. Cover pages are never rendered.
#[instrument(level = "debug", skip(renderer, layout))]
pub async fn render_boxes(
    renderer: &dyn Renderer,
    layout: &Layout,
    page_index: u32,
) -> Result<Vec<BoxImage>> {
    if layout.boxes_for(page_index).is_empty() {
        return Ok(vec![]);
    }
    let page = renderer.render(page_index, layout.dpi()).await?;
    let layout = layout.clone();
    spawn_blocking_propagating_panics(move || crop_boxes(&layout, page_index, &page)).await?
}
