//! Where the record boxes are on each page.
//!
//! Voter rolls have two cover pages, one "start" page with a header that
//! pushes the grid down, and then any number of standard pages. Coordinates
//! are in pixels at [`LayoutConfig::dpi`].

use image::DynamicImage;
use schemars::JsonSchema;

use crate::{key::RecordKey, prelude::*};

/// The role of a page, which decides its box grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageRole {
    /// No record boxes.
    Cover,
    /// The first page with records.
    Start,
    /// Every page after the start page.
    Standard,
}

/// A grid of boxes, given as the left edges of the columns and the top edges
/// of the rows.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GridConfig {
    pub columns: Vec<u32>,
    pub rows: Vec<u32>,
}

/// Layout settings, usually loaded from our config file.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    /// The resolution at which pages are rendered.
    pub dpi: u32,
    /// Width of every box.
    pub box_width: u32,
    /// Height of every box.
    pub box_height: u32,
    /// Should crops be converted to grayscale before OCR?
    pub grayscale: bool,
    /// The grid for the start page.
    pub start_page: GridConfig,
    /// The grid for every later page.
    pub standard_page: GridConfig,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            dpi: 600,
            box_width: 1300,
            box_height: 440,
            grayscale: true,
            start_page: GridConfig {
                columns: vec![375, 1689, 3005],
                rows: vec![634, 1085, 1535, 1985, 2435],
            },
            standard_page: GridConfig {
                columns: vec![375, 1689, 3006],
                rows: vec![234, 684, 1134, 1584, 2034, 2484],
            },
        }
    }
}

/// One record box on a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoxRect {
    /// 1-based, row-major.
    pub box_number: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoxRect {
    /// Crop this box out of a page image, clipping it to the page edges.
    pub fn crop(&self, page: &DynamicImage) -> Result<DynamicImage> {
        let x2 = (self.x + self.width).min(page.width());
        let y2 = (self.y + self.height).min(page.height());
        if x2 <= self.x || y2 <= self.y {
            return Err(anyhow!(
                "box {} at ({}, {}) lies outside the {}x{} page",
                self.box_number,
                self.x,
                self.y,
                page.width(),
                page.height(),
            ));
        }
        Ok(page.crop_imm(self.x, self.y, x2 - self.x, y2 - self.y))
    }
}

/// A validated page layout.
#[derive(Clone, Debug)]
pub struct Layout {
    config: LayoutConfig,
}

impl Layout {
    /// Validate `config` and build a layout. A bad layout is a structural
    /// error, so callers should fail before doing any per-record work.
    pub fn new(config: LayoutConfig) -> Result<Self> {
        if config.dpi == 0 {
            return Err(anyhow!("layout DPI must be positive"));
        }
        if config.box_width == 0 || config.box_height == 0 {
            return Err(anyhow!(
                "layout box size must be positive, got {}x{}",
                config.box_width,
                config.box_height
            ));
        }
        for (name, grid) in [
            ("start_page", &config.start_page),
            ("standard_page", &config.standard_page),
        ] {
            if grid.columns.is_empty() || grid.rows.is_empty() {
                return Err(anyhow!("layout grid {name} has no boxes"));
            }
        }
        Ok(Self { config })
    }

    /// The resolution our coordinates assume.
    pub fn dpi(&self) -> u32 {
        self.config.dpi
    }

    /// Should crops be converted to grayscale?
    pub fn grayscale(&self) -> bool {
        self.config.grayscale
    }

    /// The role of the page at 0-based `page_index`.
    pub fn role_for(&self, page_index: u32) -> PageRole {
        match page_index {
            0 | 1 => PageRole::Cover,
            2 => PageRole::Start,
            _ => PageRole::Standard,
        }
    }

    /// The boxes on the page at 0-based `page_index`, in row-major order.
    pub fn boxes_for(&self, page_index: u32) -> Vec<BoxRect> {
        let grid = match self.role_for(page_index) {
            PageRole::Cover => return vec![],
            PageRole::Start => &self.config.start_page,
            PageRole::Standard => &self.config.standard_page,
        };
        let mut boxes = Vec::with_capacity(grid.rows.len() * grid.columns.len());
        for &y in &grid.rows {
            for &x in &grid.columns {
                boxes.push(BoxRect {
                    box_number: boxes.len() as u32 + 1,
                    x,
                    y,
                    width: self.config.box_width,
                    height: self.config.box_height,
                });
            }
        }
        boxes
    }

    /// The key for a box on the page at 0-based `page_index`.
    pub fn key_for(&self, page_index: u32, rect: &BoxRect) -> RecordKey {
        RecordKey::new(page_index + 1, rect.box_number)
    }
}
