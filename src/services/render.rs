// src/services/render.rs

//! Table rendering for post attachments.
//!
//! The table is laid out as SVG and rasterised to PNG, the format the post
//! API accepts.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use resvg::{tiny_skia, usvg};

use crate::error::{AppError, Result};
use crate::models::{Category, Snapshot};
use crate::pipeline::diff::Delta;

/// Renders a snapshot (and its delta) to an image file.
#[async_trait]
pub trait TableRenderer: Send + Sync {
    async fn render(&self, snapshot: &Snapshot, delta: &Delta) -> Result<PathBuf>;
}

const ROW_HEIGHT: usize = 28;
const NAME_WIDTH: usize = 160;
const CELL_WIDTH: usize = 90;
const FONT: &str = "'Noto Sans CJK JP', 'Hiragino Sans', sans-serif";

/// Output pixels per SVG unit.
const SCALE: f32 = 2.0;

/// Writes the table as `<dir>/<token>.png`.
#[derive(Clone)]
pub struct PngTableRenderer {
    dir: PathBuf,
    fonts: Arc<usvg::fontdb::Database>,
}

impl PngTableRenderer {
    /// Create a renderer using the fonts installed on this machine.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let mut fonts = usvg::fontdb::Database::new();
        fonts.load_system_fonts();
        log::debug!("Loaded {} font faces for table rendering", fonts.len());
        Self {
            dir: dir.into(),
            fonts: Arc::new(fonts),
        }
    }

    /// Rasterise an SVG document to PNG bytes.
    pub fn rasterize(svg: &str, fonts: Arc<usvg::fontdb::Database>) -> Result<Vec<u8>> {
        let options = usvg::Options {
            fontdb: fonts,
            ..usvg::Options::default()
        };
        let tree = usvg::Tree::from_str(svg, &options).map_err(AppError::render)?;

        let size = tree.size().to_int_size();
        let width = (size.width() as f32 * SCALE).ceil() as u32;
        let height = (size.height() as f32 * SCALE).ceil() as u32;
        let mut pixmap = tiny_skia::Pixmap::new(width, height)
            .ok_or_else(|| AppError::render(format!("cannot allocate {width}x{height} image")))?;
        pixmap.fill(tiny_skia::Color::WHITE);

        resvg::render(
            &tree,
            tiny_skia::Transform::from_scale(SCALE, SCALE),
            &mut pixmap.as_mut(),
        );
        pixmap.encode_png().map_err(AppError::render)
    }

    /// Build the SVG document.
    pub fn to_svg(snapshot: &Snapshot, delta: &Delta) -> String {
        let mut header = vec!["市町村".to_string()];
        header.push(Category::Macro.label().to_string());
        header.push("増減".to_string());
        for category in &Category::ALL[1..] {
            header.push(category.label().to_string());
        }

        let mut rows: Vec<Vec<String>> = Vec::with_capacity(snapshot.len() + 1);
        for ((_, counts), change) in snapshot.rows().zip(&delta.rows) {
            let macro_delta = change.delta[Category::Macro];
            rows.push(vec![
                change.municipality.clone(),
                counts[Category::Macro].to_string(),
                if macro_delta == 0 {
                    String::new()
                } else {
                    format!("{macro_delta:+}")
                },
                counts[Category::Femto].to_string(),
                counts[Category::MilliWave].to_string(),
                counts[Category::Sub6].to_string(),
            ]);
        }
        rows.push(vec![
            "合計".to_string(),
            snapshot.total(Category::Macro).to_string(),
            format!("{:+}", delta.total(Category::Macro)),
            snapshot.total(Category::Femto).to_string(),
            snapshot.total(Category::MilliWave).to_string(),
            snapshot.total(Category::Sub6).to_string(),
        ]);

        let width = NAME_WIDTH + CELL_WIDTH * (header.len() - 1);
        let height = ROW_HEIGHT * (rows.len() + 1);

        let mut svg = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" font-family=\"{FONT}\" font-size=\"14\">\n"
        );
        svg.push_str(&format!(
            "<rect width=\"{width}\" height=\"{ROW_HEIGHT}\" fill=\"#bf0000\"/>\n"
        ));
        svg.push_str(&Self::row(&header, 0, "#ffffff"));

        for (i, row) in rows.iter().enumerate() {
            let y = ROW_HEIGHT * (i + 1);
            let fill = if i % 2 == 0 { "#ffffff" } else { "#f2f2f2" };
            svg.push_str(&format!(
                "<rect y=\"{y}\" width=\"{width}\" height=\"{ROW_HEIGHT}\" fill=\"{fill}\"/>\n"
            ));
            svg.push_str(&Self::row(row, y, "#000000"));
        }

        svg.push_str("</svg>\n");
        svg
    }

    fn row(cells: &[String], y: usize, color: &str) -> String {
        let baseline = y + ROW_HEIGHT - 9;
        let mut out = String::new();
        for (i, cell) in cells.iter().enumerate() {
            let (x, anchor) = if i == 0 {
                (8, "start")
            } else {
                (NAME_WIDTH + CELL_WIDTH * i - 8, "end")
            };
            out.push_str(&format!(
                "<text x=\"{x}\" y=\"{baseline}\" fill=\"{color}\" text-anchor=\"{anchor}\">{}</text>\n",
                escape_xml(cell)
            ));
        }
        out
    }
}

#[async_trait]
impl TableRenderer for PngTableRenderer {
    async fn render(&self, snapshot: &Snapshot, delta: &Delta) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::render(format!("{}: {e}", self.dir.display())))?;

        let svg = Self::to_svg(snapshot, delta);
        let fonts = Arc::clone(&self.fonts);
        let png = tokio::task::spawn_blocking(move || Self::rasterize(&svg, fonts))
            .await
            .map_err(AppError::render)??;

        let path = self.dir.join(format!("{}.png", snapshot.updated));
        tokio::fs::write(&path, png)
            .await
            .map_err(|e| AppError::render(format!("{}: {e}", path.display())))?;

        log::info!("Rendered table to {}", path.display());
        Ok(path)
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
