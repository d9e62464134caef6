//! PDF rasterisation: render every page to a `DynamicImage` via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is not safe to drive from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so
//! rendering never stalls the Tokio worker threads.
//!
//! The rasteriser sits behind the [`Rasterizer`] trait so the ingestion
//! pipeline can be exercised in tests with synthetic images instead of a
//! pdfium binary.

use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

use crate::error::LecternError;

/// Turns a PDF file into its ordered sequence of page images.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Render all pages, in page order (index 0 = page 1). Rasterisation is
    /// all-or-nothing: a page that cannot render fails the document, since a
    /// missing page image is unrecoverable downstream.
    async fn rasterize(&self, pdf_path: &Path) -> Result<Vec<DynamicImage>, LecternError>;
}

/// Production rasteriser backed by pdfium.
pub struct PdfiumRasterizer {
    /// Cap on the longest rendered edge, in pixels. Bounds memory for
    /// physically large pages independent of DPI.
    max_pixels: u32,
}

impl PdfiumRasterizer {
    pub fn new(max_pixels: u32) -> Self {
        Self {
            max_pixels: max_pixels.max(100),
        }
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(&self, pdf_path: &Path) -> Result<Vec<DynamicImage>, LecternError> {
        let path = pdf_path.to_path_buf();
        let max_pixels = self.max_pixels;

        tokio::task::spawn_blocking(move || render_all_blocking(&path, max_pixels))
            .await
            .map_err(|e| LecternError::Internal(format!("render task panicked: {e}")))?
    }
}

fn render_all_blocking(
    pdf_path: &Path,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, LecternError> {
    let pdfium = Pdfium::default();

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| LecternError::CorruptPdf {
            detail: format!("{e:?}"),
        })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    info!("PDF loaded: {} pages", total);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(total);
    for idx in 0..total {
        let page = pages
            .get(idx as u16)
            .map_err(|e| LecternError::RasterizationFailed {
                page: idx + 1,
                detail: format!("{e:?}"),
            })?;

        let bitmap =
            page.render_with_config(&render_config)
                .map_err(|e| LecternError::RasterizationFailed {
                    page: idx + 1,
                    detail: format!("{e:?}"),
                })?;

        let image = bitmap.as_image();
        debug!(
            "rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    Ok(images)
}
