//! PDF probing (lopdf) and page rasterization (pdfium).

use crate::config::PdfConfig;
use crate::ocr::ImagePayload;
use image::{DynamicImage, ImageOutputFormat, RgbaImage};
use lopdf::Document;
use pdfium_render::prelude::*;
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("not a readable PDF: {0}")]
    Unreadable(String),
    #[error("PDF is password protected")]
    Encrypted,
    #[error("PDF has no pages")]
    Empty,
    #[error("pdfium unavailable: {0}")]
    Backend(String),
    #[error("failed to render page {page}: {reason}")]
    Render { page: usize, reason: String },
}

impl PdfError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Unreadable(_) => "This file does not look like a valid PDF.".to_string(),
            Self::Encrypted => "This PDF is password protected. Please send an unlocked copy.".to_string(),
            Self::Empty => "This PDF has no pages.".to_string(),
            Self::Backend(_) | Self::Render { .. } => {
                "Could not render the PDF pages. Please try again later.".to_string()
            }
        }
    }
}

/// Pages rendered to PNG, capped at the configured limit.
#[derive(Debug, Clone)]
pub struct RasterizedDocument {
    /// Page count of the whole document, before truncation.
    pub total_pages: usize,
    pub pages: Vec<ImagePayload>,
}

/// Turns PDF bytes into page images. Blocking; call from `spawn_blocking`.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(&self, data: &[u8], max_pages: usize) -> Result<RasterizedDocument, PdfError>;
}

/// Parse the document with lopdf and return its page count.
pub fn probe_pdf(data: &[u8]) -> Result<usize, PdfError> {
    let doc = Document::load_mem(data).map_err(|e| PdfError::Unreadable(e.to_string()))?;

    if doc.is_encrypted() {
        return Err(PdfError::Encrypted);
    }

    match doc.get_pages().len() {
        0 => Err(PdfError::Empty),
        n => Ok(n),
    }
}

pub struct PdfiumRasterizer {
    scale: f32,
    lib_path: Option<String>,
}

impl PdfiumRasterizer {
    pub fn new(config: &PdfConfig) -> Self {
        Self {
            scale: config.render_scale,
            lib_path: config.pdfium_lib_path.clone(),
        }
    }

    fn bind(&self) -> Result<Pdfium, PdfError> {
        let bindings = match &self.lib_path {
            Some(dir) => Pdfium::bind_to_library(&Pdfium::pdfium_platform_library_name_at_path(dir)),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| PdfError::Backend(format!("pdfium bind failed: {}", e)))?;

        Ok(Pdfium::new(bindings))
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(&self, data: &[u8], max_pages: usize) -> Result<RasterizedDocument, PdfError> {
        let total_pages = probe_pdf(data)?;
        let to_render = total_pages.min(max_pages);
        info!("Rasterizing {} of {} pages at {}x", to_render, total_pages, self.scale);

        let pdfium = self.bind()?;
        let doc = pdfium
            .load_pdf_from_byte_slice(data, None)
            .map_err(|e| PdfError::Unreadable(format!("pdfium open failed: {}", e)))?;

        let mut pages = Vec::with_capacity(to_render);

        for index in 0..to_render {
            let render_err = |reason: String| PdfError::Render {
                page: index + 1,
                reason,
            };

            let page = doc
                .pages()
                .get(index as u16)
                .map_err(|e| render_err(e.to_string()))?;

            let width = (page.width().value * self.scale) as i32;
            let height = (page.height().value * self.scale) as i32;

            let bitmap = page
                .render_with_config(
                    &PdfRenderConfig::new()
                        .set_target_width(width)
                        .set_maximum_height(height),
                )
                .map_err(|e| render_err(e.to_string()))?;

            // Go through raw RGBA so our `image` version stays independent of pdfium's.
            let rgba = RgbaImage::from_raw(
                bitmap.width() as u32,
                bitmap.height() as u32,
                bitmap.as_rgba_bytes(),
            )
            .ok_or_else(|| render_err("bitmap size mismatch".to_string()))?;

            let mut png = Vec::new();
            DynamicImage::ImageRgba8(rgba)
                .write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)
                .map_err(|e| render_err(format!("PNG encode failed: {}", e)))?;

            debug!("Rendered page {} ({} bytes)", index + 1, png.len());
            pages.push(ImagePayload {
                data: png,
                mime_type: "image/png",
            });
        }

        Ok(RasterizedDocument { total_pages, pages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Object, Stream};

    fn make_pdf(page_count: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut kids: Vec<Object> = Vec::new();
        for _ in 0..page_count {
            let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            });
            kids.push(page_id.into());
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_probe_counts_pages() {
        assert_eq!(probe_pdf(&make_pdf(7)).unwrap(), 7);
        assert_eq!(probe_pdf(&make_pdf(1)).unwrap(), 1);
    }

    #[test]
    fn test_probe_rejects_non_pdf() {
        let err = probe_pdf(b"hello world").unwrap_err();
        assert!(matches!(err, PdfError::Unreadable(_)));
    }

    #[test]
    fn test_probe_rejects_empty_document() {
        assert!(matches!(probe_pdf(&make_pdf(0)), Err(PdfError::Empty)));
    }

    #[test]
    fn test_user_messages_distinct() {
        assert_ne!(PdfError::Encrypted.user_message(), PdfError::Empty.user_message());
    }
}
