// src/acquire.rs

use crate::error::PipelineError;
use crate::ocr::OcrEngine;
use lopdf::Document;
use std::path::Path;
use tracing::{debug, info, warn};

/// Extensions the folder scanner admits into the pipeline.
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["pdf", "jpg", "jpeg", "png"];

pub fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

pub fn is_allowed(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

/// Produce raw text from a document, or a definite failure.
///
/// PDFs get the native text layer first, augmented with a page-1 OCR
/// pass for header/logo text; scanned PDFs fall back to full-document
/// OCR. Raster images go straight to OCR. Anything else is refused.
pub fn acquire_text(
    path: &Path,
    bytes: &[u8],
    ocr: &dyn OcrEngine,
    dpi: u32,
) -> Result<String, PipelineError> {
    match extension_of(path).as_deref() {
        Some("pdf") => acquire_pdf_text(bytes, ocr, dpi),
        Some("jpg" | "jpeg" | "png") => acquire_image_text(bytes, ocr),
        other => Err(PipelineError::Acquisition(format!(
            "unsupported file type: {}",
            other.unwrap_or("<none>")
        ))),
    }
}

fn acquire_pdf_text(bytes: &[u8], ocr: &dyn OcrEngine, dpi: u32) -> Result<String, PipelineError> {
    // structural check first; a document lopdf cannot load is not a PDF
    let doc = Document::load_mem(bytes)
        .map_err(|e| PipelineError::Acquisition(format!("failed to parse PDF: {e}")))?;
    let page_count = doc.get_pages().len();

    let native = match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Native text extraction failed, treating as scanned");
            String::new()
        }
    };

    if !native.trim().is_empty() {
        debug!(chars = native.len(), "Native text layer extracted");

        // Opportunistic page-1 OCR surfaces header/logo text the native
        // layer misses. Any failure here keeps the native text alone.
        if ocr.is_available() {
            match ocr
                .rasterize_page(bytes, 0, dpi)
                .and_then(|img| ocr.image_to_text(&img))
            {
                Ok(header) if !header.trim().is_empty() => {
                    debug!(chars = header.len(), "Page-1 OCR text prepended");
                    return Ok(format!("{header}\n{native}"));
                }
                Ok(_) => debug!("Page-1 OCR produced no text"),
                Err(e) => debug!(error = %e, "Page-1 OCR failed, keeping native text"),
            }
        }
        return Ok(native);
    }

    // No native layer at all: the document is scanned, OCR every page.
    info!(pages = page_count, "PDF has no native text, running full-document OCR");
    if !ocr.is_available() {
        return Err(PipelineError::Acquisition(
            "no native text layer and OCR engine unavailable".to_string(),
        ));
    }

    let mut full = String::new();
    for page in 0..page_count {
        debug!(page = page + 1, total = page_count, "OCR pass");
        let image = ocr
            .rasterize_page(bytes, page, dpi)
            .map_err(|e| PipelineError::Acquisition(format!("page {} rasterization: {e}", page + 1)))?;
        let text = ocr
            .image_to_text(&image)
            .map_err(|e| PipelineError::Acquisition(format!("page {} OCR: {e}", page + 1)))?;
        full.push_str(&text);
        full.push('\n');
    }

    if full.trim().is_empty() {
        Err(PipelineError::Acquisition(
            "OCR produced no text from any page".to_string(),
        ))
    } else {
        info!(chars = full.len(), pages = page_count, "Full-document OCR complete");
        Ok(full)
    }
}

fn acquire_image_text(bytes: &[u8], ocr: &dyn OcrEngine) -> Result<String, PipelineError> {
    if !ocr.is_available() {
        return Err(PipelineError::Acquisition(
            "OCR engine unavailable for image input".to_string(),
        ));
    }
    let text = ocr
        .image_to_text(bytes)
        .map_err(|e| PipelineError::Acquisition(format!("image OCR: {e}")))?;
    if text.trim().is_empty() {
        Err(PipelineError::Acquisition(
            "OCR produced no text from image".to_string(),
        ))
    } else {
        debug!(chars = text.len(), "Image OCR complete");
        Ok(text)
    }
}
