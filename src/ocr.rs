// src/ocr.rs

use std::io::Write;
use std::process::Command;
use tempfile::Builder;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors local to the OCR collaborator. All of them are recoverable
/// from the pipeline's point of view: acquisition continues with
/// whatever text already exists.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine not available")]
    Unavailable,
    #[error("page rasterization failed: {0}")]
    Rasterize(String),
    #[error("OCR failed: {0}")]
    Recognize(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The two capabilities Text Acquisition needs from an OCR collaborator:
/// turn a PDF page into an image, and turn an image into text.
pub trait OcrEngine {
    /// Probe whether the engine can run at all. Callers must treat a
    /// negative answer as a recoverable condition, not an error.
    fn is_available(&self) -> bool;

    /// Rasterize one page (0-indexed) of a PDF to a PNG at the given DPI.
    fn rasterize_page(&self, pdf_bytes: &[u8], page_index: usize, dpi: u32)
    -> Result<Vec<u8>, OcrError>;

    /// Run OCR over a raster image, returning the recognized text.
    fn image_to_text(&self, image_bytes: &[u8]) -> Result<String, OcrError>;
}

/// Tesseract-backed engine. OCR shells out to the `tesseract` binary,
/// rasterization to MuPDF's `mutool draw`, the same programs the
/// pytesseract/PyMuPDF stack drives.
pub struct TesseractOcr {
    tesseract_path: String,
    mutool_path: String,
    lang: String,
}

impl TesseractOcr {
    pub fn new(tesseract_path: &str, mutool_path: &str, lang: &str) -> Self {
        Self {
            tesseract_path: tesseract_path.to_string(),
            mutool_path: mutool_path.to_string(),
            lang: lang.to_string(),
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn is_available(&self) -> bool {
        match Command::new(&self.tesseract_path).arg("--version").output() {
            Ok(out) if out.status.success() => true,
            Ok(out) => {
                warn!(status = ?out.status, "tesseract probe returned non-zero");
                false
            }
            Err(e) => {
                debug!(error = %e, path = %self.tesseract_path, "tesseract not found");
                false
            }
        }
    }

    fn rasterize_page(
        &self,
        pdf_bytes: &[u8],
        page_index: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, OcrError> {
        let mut pdf_file = Builder::new().suffix(".pdf").tempfile()?;
        pdf_file.write_all(pdf_bytes)?;
        pdf_file.flush()?;

        let png_file = Builder::new().suffix(".png").tempfile()?;
        let png_path = png_file.path().to_path_buf();

        // mutool pages are 1-indexed
        let output = Command::new(&self.mutool_path)
            .arg("draw")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-o")
            .arg(&png_path)
            .arg(pdf_file.path())
            .arg((page_index + 1).to_string())
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    OcrError::Unavailable
                } else {
                    OcrError::Io(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Rasterize(format!(
                "mutool exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let bytes = std::fs::read(&png_path)?;
        if bytes.is_empty() {
            return Err(OcrError::Rasterize("mutool produced no output".to_string()));
        }
        debug!(page = page_index, dpi, bytes = bytes.len(), "Page rasterized");
        Ok(bytes)
    }

    fn image_to_text(&self, image_bytes: &[u8]) -> Result<String, OcrError> {
        let mut img_file = Builder::new().suffix(".png").tempfile()?;
        img_file.write_all(image_bytes)?;
        img_file.flush()?;

        let output = Command::new(&self.tesseract_path)
            .arg(img_file.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.lang)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    OcrError::Unavailable
                } else {
                    OcrError::Io(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Recognize(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(chars = text.len(), "OCR pass complete");
        Ok(text)
    }
}
