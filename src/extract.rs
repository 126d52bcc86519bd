//! Plain-text extraction from attachment bytes.
//!
//! Extraction fails closed: unreadable or empty input yields an error the
//! classification pipeline turns into a rejecting verdict, and the remote
//! classifier is never consulted for bytes that produced no text.

/// Byte signature every readable document must open with.
pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// Extraction error (no panic; classification rejects the attachment).
#[derive(Debug)]
pub enum ExtractError {
    /// Bytes do not carry the PDF signature.
    NotPdf,
    /// The PDF library failed (corrupt, encrypted, unsupported).
    Pdf(String),
    /// Parsing succeeded but produced no text (scanned image, empty form).
    Empty,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::NotPdf => write!(f, "bytes are not a PDF document"),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Empty => write!(f, "document contains no extractable text"),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Converts raw document bytes to plain text for scoring.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError>;
}

/// PDF text extraction backed by `pdf-extract`.
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(ExtractError::NotPdf);
        }

        let text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;

        if text.trim().is_empty() {
            return Err(ExtractError::Empty);
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_signature_rejected() {
        let err = PdfTextExtractor.extract(b"hello world").unwrap_err();
        assert!(matches!(err, ExtractError::NotPdf));
    }

    #[test]
    fn truncated_pdf_returns_error() {
        let err = PdfTextExtractor.extract(b"%PDF-1.4\ngarbage").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_) | ExtractError::Empty));
    }

    #[test]
    fn empty_input_rejected() {
        let err = PdfTextExtractor.extract(b"").unwrap_err();
        assert!(matches!(err, ExtractError::NotPdf));
    }
}
