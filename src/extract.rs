// src/extract.rs

use crate::cloud::CloudExtractor;
use crate::error::PipelineError;
use crate::heuristics::{InvoiceFields, spanish};
use crate::knowledge::KnowledgeStore;
use tracing::{info, warn};

/// Run the extraction cascade for one document: cloud first when
/// configured, then the OCR-correction pass plus the pattern engine.
///
/// Cloud failures of any kind fall through silently to the pattern
/// path. The only error that can escape the fallback chain is a
/// corrupt knowledge store.
pub async fn extract_invoice(
    document: &[u8],
    text: &str,
    source_name: &str,
    cloud: &dyn CloudExtractor,
    store: &KnowledgeStore,
) -> Result<InvoiceFields, PipelineError> {
    if cloud.is_available() {
        match cloud.analyze(document).await {
            Ok(fields) if fields.is_valid() => {
                info!(document = source_name, "Fields extracted via cloud service");
                return Ok(fields);
            }
            Ok(fields) => {
                warn!(
                    resolved = fields.resolved_count(),
                    "Cloud tuple incomplete, falling back to pattern extraction"
                );
            }
            Err(e) => {
                warn!(error = %e, "Cloud extraction failed, falling back to pattern extraction");
            }
        }
    }

    let corrected = store.apply_corrections(text)?;
    let fields = spanish::extract(&corrected, source_name, store)?;

    if fields.is_valid() {
        info!(
            document = source_name,
            resolved = fields.resolved_count(),
            "Fields extracted via pattern cascade"
        );
        Ok(fields)
    } else {
        Err(PipelineError::Incomplete {
            resolved: fields.resolved_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::Source;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Unconfigured;

    #[async_trait]
    impl CloudExtractor for Unconfigured {
        fn is_available(&self) -> bool {
            false
        }
        async fn analyze(&self, _: &[u8]) -> Result<InvoiceFields, PipelineError> {
            panic!("must not be called when unavailable");
        }
    }

    /// Configured but the service detects no invoices in the document.
    struct NoDocumentsDetected;

    #[async_trait]
    impl CloudExtractor for NoDocumentsDetected {
        fn is_available(&self) -> bool {
            true
        }
        async fn analyze(&self, _: &[u8]) -> Result<InvoiceFields, PipelineError> {
            Err(PipelineError::AdapterUnavailable(
                "no invoice detected in document".to_string(),
            ))
        }
    }

    struct CloudHit;

    #[async_trait]
    impl CloudExtractor for CloudHit {
        fn is_available(&self) -> bool {
            true
        }
        async fn analyze(&self, _: &[u8]) -> Result<InvoiceFields, PipelineError> {
            let mut fields = InvoiceFields::empty(Source::Cloud);
            fields.date = Some("20240915".to_string());
            fields.invoice_no = Some("FAC-1".to_string());
            Ok(fields)
        }
    }

    fn store(dir: &TempDir) -> KnowledgeStore {
        KnowledgeStore::new(dir.path().join("proveedores.json"))
    }

    const TWO_FIELD_TEXT: &str = "Fecha: 15/09/2024\nProveedor: Acme Ibérica\n";

    #[tokio::test]
    async fn test_valid_cloud_result_wins() {
        let dir = TempDir::new().unwrap();
        let fields = extract_invoice(b"%PDF", TWO_FIELD_TEXT, "f.pdf", &CloudHit, &store(&dir))
            .await
            .unwrap();
        assert_eq!(fields.source, Source::Cloud);
        assert_eq!(fields.invoice_no.as_deref(), Some("FAC-1"));
    }

    #[tokio::test]
    async fn test_zero_documents_falls_through_to_patterns() {
        let dir = TempDir::new().unwrap();
        let fields = extract_invoice(
            b"%PDF",
            TWO_FIELD_TEXT,
            "f.pdf",
            &NoDocumentsDetected,
            &store(&dir),
        )
        .await
        .unwrap();
        assert_eq!(fields.source, Source::Pattern);
        assert_eq!(fields.date.as_deref(), Some("20240915"));
        assert_eq!(fields.vendor.as_deref(), Some("Acme_Ibérica"));
    }

    #[tokio::test]
    async fn test_unconfigured_cloud_goes_straight_to_patterns() {
        let dir = TempDir::new().unwrap();
        let fields = extract_invoice(b"%PDF", TWO_FIELD_TEXT, "f.pdf", &Unconfigured, &store(&dir))
            .await
            .unwrap();
        assert_eq!(fields.source, Source::Pattern);
    }

    #[tokio::test]
    async fn test_single_field_reports_incomplete() {
        let dir = TempDir::new().unwrap();
        let err = extract_invoice(
            b"%PDF",
            "Fecha: 15/09/2024\nnada más\n",
            "f.pdf",
            &Unconfigured,
            &store(&dir),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Incomplete { resolved: 1 }));
    }

    #[tokio::test]
    async fn test_corrections_run_before_pattern_pass() {
        let dir = TempDir::new().unwrap();
        let st = store(&dir);
        st.learn_correction("lberdrola", "Iberdrola").unwrap();
        let text = "Fecha: 15/09/2024\nProveedor: lberdrola Energía\n";
        let fields = extract_invoice(b"%PDF", text, "f.pdf", &Unconfigured, &st)
            .await
            .unwrap();
        assert_eq!(fields.vendor.as_deref(), Some("Iberdrola_Energía"));
    }
}
