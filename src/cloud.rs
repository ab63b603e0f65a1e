// src/cloud.rs

use crate::config::AzureSection;
use crate::error::PipelineError;
use crate::heuristics::{InvoiceFields, Source, spanish};
use crate::knowledge;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Optional higher-accuracy extraction path backed by an external
/// document-intelligence service. One availability probe, one call.
#[async_trait]
pub trait CloudExtractor: Send + Sync {
    fn is_available(&self) -> bool;

    /// Analyze a whole document. Every failure mode (missing
    /// credentials, service errors, zero detected invoices, fewer than
    /// two resolved fields) comes back as `AdapterUnavailable` so the
    /// coordinator can fall through without special cases.
    async fn analyze(&self, document: &[u8]) -> Result<InvoiceFields, PipelineError>;
}

const API_VERSION: &str = "2023-07-31";
const POLL_ATTEMPTS: u32 = 60;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Azure Document Intelligence adapter using the `prebuilt-invoice`
/// model: submit the document, then poll the operation until it
/// resolves.
pub struct AzureInvoiceExtractor {
    client: Client,
    endpoint: Option<String>,
    api_key: Option<String>,
}

impl AzureInvoiceExtractor {
    pub fn new(endpoint: Option<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
        }
    }

    pub fn from_config(azure: &AzureSection) -> Self {
        Self::new(azure.resolved_endpoint(), azure.resolved_api_key())
    }

    fn credentials(&self) -> Result<(&str, &str), PipelineError> {
        match (self.endpoint.as_deref(), self.api_key.as_deref()) {
            (Some(endpoint), Some(key)) => Ok((endpoint, key)),
            _ => Err(PipelineError::AdapterUnavailable(
                "endpoint or API key not configured".to_string(),
            )),
        }
    }

    async fn submit(&self, endpoint: &str, key: &str, document: &[u8]) -> Result<String, PipelineError> {
        let url = format!(
            "{}/formrecognizer/documentModels/prebuilt-invoice:analyze?api-version={API_VERSION}",
            endpoint.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", key)
            .header("Content-Type", "application/octet-stream")
            .body(document.to_vec())
            .send()
            .await
            .map_err(|e| PipelineError::AdapterUnavailable(format!("submit failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::AdapterUnavailable(format!(
                "service returned {status}: {body}"
            )));
        }

        response
            .headers()
            .get("Operation-Location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                PipelineError::AdapterUnavailable("no Operation-Location in response".to_string())
            })
    }

    async fn poll(&self, operation_url: &str, key: &str) -> Result<Value, PipelineError> {
        for _ in 0..POLL_ATTEMPTS {
            tokio::time::sleep(POLL_INTERVAL).await;
            let response = self
                .client
                .get(operation_url)
                .header("Ocp-Apim-Subscription-Key", key)
                .send()
                .await
                .map_err(|e| PipelineError::AdapterUnavailable(format!("poll failed: {e}")))?;
            let body: Value = response
                .json()
                .await
                .map_err(|e| PipelineError::AdapterUnavailable(format!("invalid poll body: {e}")))?;

            match body.get("status").and_then(Value::as_str) {
                Some("succeeded") => return Ok(body),
                Some("failed") => {
                    let message = body
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error");
                    return Err(PipelineError::AdapterUnavailable(format!(
                        "analysis failed: {message}"
                    )));
                }
                _ => debug!("Analysis still running"),
            }
        }
        Err(PipelineError::AdapterUnavailable(
            "analysis timed out".to_string(),
        ))
    }
}

#[async_trait]
impl CloudExtractor for AzureInvoiceExtractor {
    fn is_available(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }

    async fn analyze(&self, document: &[u8]) -> Result<InvoiceFields, PipelineError> {
        let (endpoint, key) = self.credentials()?;
        info!(bytes = document.len(), "Submitting document to cloud extraction");

        let operation_url = self.submit(endpoint, key, document).await?;
        let body = self.poll(&operation_url, key).await?;
        let fields = fields_from_analysis(&body)?;

        let resolved = fields.resolved_count();
        if resolved < 2 {
            warn!(resolved, "Cloud extraction incomplete, falling through");
            return Err(PipelineError::AdapterUnavailable(format!(
                "only {resolved}/3 fields resolved"
            )));
        }
        info!(
            resolved,
            date = ?fields.date,
            vendor = ?fields.vendor,
            invoice_no = ?fields.invoice_no,
            "Cloud extraction result"
        );
        Ok(fields)
    }
}

/// Map a completed analyze operation to a field tuple. Vendor and tax
/// id get the same normalization as the pattern engine.
fn fields_from_analysis(body: &Value) -> Result<InvoiceFields, PipelineError> {
    let documents = body
        .pointer("/analyzeResult/documents")
        .and_then(Value::as_array);
    let Some(invoice) = documents.and_then(|docs| docs.first()) else {
        return Err(PipelineError::AdapterUnavailable(
            "no invoice detected in document".to_string(),
        ));
    };
    let doc_fields = &invoice["fields"];

    let mut fields = InvoiceFields::empty(Source::Cloud);

    if let Some(raw) = doc_fields
        .pointer("/InvoiceDate/valueDate")
        .and_then(Value::as_str)
    {
        if let Ok(parsed) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            fields.date = Some(parsed.format("%Y%m%d").to_string());
            if let Some(c) = doc_fields
                .pointer("/InvoiceDate/confidence")
                .and_then(Value::as_f64)
            {
                fields.confidence.insert("date".to_string(), c);
            }
        }
    }

    if let Some(raw) = doc_fields
        .pointer("/VendorName/valueString")
        .and_then(Value::as_str)
    {
        fields.vendor = Some(spanish::normalize_vendor(raw));
        if let Some(c) = doc_fields
            .pointer("/VendorName/confidence")
            .and_then(Value::as_f64)
        {
            fields.confidence.insert("vendor".to_string(), c);
        }
    }

    if let Some(raw) = doc_fields
        .pointer("/InvoiceId/valueString")
        .and_then(Value::as_str)
    {
        fields.invoice_no = Some(raw.trim().to_string());
        if let Some(c) = doc_fields
            .pointer("/InvoiceId/confidence")
            .and_then(Value::as_f64)
        {
            fields.confidence.insert("invoice_no".to_string(), c);
        }
    }

    if let Some(raw) = doc_fields
        .pointer("/VendorTaxId/valueString")
        .and_then(Value::as_str)
    {
        fields.tax_id = Some(knowledge::normalize_tax_id(raw));
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_probe_requires_both_credentials() {
        assert!(!AzureInvoiceExtractor::new(None, None).is_available());
        assert!(
            !AzureInvoiceExtractor::new(Some("https://x".to_string()), None).is_available()
        );
        assert!(
            AzureInvoiceExtractor::new(Some("https://x".to_string()), Some("k".to_string()))
                .is_available()
        );
    }

    #[test]
    fn test_fields_from_analysis_maps_and_normalizes() {
        let body = json!({
            "status": "succeeded",
            "analyzeResult": {
                "documents": [{
                    "fields": {
                        "InvoiceDate": { "valueDate": "2024-09-15", "confidence": 0.98 },
                        "VendorName": { "valueString": "Iberdrola Energía S.A.U.", "confidence": 0.95 },
                        "InvoiceId": { "valueString": " FAC-2024-12345 ", "confidence": 0.97 },
                        "VendorTaxId": { "valueString": "B-12.345.678" }
                    }
                }]
            }
        });
        let fields = fields_from_analysis(&body).unwrap();
        assert_eq!(fields.date.as_deref(), Some("20240915"));
        assert_eq!(fields.vendor.as_deref(), Some("Iberdrola_Energía_SAU"));
        assert_eq!(fields.invoice_no.as_deref(), Some("FAC-2024-12345"));
        assert_eq!(fields.tax_id.as_deref(), Some("B12345678"));
        assert_eq!(fields.source, Source::Cloud);
        assert_eq!(fields.confidence.get("date"), Some(&0.98));
        assert_eq!(fields.confidence.get("vendor"), Some(&0.95));
    }

    #[test]
    fn test_zero_documents_is_unavailable() {
        let body = json!({
            "status": "succeeded",
            "analyzeResult": { "documents": [] }
        });
        let err = fields_from_analysis(&body).unwrap_err();
        assert!(matches!(err, PipelineError::AdapterUnavailable(_)));
    }
}
