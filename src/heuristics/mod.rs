// src/heuristics/mod.rs

pub mod spanish;

use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// Which extraction path produced a field tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cloud,
    Pattern,
}

/// The normalized identity tuple extracted from one invoice document.
///
/// `date` is `YYYYMMDD`; `vendor` and `invoice_no` are filename-ready
/// normalized strings. `tax_id` is metadata and never counts toward
/// validity. Per-field confidences are populated by the cloud path only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceFields {
    pub date: Option<String>,
    pub vendor: Option<String>,
    pub invoice_no: Option<String>,
    pub tax_id: Option<String>,
    pub source: Source,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub confidence: BTreeMap<String, f64>,
}

impl InvoiceFields {
    pub fn empty(source: Source) -> Self {
        Self {
            date: None,
            vendor: None,
            invoice_no: None,
            tax_id: None,
            source,
            confidence: BTreeMap::new(),
        }
    }

    /// How many of the three primary fields resolved.
    pub fn resolved_count(&self) -> usize {
        [&self.date, &self.vendor, &self.invoice_no]
            .iter()
            .filter(|f| f.is_some())
            .count()
    }

    /// A tuple is usable for renaming only when at least two of the
    /// three primary fields are present, regardless of source.
    pub fn is_valid(&self) -> bool {
        self.resolved_count() >= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completeness_gate_counts_primary_fields_only() {
        let mut fields = InvoiceFields::empty(Source::Pattern);
        assert_eq!(fields.resolved_count(), 0);
        assert!(!fields.is_valid());

        // tax id alone does not count
        fields.tax_id = Some("B12345678".to_string());
        assert!(!fields.is_valid());

        fields.date = Some("20240915".to_string());
        assert!(!fields.is_valid());

        fields.vendor = Some("ACME".to_string());
        assert!(fields.is_valid());

        fields.invoice_no = Some("FAC-1".to_string());
        assert_eq!(fields.resolved_count(), 3);
        assert!(fields.is_valid());
    }

    #[test]
    fn test_gate_is_source_independent() {
        let mut cloud = InvoiceFields::empty(Source::Cloud);
        cloud.date = Some("20240915".to_string());
        cloud.invoice_no = Some("FAC-1".to_string());
        assert!(cloud.is_valid());

        let mut pattern = InvoiceFields::empty(Source::Pattern);
        pattern.date = cloud.date.clone();
        pattern.invoice_no = cloud.invoice_no.clone();
        assert!(pattern.is_valid());
    }
}
