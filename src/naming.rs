// src/naming.rs

use crate::error::PipelineError;
use crate::heuristics::InvoiceFields;
use once_cell::sync::Lazy;
use regex::Regex;

// Compiled once; both patterns are literal
static RESERVED: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[\\/:*?"<>|]"#).unwrap());
static HYPHEN_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new("-+").unwrap());

/// Strip characters that Windows refuses in filenames, replacing each
/// with a hyphen, then collapse runs and trim the ends. Idempotent.
pub fn sanitize(component: &str) -> String {
    let replaced = RESERVED.replace_all(component, "-");
    let collapsed = HYPHEN_RUNS.replace_all(&replaced, "-");
    collapsed.trim_matches('-').to_string()
}

/// Assemble the final filename from a validated tuple:
/// `date{sep}vendor{sep}number.pdf`. Missing fields of a still-valid
/// tuple leave their segment empty. Invalid tuples are refused.
pub fn build_filename(
    fields: &InvoiceFields,
    separator: &str,
) -> Result<String, PipelineError> {
    if !fields.is_valid() {
        return Err(PipelineError::Incomplete {
            resolved: fields.resolved_count(),
        });
    }

    let date = sanitize(fields.date.as_deref().unwrap_or(""));
    let vendor = sanitize(fields.vendor.as_deref().unwrap_or(""));
    let number = sanitize(fields.invoice_no.as_deref().unwrap_or(""));

    Ok(format!("{date}{separator}{vendor}{separator}{number}.pdf"))
}
