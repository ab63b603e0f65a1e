use super::{InvoiceFields, Source};
use crate::error::PipelineError;
use crate::knowledge::{self, KnowledgeStore};
use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

/// Day-first formats tried in order against every date candidate.
const DAY_FIRST_FORMATS: [&str; 5] = ["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%d/%m/%y", "%d-%m-%y"];

/// Formats for dates sitting next to an invoice-number token; hyphens
/// dominate in that layout, so they are tried first.
const ADJACENT_FORMATS: [&str; 4] = ["%d-%m-%Y", "%d/%m/%Y", "%d-%m-%y", "%d/%m/%y"];

/// Company-name shapes: legal-entity suffixes and the "X BY Y" brand form.
const COMPANY_PATTERNS: [&str; 2] = [
    r"([A-ZÁÉÍÓÚÑ&][A-ZÁÉÍÓÚÑa-záéíóúñ\s\-\.,&]+?(?:S\.A\.U\.|S\.L\.U\.|S\.A\.|S\.L\.|S\.C\.|S\.COOP\.))",
    r"([A-ZÁÉÍÓÚÑ][A-ZÁÉÍÓÚÑa-záéíóúñ\s\-]+BY\s+[A-ZÁÉÍÓÚÑa-záéíóúñ\s\-]+)",
];

/// Companies that appear on invoices as the recipient, never the
/// vendor. A hard-coded heuristic with known precision limits.
const CLIENT_NAMES: [&str; 3] = ["HAFESA", "HAFESA OIL", "HAFESA OLI"];

/// Words a sloppy invoice-number pattern can capture out of its own label.
const LABEL_WORDS: [&str; 4] = ["FECHA", "FACTURA", "DATE", "INVOICE"];

/// Run the full pattern cascade over corrected raw text.
///
/// A tax-id hit in the knowledge store short-circuits the vendor
/// pattern search entirely; everything else runs in fixed order. The
/// completeness gate is the caller's job; this always returns a tuple.
pub fn extract(
    text: &str,
    source_name: &str,
    store: &KnowledgeStore,
) -> Result<InvoiceFields, PipelineError> {
    let mut fields = InvoiceFields::empty(Source::Pattern);

    fields.tax_id = extract_tax_id(text);
    if let Some(tax_id) = &fields.tax_id {
        debug!(document = source_name, tax_id = %tax_id, "Tax ID found");
        if let Some(known) = store.lookup_vendor(tax_id)? {
            debug!(vendor = %known, "Vendor resolved from knowledge store");
            fields.vendor = Some(known);
        }
    }

    fields.date = extract_date(text);
    if fields.vendor.is_none() {
        fields.vendor = extract_vendor(text);
    }
    fields.invoice_no = extract_invoice_no(text);

    debug!(
        document = source_name,
        date = ?fields.date,
        vendor = ?fields.vendor,
        invoice_no = ?fields.invoice_no,
        "Pattern cascade result"
    );
    Ok(fields)
}

// ---------------------------------------------------------------------------
// Tax ID
// ---------------------------------------------------------------------------

fn extract_tax_id(text: &str) -> Option<String> {
    // Labeled CIF/NIF, tolerant of stray punctuation in the label.
    // The optional check letter must sit on the same line as the
    // digits, or the pattern would swallow the first letter of the
    // next line.
    let labeled = Regex::new(
        r"(?i)(?:C\.?I\.?F\.?|C\.?L\.?F\.?|N\.?I\.?F\.?)\s*[:.\s]*\s*([A-Z0-9][-\s.]*\d{7,8}[ \t-]*[A-Z]?)",
    )
    .ok()?;
    let raw = match labeled.captures(text) {
        Some(caps) => caps[1].to_string(),
        None => {
            // Bare person NIF: 8 digits plus check letter
            let bare = Regex::new(r"(\d{8}[ \t-]*[A-Z])").ok()?;
            bare.captures(text)?[1].to_string()
        }
    };
    Some(knowledge::normalize_tax_id(&raw))
}

// ---------------------------------------------------------------------------
// Date: three-tier cascade, first success wins
// ---------------------------------------------------------------------------

fn extract_date(text: &str) -> Option<String> {
    // Tier 1: explicitly labeled issue dates
    let labeled = [
        r"(?i)Fecha\s+(?:de\s+)?(?:emisi[oó]n|factura)[:\s]+(\d{1,2}[/-]\d{1,2}[/-]\d{2,4})",
        r"(?i)Fecha[:\s]+(\d{1,2}[/-]\d{1,2}[/-]\d{2,4})",
        r"(?i)Date[:\s]+(\d{1,2}[/-]\d{1,2}[/-]\d{2,4})",
    ];
    for pattern in labeled {
        let re = Regex::new(pattern).ok()?;
        if let Some(caps) = re.captures(text) {
            let whole = caps.get(0)?;
            let ctx = context_window(text, whole.start(), whole.end(), 50);
            if is_delivery_note_context(ctx) {
                debug!(raw = &caps[1], "Labeled date rejected: delivery-note context");
                continue;
            }
            if let Some(date) = parse_day_first(&caps[1], &DAY_FIRST_FORMATS) {
                debug!(raw = &caps[1], date = %date, "Date found (labeled)");
                return Some(date);
            }
        }
    }

    // Tier 2: date adjacent to an invoice-number token like 511890/25
    let adjacent = Regex::new(r"(\d{5,7}/\d{2})\s+(\d{1,2}[-/]\d{1,2}[-/]\d{2,4})").ok()?;
    if let Some(caps) = adjacent.captures(text) {
        if let Some(date) = parse_day_first(&caps[2], &ADJACENT_FORMATS) {
            debug!(raw = &caps[2], date = %date, "Date found (next to invoice number)");
            return Some(date);
        }
    }

    // Tier 3: first five date-shaped substrings in document order
    let generic = Regex::new(r"(\d{1,2}[/-]\d{1,2}[/-]\d{2,4})").ok()?;
    for m in generic.find_iter(text).take(5) {
        let ctx = context_window(text, m.start(), m.end(), 50);
        if is_delivery_note_context(ctx) {
            continue;
        }
        if let Some(date) = parse_day_first(m.as_str(), &DAY_FIRST_FORMATS) {
            debug!(raw = m.as_str(), date = %date, "Date found (generic scan)");
            return Some(date);
        }
    }

    None
}

fn parse_day_first(raw: &str, formats: &[&str]) -> Option<String> {
    // chrono's %Y accepts "24" as year 24, so a two-digit year must
    // only ever meet a %y format
    let year_len = raw
        .rsplit(['/', '-', '.'])
        .next()
        .map(str::len)
        .unwrap_or(0);
    for fmt in formats {
        if fmt.ends_with("%y") != (year_len <= 2) {
            continue;
        }
        if let Ok(parsed) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(parsed.format("%Y%m%d").to_string());
        }
    }
    None
}

/// Delivery-note dates must never be taken for the invoice date.
/// "albar" also covers the accented "albarán".
fn is_delivery_note_context(ctx: &str) -> bool {
    ctx.to_lowercase().contains("albar")
}

/// Slice `text` around a match, clamped to UTF-8 char boundaries.
fn context_window(text: &str, start: usize, end: usize, radius: usize) -> &str {
    let mut lo = start.saturating_sub(radius);
    while !text.is_char_boundary(lo) {
        lo -= 1;
    }
    let mut hi = (end + radius).min(text.len());
    while !text.is_char_boundary(hi) {
        hi += 1;
    }
    &text[lo..hi]
}

// ---------------------------------------------------------------------------
// Vendor: three strategies, skipped entirely on a knowledge-store hit
// ---------------------------------------------------------------------------

fn extract_vendor(text: &str) -> Option<String> {
    // Strategy 1: explicit labels, capturing up to the next label or newline
    let labeled = [
        r"(?i)Proveedor[:\s]+([A-ZÁÉÍÓÚÑa-záéíóúñ\s]+?)(?:\n|N[úu]mero|Fecha|Importe)",
        r"(?i)Supplier[:\s]+([A-Za-z\s]+?)(?:\n|Number|Date|Amount)",
        r"(?i)Raz[oó]n Social[:\s]+([A-ZÁÉÍÓÚÑa-záéíóúñ\s]+?)(?:\n|NIF|CIF)",
    ];
    for pattern in labeled {
        let re = Regex::new(pattern).ok()?;
        if let Some(caps) = re.captures(text) {
            let vendor = normalize_vendor(&caps[1]);
            if !vendor.is_empty() {
                debug!(vendor = %vendor, "Vendor found (explicit label)");
                return Some(vendor);
            }
        }
    }

    // Strategy 2: company-suffix scan over the whole text, first match
    // that is not a known client name
    for pattern in COMPANY_PATTERNS {
        let re = Regex::new(pattern).ok()?;
        for caps in re.captures_iter(text) {
            let candidate = caps[1].trim();
            if is_client_name(candidate) {
                continue;
            }
            let vendor = normalize_vendor(candidate);
            debug!(vendor = %vendor, "Vendor found (legal suffix)");
            return Some(vendor);
        }
    }

    // Strategy 3: company suffix within ±200 chars of the tax-id label
    let cif_label = Regex::new(r"(?i)CIF[:\s]+([A-Z0-9]+)").ok()?;
    if let Some(m) = cif_label.find(text) {
        let ctx = context_window(text, m.start(), m.end(), 200);
        for pattern in COMPANY_PATTERNS {
            let re = Regex::new(pattern).ok()?;
            if let Some(caps) = re.captures(ctx) {
                let vendor = normalize_vendor(caps[1].trim());
                debug!(vendor = %vendor, "Vendor found (near tax ID)");
                return Some(vendor);
            }
        }
    }

    None
}

fn is_client_name(candidate: &str) -> bool {
    let upper = candidate.to_uppercase();
    CLIENT_NAMES.iter().any(|client| upper.contains(client))
}

/// Internal whitespace to underscores, anything outside
/// word/whitespace/hyphen removed, capped at 50 characters.
pub(crate) fn normalize_vendor(raw: &str) -> String {
    let underscored = raw.trim().split_whitespace().collect::<Vec<_>>().join("_");
    underscored
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-') || c.is_whitespace())
        .take(50)
        .collect()
}

// ---------------------------------------------------------------------------
// Invoice number: strict priority order, most specific first
// ---------------------------------------------------------------------------

fn extract_invoice_no(text: &str) -> Option<String> {
    let patterns = [
        r"(?i)N[º°úu]?\s*FACTURA\s+FECHA\s+FACTURA\s+([A-Z]\s*\d+)",
        r"(?i)N[º°úu]?\s*FACTURA[:\s]+([A-Z]\s*\d+)",
        r"(?i)N[úu]mero de Factura[:\s]+([A-Z0-9\-/]+)(?:\s|$)",
        r"(?i)Factura\s+[nN][º°u][:\s]+([A-Z0-9\-/_]+)",
        r"(?i)Invoice Number[:\s]+([A-Z0-9\-/]+)",
        r"(?i)N[º°]\s*Factura[:\s]+([A-Z0-9\-/]+)",
        r"(?i)fra\.\s*(\d{6,})",
        r"(\d{6}/\d{2})",
        r"(?i)Fact[ura]*\s+([A-Z]?\d{6,})",
    ];
    for pattern in patterns {
        let re = Regex::new(pattern).ok()?;
        if let Some(caps) = re.captures(text) {
            let number: String = caps[1].split_whitespace().collect();
            // guard against a pattern capturing its own label text
            if LABEL_WORDS.contains(&number.to_uppercase().as_str()) {
                continue;
            }
            debug!(invoice_no = %number, "Invoice number found");
            return Some(number);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn empty_store(dir: &TempDir) -> KnowledgeStore {
        KnowledgeStore::new(dir.path().join("proveedores.json"))
    }

    #[test]
    fn test_scenario_labeled_fields() {
        let dir = TempDir::new().unwrap();
        let text = "FACTURA\nFecha: 15/09/2024\nProveedor: Iberdrola Energía\nNúmero de Factura: FAC-2024-12345\nTotal: 1.234,56 EUR\n";
        let fields = extract(text, "factura.pdf", &empty_store(&dir)).unwrap();
        assert_eq!(fields.date.as_deref(), Some("20240915"));
        assert_eq!(fields.vendor.as_deref(), Some("Iberdrola_Energía"));
        assert_eq!(fields.invoice_no.as_deref(), Some("FAC-2024-12345"));
        assert!(fields.is_valid());
    }

    #[test]
    fn test_delivery_note_date_is_skipped() {
        // labeled date 20 chars after "Albarán" must lose to the clean
        // unlabeled date further down
        let text = "Albarán nº 4581 con Fecha: 10/05/2024\n\
                    Condiciones de pago al contado, transporte incluido en el precio total\n\
                    Emitida el 15/09/2024 en Madrid\n";
        assert_eq!(extract_date(text).as_deref(), Some("20240915"));
    }

    #[test]
    fn test_date_next_to_invoice_number_token() {
        let text = "Documento 511890/25 18-09-2025 cliente 4471\n";
        assert_eq!(extract_date(text).as_deref(), Some("20250918"));
        assert_eq!(extract_invoice_no(text).as_deref(), Some("511890/25"));
    }

    #[test]
    fn test_two_digit_year_parses_day_first() {
        assert_eq!(extract_date("Fecha: 05/03/24\n").as_deref(), Some("20240305"));
    }

    #[test]
    fn test_unparseable_date_shape_is_discarded() {
        // 45th of month matches the shape but no format; cascade must
        // move on to the next candidate
        let text = "recibido 45/99/2024 pagadero 02/01/2024\n";
        assert_eq!(extract_date(text).as_deref(), Some("20240102"));
    }

    #[test]
    fn test_tax_id_labeled_and_normalized() {
        assert_eq!(
            extract_tax_id("C.I.F.: B-12345678\n").as_deref(),
            Some("B12345678")
        );
        assert_eq!(
            extract_tax_id("cif b 12345678\n").as_deref(),
            Some("B12345678")
        );
    }

    #[test]
    fn test_tax_id_stops_at_end_of_line() {
        // neither the trailing newline nor the first letter of the
        // next line may leak into the key
        assert_eq!(
            extract_tax_id("CIF: B-12345678\nREPSOL COMERCIAL S.A.\n").as_deref(),
            Some("B12345678")
        );
    }

    #[test]
    fn test_tax_id_bare_person_nif() {
        assert_eq!(
            extract_tax_id("titular 12345678-Z\n").as_deref(),
            Some("12345678Z")
        );
    }

    #[test]
    fn test_store_hit_short_circuits_vendor_search() {
        let dir = TempDir::new().unwrap();
        let store = empty_store(&dir);
        store
            .learn_vendor("B12345678", "Gasóleos del Sur S.A.", "previa.pdf")
            .unwrap();

        // text carries a different company name; the stored alias wins
        let text = "CIF: B-12345678\nREPSOL COMERCIAL S.A. les factura\nFecha: 01/02/2024\n";
        let fields = extract(text, "f.pdf", &store).unwrap();
        assert_eq!(fields.vendor.as_deref(), Some("GASÓLEOS_DEL_SUR"));
        assert_eq!(fields.tax_id.as_deref(), Some("B12345678"));
    }

    #[test]
    fn test_vendor_suffix_scan_skips_client_names() {
        let text = "Cliente: HAFESA OIL S.A.\nGASÓLEOS DEL SUR S.A. CIF: B11111111\n";
        assert_eq!(
            extract_vendor(text).as_deref(),
            Some("GASÓLEOS_DEL_SUR_SA")
        );
    }

    #[test]
    fn test_vendor_brand_by_pattern() {
        let text = "emitido por Q-SAFETY BY QUIRON 2024";
        assert_eq!(
            extract_vendor(text).as_deref(),
            Some("Q-SAFETY_BY_QUIRON")
        );
    }

    #[test]
    fn test_vendor_normalization_caps_at_50() {
        let raw = "Compañía Logística de Hidrocarburos y Derivados del Mediterráneo S.A.";
        let normalized = normalize_vendor(raw);
        assert!(normalized.chars().count() <= 50);
        assert!(!normalized.contains(' '));
    }

    #[test]
    fn test_invoice_number_label_combination_priority() {
        let text = "Nº FACTURA FECHA FACTURA\nA 20250965 18/03/2025\n";
        assert_eq!(extract_invoice_no(text).as_deref(), Some("A20250965"));
    }

    #[test]
    fn test_invoice_number_rejects_label_words() {
        let text = "Número de Factura: FECHA 20/01/2024\n";
        assert_eq!(extract_invoice_no(text), None);
    }

    #[test]
    fn test_single_field_tuple_fails_gate() {
        let dir = TempDir::new().unwrap();
        let text = "Fecha: 15/09/2024\nsin más datos útiles\n";
        let fields = extract(text, "f.pdf", &empty_store(&dir)).unwrap();
        assert_eq!(fields.resolved_count(), 1);
        assert!(!fields.is_valid());
    }

    #[test]
    fn test_context_window_respects_char_boundaries() {
        let text = "ñÑñÑñÑ Fecha: 01/02/2024 áéíóú";
        // must not panic regardless of where the match sits
        let m = Regex::new(r"\d{2}/\d{2}/\d{4}").unwrap().find(text).unwrap();
        let ctx = context_window(text, m.start(), m.end(), 50);
        assert!(ctx.contains("Fecha"));
    }
}
