// src/knowledge.rs

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A vendor identity learned from a confirmed invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorRecord {
    #[serde(rename = "nombre")]
    pub name: String,
    /// Shortened, filename-safe vendor name (≤30 chars).
    #[serde(rename = "alias")]
    pub alias: String,
    #[serde(rename = "aprendido_de")]
    pub learned_from: String,
    #[serde(rename = "fecha_aprendizaje")]
    pub learned_on: String,
}

/// On-disk layout of the store file. The top-level keys are an external
/// interface shared with other consumers of the file, hence the Spanish
/// names. `proveedores_por_patron` is reserved and never read here.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(rename = "proveedores_por_cif", default)]
    pub vendors_by_tax_id: BTreeMap<String, VendorRecord>,
    #[serde(rename = "proveedores_por_patron", default)]
    pub vendors_by_pattern: BTreeMap<String, serde_json::Value>,
    #[serde(rename = "correcciones_ocr", default)]
    pub corrections: BTreeMap<String, String>,
}

/// File-backed vendor knowledge store.
///
/// Read-through by contract: every operation loads the backing file,
/// and mutations read-modify-write the whole document. Last writer
/// wins; concurrent writers are not supported.
pub struct KnowledgeStore {
    path: PathBuf,
}

/// Legal-entity suffixes stripped when deriving an alias. Longest
/// first, so "S.A.U." is consumed before "S.A." gets a chance.
const LEGAL_SUFFIXES: [&str; 4] = ["S.A.U.", "S.L.U.", "S.A.", "S.L."];

/// Tax IDs are compared with hyphens, periods and all whitespace
/// stripped, uppercased. Applied identically at learn time and lookup
/// time. Whitespace includes newlines: a tax id captured at the end of
/// a line must hit the same key as one typed on the command line.
pub fn normalize_tax_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '.'))
        .collect::<String>()
        .to_uppercase()
}

impl KnowledgeStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Load the backing file. Absent file means an empty store; a file
    /// that exists but does not deserialize is a hard error.
    pub fn load(&self) -> Result<StoreData, PipelineError> {
        if !self.path.exists() {
            return Ok(StoreData::default());
        }
        let content = fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|source| PipelineError::StoreCorruption {
            path: self.path.display().to_string(),
            source,
        })
    }

    fn save(&self, data: &StoreData) -> Result<(), PipelineError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(data).map_err(|source| {
            PipelineError::StoreCorruption {
                path: self.path.display().to_string(),
                source,
            }
        })?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    /// Look up a known vendor by tax ID, returning its alias (or full
    /// name when no alias was stored).
    pub fn lookup_vendor(&self, tax_id: &str) -> Result<Option<String>, PipelineError> {
        let data = self.load()?;
        let key = normalize_tax_id(tax_id);
        Ok(data.vendors_by_tax_id.get(&key).map(|rec| {
            if rec.alias.is_empty() {
                rec.name.clone()
            } else {
                rec.alias.clone()
            }
        }))
    }

    /// Persist a confirmed vendor identity. Overwrites any previous
    /// record for the same normalized tax ID.
    pub fn learn_vendor(
        &self,
        tax_id: &str,
        name: &str,
        source_document: &str,
    ) -> Result<String, PipelineError> {
        let mut data = self.load()?;
        let key = normalize_tax_id(tax_id);
        let alias = derive_alias(name);

        data.vendors_by_tax_id.insert(
            key.clone(),
            VendorRecord {
                name: name.to_string(),
                alias: alias.clone(),
                learned_from: source_document.to_string(),
                learned_on: chrono::Local::now().format("%Y-%m-%d").to_string(),
            },
        );
        self.save(&data)?;
        info!(tax_id = %key, alias = %alias, "Vendor learned");
        Ok(alias)
    }

    /// Apply every stored OCR correction as a literal substring
    /// replacement. Longest correction key first so overlapping entries
    /// resolve deterministically; ties break lexicographically.
    pub fn apply_corrections(&self, text: &str) -> Result<String, PipelineError> {
        let data = self.load()?;
        if data.corrections.is_empty() {
            return Ok(text.to_string());
        }

        let mut keys: Vec<&String> = data.corrections.keys().collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut corrected = text.to_string();
        for key in keys {
            corrected = corrected.replace(key.as_str(), &data.corrections[key]);
        }
        debug!(corrections = data.corrections.len(), "OCR corrections applied");
        Ok(corrected)
    }

    /// Upsert one OCR correction entry.
    pub fn learn_correction(&self, wrong: &str, right: &str) -> Result<(), PipelineError> {
        let mut data = self.load()?;
        data.corrections
            .insert(wrong.to_string(), right.to_string());
        self.save(&data)?;
        info!(wrong = %wrong, right = %right, "OCR correction learned");
        Ok(())
    }
}

/// Derive a filename-safe alias from a canonical vendor name:
/// uppercase, legal suffixes stripped, commas/periods removed, internal
/// whitespace collapsed to underscores, capped at 30 characters.
fn derive_alias(name: &str) -> String {
    let mut alias = name.to_uppercase();
    for suffix in LEGAL_SUFFIXES {
        alias = alias.replace(suffix, "");
    }
    alias = alias
        .chars()
        .filter(|c| !matches!(c, ',' | '.'))
        .collect();
    alias
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .take(30)
        .collect()
}
