use serde::Deserialize;
use std::{fs, path::Path};

#[derive(Deserialize)]
pub struct Config {
    /// When true, proposed renames are logged but never executed.
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    #[serde(default)]
    pub folders: FolderSection,
    #[serde(default)]
    pub ocr: OcrSection,
    #[serde(default)]
    pub azure: AzureSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub naming: NamingSection,
}

fn default_dry_run() -> bool {
    true
}

#[derive(Deserialize)]
pub struct FolderSection {
    #[serde(default = "default_input_folder")]
    pub input: String,
    #[serde(default = "default_output_folder")]
    pub output: String,
}

fn default_input_folder() -> String {
    "data/samples".to_string()
}

fn default_output_folder() -> String {
    "data/output".to_string()
}

impl Default for FolderSection {
    fn default() -> Self {
        Self {
            input: default_input_folder(),
            output: default_output_folder(),
        }
    }
}

#[derive(Deserialize)]
pub struct OcrSection {
    #[serde(default = "default_tesseract_path")]
    pub tesseract_path: String,
    #[serde(default = "default_mutool_path")]
    pub mutool_path: String,
    /// Tesseract language model used for all OCR passes.
    #[serde(default = "default_ocr_lang")]
    pub lang: String,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

fn default_tesseract_path() -> String {
    "tesseract".to_string()
}

fn default_mutool_path() -> String {
    "mutool".to_string()
}

fn default_ocr_lang() -> String {
    "spa".to_string()
}

fn default_dpi() -> u32 {
    300
}

impl Default for OcrSection {
    fn default() -> Self {
        Self {
            tesseract_path: default_tesseract_path(),
            mutool_path: default_mutool_path(),
            lang: default_ocr_lang(),
            dpi: default_dpi(),
        }
    }
}

/// Azure Document Intelligence credentials. The environment variables
/// `AZURE_FORM_RECOGNIZER_ENDPOINT` and `AZURE_FORM_RECOGNIZER_KEY`
/// take precedence over the file values.
#[derive(Default, Deserialize)]
pub struct AzureSection {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl AzureSection {
    pub fn resolved_endpoint(&self) -> Option<String> {
        std::env::var("AZURE_FORM_RECOGNIZER_ENDPOINT")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.endpoint.clone().filter(|v| !v.is_empty()))
    }

    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var("AZURE_FORM_RECOGNIZER_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.api_key.clone().filter(|v| !v.is_empty()))
    }
}

#[derive(Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "config/proveedores.json".to_string()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Deserialize)]
pub struct NamingSection {
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_separator() -> String {
    "_".to_string()
}

impl Default for NamingSection {
    fn default() -> Self {
        Self {
            separator: default_separator(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. A missing file is not an
    /// error; development runs work entirely on defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.as_ref().exists() {
            return Ok(toml::from_str("")?);
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let cfg: Config = toml::from_str("").unwrap();
        assert!(cfg.dry_run);
        assert_eq!(cfg.ocr.lang, "spa");
        assert_eq!(cfg.ocr.dpi, 300);
        assert_eq!(cfg.naming.separator, "_");
        assert_eq!(cfg.store.path, "config/proveedores.json");
    }

    #[test]
    fn test_partial_override() {
        let cfg: Config = toml::from_str(
            r#"
            dry_run = false

            [ocr]
            lang = "eng"
            "#,
        )
        .unwrap();
        assert!(!cfg.dry_run);
        assert_eq!(cfg.ocr.lang, "eng");
        // untouched sections keep their defaults
        assert_eq!(cfg.ocr.dpi, 300);
        assert_eq!(cfg.folders.input, "data/samples");
    }
}
