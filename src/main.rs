mod acquire;
mod cloud;
mod config;
mod error;
mod extract;
mod heuristics;
mod knowledge;
mod naming;
mod ocr;

use cloud::{AzureInvoiceExtractor, CloudExtractor};
use config::Config;
use error::PipelineError;
use knowledge::KnowledgeStore;
use ocr::{OcrEngine, TesseractOcr};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter("info")
        .init();

    // Azure credentials may live in a .env file
    let _ = dotenvy::dotenv();

    let cfg = Config::load("config.toml")?;
    let store = KnowledgeStore::new(&cfg.store.path);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("inspect") => {
            let path = args
                .get(1)
                .ok_or("usage: invoice_rename inspect <file>")?;
            inspect(Path::new(path), &cfg, &store).await
        }
        Some("learn-vendor") => {
            let (tax_id, name, source) = match (args.get(1), args.get(2), args.get(3)) {
                (Some(t), Some(n), Some(s)) => (t, n, s),
                _ => return Err("usage: invoice_rename learn-vendor <tax-id> <name> <source-file>".into()),
            };
            let alias = store.learn_vendor(tax_id, name, source)?;
            println!("{tax_id} -> {alias}");
            Ok(())
        }
        Some("learn-correction") => {
            let (wrong, right) = match (args.get(1), args.get(2)) {
                (Some(w), Some(r)) => (w, r),
                _ => return Err("usage: invoice_rename learn-correction <wrong> <right>".into()),
            };
            store.learn_correction(wrong, right)?;
            println!("{wrong} -> {right}");
            Ok(())
        }
        Some(other) => Err(format!("unknown command: {other}").into()),
        None => run_batch(&cfg, &store).await,
    }
}

/// Process every pending invoice in the input folder.
async fn run_batch(cfg: &Config, store: &KnowledgeStore) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        dry_run = cfg.dry_run,
        input = %cfg.folders.input,
        output = %cfg.folders.output,
        "Starting invoice rename run"
    );

    let ocr = TesseractOcr::new(&cfg.ocr.tesseract_path, &cfg.ocr.mutool_path, &cfg.ocr.lang);
    let cloud = AzureInvoiceExtractor::from_config(&cfg.azure);
    if cloud.is_available() {
        info!("Cloud extraction configured, it will be tried first");
    } else {
        info!("Cloud extraction not configured, pattern extraction only");
    }

    let pending = pending_invoices(Path::new(&cfg.folders.input))?;
    if pending.is_empty() {
        warn!("No invoices to process");
        return Ok(());
    }
    info!(count = pending.len(), "Invoices found");

    let mut succeeded = 0usize;
    let mut failed = 0usize;

    for path in &pending {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let span = tracing::info_span!("invoice", file = %filename);
        let _guard = span.enter();

        match process_document(path, &filename, cfg, store, &ocr, &cloud).await {
            Ok(new_name) => {
                info!(from = %filename, to = %new_name, "Renamed");
                succeeded += 1;
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(error = %e, "Aborting batch");
                return Err(e.into());
            }
            Err(e) => {
                warn!(error = %e, "Document failed, continuing with the next one");
                failed += 1;
            }
        }
    }

    info!(
        total = pending.len(),
        succeeded,
        failed,
        dry_run = cfg.dry_run,
        "Batch complete"
    );
    Ok(())
}

/// List files in the input folder that pass the extension allow-list.
fn pending_invoices(input: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    if !input.exists() {
        warn!(folder = %input.display(), "Input folder not found");
        return Ok(Vec::new());
    }

    let mut pending = Vec::new();
    for entry in fs::read_dir(input)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if acquire::is_allowed(&path) {
            pending.push(path);
        } else {
            warn!(file = %path.display(), "Ignoring file with unsupported extension");
        }
    }
    pending.sort();
    Ok(pending)
}

/// Full pipeline for one document: acquire text, extract fields,
/// build the new name, then rename (or just log it in dry-run mode).
async fn process_document(
    path: &Path,
    filename: &str,
    cfg: &Config,
    store: &KnowledgeStore,
    ocr: &dyn OcrEngine,
    cloud: &dyn CloudExtractor,
) -> Result<String, PipelineError> {
    let bytes = fs::read(path)?;
    let text = acquire::acquire_text(path, &bytes, ocr, cfg.ocr.dpi)?;
    let fields = extract::extract_invoice(&bytes, &text, filename, cloud, store).await?;
    let new_name = naming::build_filename(&fields, &cfg.naming.separator)?;

    if cfg.dry_run {
        info!(from = %filename, to = %new_name, "DRY RUN, not renaming");
    } else {
        let output = Path::new(&cfg.folders.output);
        fs::create_dir_all(output)?;
        fs::rename(path, output.join(&new_name))?;
    }
    Ok(new_name)
}

/// Extract a single document and print the pattern-engine result as
/// JSON, without touching any file.
async fn inspect(
    path: &Path,
    cfg: &Config,
    store: &KnowledgeStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    info!(file = %filename, "Inspecting document");

    let ocr = TesseractOcr::new(&cfg.ocr.tesseract_path, &cfg.ocr.mutool_path, &cfg.ocr.lang);
    let bytes = fs::read(path)?;
    let text = acquire::acquire_text(path, &bytes, &ocr, cfg.ocr.dpi)?;

    println!("--- Extracted text (first 2000 chars) ---");
    let preview_end = text
        .char_indices()
        .take(2000)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    println!("{}", &text[..preview_end]);
    println!("--- End ---");

    let corrected = store.apply_corrections(&text)?;
    let fields = heuristics::spanish::extract(&corrected, &filename, store)?;
    println!("{}", serde_json::to_string_pretty(&fields)?);

    if fields.is_valid() {
        let new_name = naming::build_filename(&fields, &cfg.naming.separator)?;
        println!("proposed name: {new_name}");
    } else {
        println!(
            "tuple incomplete: {}/3 fields, no name generated",
            fields.resolved_count()
        );
    }
    Ok(())
}
