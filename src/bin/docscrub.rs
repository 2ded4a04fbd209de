//! CLI binary for docscrub.
//!
//! A thin shim over the library crate: maps CLI flags to a
//! `PipelineConfig` + per-job `ProcessingRequest`, runs the batch
//! supervisor, and writes outputs next to the inputs (or into `--out-dir`).

use anyhow::{bail, Context, Result};
use clap::Parser;
use docscrub::{
    BatchJob, BatchSupervisor, CancellationToken, JobUpdate, Options, PipelineConfig,
    ProcessingRequest,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Redact PII from a PDF, writing report_processed.pdf
  docscrub --remove-pii report.pdf

  # Anonymize two terms across a batch, custom replacement
  docscrub --anonymize --terms "Acme,Initech" --replace "[REDACTED]" *.docx

  # Structured JSON snapshots, fast mode (no OCR, no table scan, regex-only PII)
  docscrub --extract-json --throughput contracts/*.pdf -o snapshots/

OUTPUT NAMES:
  --extract-json              → <stem>.json
  --anonymize / --remove-pii  → <stem>_processed.pdf
  neither                     → original filename (content passes through)
"#;

/// Scrub and extract documents: anonymization, PII redaction, OCR, JSON snapshots.
#[derive(Parser, Debug)]
#[command(
    name = "docscrub",
    version,
    about = "Anonymize, redact, and extract TXT/DOCX/PDF documents in parallel",
    arg_required_else_help = true,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input files (.txt, .docx, .pdf).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Substitute the terms given via --terms throughout each document.
    #[arg(long)]
    anonymize: bool,

    /// Redact emails, phone numbers, SSNs, card numbers, IBANs, and
    /// (when a recognizer is configured) named entities.
    #[arg(long)]
    remove_pii: bool,

    /// Emit a structured JSON snapshot instead of a rewritten document.
    #[arg(long)]
    extract_json: bool,

    /// Comma-separated literal terms for --anonymize.
    #[arg(long, value_delimiter = ',')]
    terms: Vec<String>,

    /// Replacement for matched terms (default: single space).
    #[arg(long, default_value = "")]
    replace: String,

    /// Max throughput mode: skip OCR and table extraction, regex-only PII.
    #[arg(long)]
    throughput: bool,

    /// Disable OCR over embedded images.
    #[arg(long)]
    no_ocr: bool,

    /// Write outputs into this directory instead of next to the inputs.
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Concurrent document workers (default: available parallelism).
    #[arg(short = 'j', long)]
    parallelism: Option<usize>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    if !(cli.anonymize || cli.remove_pii || cli.extract_json) {
        bail!("select at least one operation: --anonymize, --remove-pii, or --extract-json");
    }
    if cli.anonymize && cli.terms.is_empty() {
        bail!("--anonymize needs --terms");
    }

    if let Some(dir) = &cli.out_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create output directory {}", dir.display()))?;
    }

    // ── Build jobs ───────────────────────────────────────────────────────
    let request = ProcessingRequest {
        anonymize: cli.anonymize,
        remove_pii: cli.remove_pii,
        extract_json: cli.extract_json,
        options: Options {
            throughput_mode: cli.throughput,
            verbose_logging: cli.verbose,
            ocr_enabled: !cli.no_ocr,
            anonymize_terms: cli.terms.clone(),
            anonymize_replace: cli.replace.clone(),
        },
    };

    let mut jobs = Vec::with_capacity(cli.inputs.len());
    for (index, path) in cli.inputs.iter().enumerate() {
        let bytes = std::fs::read(path)
            .with_context(|| format!("cannot read input {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        jobs.push(BatchJob {
            index,
            filename,
            bytes,
            request: request.clone(),
        });
    }
    let total = jobs.len();

    // ── Run the batch ────────────────────────────────────────────────────
    let mut supervisor = BatchSupervisor::new(PipelineConfig::default());
    if let Some(n) = cli.parallelism {
        supervisor = supervisor.with_max_parallelism(n);
    }

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\ncancellation requested; in-flight jobs will finish");
                token.cancel();
            }
        });
    }

    let bar = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{bar:40.green/238}] {pos}/{len} documents  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    };

    let mut stream = supervisor.run_stream(jobs, token);
    let (mut done, mut errors, mut cancelled) = (0usize, 0usize, 0usize);

    while let Some(update) = stream.next().await {
        match update {
            JobUpdate::Processing { filename, .. } => {
                bar.set_message(filename);
            }
            JobUpdate::Done {
                filename,
                output_name,
                result,
                ..
            } => {
                let target = output_path(&cli, &filename, &output_name);
                match std::fs::write(&target, result.content.as_bytes()) {
                    Ok(()) => {
                        done += 1;
                        let cache_note = if result.metadata.cache_hit { "  (cached)" } else { "" };
                        bar.println(format!("  ✓ {filename} → {}{cache_note}", target.display()));
                    }
                    Err(e) => {
                        errors += 1;
                        bar.println(format!("  ✗ {filename}: cannot write output: {e}"));
                    }
                }
                bar.inc(1);
            }
            JobUpdate::Error {
                filename, message, ..
            } => {
                errors += 1;
                bar.println(format!("  ✗ {filename}: {message}"));
                bar.inc(1);
            }
            JobUpdate::Cancelled { filename, .. } => {
                cancelled += 1;
                bar.println(format!("  − {filename}: cancelled"));
                bar.inc(1);
            }
        }
    }
    bar.finish_and_clear();

    if !cli.quiet {
        eprintln!("{done}/{total} processed, {errors} failed, {cancelled} cancelled");
    }
    if done == 0 && errors > 0 {
        bail!("all jobs failed");
    }
    Ok(())
}

fn output_path(cli: &Cli, input_name: &str, output_name: &str) -> PathBuf {
    match &cli.out_dir {
        Some(dir) => dir.join(output_name),
        None => {
            // Next to the input file.
            let input = cli
                .inputs
                .iter()
                .find(|p| {
                    p.file_name()
                        .map(|n| n.to_string_lossy() == input_name)
                        .unwrap_or(false)
                })
                .cloned()
                .unwrap_or_else(|| PathBuf::from(input_name));
            input.with_file_name(output_name)
        }
    }
}
