use anyhow::{Context, Result};
use clap::Parser;
use handle_extract::{
    classify::DuplicateIndex,
    config::Settings,
    ocr::{
        SecondaryGate,
        recorded::{Manifest, RecordedPrimaryEngine, RecordedSecondaryEngine},
    },
    pipeline::{BatchOutput, Pipeline, run_batch},
    store::HandleStore,
};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal;

/// Extract social-media handles from recorded OCR reads of profile screenshots
#[derive(Parser, Debug)]
#[command(name = "handle-extract")]
#[command(about = "Reconcile multi-engine OCR reads into verified handles", long_about = None)]
struct Args {
    /// JSON manifest with the recorded engine reads for each image
    manifest: PathBuf,

    /// Output directory for the handle lists and reports
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// TOML config file (defaults are used for anything it leaves out)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Skip the secondary engine entirely
    #[arg(long, default_value = "false")]
    no_secondary: bool,

    /// Write diagnostics.json with every per-image record
    #[arg(long, default_value = "false")]
    diagnostics: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long, default_value = "false")]
    show_config: bool,
}

fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("invalid config file {}", path.display()))?,
        None => Settings::default(),
    };

    if let Some(output) = &args.output {
        settings.run.output_dir = output.clone();
    }
    if let Some(workers) = args.workers {
        settings.run.workers = workers;
    }
    if args.no_secondary {
        settings.run.secondary_enabled = false;
    }
    if args.diagnostics {
        settings.run.diagnostics = true;
    }
    settings.validate()?;
    Ok(settings)
}

fn run(settings: Settings, manifest: Manifest, quit: Arc<AtomicBool>) -> Result<BatchOutput> {
    let store = HandleStore::open(&settings.run.output_dir, settings.run.profile_url_base.clone())?;
    let index = DuplicateIndex::from_existing(store.load_existing()?);

    let manifest = Arc::new(manifest);
    let images = manifest.inputs();
    let gate = if settings.run.secondary_enabled {
        SecondaryGate::new(RecordedSecondaryEngine::new(manifest.clone()))
    } else {
        SecondaryGate::disabled()
    };

    let diagnostics = settings.run.diagnostics;
    let pipeline = Pipeline::new(settings);
    let output = run_batch(
        &pipeline,
        &images,
        || Ok(RecordedPrimaryEngine::new(manifest.clone())),
        &gate,
        &index,
        &quit,
    )?;

    let appended = store.append(&output.records)?;
    info!(
        "Added {} verified and {} review handles to {}",
        appended.verified,
        appended.review,
        store.dir().display()
    );
    let report = store.write_report(&output.summary)?;
    info!("Report written to {}", report.display());
    if diagnostics {
        let path = store.write_diagnostics(&output.summary, &output.records)?;
        info!("Diagnostics written to {}", path.display());
    }
    Ok(output)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter(None, log::LevelFilter::Info)
        .filter(Some("handle_extract"), log::LevelFilter::Debug)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let settings = load_settings(&args)?;

    if args.show_config {
        print!("{}", settings.to_toml()?);
        return Ok(());
    }

    let manifest = Manifest::load(&args.manifest)?;
    if manifest.images.is_empty() {
        warn!("Manifest {} lists no images", args.manifest.display());
    }
    info!(
        "Starting extraction of {} images into {}",
        manifest.images.len(),
        settings.run.output_dir.display()
    );

    let quit = Arc::new(AtomicBool::new(false));
    let quit_batch = quit.clone();
    let mut batch = tokio::task::spawn_blocking(move || run(settings, manifest, quit_batch));

    let output = tokio::select! {
        result = &mut batch => result?,
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => {
                    info!("Received Ctrl-C, finishing images in progress...");
                    quit.store(true, Ordering::Relaxed);
                }
                Err(err) => {
                    error!("Unable to listen for shutdown signal: {}", err);
                }
            }
            batch.await?
        }
    }?;

    let summary = &output.summary;
    info!(
        "Done: {} verified, {} to review, {} dropped",
        summary.verified(),
        summary.count(handle_extract::classify::Classification::Review),
        summary.dropped
    );

    Ok(())
}
