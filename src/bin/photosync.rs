use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use photosync_lib::input_validation::{parse_extension_list, validate_path_argument};
use photosync_lib::logging::{init_logging, LogFormat, LoggingConfig};
use photosync_lib::path_validation::validate_sync_root;
use photosync_lib::sync_engine::{ProgressObserver, TransferEvent};
use photosync_lib::{
    watcher, CancellationController, DirectoryRemote, FsLocalProvider, SyncConfig, SyncEngine,
    SyncError, SyncReport,
};

#[derive(Parser)]
#[command(name = "photosync")]
#[command(version, about = "Keep a photo directory tree in step with remote albums", long_about = None)]
struct Cli {
    /// Download remote sets named or prefixed by TARGET ("." for all sets)
    #[arg(short, long, value_name = "TARGET")]
    download: Option<String>,

    /// Two-way sync; only "all" is supported
    #[arg(long, value_name = "MODE")]
    sync: Option<String>,

    /// Keep watching the sync path after uploading
    #[arg(short, long)]
    monitor: bool,

    #[arg(long)]
    ignore_images: bool,

    #[arg(long)]
    ignore_videos: bool,

    /// Comma separated extensions to ignore, e.g. "mts,gif"
    #[arg(long, value_name = "EXTS")]
    ignore_ext: Option<String>,

    /// Use the last directory component as the set title
    #[arg(long)]
    custom_set: bool,

    /// Show the custom titles and ask before uploading
    #[arg(long)]
    custom_set_debug: bool,

    /// Root of the local photo tree (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    sync_path: Option<PathBuf>,

    /// Root of the album store
    #[arg(short, long, value_name = "DIR")]
    remote: Option<PathBuf>,

    /// Treat '\' in remote names as a path separator
    #[arg(long)]
    cross_platform: bool,

    /// YAML configuration file; command line flags take precedence
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum concurrent transfers
    #[arg(short, long)]
    jobs: Option<usize>,

    #[arg(long, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[arg(short, long)]
    verbose: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

fn build_config(cli: &Cli) -> anyhow::Result<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::from_yaml_file(path)?,
        None => SyncConfig::default(),
    };

    if let Some(path) = &cli.sync_path {
        validate_path_argument(&path.to_string_lossy())?;
        config.sync_root = path.clone();
    }
    if let Some(remote) = &cli.remote {
        validate_path_argument(&remote.to_string_lossy())?;
        config.remote_root = Some(remote.clone());
    }
    if let Some(raw) = &cli.ignore_ext {
        config.ignore_extensions.extend(parse_extension_list(raw));
    }
    if let Some(jobs) = cli.jobs {
        config.max_concurrent_transfers = jobs;
    }
    config.ignore_images |= cli.ignore_images;
    config.ignore_videos |= cli.ignore_videos;
    config.custom_set_titles |= cli.custom_set || cli.custom_set_debug;
    config.custom_set_debug |= cli.custom_set_debug;
    config.cross_platform_paths |= cli.cross_platform;

    let mut config = config.normalize();
    config.validate()?;
    config.sync_root = validate_sync_root(&config.sync_root)?;
    Ok(config)
}

fn progress_observer(pb: &ProgressBar) -> ProgressObserver {
    let pb = pb.clone();
    Arc::new(move |event: TransferEvent<'_>| match event {
        TransferEvent::Scheduled(task) => {
            pb.inc_length(1);
            pb.set_message(format!("{} {}/{}", task.direction, task.set, task.filename));
        }
        TransferEvent::Completed(_) => pb.inc(1),
        TransferEvent::Failed(task, message) => {
            pb.inc(1);
            pb.println(format!("⚠️  {} {}/{}: {message}", task.direction, task.set, task.filename));
        }
        TransferEvent::Skipped {
            set,
            filename,
            reason,
            ..
        } => pb.set_message(format!("skipped {set}/{filename} ({reason})")),
    })
}

async fn confirm_titles(engine: &SyncEngine) -> anyhow::Result<()> {
    let titles = engine.preview_set_titles(None).await?;
    for (set, title) in &titles {
        println!("   {set} => {title}");
    }
    if !engine.config().custom_set_debug {
        return Ok(());
    }

    let accepted = tokio::task::spawn_blocking(|| -> io::Result<bool> {
        print!("Is this your expected custom set titles (y/n)? ");
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(answer.trim().eq_ignore_ascii_case("y"))
    })
    .await??;

    if accepted {
        Ok(())
    } else {
        Err(SyncError::UserCancelled.into())
    }
}

fn print_summary(report: &SyncReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!();
    println!("📊 Results:");
    println!("   Uploaded: {}", report.uploaded);
    println!("   Downloaded: {}", report.downloaded);
    println!("   Already present: {}", report.already_present);
    println!("   Ignored: {}", report.ignored);
    for item in &report.oversized {
        eprintln!("   ⚠️  [Too Large] {:?}: {}", item.path, item.message);
    }
    if !report.failures.is_empty() {
        println!("   Errors: {}", report.failures.len());
        for failure in &report.failures {
            eprintln!(
                "   ⚠️  [{}] {}/{}: {}",
                failure.direction, failure.set, failure.filename, failure.message
            );
        }
    }
    if report.interrupted {
        println!("   Stopped before all transfers were scheduled");
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = build_config(&cli)?;
    let remote_root = config
        .remote_root
        .clone()
        .ok_or_else(|| anyhow::anyhow!("Missing required argument: --remote"))?;

    let remote = DirectoryRemote::open(&remote_root)?.with_custom_titles(config.custom_set_titles);
    let cancel = Arc::new(CancellationController::new());
    let _interrupts = cancel.listen_for_interrupts();

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let engine = Arc::new(
        SyncEngine::new(config, Arc::new(FsLocalProvider::new()), Arc::new(remote))
            .with_cancellation(Arc::clone(&cancel))
            .with_progress(progress_observer(&pb)),
    );
    info!("Syncing {}", engine.config().sync_root.display());

    let report = if let Some(target) = &cli.download {
        engine.download(target).await?
    } else if let Some(mode) = &cli.sync {
        engine.sync(mode).await?
    } else {
        if engine.config().custom_set_titles {
            confirm_titles(&engine).await?;
        }
        let report = engine.upload(None).await?;
        info!("Upload done");
        report
    };

    pb.finish_and_clear();
    print_summary(&report, cli.json)?;

    if cli.monitor && cli.download.is_none() && cli.sync.is_none() && !report.interrupted {
        watcher::monitor(Arc::clone(&engine)).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    init_logging(
        LoggingConfig::default()
            .with_format(cli.log_format)
            .with_level(level),
    )?;

    match run(cli).await {
        Ok(()) => Ok(()),
        Err(e) if matches!(e.downcast_ref::<SyncError>(), Some(SyncError::UserCancelled)) => {
            info!("Cancelled by user");
            Ok(())
        }
        Err(e) => {
            error!("{e:#}");
            eprintln!("❌ Error: {e:#}");
            std::process::exit(1);
        }
    }
}
