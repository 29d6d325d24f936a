use anyhow::{bail, Result};
use cinecam::{
    CameraContext, CinecamConfig, ContextParts, DeviceBackend, DirectoryLibrary, FormatCatalog,
    MockWriterFactory, SimulatedBackend, StaticPermissions, WriterFactory,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "cinecam")]
#[command(about = "Camera capture core with live 3D LUT grading and QuickTime recording")]
#[command(version)]
#[command(long_about = "Runs the cinecam capture core on a simulated multi-lens camera. \
Frames are graded with the selected 3D LUT and can be recorded to a QuickTime clip \
when built with the gstreamer feature.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "cinecam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// List the formats every camera offers and exit
    #[arg(long, help = "List supported formats of every camera and exit")]
    list_formats: bool,

    /// Dry run mode - configure the camera but don't start capturing
    #[arg(long, help = "Configure the capture input and exit without streaming")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// LUT file to grade with, overriding the configuration
    #[arg(long, value_name = "FILE")]
    lut: Option<PathBuf>,

    /// Record a clip of this many seconds, then exit
    #[arg(long, value_name = "SECONDS")]
    record: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting cinecam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = match CinecamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }
    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let backend = SimulatedBackend::multi_lens();
    if args.list_formats {
        list_formats(&backend);
        return Ok(());
    }

    if let Some(lut) = &args.lut {
        config.lut.path = Some(lut.clone());
    }

    let record = match args.record {
        Some(seconds) if seconds.is_finite() && seconds > 0.0 => {
            Some(Duration::from_secs_f64(seconds))
        }
        Some(seconds) => bail!("Recording length must be positive, got {}", seconds),
        None => None,
    };
    let writers = match (record.is_some(), encoder_backend()?) {
        (_, Some(writers)) => writers,
        (true, None) => {
            bail!("No encoder backend available; rebuild with `--features gstreamer` to record")
        }
        // Preview-only runs never create a writer
        (false, None) => Arc::new(MockWriterFactory::new()) as Arc<dyn WriterFactory>,
    };

    let library = DirectoryLibrary::new(
        &config.recording.library_dir,
        &config.recording.file_prefix,
        &config.recording.timestamp_timezone,
        config.recording.save_metadata,
    );
    let context = CameraContext::open(
        &config,
        ContextParts {
            backend: Arc::new(backend),
            writers,
            library: Arc::new(library),
            permissions: Arc::new(StaticPermissions::allow_all()),
        },
    )
    .await?;

    if args.dry_run {
        if let Some(params) = context.parameters().await {
            println!(
                "✓ Dry run: {} configured for {} @ {}fps",
                params.device.id, params.format, params.frame_rate
            );
        }
        context.shutdown().await;
        return Ok(());
    }

    context.start_session().await?;

    match record {
        Some(length) => {
            context.start_recording().await?;
            info!("Recording for {:.1}s", length.as_secs_f64());
            tokio::select! {
                _ = tokio::time::sleep(length) => {}
                _ = shutdown_signal() => warn!("Interrupted, finishing the clip early"),
            }
            match context.stop_recording().await {
                Ok(Some(finished)) => println!(
                    "✓ Saved {} ({:.2}s, {} frames, {} dropped)",
                    finished.location.display(),
                    finished.duration.as_secs_f64(),
                    finished.stats.video_appended,
                    finished.stats.video_dropped
                ),
                Ok(None) => warn!("No recording was in progress"),
                Err(e) => {
                    error!("Recording failed: {}", e);
                    context.shutdown().await;
                    std::process::exit(1);
                }
            }
        }
        None => {
            info!("Capturing, press Ctrl+C to stop");
            shutdown_signal().await;
        }
    }

    let state = context.snapshot();
    info!(
        "Final state: {} frames processed at {:.1} fps, {} LUT fallbacks",
        state.frame_counters.frames, state.frame_counters.fps, state.frame_counters.fallbacks
    );
    context.shutdown().await;
    Ok(())
}

#[cfg(all(feature = "gstreamer", target_os = "linux"))]
fn encoder_backend() -> Result<Option<Arc<dyn WriterFactory>>> {
    let factory = cinecam::GstWriterFactory::new()?;
    Ok(Some(Arc::new(factory)))
}

#[cfg(not(all(feature = "gstreamer", target_os = "linux")))]
fn encoder_backend() -> Result<Option<Arc<dyn WriterFactory>>> {
    Ok(None)
}

/// Resolve on SIGINT or, on Unix, SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("Failed to register SIGTERM handler: {}", e);
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Received SIGINT signal (Ctrl+C)");
                    }
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT signal (Ctrl+C)"),
            _ = terminate.recv() => info!("Received SIGTERM signal"),
        }
    }

    #[cfg(not(unix))]
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received SIGINT signal (Ctrl+C)");
    }
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cinecam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_target(true).boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "cinecam.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print the default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# cinecam configuration file");
    println!("# Every option is shown with its default value.");
    println!("# Environment variables prefixed with CINECAM_ override file values.");
    println!();
    println!("{}", toml::to_string_pretty(&CinecamConfig::default())?);
    Ok(())
}

fn list_formats(backend: &SimulatedBackend) {
    for device in backend.devices() {
        let catalog = FormatCatalog::new(&device);
        println!(
            "{} ({:?}, {}x lens, zoom {:.1}-{:.1}){}",
            device.id,
            device.position,
            device.nominal_zoom,
            device.zoom_range.0,
            device.zoom_range.1,
            if device.has_torch { ", torch" } else { "" }
        );
        for (width, height) in catalog.resolutions() {
            let rates: Vec<String> = catalog
                .frame_rates(width, height)
                .iter()
                .map(|rate| {
                    let log = if catalog.supports_log(width, height, *rate) {
                        "+log"
                    } else {
                        ""
                    };
                    format!("{}{}", rate, log)
                })
                .collect();
            println!("  {}x{}: {}", width, height, rates.join(" "));
        }
        if catalog.supports_hdr() {
            println!("  HDR available");
        }
    }
}
