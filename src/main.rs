use anyhow::Result;
use campipe::device::sim::{SimulatedCamera, SimulatedCameraManager};
use campipe::{error_callback, frame_callback, CampipeConfig, CaptureOrchestrator, StreamType};
use clap::Parser;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "campipe")]
#[command(about = "Camera capture pipeline with zero-copy RGB delivery and asynchronous JPEG encoding")]
#[command(version)]
#[command(long_about = "Runs the capture pipeline against a simulated camera: configures the \
streams from the configuration file, delivers RGB frames zero-copy, encodes JPEG frames on a \
bounded background queue and reports throughput once per second.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "campipe.toml", help = "Path to TOML configuration file")]
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
    #[arg(long, help = "Validate configuration file and exit without starting capture")]
    validate_config: bool,

    /// Print effective configuration and exit
    #[arg(long, help = "Print the effective configuration in TOML format and exit")]
    print_config: bool,

    /// Print camera capabilities and exit
    #[arg(long, help = "Initialize the camera, print its capabilities as JSON and exit")]
    print_capabilities: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long, value_name = "SECONDS")]
    duration: Option<u64>,

    /// Interval between simulated frames
    #[arg(long, value_name = "MS", default_value_t = 33)]
    frame_interval_ms: u64,
}

#[derive(Default)]
struct FrameCounters {
    rgb_frames: AtomicU64,
    rgb_bytes: AtomicU64,
    jpeg_frames: AtomicU64,
    jpeg_bytes: AtomicU64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting campipe v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match CampipeConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.print_config {
        println!("# campipe configuration");
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }
    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let camera = SimulatedCamera::new("sim0")
        .with_frame_interval(Duration::from_millis(args.frame_interval_ms.max(1)));
    let manager = SimulatedCameraManager::single(Arc::new(camera));
    let mut orchestrator = CaptureOrchestrator::new(Arc::new(manager));

    orchestrator.initialize(&config).map_err(|e| {
        error!("Failed to initialize capture pipeline: {}", e);
        e
    })?;

    if args.print_capabilities {
        let capabilities = orchestrator.capabilities()?;
        println!("{}", serde_json::to_string_pretty(&capabilities)?);
        return Ok(());
    }

    let counters = Arc::new(FrameCounters::default());
    let on_frame = {
        let counters = Arc::clone(&counters);
        frame_callback(move |stream_type, frame| match stream_type {
            StreamType::Rgb => {
                counters.rgb_frames.fetch_add(1, Ordering::Relaxed);
                counters
                    .rgb_bytes
                    .fetch_add(frame.len() as u64, Ordering::Relaxed);
            }
            StreamType::Jpeg => {
                counters.jpeg_frames.fetch_add(1, Ordering::Relaxed);
                counters
                    .jpeg_bytes
                    .fetch_add(frame.len() as u64, Ordering::Relaxed);
            }
            StreamType::Raw => warn!("Unexpected RAW frame {}", frame.sequence()),
        })
    };
    let on_error = error_callback(|message| error!("Capture error: {}", message));

    orchestrator.start(on_frame, on_error).map_err(|e| {
        error!("Failed to start capture: {}", e);
        e
    })?;

    run(&orchestrator, &counters, args.duration).await;

    orchestrator.stop();

    let stats = orchestrator.stats();
    info!(
        "Capture finished: {} completed, {} RGB delivered, {} JPEG submitted, {} JPEG encoded",
        stats.completed,
        stats.rgb_delivered,
        stats.jpeg_submitted,
        counters.jpeg_frames.load(Ordering::Relaxed)
    );

    Ok(())
}

/// Report per-second throughput until Ctrl-C or the optional deadline
async fn run(orchestrator: &CaptureOrchestrator, counters: &FrameCounters, duration: Option<u64>) {
    let deadline = async {
        match duration {
            Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;
    let mut last_rgb = 0;
    let mut last_jpeg = 0;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Received Ctrl-C, stopping capture");
                break;
            }
            _ = &mut deadline => {
                info!("Run duration elapsed, stopping capture");
                break;
            }
            _ = ticker.tick() => {
                let rgb = counters.rgb_frames.load(Ordering::Relaxed);
                let jpeg = counters.jpeg_frames.load(Ordering::Relaxed);
                let encoder = orchestrator.encoder_stats();
                info!(
                    "rgb {} fps ({} MiB total), jpeg {} fps ({} KiB total), encoder failures {}",
                    rgb - last_rgb,
                    counters.rgb_bytes.load(Ordering::Relaxed) / (1024 * 1024),
                    jpeg - last_jpeg,
                    counters.jpeg_bytes.load(Ordering::Relaxed) / 1024,
                    encoder.map(|s| s.failed).unwrap_or(0)
                );
                last_rgb = rgb;
                last_jpeg = jpeg;
            }
        }
    }
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

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
        .unwrap_or_else(|_| EnvFilter::new(format!("campipe={}", log_level)));

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
            .with_file(false)
            .with_line_number(false)
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
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}
