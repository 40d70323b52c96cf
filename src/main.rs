use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use syncrec::events::NoticeLevel;
use syncrec::recording::AppLifecycle;
use syncrec::storage::ChannelIndexer;
use syncrec::sync::{HotspotState, LinkEvent};
use syncrec::{
    build_backend, EventBus, HeadlessVideoPipeline, LinkStateSource, LoopbackSyncProtocol,
    Preferences, RecordingOrchestrator, SensorCaptureManager, SessionPolicy, SessionStamp,
    SimulatedHardware, StopCause, SyncRecConfig, SyncRecEvent, SyncRole,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "syncrec")]
#[command(about = "Sensor logging core for synchronized multi-device video recording")]
#[command(version)]
#[command(long_about = "Records IMU and environmental sensor streams alongside video, one CSV \
log per sensor and session. Runs one session against simulated sensor hardware and a loopback \
synchronization controller, then prints what was written.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "syncrec.toml", help = "Path to TOML configuration file")]
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
    #[arg(long, help = "Validate configuration file and exit without recording")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily-rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Session length in seconds
    #[arg(long, default_value_t = 5)]
    duration: u64,

    /// Synthetic sensor sampling period in milliseconds
    #[arg(long, default_value_t = 10)]
    sample_period_ms: u64,

    /// Drop the network link halfway through the session
    #[arg(long, help = "Simulate loss of the synchronization link halfway through the session")]
    simulate_link_loss: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    // Held until exit so buffered file logs are flushed
    let _log_guard = init_logging(&args)?;

    info!("Starting syncrec v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match SyncRecConfig::load_from_file(&args.config) {
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
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    run_session(&args, config).await
}

async fn run_session(args: &Args, config: SyncRecConfig) -> Result<()> {
    let (indexer, mut indexed) = ChannelIndexer::new();
    tokio::spawn(async move {
        while let Some(file) = indexed.recv().await {
            debug!("Indexed {}", file);
        }
    });

    let backend = build_backend(&config.storage, Arc::new(indexer))?;
    let hardware = Arc::new(SimulatedHardware::with_all_sensors());
    let protocol = Arc::new(LoopbackSyncProtocol::new(config.sync.role));
    let links = LinkStateSource::new(config.system.link_event_capacity);
    let events = Arc::new(EventBus::new(config.system.event_bus_capacity));

    let mut notices = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = notices.recv().await {
            if let SyncRecEvent::Notice(notice) = event {
                match notice.level {
                    NoticeLevel::Toast => println!("! {}", notice.message),
                    NoticeLevel::Alert => println!("!! {}: {}", notice.title, notice.message),
                }
            }
        }
    });

    let orchestrator = RecordingOrchestrator::builder()
        .with_preferences(Preferences::from_config(
            &config.recording,
            config.sync.enabled || args.simulate_link_loss,
        ))
        .with_policy(SessionPolicy {
            allow_video_without_sensors: config.recording.allow_video_without_sensors,
            write_manifest: config.storage.write_manifest,
        })
        .with_capture(Arc::new(SensorCaptureManager::new(hardware.clone())))
        .with_storage(backend)
        .with_video(Arc::new(HeadlessVideoPipeline::new(true)))
        .with_sync_protocol(protocol)
        .with_link_source(links.clone())
        .with_app_lifecycle(Arc::new(AppLifecycle::new()))
        .with_event_bus(events)
        .build()?;

    let mut role = SyncRole::Inactive;
    if config.sync.enabled || args.simulate_link_loss {
        match orchestrator.start_sync_session().await {
            Ok(started) => role = started,
            Err(e) => warn!("Continuing without synchronized session: {}", e),
        }
    }

    let token = CancellationToken::new();
    let feed = hardware.spawn_synthetic_feed(
        Duration::from_millis(args.sample_period_ms.max(1)),
        token.clone(),
    );

    let stamp = SessionStamp::now();
    let report = orchestrator.start_session(stamp).await?;
    info!(
        "Session {} recording {} of {} requested sensors",
        report.session_id,
        report.recording.len(),
        report.requested.len()
    );

    let duration = Duration::from_secs(args.duration);
    tokio::select! {
        _ = record_for(duration, args.simulate_link_loss, role, &links) => {}
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT signal (Ctrl+C)"),
    }

    let summary = orchestrator.stop_session(StopCause::User).await?;
    orchestrator.shutdown().await?;
    token.cancel();
    if let Err(e) = feed.await {
        warn!("Synthetic feed ended abnormally: {}", e);
    }

    match summary {
        Some(summary) => {
            println!("✓ Session {} finished", summary.session_id);
            for stream in &summary.streams {
                println!(
                    "  {:<8} {:>7} rows {:>5} dropped  {}",
                    stream.kind.short_name(),
                    stream.rows,
                    stream.dropped,
                    stream.file
                );
                if let Some(failure) = &stream.failure {
                    println!("           write failed: {}", failure);
                }
            }
        }
        None => {
            println!("✗ Session {} was stopped early", stamp);
            for (kind, file) in orchestrator.last_session_files() {
                println!("  {:<8} {}", kind.short_name(), file);
            }
        }
    }

    Ok(())
}

async fn record_for(duration: Duration, simulate_link_loss: bool, role: SyncRole, links: &LinkStateSource) {
    if !simulate_link_loss {
        tokio::time::sleep(duration).await;
        return;
    }

    tokio::time::sleep(duration / 2).await;
    let event = match role {
        SyncRole::Follower => LinkEvent::ConnectivityChanged { active: None },
        _ => LinkEvent::HotspotStateChanged(HotspotState::Disabled),
    };
    info!("Simulating link loss: {:?}", event);
    links.publish(event);
    tokio::time::sleep(duration - duration / 2).await;
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
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
        .unwrap_or_else(|_| EnvFilter::new(format!("syncrec={}", log_level)));

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

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "syncrec.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
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

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Syncrec Configuration File");
    println!("# This is the default configuration with all available options");
    println!("# Any key can be overridden with SYNCREC__<SECTION>__<KEY> environment variables");
    println!();
    println!("{}", toml::to_string_pretty(&SyncRecConfig::default())?);
    Ok(())
}
