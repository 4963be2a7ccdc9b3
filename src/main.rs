use std::fs::File;
use std::io::BufWriter;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use encoder_odom_rs::dataset;
use encoder_odom_rs::pacing::{CancelToken, FinalSamplePolicy, SystemClock};
use encoder_odom_rs::scheduler::{ReplayScheduler, ReplaySummary};
use encoder_odom_rs::sink::{JsonLinesSink, OdometryAdapter};
use encoder_odom_rs::speed::SpeedOverride;
use encoder_odom_rs::speed_feed;
use encoder_odom_rs::{ReplayConfig, TickInterpretation, Wheel};

#[derive(Parser, Debug)]
#[command(name = "encoder_odom")]
#[command(about = "Replay recorded wheel encoders as live odometry", long_about = None)]
struct Args {
    /// Recorded session (JSON, optionally .gz)
    #[arg(value_name = "DATASET")]
    dataset: PathBuf,

    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write odometry JSON lines here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Listen for live speed datagrams (m/s) on this address
    #[arg(long)]
    speed_udp: Option<SocketAddr>,

    /// Read live speed (m/s) from stdin, one value per line
    #[arg(long, default_value_t = false)]
    speed_stdin: bool,

    #[arg(long, value_enum)]
    tick_interpretation: Option<TickInterpretation>,

    #[arg(long, value_enum)]
    final_sample: Option<FinalSamplePolicy>,

    /// Wheel the first encoder column belongs to
    #[arg(long, value_enum)]
    encoder1_wheel: Option<Wheel>,

    /// Wheel whose next-step travel paces samples under live speed
    #[arg(long, value_enum)]
    lookahead_wheel: Option<Wheel>,

    /// Minimum gap between publishes (0 = off)
    #[arg(long)]
    min_publish_interval_ms: Option<u64>,

    /// Longest single wait before the session fails
    #[arg(long)]
    max_wait_ms: Option<u64>,

    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Diagonal of the published pose/twist covariance
    #[arg(long)]
    covariance: Option<f64>,

    #[arg(long)]
    frame_id: Option<String>,

    #[arg(long)]
    child_frame_id: Option<String>,
}

fn build_config(args: &Args) -> Result<ReplayConfig> {
    let mut config = match &args.config {
        Some(path) => ReplayConfig::load(path)?,
        None => ReplayConfig::default(),
    };

    if let Some(v) = args.tick_interpretation {
        config.tick_interpretation = v;
    }
    if let Some(v) = args.final_sample {
        config.final_sample_policy = v;
    }
    if let Some(v) = args.encoder1_wheel {
        config.encoder1_wheel = v;
    }
    if let Some(v) = args.lookahead_wheel {
        config.lookahead_wheel = v;
    }
    if let Some(v) = args.min_publish_interval_ms {
        config.min_publish_interval_ms = v;
    }
    if let Some(v) = args.max_wait_ms {
        config.max_wait_ms = v;
    }
    if let Some(v) = args.poll_interval_ms {
        config.poll_interval_ms = v;
    }
    if let Some(v) = args.covariance {
        config.covariance = v;
    }
    if let Some(v) = &args.frame_id {
        config.frame_id = v.clone();
    }
    if let Some(v) = &args.child_frame_id {
        config.child_frame_id = v.clone();
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = build_config(&args)?;

    log::info!("[MAIN] Encoder odometry starting");
    log::info!("  Dataset: {}", args.dataset.display());
    log::info!("  Ticks: {:?}", config.tick_interpretation);
    log::info!(
        "  Geometry: r={:.4} m, {} ticks/rev, axle={:.3} m",
        config.geometry.wheel_radius,
        config.geometry.ticks_per_revolution,
        config.geometry.axle_length
    );

    let dataset = dataset::load(&args.dataset, config.encoder1_wheel)?;

    let speed = SpeedOverride::shared();
    let cancel = CancelToken::new();

    if let Some(addr) = args.speed_udp {
        let socket = speed_feed::bind_udp(addr).await?;
        tokio::spawn(speed_feed::udp_speed_loop(socket, speed.clone()));
    }
    if args.speed_stdin {
        tokio::spawn(speed_feed::stdin_speed_loop(speed.clone()));
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("[MAIN] Ctrl-C received, stopping replay");
                cancel.cancel();
            }
        });
    }

    let adapter = OdometryAdapter::from_config(&config);
    let output = args.output.clone();
    let summary = tokio::task::spawn_blocking(move || -> Result<ReplaySummary> {
        let scheduler = ReplayScheduler::new(config, speed, Arc::new(SystemClock::new()), cancel);
        let summary = match output {
            Some(path) => {
                let file = BufWriter::new(File::create(&path)?);
                log::info!("[MAIN] Writing odometry to {}", path.display());
                scheduler.run(dataset.samples(), JsonLinesSink::new(file, adapter))?
            }
            None => {
                let stdout = std::io::stdout().lock();
                scheduler.run(dataset.samples(), JsonLinesSink::new(stdout, adapter))?
            }
        };
        Ok(summary)
    })
    .await??;

    log::info!("=== Session Summary ===");
    log::info!("{}", serde_json::to_string_pretty(&summary)?);

    if args.speed_stdin {
        // The stdin reader can stay blocked on a read forever
        std::process::exit(0);
    }
    Ok(())
}
