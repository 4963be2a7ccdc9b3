use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde_json::json;

use encoder_odom_rs::dataset::{self, Dataset};
use encoder_odom_rs::pacing::{CancelToken, ManualClock};
use encoder_odom_rs::scheduler::{ReplayScheduler, ReplaySummary};
use encoder_odom_rs::sink::MemorySink;
use encoder_odom_rs::speed::SpeedOverride;
use encoder_odom_rs::{ReplayConfig, TickInterpretation};

#[derive(Parser, Debug)]
struct Args {
    /// Path to a recorded session (.json or .json.gz)
    #[arg(long, conflicts_with = "dir")]
    dataset: Option<PathBuf>,

    /// Directory of recorded sessions to batch replay
    #[arg(long)]
    dir: Option<PathBuf>,

    /// JSON config file (geometry, frames, covariance)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Include every pose in the output
    #[arg(long, default_value_t = false)]
    trajectory: bool,
}

/// Replay once on a virtual clock; recorded gaps cost no wall time.
fn replay_with(
    dataset: &Dataset,
    base: &ReplayConfig,
    ticks: TickInterpretation,
) -> anyhow::Result<(ReplaySummary, MemorySink)> {
    let config = ReplayConfig {
        tick_interpretation: ticks,
        // Offline: any recorded gap is fine, and coarse polling still lands exactly
        max_wait_ms: u64::MAX,
        poll_interval_ms: 1000,
        ..base.clone()
    };
    let scheduler = ReplayScheduler::new(
        config,
        SpeedOverride::shared(),
        Arc::new(ManualClock::new()),
        CancelToken::new(),
    );
    let mut sink = MemorySink::new();
    let summary = scheduler.run(dataset.samples(), &mut sink)?;
    Ok((summary, sink))
}

fn summary_json(summary: &ReplaySummary, sink: &MemorySink, trajectory: bool) -> serde_json::Value {
    let mut value = json!({
        "steps": summary.steps,
        "final_pose": {
            "x": summary.final_pose.x,
            "y": summary.final_pose.y,
            "theta": summary.final_pose.theta,
            "heading_deg": summary.final_pose.heading_deg(),
        },
        "distance_m": summary.distance,
        "recorded_ms": summary.elapsed_ms,
    });
    if trajectory {
        value["trajectory"] = json!(sink
            .poses()
            .iter()
            .map(|p| [p.x, p.y, p.theta])
            .collect::<Vec<_>>());
    }
    value
}

fn run_once(path: &Path, config: &ReplayConfig, args: &Args) -> anyhow::Result<serde_json::Value> {
    let dataset = dataset::load(path, config.encoder1_wheel)?;

    let (cumulative, cumulative_sink) =
        replay_with(&dataset, config, TickInterpretation::Cumulative)?;
    let (per_step, per_step_sink) = replay_with(&dataset, config, TickInterpretation::PerStep)?;

    let end_gap = ((cumulative.final_pose.x - per_step.final_pose.x).powi(2)
        + (cumulative.final_pose.y - per_step.final_pose.y).powi(2))
    .sqrt();

    Ok(json!({
        "dataset": path.display().to_string(),
        "samples": dataset.len(),
        "cumulative": summary_json(&cumulative, &cumulative_sink, args.trajectory),
        "per_step": summary_json(&per_step, &per_step_sink, args.trajectory),
        "end_point_gap_m": end_gap,
    }))
}

fn is_dataset(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".json") || name.ends_with(".json.gz")
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ReplayConfig::load(path)?,
        None => ReplayConfig::default(),
    };

    if let Some(dir) = &args.dir {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_dataset(p))
            .collect();
        paths.sort();
        if paths.is_empty() {
            anyhow::bail!("No datasets found in {}", dir.display());
        }

        let mut results = Vec::new();
        for path in &paths {
            match run_once(path, &config, &args) {
                Ok(result) => results.push(result),
                Err(e) => {
                    eprintln!("[REPLAY] Skipping {}: {}", path.display(), e);
                    results.push(json!({
                        "dataset": path.display().to_string(),
                        "error": e.to_string(),
                    }));
                }
            }
        }
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if let Some(path) = &args.dataset {
        let result = run_once(path, &config, &args)?;
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        anyhow::bail!("Pass --dataset <file> or --dir <directory>");
    }

    Ok(())
}
