use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use scan_metrics::config::{CliArgs, PipelineConfig};
use scan_metrics::pipeline::Pipeline;

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Init tracing
    let filter = if args.verbose {
        EnvFilter::new("scan_metrics=debug")
    } else {
        EnvFilter::new("scan_metrics=info")
    };
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config: PipelineConfig = args.into();

    // Configure rayon thread pool
    if let Some(threads) = config.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure rayon thread pool")?;
    }

    match Pipeline::run(&config) {
        Ok(result) => {
            match &result.report {
                Some(report) => println!(
                    "Done: {} anchors, {} points, {} synchronized frames in {:.2}s",
                    report.anchors.len(),
                    report.point_cloud.points,
                    report.sync.synchronized_frames,
                    result.duration.as_secs_f64()
                ),
                None => println!("Done: dry run in {:.2}s", result.duration.as_secs_f64()),
            }
            Ok(())
        }
        Err(e) => {
            error!(%e, "Pipeline failed");
            Err(anyhow::anyhow!(e)).context("scan-metrics pipeline failed")
        }
    }
}
