//! Composition root: loads configuration, wires the driver/pipeline
//! factories into a `CameraRegistry`, starts every configured camera, and
//! waits for Ctrl-C to shut down gracefully.

mod config;
mod mock_driver;

use clap::Parser;
use frame_apriltag::AprilTagPipelineFactory;
use frame_core::{CameraDriverFactory, VisionPipelineFactory};
use frame_metrics::MetricsRegistry;
use frame_registry::CameraRegistry;
use mock_driver::{MockDriverConfig, MockDriverFactory};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "camera-fanoutd", about = "Concurrent multi-camera frame-distribution daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "camera-fanout.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let startup = config::load(&args.config)?;

    let metrics = Arc::new(MetricsRegistry::new());
    metrics.configure(startup.metrics_config, startup.metrics_enabled);
    if startup.metrics_enabled {
        metrics.start_memory_sampler(startup.sampler_interval);
    }

    let driver_factories: Vec<Arc<dyn CameraDriverFactory>> =
        vec![Arc::new(MockDriverFactory::new(MockDriverConfig::default()))];
    let pipeline_factories: Vec<Arc<dyn VisionPipelineFactory>> = vec![Arc::new(AprilTagPipelineFactory)];

    let registry = Arc::new(CameraRegistry::new(driver_factories, pipeline_factories, metrics));

    let camera_count = startup.cameras.len();
    for descriptor in startup.cameras {
        let identifier = descriptor.identifier.clone();
        if let Err(e) = registry.start_camera(descriptor) {
            error!(camera = %identifier, error = %e, "failed to start camera");
        }
    }
    info!(cameras = camera_count, "camera-fanoutd started");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install ctrl-c handler, shutting down anyway");
    }

    info!("shutdown signal received, stopping all cameras");
    registry.shutdown().await;
    Ok(())
}
