mod pose;

use std::{path::PathBuf, sync::Arc, time::Duration};

use argh::FromArgs;
use kornia_pose::{
    estimator::{SubprocessConfig, SubprocessEstimator},
    pipeline::{PipelineConfig, PosePipeline},
    PoseTolerance,
};

#[derive(FromArgs)]
/// Serve 6D object pose estimation over HTTP
struct Args {
    /// the address to listen on
    #[argh(option, default = "String::from(\"0.0.0.0\")")]
    host: String,

    /// the port to listen on
    #[argh(option, short = 'p', default = "30823")]
    port: u16,

    /// the directory where every request is stored
    #[argh(option, short = 'o', default = "PathBuf::from(\"saved_requests\")")]
    output_dir: PathBuf,

    /// the FoundationPose checkout, defaults to $HOME/FoundationPose
    #[argh(option)]
    foundation_pose_dir: Option<PathBuf>,

    /// the python interpreter running the estimator
    #[argh(option, default = "PathBuf::from(\"python\")")]
    python: PathBuf,

    /// an extra argument forwarded to the estimator, can be repeated
    #[argh(option)]
    estimator_arg: Vec<String>,

    /// kill the estimator after this many seconds
    #[argh(option)]
    timeout_secs: Option<u64>,

    /// the maximum request body size in MiB
    #[argh(option, default = "512")]
    max_body_mb: usize,

    /// the accepted deviation of the rotation from orthogonality
    #[argh(option, default = "1e-3")]
    orthogonality_tol: f64,

    /// the accepted deviation of the rotation determinant from one
    #[argh(option, default = "1e-3")]
    determinant_tol: f64,

    /// delete the request directories once answered
    #[argh(switch)]
    discard_requests: bool,
}

impl Args {
    fn subprocess_config(&self) -> SubprocessConfig {
        let mut config = match &self.foundation_pose_dir {
            Some(dir) => SubprocessConfig::foundation_pose(dir),
            None => SubprocessConfig::default(),
        };
        config.program = self.python.clone();
        config.extra_args = self.estimator_arg.clone();
        config.timeout = self.timeout_secs.map(Duration::from_secs);
        config
    }

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            output_dir: self.output_dir.clone(),
            tolerance: PoseTolerance {
                orthogonality: self.orthogonality_tol,
                determinant: self.determinant_tol,
            },
            keep_requests: !self.discard_requests,
        }
    }
}

fn body_limit_bytes(max_body_mb: usize) -> usize {
    max_body_mb.saturating_mul(1024 * 1024)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Args = argh::from_env();

    let estimator = SubprocessEstimator::new(args.subprocess_config());
    log::info!(
        "🔧 Estimator: {} {}",
        estimator.config().program.display(),
        estimator.config().script.display()
    );
    if !estimator.config().script.is_file() {
        log::warn!(
            "estimator script {} not found, requests will fail",
            estimator.config().script.display()
        );
    }

    let pipeline = PosePipeline::new(args.pipeline_config(), Arc::new(estimator));
    log::info!(
        "📂 Storing requests in: {}",
        pipeline.config().output_dir.display()
    );

    let app = pose::router(Arc::new(pipeline), body_limit_bytes(args.max_body_mb));

    let addr = format!("{}:{}", args.host, args.port);
    log::info!("🚀 Starting the server");
    log::info!("🔥 Listening on: http://{}", addr);
    log::info!("🔧 Press Ctrl+C to stop the server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
