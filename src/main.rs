//! jwo-video-client - streams a camera or file to the video server over WebRTC

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;

use jwo_video_client::config::DEFAULT_CONFIG_PATH;
use jwo_video_client::{run, ClientError, ClientOptions};

#[derive(Parser, Debug)]
#[command(name = "jwo-video-client", version)]
#[command(about = "Video client for the Just-Walk-Out Shopping System.")]
struct Cli {
    /// Request the debug video track and show it in a local window
    #[arg(short, long)]
    debug: bool,

    /// Stream a video file instead of the capture device
    #[arg(short, long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Config file
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let options = ClientOptions {
        config_path: cli.config,
        debug: cli.debug,
        file: cli.file,
    };

    match run(options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ ClientError::SignalingUnreachable { .. }) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            log::error!("Video client failed: {:?}", e);
            ExitCode::FAILURE
        }
    }
}
