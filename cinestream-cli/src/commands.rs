//! CLI command implementations

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;
use cinestream_core::content::{ContentClient, LocalContentClient};
use cinestream_core::tracing_setup::{CliLogLevel, init_tracing};
use cinestream_core::transcode::{FfmpegTranscoder, SimulatedTranscoder, Transcoder};
use cinestream_core::{CinestreamConfig, RuntimeMode, StreamService};
use cinestream_sim::{SimulatedContentClient, SwarmConfig};
use tracing::{info, warn};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<IpAddr>,
        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
        /// Directory of media served in production mode
        #[arg(long)]
        library: Option<PathBuf>,
        /// Runtime mode: production or development
        #[arg(long, default_value_t = RuntimeMode::Development)]
        mode: RuntimeMode,
        /// Transcoder executable, defaults to ffmpeg_bin/ffmpeg beside this binary
        #[arg(long)]
        ffmpeg: Option<PathBuf>,
        /// Console log level
        #[arg(long, value_enum, default_value_t = CliLogLevel::Info)]
        log_level: CliLogLevel,
        /// Also write a debug log of this run into the directory
        #[arg(long)]
        logs_dir: Option<PathBuf>,
    },
}

/// Handle the CLI command
///
/// # Errors
///
/// - Tracing could not be initialized
/// - The server failed to bind or serve
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve {
            host,
            port,
            library,
            mode,
            ffmpeg,
            log_level,
            logs_dir,
        } => {
            init_tracing(log_level.as_tracing_level(), logs_dir.as_deref())
                .context("failed to initialize logging")?;

            let mut config = CinestreamConfig::from_env();
            let bind = config.server.bind_address;
            config.server.bind_address = SocketAddr::new(
                host.unwrap_or_else(|| bind.ip()),
                port.unwrap_or_else(|| bind.port()),
            );
            if let Some(path) = ffmpeg {
                config.transcode.ffmpeg_path = path;
            }

            serve(config, mode, library).await
        }
    }
}

/// Builds the collaborators for `mode` and runs the server until Ctrl-C.
async fn serve(
    config: CinestreamConfig,
    mode: RuntimeMode,
    library: Option<PathBuf>,
) -> anyhow::Result<()> {
    let (client, transcoder): (Arc<dyn ContentClient>, Arc<dyn Transcoder>) = match mode {
        RuntimeMode::Production => {
            let library = match library {
                Some(dir) => dir,
                None => std::env::current_dir().context("no --library and no working directory")?,
            };
            if !config.transcode.ffmpeg_path.exists() {
                warn!(
                    path = %config.transcode.ffmpeg_path.display(),
                    "Transcoder executable not found, segmented streams will fail"
                );
            }
            info!(library = %library.display(), "Serving local library");
            (
                Arc::new(LocalContentClient::new(library)),
                Arc::new(FfmpegTranscoder::new(config.transcode.ffmpeg_path.clone())),
            )
        }
        RuntimeMode::Development => {
            if library.is_some() {
                warn!("--library is ignored in development mode");
            }
            let client = SimulatedContentClient::new(SwarmConfig::default());
            let published = client.publish_demo_catalog();
            info!(items = ?published, "Simulated swarm ready");
            (Arc::new(client), Arc::new(SimulatedTranscoder::default()))
        }
    };

    info!(%mode, transcoder = transcoder.name(), "Starting Cinestream");
    let address = config.server.bind_address;
    let service = StreamService::start(config, client, transcoder);
    cinestream_web::run_server(service, address).await?;
    Ok(())
}
