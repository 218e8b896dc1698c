use clap::{Parser, ValueEnum};
use log::{error, info};
use pose_server::admission::{Admission, AllowAll, FileAllowlist};
use pose_server::network::{Server, ServerConfig};
use pose_server::presence::{
    spawn_presence_writer, FilePresenceSink, LogPresenceSink, PresenceSink,
};
use pose_shared::DEFAULT_PORT;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PresenceMode {
    /// One structured log line per change
    Log,
    /// One line per change appended to a status file
    File,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "POSE_SERVER_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds without data before a connection is closed
    #[arg(long, default_value = "90")]
    idle_timeout: u64,

    /// Only accept connections from addresses listed in this file
    #[arg(long)]
    allowlist: Option<PathBuf>,

    /// Where presence changes are reported
    #[arg(long, value_enum, default_value = "log")]
    presence: PresenceMode,

    /// Status file for `--presence file`
    #[arg(long)]
    presence_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: SocketAddr::new(args.host, args.port),
        idle_timeout: Duration::from_secs(args.idle_timeout),
        ..ServerConfig::default()
    };

    let admission: Arc<dyn Admission> = match &args.allowlist {
        Some(path) => {
            let allowlist = FileAllowlist::new(path);
            info!("Using allowlist {}", allowlist.path().display());
            Arc::new(allowlist)
        }
        None => Arc::new(AllowAll),
    };

    let sink: Box<dyn PresenceSink> = match args.presence {
        PresenceMode::Log => Box::new(LogPresenceSink),
        PresenceMode::File => {
            let path = args
                .presence_file
                .clone()
                .unwrap_or_else(|| FilePresenceSink::default_path(args.port));
            let file_sink = FilePresenceSink::new(path);
            info!("Writing presence to {}", file_sink.path().display());
            Box::new(file_sink)
        }
    };
    let (presence, _writer) = spawn_presence_writer(sink)?;

    let server = Server::bind(config, admission, presence).await?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down gracefully...");
    };

    server.run_until(shutdown).await?;

    Ok(())
}
