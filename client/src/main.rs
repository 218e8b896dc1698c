use clap::Parser;
use log::{error, info};
use pose_client::{PoseClient, PoseGenerator};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8888")]
    server: String,

    /// Player name to control
    #[arg(short = 'n', long, default_value = "PoseBot")]
    name: String,

    /// Scene announced in the handshake
    #[arg(long, default_value = "Default")]
    scene: String,

    /// Updates per second
    #[arg(short = 'r', long, default_value = "30")]
    rate: u32,

    /// Number of updates to send, 0 runs until interrupted
    #[arg(short = 'c', long, default_value = "0")]
    count: u64,

    /// Maximum random offset per coordinate in meters
    #[arg(long, default_value = "0.02")]
    jitter: f32,

    /// Clothes state to attach to every update
    #[arg(long)]
    clothes: Option<String>,

    /// Poll as a spectator instead of controlling a player
    #[arg(long)]
    spectate: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Starting pose bot...");
    info!("Connecting to: {}", args.server);

    let mut client = PoseClient::connect(&args.server).await?;
    let reply = client.handshake(&args.scene).await?;
    if !reply.is_accepted() {
        error!("Server refused handshake: {}", reply.text);
        return Ok(());
    }
    info!(
        "Handshake with {} accepted, scene {}",
        client.server_addr(),
        args.scene
    );

    let mut pose = PoseGenerator::new();
    pose.set_jitter(args.jitter);
    pose.set_clothes(args.clothes.clone());

    let mut ticker = interval(Duration::from_secs_f64(1.0 / f64::from(args.rate.max(1))));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut sent: u64 = 0;
    let mut last_seen = usize::MAX;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping after {} updates", sent);
                break;
            }
        }

        let records = if args.spectate {
            client.spectate().await?
        } else {
            client.send_update(&args.name, &pose.next_frame()).await?
        };
        sent += 1;

        if records.len() != last_seen {
            info!("Receiving {} records from other players", records.len());
            last_seen = records.len();
        }

        if args.count > 0 && sent >= args.count {
            info!("Sent {} updates, done", sent);
            break;
        }
    }

    Ok(())
}
