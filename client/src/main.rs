use clap::Parser;
use client::config::{
    default_data_dir, DEFAULT_HOST, DEFAULT_OUTPUT_LOG_URL, DEFAULT_TRAIL_BASE_URL,
    DEFAULT_UPLOAD_URL,
};
use client::{BuildMode, Collaborators, HeadlessGame, Link, LinkConfig};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Control server host
    #[arg(long, env = "MODLINK_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Control server port
    #[arg(short = 'p', long, env = "MODLINK_PORT", default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Build mode (developer builds always connect to localhost)
    #[arg(short = 'm', long, env = "MODLINK_MODE", value_enum, default_value_t = BuildMode::Release)]
    mode: BuildMode,

    /// Player id reported to the server
    #[arg(long, env = "MODLINK_PLAYER_ID", default_value = "0")]
    player_id: String,

    /// Replay upload endpoint
    #[arg(long, default_value = DEFAULT_UPLOAD_URL)]
    upload_url: String,

    /// Output log upload endpoint
    #[arg(long, default_value = DEFAULT_OUTPUT_LOG_URL)]
    output_log_url: String,

    /// Base URL for non-modkit trails
    #[arg(long, default_value = DEFAULT_TRAIL_BASE_URL)]
    trail_base_url: String,

    /// Game data directory holding Replays/ and output_log.txt
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Main-thread tick period in milliseconds
    #[arg(long, default_value = "50")]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = LinkConfig {
        host: args.host,
        port: args.port,
        mode: args.mode,
        upload_url: args.upload_url,
        output_log_url: args.output_log_url,
        trail_base_url: args.trail_base_url,
        data_dir: args.data_dir.unwrap_or_else(default_data_dir),
        ..LinkConfig::default()
    };

    info!("Starting headless link...");
    info!("Server: {}", config.server_addr());
    info!("Data directory: {}", config.data_dir.display());

    let game = Arc::new(HeadlessGame::new(&config, args.player_id));
    let quit = game.quit_requested();
    let mut link = Link::with_http(
        config,
        Collaborators::from_shared(game),
        tokio::runtime::Handle::current(),
    )?;
    link.start();

    let stop = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Interrupted, closing link"),
            _ = quit.notified() => info!("Quit requested by server, closing link"),
        }
    };
    link.run_until(Duration::from_millis(args.tick_ms), stop).await;

    // Give the writer a moment to flush MAP_EXIT.
    tokio::time::sleep(Duration::from_millis(100)).await;

    Ok(())
}
