use clap::{Args, Parser, Subcommand};
use rand::Rng;
use serde_json::Value;
use tokio::time::Duration;
use uuid::Uuid;

use client::presence::{
    ClientConfig, ClientError, ConnectionStatus, OtherPlayer, PresenceClient, PresenceHandle,
    PresenceSink,
};
use messages::{DEFAULT_PLAYER_NAME, Investigation, Position};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("health check failed: HTTP {0}")]
    Unhealthy(u16),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Parser, Debug)]
#[command(name = "presence-cli", about = "Wanderlight relay API and websocket CLI")]
struct Cli {
    #[arg(long, env = "RELAY_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check relay health.
    Ping,
    /// REST inspection endpoints.
    Api(ApiCommand),
    /// Connect as a player and print relayed events until interrupted.
    Join(JoinArgs),
}

#[derive(Args, Debug)]
struct ApiCommand {
    #[command(subcommand)]
    command: ApiSubcommand,
}

#[derive(Subcommand, Debug)]
enum ApiSubcommand {
    Players,
    Investigations,
}

#[derive(Args, Debug)]
struct JoinArgs {
    #[arg(long, default_value = DEFAULT_PLAYER_NAME)]
    name: String,

    #[arg(long, requires = "lng")]
    lat: Option<f64>,

    #[arg(long, requires = "lat")]
    lng: Option<f64>,

    /// Send a drifting position update every N seconds (0 disables).
    #[arg(long, default_value_t = 0)]
    wander_secs: u64,

    /// Start an investigation right after joining.
    #[arg(long, default_value_t = false)]
    investigate: bool,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Ping => run_ping(&cli.base_url).await,
        Command::Api(api) => run_api(&cli.base_url, api).await,
        Command::Join(args) => run_join(&cli.base_url, args).await,
    }
}

async fn run_ping(base_url: &str) -> Result<(), CliError> {
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    let response = reqwest::get(url).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Unhealthy(status.as_u16()));
    }
    let body: Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn run_api(base_url: &str, api: ApiCommand) -> Result<(), CliError> {
    let path = match api.command {
        ApiSubcommand::Players => "/api/players",
        ApiSubcommand::Investigations => "/api/investigations",
    };
    let url = format!("{}{path}", base_url.trim_end_matches('/'));
    let body: Value = reqwest::get(url).await?.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Sink that prints every relayed event to stdout.
struct PrintSink;

impl PresenceSink for PrintSink {
    fn on_connection_change(&mut self, status: ConnectionStatus) {
        println!("· {}", status.label());
    }
    fn on_player_count(&mut self, count: u32) {
        println!("· {count} explorers online");
    }
    fn on_player_update(&mut self, player: &OtherPlayer) {
        match player.position {
            Some(position) => {
                println!("· {} ({}) at {:.6},{:.6}", player.name, player.id, position.lat, position.lng);
            }
            None => println!("· {} ({}) joined", player.name, player.id),
        }
    }
    fn on_player_leave(&mut self, player_id: &str) {
        println!("· {player_id} left");
    }
    fn on_investigation_update(&mut self, player_id: &str, investigation: Option<&Investigation>) {
        match investigation {
            Some(investigation) => println!("· {player_id} investigating {}", investigation.id),
            None => println!("· {player_id} finished investigating"),
        }
    }
    fn on_zone_entry(&mut self, player_id: &str, zone_type: &str) {
        println!("· {player_id} entered a {zone_type} zone");
    }
    fn on_unlock(&mut self, message: &str) {
        println!("· {message}");
    }
}

async fn run_join(base_url: &str, args: JoinArgs) -> Result<(), CliError> {
    let position = match (args.lat, args.lng) {
        (Some(lat), Some(lng)) => Some(Position { lat, lng }),
        _ => None,
    };

    let mut config = ClientConfig::new(base_url).with_name(args.name);
    if let Some(position) = position {
        config = config.with_position(position);
    }

    let (mut presence, handle) = PresenceClient::new(config, Box::new(PrintSink));

    if args.investigate {
        let investigation: Investigation = serde_json::from_value(serde_json::json!({
            "id": format!("inv-{}", Uuid::new_v4()),
            "zone": "mystery",
        }))?;
        // Queued behind the join; sent once the connection is up.
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            handle.send_investigation_start(investigation);
        });
    }

    if args.wander_secs > 0 {
        let start = position.unwrap_or(Position { lat: 61.4978, lng: 23.761 });
        tokio::spawn(wander(handle.clone(), start, Duration::from_secs(args.wander_secs)));
    }

    let run = tokio::spawn(async move { presence.run().await });

    tokio::signal::ctrl_c().await.ok();
    println!("· closing");
    handle.disconnect();

    match run.await {
        Ok(result) => result.map_err(CliError::from),
        Err(_) => Ok(()),
    }
}

/// Send a slightly drifting position on a fixed cadence.
async fn wander(handle: PresenceHandle, start: Position, every: Duration) {
    let mut position = start;
    let mut tick = tokio::time::interval(every);
    loop {
        tick.tick().await;
        let (dlat, dlng) = {
            let mut rng = rand::rng();
            (rng.random_range(-0.0005..0.0005), rng.random_range(-0.0005..0.0005))
        };
        position = Position { lat: position.lat + dlat, lng: position.lng + dlng };
        handle.send_position_update(position);
    }
}
