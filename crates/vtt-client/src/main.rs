//! Headless tabletop client: connects, enters a room and logs what it sees.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info, warn};
use vtt_config::{CliArgs, Config, NetworkConfig, default_config_dir};
use vtt_net::{CompressionConfig, FrameConfig, ReconnectConfig, TcpTransport, TransportConfig};
use vtt_sync::{SyncClient, SyncEvent};

fn transport_config(network: &NetworkConfig) -> TransportConfig {
    TransportConfig {
        frame: FrameConfig {
            max_payload_size: network.max_frame_bytes,
        },
        compression: CompressionConfig {
            threshold: network.compression_threshold,
            ..CompressionConfig::default()
        },
        connect_timeout: network.connect_timeout(),
        ..TransportConfig::default()
    }
}

fn reconnect_config(network: &NetworkConfig) -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: network.reconnect_delay(),
        max_attempts: network.reconnect_attempts,
        ..ReconnectConfig::default()
    }
}

fn log_dir(config: &Config, config_dir: &std::path::Path) -> PathBuf {
    if config.debug.log_dir.trim().is_empty() {
        config_dir.join("logs")
    } else {
        PathBuf::from(&config.debug.log_dir)
    }
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::RoomCreated(room) => info!(room = %room.id, name = %room.name, "hosting room"),
        SyncEvent::RoomJoined { room, player } => {
            info!(room = %room.id, player = %player.name, gm = player.is_gm, "joined room")
        }
        SyncEvent::PlayerJoined(player) => info!(player = %player.name, "player joined"),
        SyncEvent::PlayerLeft(player) => info!(player = %player.name, "player left"),
        SyncEvent::RemoteEvent(event) => info!(kind = event.kind(), "remote update"),
        SyncEvent::StateCorrected(report) => info!(
            replayed = report.replayed.len(),
            discarded = report.discarded.len(),
            "state corrected"
        ),
        SyncEvent::FullSync => info!("full state received"),
        SyncEvent::QualityChanged(change) => info!(from = %change.from, to = %change.to, "quality"),
        SyncEvent::ServerError(message) => warn!(%message, "server error"),
        _ => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = log_dir(&config, &config_dir);
    vtt_log::init_logging(Some(&log_dir), config.debug.json_log, Some(&config))?;

    let endpoint = config.network.endpoint();
    let (mut transport, mut events) = TcpTransport::new(transport_config(&config.network));
    if let Err(e) = transport.connect(endpoint.as_str()).await {
        error!(%endpoint, error = %e, "could not reach server");
        return Err(e.into());
    }

    let mut client = SyncClient::new(transport, &config);
    client.subscribe(log_event);

    match (&args.create_room, &args.room) {
        (Some(name), _) => client.create_room(name, &args.player_name, &args.password)?,
        (None, Some(room)) => client.join_room(room, &args.player_name, &args.password)?,
        (None, None) => info!("no room requested, observing connection only"),
    }

    loop {
        client.run(&mut events).await;
        if config.network.reconnect_attempts == 0 {
            break;
        }
        match client.reconnect(endpoint.as_str(), reconnect_config(&config.network)).await {
            Ok(attempts) => info!(attempts, "link restored"),
            Err(e) => {
                error!(error = %e, "giving up on server");
                return Err(e.into());
            }
        }
        if !client.rejoin(&args.player_name, &args.password)? {
            info!("no room to rejoin, observing connection only");
        }
    }

    info!("session ended");
    Ok(())
}
