// resumeblu CLI
// Runs one session over the TCP loopback radio, or a two-device demo on the simulated air

use clap::{Parser, Subcommand};
use resumeblu::radio::{
    PeerId, RadioAdapter, RadioAir, ServiceId, TcpRadio, TcpRadioConfig, INSECURE_SERVICE_ID,
};
use resumeblu::session::{
    ConnectionManager, SessionConfig, SessionEvent, SessionEvents, DEFAULT_READ_BUFFER_SIZE,
};
use std::error::Error;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "resumeblu", version, about = "Single-peer byte stream sessions")]
struct Cli {
    /// Service id advertised and connected to
    #[arg(long, global = true, default_value_t = INSECURE_SERVICE_ID)]
    service: ServiceId,

    /// Pump read buffer size in bytes
    #[arg(long, global = true, default_value_t = DEFAULT_READ_BUFFER_SIZE)]
    buffer_size: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Advertise the service and wait for a peer
    Listen {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 7000)]
        port: u16,
    },
    /// Connect to a peer (`host:port`) while also listening
    Connect {
        peer: String,
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 0)]
        port: u16,
    },
    /// Two simulated devices rendezvous and exchange one message
    Demo {
        #[arg(long, default_value = "hello")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SessionConfig::new()
        .with_service_id(cli.service)
        .with_read_buffer_size(cli.buffer_size);

    match cli.command {
        Command::Listen { bind, port } => {
            let radio = TcpRadio::new(TcpRadioConfig::new().with_bind_address(&bind).with_bind_port(port));
            let (manager, events) = ConnectionManager::new(radio, config)?;
            manager.start_listening()?;
            run_session(manager, events).await
        }
        Command::Connect { peer, bind, port } => {
            let radio = TcpRadio::new(TcpRadioConfig::new().with_bind_address(&bind).with_bind_port(port));
            let (manager, events) = ConnectionManager::new(radio, config)?;
            manager.start_connecting_str(&peer)?;
            run_session(manager, events).await
        }
        Command::Demo { message } => run_demo(config, &message).await,
    }
}

/// Pipe stdin lines to the peer and print what it sends until the link drops
async fn run_session<R: RadioAdapter>(
    manager: ConnectionManager<R>,
    mut events: SessionEvents,
) -> Result<(), Box<dyn Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::Connected { info } => {
                        println!("connected to {} as {}", info.peer, info.role);
                    }
                    SessionEvent::DataReceived { text, .. } => {
                        println!("< {}", text.trim_end());
                    }
                    SessionEvent::ConnectFailed { peer, error } => {
                        println!("could not connect to {}: {}", peer, error);
                    }
                    SessionEvent::Disconnected { peer, reason, .. } => {
                        println!("disconnected from {}: {}", peer, reason);
                        break;
                    }
                    _ => {}
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line? {
                    Some(line) => {
                        let mut bytes = line.into_bytes();
                        bytes.push(b'\n');
                        if let Err(e) = manager.send(&bytes).await {
                            println!("not sent: {}", e);
                        }
                    }
                    None => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                manager.disconnect();
                break;
            }
        }
    }

    Ok(())
}

async fn run_demo(config: SessionConfig, message: &str) -> Result<(), Box<dyn Error>> {
    let air = RadioAir::new();
    let device_a = air.device("00:11:22:33:44:55")?;
    let device_b = air.device("66:77:88:99:AA:BB")?;
    let address_a: PeerId = device_a.address().clone();

    let (a, mut a_events) = ConnectionManager::new(device_a, config.clone())?;
    let (b, mut b_events) = ConnectionManager::new(device_b, config.clone())?;

    a.start_listening()?;
    b.start_connecting(address_a, config.service_id)?;

    wait_connected(&mut a_events).await?;
    wait_connected(&mut b_events).await?;

    b.send(message.as_bytes()).await?;
    let deadline = Duration::from_secs(5);
    while let Ok(Some(event)) = tokio::time::timeout(deadline, a_events.recv()).await {
        if let SessionEvent::DataReceived { peer, text, .. } = event {
            println!("{} received from {}: {}", a.radio().address(), peer, text);
            break;
        }
    }

    b.disconnect();
    a.disconnect();
    Ok(())
}

async fn wait_connected(events: &mut SessionEvents) -> Result<(), Box<dyn Error>> {
    let deadline = Duration::from_secs(5);
    loop {
        match tokio::time::timeout(deadline, events.recv()).await {
            Ok(Some(SessionEvent::Connected { info })) => {
                println!("connected to {} as {}", info.peer, info.role);
                return Ok(());
            }
            Ok(Some(SessionEvent::ConnectFailed { error, .. })) => return Err(error.into()),
            Ok(Some(_)) => continue,
            Ok(None) => return Err("session closed before connecting".into()),
            Err(_) => return Err("timed out waiting for a connection".into()),
        }
    }
}
