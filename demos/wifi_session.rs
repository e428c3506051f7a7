//! Local WiFi session with an optional remote handover.
//!
//! Demonstrates:
//! - Connecting to a device on the local network
//! - Receiving status snapshots through the event handler
//! - Setting the intensity
//! - Handing the session over to the relay
//!
//! Usage:
//!   cargo run --example wifi_session -- 192.168.1.40
//!   cargo run --example wifi_session -- 192.168.1.40 --remote
//!   cargo run --example wifi_session -- 192.168.1.40 --debug

// ============================================================================
// Imports
// ============================================================================

use openvibe_link::{ManagerEvent, Result, Target, TransportKind, TransportManager};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone)]
struct Args {
    host: String,
    remote: bool,
    debug: bool,
}

impl Args {
    fn parse() -> Option<Self> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let host = args.iter().find(|a| !a.starts_with("--"))?.clone();
        Some(Self {
            host,
            remote: args.iter().any(|a| a == "--remote"),
            debug: args.iter().any(|a| a == "--debug"),
        })
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let Some(args) = Args::parse() else {
        eprintln!("usage: wifi_session <host> [--remote] [--debug]");
        std::process::exit(2);
    };
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "openvibe_link=debug"
    } else {
        "openvibe_link=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

async fn run(args: Args) -> Result<()> {
    println!("=== WiFi Session ===\n");

    let manager = TransportManager::builder().spawn()?;
    manager.set_event_handler(Box::new(|event| match event {
        ManagerEvent::StateChanged(state) => println!("[State]  {state}"),
        ManagerEvent::StatusUpdated(status) => println!(
            "[Status] intensity={} battery={}% transport={:?}",
            status.intensity, status.battery_level, status.reported_transport
        ),
        ManagerEvent::Message(value) => println!("[Message] {value}"),
        ManagerEvent::Undecodable(raw) => println!("[Raw]    {} bytes", raw.len()),
    }));

    println!("[Connect] {}", args.host);
    manager.connect(Target::wifi(args.host)).await?;
    manager.request_status().await?;
    manager.set_intensity(25).await?;

    if args.remote {
        println!("[Switch] Handing over to the relay...");
        let status = manager
            .switch_transport(TransportKind::Remote, None, None)
            .await?;
        println!("        ✓ Remote, device id {:?}", status.device_id);
    }

    println!("Press Ctrl+C to exit...");
    tokio::signal::ctrl_c().await.ok();

    for entry in manager.logs() {
        println!("        [{}] {}", entry.level, entry.message);
    }

    manager.disconnect().await?;
    manager.shutdown();
    Ok(())
}
