//! Interlock CLI tools: key generation, handshake simulation.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use interlock_common::SecurityConfig;
use interlock_core::{PeerId, ProtocolStrength};
use interlock_crypto::{
    HandshakeState, OwnCredentials, PlaintextSink, Recipient, SecureRouter, Transport,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Parser, Debug)]
#[command(name = "interlock")]
#[command(about = "Interlock CLI tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate fresh session credentials and print their identifiers
    Keygen,

    /// Run a host and a guest through the handshake over an in-memory relay
    Simulate {
        /// JSON security config for the host (strength, shared_secret)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Strength the host declares
        #[arg(long)]
        host_strength: Option<ProtocolStrength>,

        /// Strength the guest declares
        #[arg(long, default_value = "t5")]
        guest_strength: ProtocolStrength,

        /// Shared secret for both sides
        #[arg(short, long)]
        secret: Option<String>,

        /// Message the host sends once the guest is authenticated
        #[arg(short, long, default_value = "hello from the host")]
        message: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    interlock_common::init_tracing();

    let args = Args::parse();

    match args.command {
        Command::Keygen => {
            let credentials = OwnCredentials::new(ProtocolStrength::default(), "");
            println!("Fingerprint: {}", credentials.public_key().fingerprint());
            println!("Public key:  {}", hex::encode(credentials.public_key().to_bytes()));
            println!("Nonce:       {}", hex::encode(credentials.nonce()));
        }
        Command::Simulate {
            config,
            host_strength,
            guest_strength,
            secret,
            message,
        } => {
            let mut host = match config {
                Some(path) => SecurityConfig::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => SecurityConfig::default(),
            };
            host.apply_env()?;
            if let Some(strength) = host_strength {
                host.strength = strength;
            }
            if let Some(secret) = secret {
                host.shared_secret = secret;
            }
            let guest = SecurityConfig::new(guest_strength, host.shared_secret.clone());
            host.validate().context("host config")?;
            guest.validate().context("guest config")?;

            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            rt.block_on(simulate(host, guest, message))?;
        }
        Command::Version => {
            println!("interlock {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

/// Forwards everything a router sends onto the other side's inbound channel.
struct RelayLink {
    me: PeerId,
    tx: mpsc::UnboundedSender<(PeerId, Vec<u8>)>,
}

impl Transport for RelayLink {
    fn send_reliable(&self, bytes: &[u8], _peer: &PeerId) {
        let _ = self.tx.send((self.me.clone(), bytes.to_vec()));
    }

    fn send_unreliable(&self, bytes: &[u8], _peer: &PeerId) {
        let _ = self.tx.send((self.me.clone(), bytes.to_vec()));
    }
}

struct Printer(mpsc::UnboundedSender<(PeerId, Vec<u8>)>);

impl PlaintextSink for Printer {
    fn on_plaintext(&self, peer: &PeerId, bytes: &[u8]) {
        let _ = self.0.send((peer.clone(), bytes.to_vec()));
    }
}

type SimRouter = SecureRouter<RelayLink, Printer>;

async fn simulate(host: SecurityConfig, guest: SecurityConfig, message: String) -> Result<()> {
    let host_id = PeerId::from("host");
    let guest_id = PeerId::from("guest");
    let (to_host, host_rx) = mpsc::unbounded_channel();
    let (to_guest, guest_rx) = mpsc::unbounded_channel();
    let (plain_tx, mut plain_rx) = mpsc::unbounded_channel();

    let host_router = Arc::new(SecureRouter::new(
        OwnCredentials::from_config(&host),
        RelayLink {
            me: host_id.clone(),
            tx: to_guest,
        },
        Printer(plain_tx.clone()),
    ));
    let guest_router = Arc::new(SecureRouter::new(
        OwnCredentials::from_config(&guest),
        RelayLink {
            me: guest_id.clone(),
            tx: to_host,
        },
        Printer(plain_tx),
    ));

    println!("host  {} declares {}", host_router.fingerprint(), host.strength);
    println!("guest {} declares {}", guest_router.fingerprint(), guest.strength);

    let host_task = tokio::spawn(serve(host_router.clone(), host_rx));
    let guest_task = tokio::spawn(serve(guest_router.clone(), guest_rx));

    host_router.send_reliable(
        message.as_bytes(),
        Recipient::Peer(guest_id.clone()),
        &Default::default(),
    )?;
    guest_router.send_reliable(
        b"guest ready",
        Recipient::Peer(host_id.clone()),
        &Default::default(),
    )?;

    for _ in 0..2 {
        match timeout(Duration::from_secs(5), plain_rx.recv()).await {
            Ok(Some((from, bytes))) => {
                println!("{} -> {}", from, String::from_utf8_lossy(&bytes));
            }
            Ok(None) => break,
            Err(_) => {
                println!("timed out waiting for messages");
                break;
            }
        }
    }

    report(&host_router, &guest_id);
    report(&guest_router, &host_id);

    host_task.abort();
    guest_task.abort();
    Ok(())
}

async fn serve(router: Arc<SimRouter>, mut rx: mpsc::UnboundedReceiver<(PeerId, Vec<u8>)>) {
    while let Some((from, bytes)) = rx.recv().await {
        if let Err(e) = router.on_message(&from, &bytes) {
            tracing::error!(error = %e, "handshake failed");
        }
    }
}

fn report(router: &SimRouter, peer: &PeerId) {
    let state = router.status(peer).unwrap_or(HandshakeState::Balloting);
    let counters = router.with_session(peer, |s| {
        (
            s.peer_strength(),
            s.handshake_progress(),
            s.messages_protected(),
            s.messages_dropped(),
        )
    });
    match counters {
        Some((strength, (sent, received), protected, dropped)) => println!(
            "session with {}: {:?}, peer strength {}, handshake {}/{} sent/received, {} protected, {} dropped",
            peer,
            state,
            strength.map_or_else(|| "unknown".to_string(), |s| s.to_string()),
            sent,
            received,
            protected,
            dropped
        ),
        None => println!("no session with {}", peer),
    }
}
