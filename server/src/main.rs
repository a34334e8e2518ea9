//! Telemetry collector: accepts station connections, verifies each
//! envelope's HMAC and appends accepted records to a JSON-lines file.

mod session;
mod store;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use solarstation_shared::{Authenticator, ReceivedEnvelope, SECRET_ENV_VAR};
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use session::StationSession;
use store::{RecordStore, StoredRecord};

#[derive(Parser, Debug)]
#[command(name = "server", about = "Solar station telemetry collector")]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:9999")]
    bind: SocketAddr,

    /// File accepted records are appended to
    #[arg(short, long, default_value = "data.txt")]
    output: PathBuf,
}

/// Whether an envelope was stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Stored,
    BadDigest,
    StoreFailed,
}

async fn handle_envelope(
    envelope: &ReceivedEnvelope,
    auth: &Authenticator,
    store: &RecordStore,
    addr: SocketAddr,
) -> Verdict {
    if !envelope.verify(auth) {
        warn!(%addr, "rejecting envelope with bad hmac");
        return Verdict::BadDigest;
    }

    let record = StoredRecord::new(envelope, chrono::Utc::now());
    match store.append(&record).await {
        Ok(()) => {
            debug!(%addr, pend = envelope.pending, "record stored");
            Verdict::Stored
        }
        Err(e) => {
            error!("failed to append to {}: {:#}", store.path().display(), e);
            Verdict::StoreFailed
        }
    }
}

async fn serve_station<R: AsyncRead + Unpin>(
    reader: R,
    addr: SocketAddr,
    auth: &Authenticator,
    store: &RecordStore,
) -> u64 {
    let mut session = StationSession::new(reader, addr);
    let mut stored = 0;
    while let Some(envelope) = session.recv().await {
        if handle_envelope(&envelope, auth, store, addr).await == Verdict::Stored {
            stored += 1;
        }
    }
    info!(
        addr = %session.addr(),
        stored,
        malformed = session.rejected(),
        "station disconnected"
    );
    stored
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    let auth = Arc::new(
        Authenticator::from_env(SECRET_ENV_VAR)
            .with_context(|| format!("{} must hold the shared secret", SECRET_ENV_VAR))?,
    );
    let store = Arc::new(RecordStore::open(&cli.output).await?);

    let listener = TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;
    info!("Collector listening on {}", cli.bind);
    info!("  Records: {}", cli.output.display());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        continue;
                    }
                };
                info!("Station connected: {}", addr);

                let auth = auth.clone();
                let store = store.clone();
                tokio::spawn(async move {
                    serve_station(socket, addr, &auth, &store).await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
