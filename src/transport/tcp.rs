//! TCP listener accepting station connections.
//!
//! The accept loop never waits on a session: every accepted connection is
//! moved into its own task running a [`Session`].
//!
//! # Example
//!
//! ```ignore
//! use umb_ingest::transport::IngestListener;
//!
//! let listener = IngestListener::bind("0.0.0.0:18120").await?;
//! listener.serve_until(ctx, tokio::signal::ctrl_c()).await?;
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::Result;
use crate::session::{IngestContext, Session, SessionReport};

/// Pause after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// TCP listener for station connections.
pub struct IngestListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl IngestListener {
    /// Bind to an address such as `0.0.0.0:18120`.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Get the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        Ok(self.listener.accept().await?)
    }

    /// Accept connections forever, one session task per connection.
    pub async fn serve(self, ctx: Arc<IngestContext>) -> Result<()> {
        info!(addr = %self.local_addr, "TCP server started");

        loop {
            match self.accept().await {
                Ok((stream, peer)) => {
                    spawn_session(stream, peer, ctx.clone());
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn serve_until<F>(self, ctx: Arc<IngestContext>, shutdown: F) -> Result<()>
    where
        F: Future,
    {
        let addr = self.local_addr;

        tokio::select! {
            result = self.serve(ctx) => result,
            _ = shutdown => {
                info!(addr = %addr, "TCP server stopping");
                Ok(())
            }
        }
    }
}

/// Spawn the session task for an accepted connection.
pub fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<IngestContext>,
) -> JoinHandle<SessionReport> {
    info!(peer = %peer, "Connection accepted");
    tokio::spawn(Session::new(stream, peer.to_string(), ctx).run())
}
