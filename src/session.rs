//! Per-connection session state machine.
//!
//! ```text
//! AwaitingRegistration ─► Registered ─► Reading ⟲ ─► Closing ─► Closed
//!          │                                            ▲
//!          └────────────── rejected ────────────────────┘
//! ```
//!
//! Each accepted connection runs one [`Session`] in its own task:
//! 1. Read the registration packet and resolve the decoder
//! 2. Read frames under the idle timeout
//! 3. Check CRC (when the protocol needs it), decode, hand to storage, ack
//! 4. Shut down and release the stream on every exit path
//!
//! A bad frame never closes the session; a timeout, EOF or socket error
//! always does.
//!
//! # Example
//!
//! ```ignore
//! let ctx = Arc::new(IngestContext::new(config, registry, Arc::new(sink)));
//! let report = Session::new(stream, peer.to_string(), ctx).run().await;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::error::IngestError;
use crate::handler::{FrameDecoder, ProtocolRegistry};
use crate::protocol::{crc, ProtocolTag, RawFrame, Registration, StationIdentity};
use crate::sink::{ReadingSink, StationBatch};

/// Default idle timeout (two missed 3-minute report intervals).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(360);

/// Default registration packet size.
pub const DEFAULT_REGISTRATION_SIZE: usize = 128;

/// Default read buffer size for data frames.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Acknowledgment sent after each stored frame.
pub const DEFAULT_ACK_PAYLOAD: &[u8] = b"Data received";

/// Default bound on writing an acknowledgment.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum silence before the session closes.
    pub idle_timeout: Duration,
    /// Bytes read for the registration packet.
    pub registration_size: usize,
    /// Bytes read per data frame.
    pub read_buffer_size: usize,
    /// Acknowledgment payload, `None` to disable.
    pub ack_payload: Option<Bytes>,
    /// Bound on writing the acknowledgment.
    pub ack_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            registration_size: DEFAULT_REGISTRATION_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            ack_payload: Some(Bytes::from_static(DEFAULT_ACK_PAYLOAD)),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

/// Read-only state shared by every session.
pub struct IngestContext {
    pub config: SessionConfig,
    pub registry: ProtocolRegistry,
    pub sink: Arc<dyn ReadingSink>,
}

impl IngestContext {
    /// Create a new context.
    pub fn new(config: SessionConfig, registry: ProtocolRegistry, sink: Arc<dyn ReadingSink>) -> Self {
        Self {
            config,
            registry,
            sink,
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingRegistration,
    Registered,
    Reading,
    Closing,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Registration was blank, unparseable, or named an unknown protocol.
    Rejected(String),
    /// Peer closed its write side.
    PeerClosed,
    /// No data within the idle timeout.
    IdleTimeout,
    /// Socket error.
    Failed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Rejected(why) => write!(f, "rejected: {}", why),
            CloseReason::PeerClosed => f.write_str("closed by peer"),
            CloseReason::IdleTimeout => f.write_str("idle timeout"),
            CloseReason::Failed(why) => write!(f, "failed: {}", why),
        }
    }
}

/// Frame counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_received: u64,
    pub frames_stored: u64,
    pub crc_failures: u64,
    pub decode_failures: u64,
}

/// Summary returned when a session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub peer: String,
    pub station: Option<StationIdentity>,
    pub protocol: Option<ProtocolTag>,
    pub reason: CloseReason,
    pub stats: SessionStats,
}

/// One client connection.
pub struct Session<S> {
    stream: S,
    peer: String,
    ctx: Arc<IngestContext>,
    state: SessionState,
    registration: Option<Registration>,
    stats: SessionStats,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a session over an accepted stream.
    pub fn new(stream: S, peer: String, ctx: Arc<IngestContext>) -> Self {
        Self {
            stream,
            peer,
            ctx,
            state: SessionState::AwaitingRegistration,
            registration: None,
            stats: SessionStats::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion.
    ///
    /// Consumes the session; the stream is shut down and dropped before this
    /// returns, whatever the close reason.
    pub async fn run(mut self) -> SessionReport {
        let reason = self.drive().await;

        self.transition(SessionState::Closing);
        if let Err(e) = self.stream.shutdown().await {
            debug!(peer = %self.peer, error = %e, "Shutdown after close failed");
        }
        self.transition(SessionState::Closed);

        let Session {
            stream,
            peer,
            registration,
            stats,
            ..
        } = self;
        drop(stream);

        info!(
            peer = %peer,
            reason = %reason,
            frames = stats.frames_received,
            stored = stats.frames_stored,
            "Connection closed"
        );

        let (station, protocol) = match registration {
            Some(r) => (Some(r.station), Some(r.protocol)),
            None => (None, None),
        };

        SessionReport {
            peer,
            station,
            protocol,
            reason,
            stats,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(peer = %self.peer, from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }

    /// Registration followed by the read loop; returns why it stopped.
    async fn drive(&mut self) -> CloseReason {
        let (registration, decoder) = match self.register().await {
            Ok(registered) => registered,
            Err(reason) => return reason,
        };
        self.registration = Some(registration.clone());
        self.transition(SessionState::Registered);

        self.transition(SessionState::Reading);
        self.read_loop(&registration, decoder).await
    }

    /// Read and validate the registration packet, then resolve the decoder.
    async fn register(&mut self) -> Result<(Registration, Arc<dyn FrameDecoder>), CloseReason> {
        let mut buf = vec![0u8; self.ctx.config.registration_size];
        let n = self.timed_read(&mut buf).await?;

        let registration = match Registration::parse(&buf[..n]) {
            Ok(r) => r,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Rejecting connection");
                return Err(CloseReason::Rejected(e.to_string()));
            }
        };

        let Some(decoder) = self.ctx.registry.resolve(&registration.protocol) else {
            warn!(
                peer = %self.peer,
                station = %registration.station,
                protocol = %registration.protocol,
                "Rejecting connection with unknown protocol"
            );
            let e = IngestError::UnknownProtocol(registration.protocol.to_string());
            return Err(CloseReason::Rejected(e.to_string()));
        };

        info!(
            peer = %self.peer,
            project_code = %registration.station.project_code,
            station_code = %registration.station.station_code,
            station_number = %registration.station.station_number,
            protocol = %registration.protocol,
            "Station registered"
        );

        Ok((registration, decoder))
    }

    /// Read frames until timeout, EOF or socket error.
    async fn read_loop(
        &mut self,
        registration: &Registration,
        decoder: Arc<dyn FrameDecoder>,
    ) -> CloseReason {
        let mut buf = vec![0u8; self.ctx.config.read_buffer_size];

        loop {
            let n = match self.timed_read(&mut buf).await {
                Ok(n) => n,
                Err(reason) => return reason,
            };

            let frame = RawFrame::copy_from_slice(&buf[..n]);
            self.handle_frame(&frame, registration, decoder.as_ref()).await;
        }
    }

    /// One read bounded by the idle timeout. Zero bytes means EOF.
    async fn timed_read(&mut self, buf: &mut [u8]) -> Result<usize, CloseReason> {
        let idle = self.ctx.config.idle_timeout;

        match tokio::time::timeout(idle, self.stream.read(buf)).await {
            Ok(Ok(0)) => {
                info!(peer = %self.peer, state = ?self.state, "Connection closed by peer");
                Err(CloseReason::PeerClosed)
            }
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => {
                error!(peer = %self.peer, error = %e, "Socket error");
                Err(CloseReason::Failed(e.to_string()))
            }
            Err(_) => {
                warn!(
                    peer = %self.peer,
                    idle_secs = idle.as_secs_f64(),
                    "Connection timed out after inactivity"
                );
                Err(CloseReason::IdleTimeout)
            }
        }
    }

    /// Validate, decode, store and acknowledge one frame.
    async fn handle_frame(
        &mut self,
        frame: &RawFrame,
        registration: &Registration,
        decoder: &dyn FrameDecoder,
    ) {
        self.stats.frames_received += 1;

        if decoder.requires_crc() && !crc::validate(frame.as_bytes()) {
            self.stats.crc_failures += 1;
            warn!(peer = %self.peer, len = frame.len(), "CRC validation failed");
            return;
        }

        let decoded = match decoder.decode(frame.as_bytes()) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.decode_failures += 1;
                warn!(peer = %self.peer, error = %e, "Failed to decode frame");
                return;
            }
        };

        info!(
            peer = %self.peer,
            station = %registration.station,
            device_id = decoded.device_id,
            readings = decoded.measurements().len(),
            "Frame decoded"
        );

        self.ctx.sink.store(StationBatch {
            station: registration.station.clone(),
            peer: self.peer.clone(),
            protocol: registration.protocol.clone(),
            device_id: decoded.device_id,
            readings: decoded.readings,
        });
        self.stats.frames_stored += 1;

        self.acknowledge().await;
    }

    /// Best-effort acknowledgment; failures are logged only.
    async fn acknowledge(&mut self) {
        let Some(payload) = self.ctx.config.ack_payload.clone() else {
            return;
        };

        match tokio::time::timeout(self.ctx.config.ack_timeout, self.stream.write_all(&payload))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(peer = %self.peer, error = %e, "Failed to send acknowledgment"),
            Err(_) => warn!(peer = %self.peer, "Acknowledgment write timed out"),
        }
    }
}
