// Connection state machine for the live metrics stream
//
// `StreamSession` does no I/O. Callers feed it control calls, transport events
// and timer firings; it updates its state, history and latest snapshot and
// answers with the `Command`s the driver must carry out (open a socket, arm a
// timer, ...). This keeps every transition testable without a network.
//
// Stale input is harmless: each transport attempt has its own `ConnectionId`
// and each armed timer its own generation. Anything tagged with an id or
// generation the session no longer holds is ignored.

use crate::credentials::CredentialProvider;
use crate::streaming::buffer::{HistoryBuffer, HISTORY_CAPACITY};
use crate::streaming::decoder::{
    decode_sample, frame_timestamp, parse_frame, InboundFrame, MetricFamilies, OutboundFrame,
};
use crate::streaming::endpoint::stream_url;
use crate::streaming::types::{ConnectionId, ConnectionState, SessionError, TransportEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Delay before a lost connection is retried
pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Interval between keepalive pings
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(15000);

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Dashboard origin, e.g. `https://perf.example.com`
    pub origin: String,
    pub reconnect_delay: Duration,
    pub keepalive_interval: Duration,
    pub history_capacity: usize,
}

impl SessionConfig {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            reconnect_delay: RECONNECT_DELAY,
            keepalive_interval: KEEPALIVE_INTERVAL,
            history_capacity: HISTORY_CAPACITY,
        }
    }
}

/// Side effects requested by the session
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a transport for `url`; its events must be tagged with `id`
    OpenTransport { id: ConnectionId, url: String },
    CloseTransport { id: ConnectionId },
    Send { id: ConnectionId, frame: OutboundFrame },
    /// Arm (or re-arm) the keepalive interval
    StartKeepalive { generation: u64, every: Duration },
    StopKeepalive,
    /// Arm the one-shot reconnect timer
    ScheduleReconnect { generation: u64, after: Duration },
    CancelReconnect,
}

/// Timer firings fed back into the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    Keepalive(u64),
    Reconnect(u64),
}

/// Frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub connections_opened: u64,
}

pub struct StreamSession {
    config: SessionConfig,
    credentials: Arc<dyn CredentialProvider>,

    state: ConnectionState,
    error: Option<SessionError>,

    // Live transport attempt, if any
    transport: Option<ConnectionId>,
    next_connection: u64,

    // Generations of the armed timers
    keepalive: Option<u64>,
    reconnect: Option<u64>,
    next_generation: u64,

    history: HistoryBuffer,
    latest: MetricFamilies,
    stats: SessionStats,
}

impl StreamSession {
    pub fn new(config: SessionConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        let history = HistoryBuffer::with_capacity(config.history_capacity);
        Self {
            config,
            credentials,
            state: ConnectionState::Disconnected,
            error: None,
            transport: None,
            next_connection: 0,
            keepalive: None,
            reconnect: None,
            next_generation: 0,
            history,
            latest: MetricFamilies::default(),
            stats: SessionStats::default(),
        }
    }

    /// Start a connection attempt.
    ///
    /// No-op while a transport attempt is live (connecting or connected).
    pub fn connect(&mut self) -> Vec<Command> {
        if let Some(id) = self.transport {
            debug!("connect() ignored, {} is live ({})", id, self.state);
            return Vec::new();
        }

        let mut commands = Vec::new();
        if self.reconnect.take().is_some() {
            commands.push(Command::CancelReconnect);
        }

        let Some(token) = self.credentials.token().filter(|t| !t.is_empty()) else {
            warn!("Cannot connect to metrics stream: no auth token");
            self.error = Some(SessionError::AuthMissing);
            self.state = ConnectionState::Disconnected;
            return commands;
        };

        self.state = match self.state {
            ConnectionState::Disconnected => ConnectionState::Connecting,
            _ => ConnectionState::Reconnecting,
        };
        self.error = None;

        let url = match stream_url(&self.config.origin, &token) {
            Ok(url) => url,
            Err(e) => {
                warn!("Failed to build metrics stream endpoint: {}", e);
                self.error = Some(SessionError::TransportConstruction(e.to_string()));
                self.state = ConnectionState::Disconnected;
                return commands;
            }
        };

        self.next_connection += 1;
        let id = ConnectionId(self.next_connection);
        self.transport = Some(id);
        self.stats.connections_opened += 1;
        info!("Opening metrics stream {} ({})", id, self.state);

        commands.push(Command::OpenTransport { id, url });
        commands
    }

    /// Tear the session down to idle. `connect()` may be called again later.
    pub fn disconnect(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.keepalive.take().is_some() {
            commands.push(Command::StopKeepalive);
        }
        if self.reconnect.take().is_some() {
            commands.push(Command::CancelReconnect);
        }
        if let Some(id) = self.transport.take() {
            commands.push(Command::CloseTransport { id });
        }
        if self.state != ConnectionState::Disconnected {
            info!("Metrics stream disconnected");
        }
        self.state = ConnectionState::Disconnected;
        commands
    }

    /// The driver could not create the transport requested for `id`.
    /// Not retried automatically.
    pub fn transport_failed(&mut self, id: ConnectionId, reason: &str) -> Vec<Command> {
        if self.transport != Some(id) {
            return Vec::new();
        }
        warn!("Could not create transport {}: {}", id, reason);
        self.transport = None;
        self.state = ConnectionState::Disconnected;
        self.error = Some(SessionError::TransportConstruction(reason.to_string()));
        Vec::new()
    }

    /// Apply one transport event
    pub fn handle(&mut self, id: ConnectionId, event: TransportEvent) -> Vec<Command> {
        if self.transport != Some(id) {
            trace!("Ignoring {:?} from stale {}", event, id);
            return Vec::new();
        }

        match event {
            TransportEvent::Open => {
                info!("Metrics stream {} connected", id);
                self.state = ConnectionState::Connected;
                self.error = None;
                let generation = self.next_generation();
                self.keepalive = Some(generation);
                vec![Command::StartKeepalive {
                    generation,
                    every: self.config.keepalive_interval,
                }]
            }
            TransportEvent::Message(text) => {
                self.receive(&text);
                Vec::new()
            }
            TransportEvent::Error(info) => {
                warn!("Metrics stream {} error: {}", id, info);
                self.error = Some(SessionError::Transport(info));
                Vec::new()
            }
            TransportEvent::Close => {
                self.transport = None;
                self.state = ConnectionState::Reconnecting;

                let mut commands = Vec::new();
                if self.keepalive.take().is_some() {
                    commands.push(Command::StopKeepalive);
                }
                if self.reconnect.is_none() {
                    let generation = self.next_generation();
                    self.reconnect = Some(generation);
                    info!(
                        "Metrics stream {} closed, reconnecting in {:?}",
                        id, self.config.reconnect_delay
                    );
                    commands.push(Command::ScheduleReconnect {
                        generation,
                        after: self.config.reconnect_delay,
                    });
                }
                commands
            }
        }
    }

    /// Apply one timer firing
    pub fn on_timer(&mut self, timer: Timer) -> Vec<Command> {
        match timer {
            Timer::Keepalive(generation) => {
                if self.keepalive != Some(generation) || self.state != ConnectionState::Connected {
                    return Vec::new();
                }
                match self.transport {
                    Some(id) => vec![Command::Send {
                        id,
                        frame: OutboundFrame::Ping,
                    }],
                    None => Vec::new(),
                }
            }
            Timer::Reconnect(generation) => {
                if self.reconnect != Some(generation) {
                    return Vec::new();
                }
                self.reconnect = None;
                self.connect()
            }
        }
    }

    fn receive(&mut self, text: &str) {
        match parse_frame(text) {
            Ok(InboundFrame::Metrics { timestamp, data }) => {
                let timestamp = frame_timestamp(timestamp.as_ref());
                self.latest = MetricFamilies::from_data(&data, timestamp);
                self.history.append(&decode_sample(&data, timestamp));
                self.stats.frames_received += 1;
            }
            Ok(InboundFrame::Pong) => trace!("pong"),
            Ok(InboundFrame::Unknown) => debug!("Ignoring frame of unknown type"),
            Err(e) => {
                warn!("Dropping metrics frame: {}", e);
                self.stats.frames_dropped += 1;
            }
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    /// Transport attempt currently owned by the session
    pub fn connection(&self) -> Option<ConnectionId> {
        self.transport
    }

    /// Generation of the pending reconnect timer
    pub fn pending_reconnect(&self) -> Option<u64> {
        self.reconnect
    }

    /// Generation of the running keepalive timer
    pub fn keepalive(&self) -> Option<u64> {
        self.keepalive
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn reset_history(&mut self) {
        self.history.reset();
    }

    pub fn latest(&self) -> &MetricFamilies {
        &self.latest
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }
}
