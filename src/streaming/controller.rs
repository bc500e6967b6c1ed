// Stream controller - drives a StreamSession on the tokio runtime
//
// The controller owns one background task that:
// - Forwards connect/disconnect requests into the session
// - Opens and closes transports through a Connector
// - Feeds transport events back into the session
// - Runs the keepalive interval and the one-shot reconnect timer
// - Emits events to the frontend callback
//
// Every side effect comes from a session Command, so the task itself holds no
// connection logic. Readers take a short parking_lot read lock on the session.

use crate::credentials::CredentialProvider;
use crate::streaming::buffer::{BufferMetrics, HistorySnapshot};
use crate::streaming::decoder::{MetricFamilies, Sample};
use crate::streaming::session::{Command, SessionConfig, SessionStats, StreamSession, Timer};
use crate::streaming::transport::{Connector, TransportEvents, TransportHandle};
use crate::streaming::types::{
    ConnectionId, ConnectionState, SessionError, SessionEvent, StreamError, StreamResult,
    TransportEvent,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type EventCallback = Arc<RwLock<Option<Box<dyn Fn(SessionEvent) + Send + Sync>>>>;

/// Stream controller configuration
#[derive(Debug, Clone)]
pub struct StreamControllerConfig {
    pub session_id: String,
    pub session: SessionConfig,
}

impl StreamControllerConfig {
    pub fn new(session: SessionConfig) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            session,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Connect,
    Disconnect,
}

/// Live metrics stream controller
pub struct StreamController {
    pub id: String,
    session: Arc<RwLock<StreamSession>>,
    control: mpsc::UnboundedSender<Control>,
    cancel_token: CancellationToken,
    event_callback: EventCallback,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamController {
    /// Create the controller and spawn its driver task.
    ///
    /// Must be called from within a tokio runtime. The session starts
    /// disconnected; call [`connect`](Self::connect) to go live.
    pub fn new(
        config: StreamControllerConfig,
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let session = Arc::new(RwLock::new(StreamSession::new(config.session, credentials)));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();
        let event_callback: EventCallback = Arc::new(RwLock::new(None));

        let driver = Driver {
            session_id: config.session_id.clone(),
            session: Arc::clone(&session),
            connector,
            events_tx,
            transports: HashMap::new(),
            keepalive: None,
            reconnect: None,
            event_callback: Arc::clone(&event_callback),
        };
        let task = tokio::spawn(driver.run(control_rx, events_rx, cancel_token.clone()));

        info!("Stream controller {} created", config.session_id);

        Self {
            id: config.session_id,
            session,
            control: control_tx,
            cancel_token,
            event_callback,
            task: Mutex::new(Some(task)),
        }
    }

    /// Set event callback function
    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        *self.event_callback.write() = Some(Box::new(callback));
    }

    /// Go live. Ignored while already connecting or connected.
    pub fn connect(&self) -> StreamResult<()> {
        self.control
            .send(Control::Connect)
            .map_err(|_| StreamError::ChannelClosed)
    }

    /// Close the stream and cancel any pending retry
    pub fn disconnect(&self) -> StreamResult<()> {
        self.control
            .send(Control::Disconnect)
            .map_err(|_| StreamError::ChannelClosed)
    }

    /// Stop the driver task, closing the stream first
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Stream controller task failed: {}", e);
            }
        }
        info!("Stream controller {} stopped", self.id);
    }

    pub fn state(&self) -> ConnectionState {
        self.session.read().state()
    }

    pub fn error(&self) -> Option<SessionError> {
        self.session.read().error().cloned()
    }

    /// Copy of the chart history
    pub fn history(&self) -> HistorySnapshot {
        self.session.read().history().snapshot()
    }

    pub fn buffer_metrics(&self) -> BufferMetrics {
        self.session.read().history().get_metrics()
    }

    /// Newest sample in the chart history
    pub fn latest_sample(&self) -> Option<Sample> {
        self.session.read().history().latest()
    }

    /// Latest object of each metric family
    pub fn latest(&self) -> MetricFamilies {
        self.session.read().latest().clone()
    }

    pub fn stats(&self) -> SessionStats {
        self.session.read().stats()
    }

    pub fn reset_history(&self) {
        self.session.write().reset_history();
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

enum Step {
    Control(Control),
    Transport(ConnectionId, TransportEvent),
    Timer(Timer),
}

/// What the frontend saw last, to decide which events to emit
struct Observed {
    state: ConnectionState,
    error: Option<SessionError>,
    appended: u64,
}

impl Observed {
    fn of(session: &StreamSession) -> Self {
        Self {
            state: session.state(),
            error: session.error().cloned(),
            appended: session.history().get_metrics().total_appended,
        }
    }
}

struct Driver {
    session_id: String,
    session: Arc<RwLock<StreamSession>>,
    connector: Arc<dyn Connector>,
    events_tx: TransportEvents,
    transports: HashMap<ConnectionId, TransportHandle>,
    keepalive: Option<(u64, Interval)>,
    reconnect: Option<(u64, Pin<Box<Sleep>>)>,
    event_callback: EventCallback,
}

impl Driver {
    async fn run(
        mut self,
        mut control: mpsc::UnboundedReceiver<Control>,
        mut events: mpsc::UnboundedReceiver<(ConnectionId, TransportEvent)>,
        cancel_token: CancellationToken,
    ) {
        loop {
            let step = tokio::select! {
                // Check for cancellation first (biased ensures priority)
                biased;

                _ = cancel_token.cancelled() => break,

                Some(request) = control.recv() => Step::Control(request),

                Some((id, event)) = events.recv() => Step::Transport(id, event),

                generation = keepalive_tick(&mut self.keepalive) => {
                    Step::Timer(Timer::Keepalive(generation))
                }

                generation = reconnect_due(&mut self.reconnect) => {
                    self.reconnect = None;
                    Step::Timer(Timer::Reconnect(generation))
                }
            };

            self.step(step);
        }

        self.step(Step::Control(Control::Disconnect));
        self.transports.clear();
        debug!("Stream controller {} task ended", self.session_id);
    }

    fn step(&mut self, step: Step) {
        let before = Observed::of(&self.session.read());

        let commands = {
            let mut session = self.session.write();
            match step {
                Step::Control(Control::Connect) => session.connect(),
                Step::Control(Control::Disconnect) => session.disconnect(),
                Step::Transport(id, event) => {
                    let closed = event == TransportEvent::Close;
                    let commands = session.handle(id, event);
                    if closed {
                        self.transports.remove(&id);
                    }
                    commands
                }
                Step::Timer(timer) => session.on_timer(timer),
            }
        };
        self.apply(commands);

        self.emit_changes(before);
    }

    fn apply(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::OpenTransport { id, url } => {
                    match self.connector.open(id, &url, self.events_tx.clone()) {
                        Ok(handle) => {
                            self.transports.insert(id, handle);
                        }
                        Err(e) => {
                            let follow_up =
                                self.session.write().transport_failed(id, &e.to_string());
                            self.apply(follow_up);
                        }
                    }
                }
                Command::CloseTransport { id } => {
                    if let Some(handle) = self.transports.remove(&id) {
                        handle.close();
                    }
                }
                Command::Send { id, frame } => match self.transports.get(&id) {
                    Some(handle) => {
                        if let Err(e) = handle.send(&frame) {
                            debug!("Failed to send {:?} on {}: {}", frame, id, e);
                        }
                    }
                    None => debug!("No transport {} for {:?}", id, frame),
                },
                Command::StartKeepalive { generation, every } => {
                    // tokio intervals reject a zero period
                    let every = every.max(Duration::from_millis(1));
                    let mut interval = interval_at(Instant::now() + every, every);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.keepalive = Some((generation, interval));
                }
                Command::StopKeepalive => self.keepalive = None,
                Command::ScheduleReconnect { generation, after } => {
                    self.reconnect = Some((generation, Box::pin(sleep(after))));
                }
                Command::CancelReconnect => self.reconnect = None,
            }
        }
    }

    /// Emit an event for each change the frontend should hear about
    fn emit_changes(&self, before: Observed) {
        let after = Observed::of(&self.session.read());
        let mut events = Vec::new();

        if after.state != before.state {
            events.push(SessionEvent::StateChanged {
                session_id: self.session_id.clone(),
                state: after.state,
            });
        }
        if after.error != before.error {
            if let Some(error) = after.error.clone() {
                events.push(SessionEvent::Error {
                    session_id: self.session_id.clone(),
                    error,
                });
            }
        }
        if after.appended > before.appended {
            events.push(SessionEvent::SampleAppended {
                session_id: self.session_id.clone(),
                history_len: self.session.read().history().len(),
            });
        }

        if events.is_empty() {
            return;
        }
        if let Some(callback) = self.event_callback.read().as_ref() {
            for event in events {
                callback(event);
            }
        }
    }
}

async fn keepalive_tick(keepalive: &mut Option<(u64, Interval)>) -> u64 {
    match keepalive {
        Some((generation, interval)) => {
            interval.tick().await;
            *generation
        }
        None => pending().await,
    }
}

async fn reconnect_due(reconnect: &mut Option<(u64, Pin<Box<Sleep>>)>) -> u64 {
    match reconnect {
        Some((generation, sleep)) => {
            sleep.as_mut().await;
            *generation
        }
        None => pending().await,
    }
}
