// Live metrics streaming module
//
// Keeps one persistent WebSocket to the metrics server, decodes each pushed
// frame into a sample of the fixed chart channels, and keeps a bounded
// history of them for the live charts.
//
// Architecture:
// - `session`: Sans-IO connection state machine (connect, retry, keepalive)
// - `controller`: Tokio task that carries out the session's commands
// - `transport`: Connector seam and the tokio-tungstenite implementation
// - `endpoint`: Stream URL derived from the dashboard origin
// - `decoder`: Frame parsing and channel extraction
// - `buffer`: Rolling history of the chart channels
// - `channel`: The fixed chart channels

pub mod buffer;
pub mod channel;
pub mod controller;
pub mod decoder;
pub mod endpoint;
pub mod session;
pub mod transport;
pub mod types;

pub use buffer::{BufferMetrics, HistoryBuffer, HistorySnapshot, HISTORY_CAPACITY};
pub use channel::{Channel, ChannelValues};
pub use controller::{StreamController, StreamControllerConfig};
pub use decoder::{MetricFamilies, Sample};
pub use session::{Command, SessionConfig, StreamSession, Timer};
pub use transport::{Connector, TransportHandle, WebSocketConnector};
pub use types::{
    ConnectionId, ConnectionState, SessionError, SessionEvent, StreamError, StreamResult,
    TransportEvent,
};
