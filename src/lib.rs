pub mod config;
pub mod credentials;
pub mod history;
pub mod streaming;

pub use config::{ClientConfig, ConfigError};
pub use credentials::{CredentialProvider, StaticCredentials};
pub use history::{
    ComparisonShift, ComparisonView, HistoryError, HistoryResult, HistorySource,
    HttpHistorySource, MetricField, MetricType,
};
pub use streaming::{
    ConnectionState, SessionError, SessionEvent, StreamController, StreamControllerConfig,
    StreamError, StreamResult, WebSocketConnector,
};
