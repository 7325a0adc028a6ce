//! Guest-visible host service façades (§4.5): thin wrappers that validate
//! offsets, translate pointers, invoke the underlying subsystem, and
//! return. Built over the same `reqwest`/`tokio-tungstenite` stack the
//! teacher's `request` crate wraps for the identical purpose.

pub mod events;
pub mod extension;
pub mod file;
pub mod http;
pub mod websocket;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[source] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),
    #[error("request timed out")]
    Timeout,
    #[error("extension {0:?} failed to load: {1}")]
    ExtensionLoad(String, #[source] libloading::Error),
    #[error("extension {0:?} exposes no get_interface symbol")]
    ExtensionMissingInterface(String),
    #[error("event record size mismatch: expected {expected}, got {actual}")]
    EventRecordSize { expected: usize, actual: usize },
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}
