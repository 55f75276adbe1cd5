use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChzzkError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to parse payload: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: i64, message: String },

    #[error("This feature needs to login first")]
    LoginRequired,

    #[error("Channel is not broadcasting - no chat channel to join")]
    ChannelNotLive,

    #[error("Not connected to chat server. Please connect first")]
    NotConnected,

    #[error("Chat client is already connected")]
    AlreadyConnected,

    #[error("Client is closed")]
    Closed,

    #[error("Timed out waiting for event")]
    Timeout,

    #[error("Chat server rejected the session ({code}): {message}")]
    HandshakeRejected { code: i64, message: String },

    #[error("Failed to decode {command} payload: {reason}")]
    DecodeError { command: String, reason: String },

    #[error("Event callback failed: {0}")]
    CallbackError(String),

    #[error("Event predicate failed: {0}")]
    PredicateError(String),

    #[error("Reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),
}

impl ChzzkError {
    /// デコード失敗エラーを作成
    pub fn decode(command: impl Into<String>, reason: impl ToString) -> Self {
        ChzzkError::DecodeError {
            command: command.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<ChzzkError> for String {
    fn from(err: ChzzkError) -> String {
        err.to_string()
    }
}
