use crate::qrcode::QrError;
use thiserror::Error;
use wacore::store::error::StoreError;
use wacore::transport::TransportError;
use wacore::types::SessionState;
use wacore::types::jid::JidError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("session {session_id} is not ready (state: {state})")]
    SessionNotReady {
        session_id: String,
        state: SessionState,
    },
    #[error("delivery to {recipient} failed: {source}")]
    Delivery {
        recipient: String,
        #[source]
        source: TransportError,
    },
    #[error(transparent)]
    InvalidRecipient(#[from] JidError),
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("credential store error: {0}")]
    Store(StoreError),
    #[error(transparent)]
    QrEncoding(#[from] QrError),
    #[error("the gateway is shutting down")]
    ShuttingDown,
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidSessionId(id) => Self::InvalidSessionId(id),
            other => Self::Store(other),
        }
    }
}

impl GatewayError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRecipient(_) | Self::InvalidSessionId(_))
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
