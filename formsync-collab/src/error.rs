use std::time::Duration;
use thiserror::Error;

use formsync_core::DocumentError;

use crate::protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("relay transport error: {0}")]
    Transport(#[from] ProtocolError),

    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    #[error("relay did not answer the initial sync within {0:?}")]
    SyncTimeout(Duration),

    #[error("relay closed the connection before the initial sync")]
    ClosedBeforeSync,

    #[error("no document is open")]
    NotReady,
}

pub type Result<T> = std::result::Result<T, SessionError>;
