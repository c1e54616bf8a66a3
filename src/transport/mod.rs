use std::time::Duration;

use thiserror::Error;

pub mod udp;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("timed out waiting for response after {0:?}")]
    Timeout(Duration),
    #[error("response channel closed")]
    ChannelClosed,
    #[error("transaction id collision for xid {0}")]
    XidCollision(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
