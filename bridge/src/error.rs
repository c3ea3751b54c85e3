use native_messaging::host::NmError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Native peer unavailable")]
    ChannelUnavailable,
    #[error("Native peer did not answer within {0} ms")]
    Timeout(u128),
    #[error("Mutation rejected: {0}")]
    MutationRejected(String),
    #[error("Peer error: {0}")]
    PeerError(String),
    #[error("Unknown message kind: {0}")]
    UnknownKind(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Native messaging error: {0}")]
    NativeMessaging(String),
}

impl From<NmError> for BridgeError {
    fn from(e: NmError) -> Self {
        match e {
            NmError::Disconnected => BridgeError::ChannelUnavailable,
            other => BridgeError::NativeMessaging(other.to_string()),
        }
    }
}
