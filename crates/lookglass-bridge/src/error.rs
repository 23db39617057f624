use lookglass_wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("channel closed")]
    Closed,
    #[error("a handler for call `{0}` is already registered")]
    HandlerExists(String),
    #[error(transparent)]
    Wire(#[from] WireError),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
