use lookglass_bridge::BridgeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown node `{0}`")]
    UnknownNode(String),
    #[error("node `{id}` does not support `{capability}`")]
    MissingCapability { id: String, capability: &'static str },
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type StoreResult<T> = Result<T, StoreError>;
