use dynamic_networks_core::{
    annotations::AnnotationError, cri::RuntimeError, delegate::DelegateError,
    delegate::DelegateRequestBuilderError, resources::NetAttachDefError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("'{}' is not a namespaced name!", .0)]
    InvalidKey(String),
    #[error("Pod '{}' is missing a UID!", .0)]
    MissingPodUid(String),
    #[error("Couldn't read the pod's network annotations! Reason: {}", .0)]
    Annotation(AnnotationError),
    #[error("Couldn't resolve the pod's sandbox! Reason: {}", .0)]
    Runtime(RuntimeError),
    #[error("Network attachment definition '{}' doesn't exist!", .0)]
    NetAttachDefNotFound(String),
    #[error("Couldn't apply defaults to the network attachment definition! Reason: {}", .0)]
    NetAttachDef(NetAttachDefError),
    #[error("Couldn't build the delegate request! Reason: {}", .0)]
    DelegateRequest(DelegateRequestBuilderError),
    #[error("Failed to ADD delegate for '{}'! Reason: {}", .0, .1)]
    AddDelegate(String, DelegateError),
    #[error("Failed to DEL delegate for '{}'! Reason: {}", .0, .1)]
    RemoveDelegate(String, DelegateError),
}

impl ReconcilerError {
    /// Errors that will fail the same way no matter how many times the key is retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcilerError::InvalidKey(_))
    }
}
