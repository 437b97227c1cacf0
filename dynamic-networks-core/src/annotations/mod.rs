use thiserror::Error;

pub mod selection;
pub mod status;

pub use selection::{
    index_desired, parse_desired, pod_network_selection_elements, NetworkSelectionElement,
};
pub use status::{
    index_observed, merge, parse_observed, pod_network_status, serialize_status,
    AttachmentResult, NetworkStatus, NetworkStatusDns,
};

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("The network selection annotation is empty!")]
    EmptyNetworkSelection,
    #[error("Couldn't parse the network selection JSON! Reason: {}", .0)]
    MalformedNetworkSelection(serde_json::Error),
    #[error("Invalid network object '{}' (failed at '{}')!", .0, .1)]
    InvalidNetworkObject(String, char),
    #[error("Network object item '{}' must consist of lower case alphanumeric characters or '-', and must start and end with an alphanumeric character!", .0)]
    InvalidNetworkObjectItem(String),
    #[error("Network object '{}' is missing a network name!", .0)]
    MissingNetworkName(String),
    #[error("Invalid MAC address '{}'!", .0)]
    InvalidMac(String),
    #[error("Invalid infiniband GUID '{}'!", .0)]
    InvalidInfinibandGuid(String),
    #[error("Invalid IP address or CIDR '{}'!", .0)]
    InvalidIp(String),
    #[error("Couldn't parse the network status JSON! Reason: {}", .0)]
    MalformedNetworkStatus(serde_json::Error),
    #[error("Couldn't serialize the network status! Reason: {}", .0)]
    StatusSerialization(serde_json::Error),
}
