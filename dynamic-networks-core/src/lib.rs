pub mod annotations;
pub mod cni;
pub mod cri;
pub mod delegate;
pub mod helpers;
pub mod resources;

pub const RESOURCE_GROUP: &str = "k8s.cni.cncf.io";

pub const NETWORK_ATTACHMENT_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";
pub const NETWORK_STATUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/network-status";
