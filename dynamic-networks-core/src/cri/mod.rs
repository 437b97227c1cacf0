use std::{collections::HashMap, fmt::Display, str::FromStr};

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use thiserror::Error;

pub mod client;
pub mod proto;

pub use client::GrpcSandboxService;

use proto::{
    ListPodSandboxRequest, ListPodSandboxResponse, PodSandboxFilter, PodSandboxStatusRequest,
    PodSandboxStatusResponse,
};

pub const POD_UID_LABEL: &str = "io.kubernetes.pod.uid";
pub const SANDBOX_INFO_KEY: &str = "info";
const NETWORK_NAMESPACE_TYPE: &str = "network";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Path to the CRI socket is missing!")]
    MissingSocketPath,
    #[error("Couldn't connect to the CRI socket '{}'! Reason: {}", .0, .1)]
    Connection(String, tonic::transport::Error),
    #[error("CRI transport failed! Reason: {}", .0)]
    Transport(tonic::transport::Error),
    #[error("CRI call failed! Reason: {}", .0)]
    Rpc(tonic::Status),
    #[error("ListPodSandbox returned 0 items for pod '{}'!", .0)]
    SandboxNotFound(String),
    #[error("ListPodSandbox returned more than 1 item for pod '{}'!", .0)]
    AmbiguousSandbox(String),
    #[error("Pod sandbox '{}' status is missing the '{}' entry!", .0, SANDBOX_INFO_KEY)]
    MissingSandboxInfo(String),
    #[error("Couldn't parse pod sandbox '{}' status info! Reason: {}", .0, .1)]
    MalformedSandboxInfo(String, serde_json::Error),
    #[error("Couldn't find the network namespace of pod sandbox '{}'!", .0)]
    MissingNetworkNamespace(String),
    #[error("Unsupported runtime type '{}', allowed values are: {}!", .0, RuntimeType::allowed_values())]
    UnsupportedRuntimeType(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RuntimeType {
    #[default]
    Containerd,
    Crio,
}

impl RuntimeType {
    pub const ALL: [RuntimeType; 2] = [RuntimeType::Containerd, RuntimeType::Crio];

    pub fn allowed_values() -> String {
        Self::ALL
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn default_socket_path(&self) -> &'static str {
        match self {
            RuntimeType::Containerd => "/run/containerd/containerd.sock",
            RuntimeType::Crio => "/run/crio/crio.sock",
        }
    }
}

impl Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Containerd => f.write_str("containerd"),
            RuntimeType::Crio => f.write_str("crio"),
        }
    }
}

impl FromStr for RuntimeType {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "containerd" => Ok(RuntimeType::Containerd),
            "crio" => Ok(RuntimeType::Crio),
            other => Err(RuntimeError::UnsupportedRuntimeType(other.to_owned())),
        }
    }
}

/// Resolves where a running pod lives on this node.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn pod_sandbox_id(&self, pod_uid: &str) -> Result<String, RuntimeError>;
    async fn network_namespace(&self, pod_uid: &str) -> Result<String, RuntimeError>;
}

/// The two runtime service calls the resolver depends on.
#[async_trait]
pub trait SandboxService: Send + Sync {
    async fn list_pod_sandbox(
        &self,
        request: ListPodSandboxRequest,
    ) -> Result<ListPodSandboxResponse, RuntimeError>;

    async fn pod_sandbox_status(
        &self,
        request: PodSandboxStatusRequest,
    ) -> Result<PodSandboxStatusResponse, RuntimeError>;
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct SandboxInfo {
    #[serde(default)]
    runtime_spec: RuntimeSpec,
}

#[derive(Deserialize, Debug, Default)]
struct RuntimeSpec {
    #[serde(default)]
    linux: Option<LinuxSpec>,
}

#[derive(Deserialize, Debug, Default)]
struct LinuxSpec {
    #[serde(default)]
    namespaces: Vec<LinuxNamespace>,
}

#[derive(Deserialize, Debug)]
struct LinuxNamespace {
    #[serde(rename = "type")]
    namespace_type: String,
    #[serde(default)]
    path: String,
}

/// CRI backed [`ContainerRuntime`], used for both containerd and CRI-O.
pub struct CriRuntime<S> {
    service: S,
}

impl<S: SandboxService> CriRuntime<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: SandboxService> ContainerRuntime for CriRuntime<S> {
    async fn pod_sandbox_id(&self, pod_uid: &str) -> Result<String, RuntimeError> {
        let request = ListPodSandboxRequest {
            filter: Some(PodSandboxFilter {
                id: String::new(),
                label_selector: HashMap::from([(POD_UID_LABEL.to_owned(), pod_uid.to_owned())]),
            }),
        };

        let mut items = self.service.list_pod_sandbox(request).await?.items;

        match items.len() {
            0 => Err(RuntimeError::SandboxNotFound(pod_uid.to_owned())),
            1 => Ok(items.remove(0).id),
            _ => Err(RuntimeError::AmbiguousSandbox(pod_uid.to_owned())),
        }
    }

    async fn network_namespace(&self, pod_uid: &str) -> Result<String, RuntimeError> {
        let sandbox_id = self.pod_sandbox_id(pod_uid).await?;
        let status = self
            .service
            .pod_sandbox_status(PodSandboxStatusRequest {
                pod_sandbox_id: sandbox_id.to_owned(),
                verbose: true,
            })
            .await?;

        let raw_info = status
            .info
            .get(SANDBOX_INFO_KEY)
            .ok_or_else(|| RuntimeError::MissingSandboxInfo(sandbox_id.to_owned()))?;

        let info = serde_json::from_str::<SandboxInfo>(raw_info)
            .map_err(|err| RuntimeError::MalformedSandboxInfo(sandbox_id.to_owned(), err))?;

        let netns = info
            .runtime_spec
            .linux
            .unwrap_or_default()
            .namespaces
            .into_iter()
            .find(|namespace| namespace.namespace_type == NETWORK_NAMESPACE_TYPE)
            .map(|namespace| namespace.path)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| RuntimeError::MissingNetworkNamespace(sandbox_id.to_owned()))?;

        debug!("Pod '{pod_uid}' runs in sandbox '{sandbox_id}' with netns '{netns}'");

        Ok(netns)
    }
}
