use std::{collections::BTreeMap, fmt::Display};

use async_trait::async_trait;
use data_encoding::BASE64;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{annotations::NetworkSelectionElement, cni::CniResult};

pub mod client;

pub use client::UnixSocketDelegateClient;

pub const DELEGATE_ENDPOINT: &str = "/delegate";
pub const DELEGATE_HOST: &str = "dummy";

#[derive(Debug, Error)]
pub enum DelegateError {
    #[error("Couldn't serialize the delegate request! Reason: {}", .0)]
    RequestSerialization(serde_json::Error),
    #[error("Couldn't connect to the delegate socket '{}'! Reason: {}", .0, .1)]
    Connection(String, std::io::Error),
    #[error("Delegate request failed! Reason: {}", .0)]
    Transport(hyper::Error),
    #[error("Delegate request timed out!")]
    Timeout,
    #[error("Unexpected delegate response status {}: '{}'!", .0, .1)]
    UnexpectedStatus(u16, String),
    #[error("Couldn't parse the delegate response '{}'! Reason: {}", .0, .1)]
    MalformedResponse(String, serde_json::Error),
    #[error("Delegate didn't return a CNI result!")]
    MissingResult,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelegateCommand {
    Add,
    Del,
}

impl Display for DelegateCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DelegateCommand::Add => f.write_str("ADD"),
            DelegateCommand::Del => f.write_str("DEL"),
        }
    }
}

/// Per-attachment overrides forwarded to the plugin.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct InterfaceAttributes {
    #[serde(rename = "ipRequest", default, skip_serializing_if = "Vec::is_empty")]
    pub ip_request: Vec<String>,
    #[serde(rename = "macRequest", default, skip_serializing_if = "String::is_empty")]
    pub mac_request: String,
    #[serde(rename = "cni-args", default, skip_serializing_if = "Option::is_none")]
    pub cni_args: Option<Map<String, Value>>,
}

impl InterfaceAttributes {
    /// `None` when the selection element doesn't request any attributes.
    pub fn from_selection(element: &NetworkSelectionElement) -> Option<Self> {
        element.has_interface_attributes().then(|| Self {
            ip_request: element.ip_request.clone(),
            mac_request: element.mac_request.clone(),
            cni_args: element.cni_args.clone(),
        })
    }
}

#[derive(Debug, Clone, Builder)]
pub struct DelegateRequest {
    pub command: DelegateCommand,
    pub sandbox_id: String,
    pub netns_path: String,
    pub interface_name: String,
    pub pod_namespace: String,
    pub pod_name: String,
    pub pod_uid: String,
    pub config: Vec<u8>,
    #[builder(default)]
    pub interface_attributes: Option<InterfaceAttributes>,
}

impl DelegateRequestBuilder {
    pub fn with_selection(&mut self, element: &NetworkSelectionElement) -> &mut Self {
        self.interface_name(element.interface_request.to_owned())
            .interface_attributes(InterfaceAttributes::from_selection(element))
    }
}

#[derive(Serialize, Debug)]
struct DelegatePayload<'a> {
    env: BTreeMap<&'static str, String>,
    config: String,
    #[serde(rename = "interfaceAttributes", skip_serializing_if = "Option::is_none")]
    interface_attributes: Option<&'a InterfaceAttributes>,
}

impl DelegateRequest {
    pub fn cni_args(&self) -> String {
        format!(
            "K8S_POD_NAMESPACE={};K8S_POD_NAME={};K8S_POD_UID={}",
            self.pod_namespace, self.pod_name, self.pod_uid
        )
    }

    /// JSON body understood by the delegate endpoint.
    pub fn to_payload(&self) -> Result<Vec<u8>, DelegateError> {
        let payload = DelegatePayload {
            env: BTreeMap::from([
                ("CNI_COMMAND", self.command.to_string()),
                ("CNI_CONTAINERID", self.sandbox_id.to_owned()),
                ("CNI_NETNS", self.netns_path.to_owned()),
                ("CNI_IFNAME", self.interface_name.to_owned()),
                ("CNI_ARGS", self.cni_args()),
            ]),
            config: BASE64.encode(&self.config),
            interface_attributes: self.interface_attributes.as_ref(),
        };

        serde_json::to_vec(&payload).map_err(DelegateError::RequestSerialization)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct DelegateResponse {
    #[serde(rename = "Result", alias = "result", default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CniResult>,
}

impl DelegateResponse {
    pub fn new(result: CniResult) -> Self {
        Self {
            result: Some(result),
        }
    }

    pub fn parse(body: &[u8]) -> Result<Self, DelegateError> {
        if body.is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_slice(body).map_err(|err| {
            DelegateError::MalformedResponse(String::from_utf8_lossy(body).into_owned(), err)
        })
    }

    /// An ADD only succeeded when the delegate answered with the attachment's CNI result.
    pub fn require_result(self) -> Result<Self, DelegateError> {
        match self.result {
            Some(_) => Ok(self),
            None => Err(DelegateError::MissingResult),
        }
    }
}

#[async_trait]
pub trait DelegateClient: Send + Sync {
    async fn invoke(&self, request: &DelegateRequest) -> Result<DelegateResponse, DelegateError>;
}
