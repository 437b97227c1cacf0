use std::collections::{HashMap, HashSet};

use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{ser::PrettyFormatter, Serializer, Value};

use crate::{
    cni::{CniDns, CniResult},
    delegate::DelegateResponse,
    NETWORK_STATUS_ANNOTATION,
};

use super::{AnnotationError, NetworkSelectionElement};

/// One entry of the network status annotation.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct NetworkStatus {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub interface: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dns: NetworkStatusDns,
    #[serde(rename = "device-info", default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateway: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct NetworkStatusDns {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl From<&CniDns> for NetworkStatusDns {
    fn from(value: &CniDns) -> Self {
        Self {
            nameservers: value.nameservers.clone(),
            domain: value.domain.clone(),
            search: value.search.clone(),
            options: value.options.clone(),
        }
    }
}

impl NetworkStatus {
    /// `name/interface`, the name already carries the namespace
    pub fn index_key(&self) -> String {
        format!("{}/{}", self.name, self.interface)
    }

    pub fn from_cni_result(network_name: &str, result: &CniResult, requested_iface: &str) -> Self {
        let sandboxed = result.sandbox_interface(requested_iface);

        let ips = result
            .ips
            .iter()
            .filter(|ip| match (sandboxed, ip.interface) {
                (Some((index, _)), Some(ip_index)) => index == ip_index,
                _ => true,
            })
            .map(|ip| ip.address.addr().to_string())
            .collect();

        let (interface, mac, mtu) = match sandboxed {
            Some((_, iface)) => (iface.name.to_owned(), iface.mac.to_owned(), iface.mtu),
            None => (requested_iface.to_owned(), String::new(), None),
        };

        Self {
            name: network_name.to_owned(),
            interface,
            ips,
            mac,
            mtu,
            default: false,
            dns: NetworkStatusDns::from(&result.dns),
            device_info: None,
            gateway: result
                .default_gateways()
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// A requested attachment paired with what the delegate answered for it.
#[derive(Clone, Debug, PartialEq)]
pub struct AttachmentResult {
    pub attachment: NetworkSelectionElement,
    pub result: Option<DelegateResponse>,
}

impl AttachmentResult {
    pub fn new(attachment: NetworkSelectionElement, result: Option<DelegateResponse>) -> Self {
        Self { attachment, result }
    }

    pub fn is_valid(&self) -> bool {
        !self.attachment.name.is_empty()
    }

    pub fn has_result(&self) -> bool {
        self.result
            .as_ref()
            .map(|response| response.result.is_some())
            .unwrap_or(false)
    }

    fn to_status(&self) -> Option<NetworkStatus> {
        let result = self.result.as_ref()?.result.as_ref()?;

        Some(NetworkStatus::from_cni_result(
            &self.attachment.status_name(),
            result,
            &self.attachment.interface_request,
        ))
    }
}

pub fn parse_observed(raw: &str) -> Result<Vec<NetworkStatus>, AnnotationError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str::<Option<Vec<NetworkStatus>>>(raw)
        .map(Option::unwrap_or_default)
        .map_err(AnnotationError::MalformedNetworkStatus)
}

/// Observed attachments of `pod`; an absent annotation means no attachments.
pub fn pod_network_status(pod: &Pod) -> Result<Vec<NetworkStatus>, AnnotationError> {
    match pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(NETWORK_STATUS_ANNOTATION))
    {
        Some(raw) => parse_observed(raw),
        None => Ok(Vec::new()),
    }
}

pub fn index_observed(
    entries: &[NetworkStatus],
    ignore_default: bool,
) -> HashMap<String, &NetworkStatus> {
    entries
        .iter()
        .filter(|entry| !(ignore_default && entry.default))
        .map(|entry| (entry.index_key(), entry))
        .collect()
}

/// Produces the next status: surviving entries in their original order, then one entry per
/// attachment that came back with a result. Default entries are always kept.
pub fn merge(
    current: &[NetworkStatus],
    to_add: &[AttachmentResult],
    to_remove: &[NetworkSelectionElement],
) -> Vec<NetworkStatus> {
    let removed = to_remove
        .iter()
        .map(|element| format!("{}/{}", element.status_name(), element.interface_request))
        .collect::<HashSet<_>>();

    current
        .iter()
        .filter(|entry| entry.default || !removed.contains(&entry.index_key()))
        .cloned()
        .chain(
            to_add
                .iter()
                .filter(|result| result.is_valid())
                .filter_map(AttachmentResult::to_status),
        )
        .collect()
}

pub fn serialize_status(entries: &[NetworkStatus]) -> Result<String, AnnotationError> {
    let serialized = entries
        .iter()
        .map(|entry| {
            let mut buffer = Vec::new();
            let mut serializer =
                Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
            entry
                .serialize(&mut serializer)
                .map_err(AnnotationError::StatusSerialization)?;

            Ok(String::from_utf8_lossy(&buffer).into_owned())
        })
        .collect::<Result<Vec<_>, AnnotationError>>()?;

    Ok(format!("[{}]", serialized.join(",")))
}
