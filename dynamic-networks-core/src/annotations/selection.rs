use std::{collections::HashMap, net::IpAddr};

use ipnet::IpNet;
use k8s_openapi::api::core::v1::Pod;
use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{helpers::namespaced_name, NETWORK_ATTACHMENT_ANNOTATION};

use super::AnnotationError;

static NETWORK_OBJECT_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// A single attachment requested through the pod's networks annotation.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct NetworkSelectionElement {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(rename = "ips", default, skip_serializing_if = "Vec::is_empty")]
    pub ip_request: Vec<String>,
    #[serde(rename = "mac", default, skip_serializing_if = "String::is_empty")]
    pub mac_request: String,
    #[serde(rename = "infiniband-guid", default, skip_serializing_if = "String::is_empty")]
    pub infiniband_guid_request: String,
    #[serde(rename = "interface", default, skip_serializing_if = "String::is_empty")]
    pub interface_request: String,
    #[serde(rename = "cni-args", default, skip_serializing_if = "Option::is_none")]
    pub cni_args: Option<Map<String, Value>>,
}

impl NetworkSelectionElement {
    pub fn new(namespace: &str, name: &str, interface: &str) -> Self {
        Self {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            interface_request: interface.to_owned(),
            ..Default::default()
        }
    }

    /// `namespace/name/interface`, or `namespace/name` when no interface was requested
    pub fn index_key(&self) -> String {
        match self.interface_request.is_empty() {
            true => namespaced_name(&self.namespace, &self.name),
            false => format!(
                "{}/{}/{}",
                self.namespace, self.name, self.interface_request
            ),
        }
    }

    /// The name this network carries in the status annotation.
    pub fn status_name(&self) -> String {
        match self.namespace.is_empty() {
            true => self.name.to_owned(),
            false => namespaced_name(&self.namespace, &self.name),
        }
    }

    pub fn has_interface_attributes(&self) -> bool {
        !self.ip_request.is_empty() || !self.mac_request.is_empty() || self.cni_args.is_some()
    }

    fn validate(&self) -> Result<(), AnnotationError> {
        if !self.mac_request.is_empty() && !is_hardware_address(&self.mac_request) {
            return Err(AnnotationError::InvalidMac(self.mac_request.to_owned()));
        }

        if !self.infiniband_guid_request.is_empty()
            && !is_hardware_address(&self.infiniband_guid_request)
        {
            return Err(AnnotationError::InvalidInfinibandGuid(
                self.infiniband_guid_request.to_owned(),
            ));
        }

        for ip in &self.ip_request {
            let valid = match ip.contains('/') {
                true => ip.parse::<IpNet>().is_ok(),
                false => ip.parse::<IpAddr>().is_ok(),
            };

            if !valid {
                return Err(AnnotationError::InvalidIp(ip.to_owned()));
            }
        }

        Ok(())
    }
}

/// Parses the networks annotation, either a JSON list of selection elements or the
/// `[namespace/]name[@interface]` comma separated shorthand.
pub fn parse_desired(
    raw: &str,
    default_namespace: &str,
) -> Result<Vec<NetworkSelectionElement>, AnnotationError> {
    trace!("Parsing network selection '{raw}' (default namespace '{default_namespace}')");

    if raw.is_empty() {
        return Err(AnnotationError::EmptyNetworkSelection);
    }

    let mut networks = match raw.contains(['[', '{', '"']) {
        true => serde_json::from_str::<Option<Vec<NetworkSelectionElement>>>(raw)
            .map_err(AnnotationError::MalformedNetworkSelection)?
            .unwrap_or_default(),
        false => raw
            .split(',')
            .map(|item| parse_network_object(item.trim()))
            .collect::<Result<Vec<_>, _>>()?,
    };

    for network in networks.iter_mut() {
        if network.namespace.is_empty() {
            network.namespace = default_namespace.to_owned();
        }

        network.validate()?;
    }

    Ok(networks)
}

fn parse_network_object(item: &str) -> Result<NetworkSelectionElement, AnnotationError> {
    let (namespace, network) = match item.split('/').collect::<Vec<_>>()[..] {
        [network] => ("", network),
        [namespace, network] => (namespace.trim(), network),
        _ => return Err(AnnotationError::InvalidNetworkObject(item.to_owned(), '/')),
    };

    let (name, interface) = match network.split('@').collect::<Vec<_>>()[..] {
        [name] => (name.trim(), ""),
        [name, interface] => (name.trim(), interface.trim()),
        _ => return Err(AnnotationError::InvalidNetworkObject(item.to_owned(), '@')),
    };

    if name.is_empty() {
        return Err(AnnotationError::MissingNetworkName(item.to_owned()));
    }

    for segment in [namespace, name, interface] {
        if !segment.is_empty() && !NETWORK_OBJECT_ITEM.is_match(segment) {
            return Err(AnnotationError::InvalidNetworkObjectItem(segment.to_owned()));
        }
    }

    debug!("Parsed network object '{item}' as '{namespace}', '{name}', '{interface}'");

    Ok(NetworkSelectionElement::new(namespace, name, interface))
}

// accepts the same shapes as a 6, 8 or 20 octet IEEE 802 address
fn is_hardware_address(raw: &str) -> bool {
    let (separator, group_len) = if raw.contains(':') {
        (':', 2)
    } else if raw.contains('-') {
        ('-', 2)
    } else if raw.contains('.') {
        ('.', 4)
    } else {
        return false;
    };

    let groups = raw.split(separator).collect::<Vec<_>>();
    let octets = groups.len() * group_len / 2;

    matches!(octets, 6 | 8 | 20)
        && groups
            .iter()
            .all(|group| group.len() == group_len && group.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Desired attachments of `pod`; an absent or empty annotation means no attachments.
pub fn pod_network_selection_elements(
    pod: &Pod,
) -> Result<Vec<NetworkSelectionElement>, AnnotationError> {
    let raw = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(NETWORK_ATTACHMENT_ANNOTATION));

    match raw {
        Some(raw) if !raw.is_empty() => {
            parse_desired(raw, pod.metadata.namespace.as_deref().unwrap_or_default())
        }
        _ => Ok(Vec::new()),
    }
}

pub fn has_network_selection_annotation(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .map(|annotations| annotations.contains_key(NETWORK_ATTACHMENT_ANNOTATION))
        .unwrap_or(false)
}

pub fn network_selection_annotation(pod: &Pod) -> Option<&str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(NETWORK_ATTACHMENT_ANNOTATION))
        .map(String::as_str)
}

pub fn index_desired(
    elements: &[NetworkSelectionElement],
) -> HashMap<String, &NetworkSelectionElement> {
    elements
        .iter()
        .map(|element| (element.index_key(), element))
        .collect()
}
