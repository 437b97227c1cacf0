use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// CNI 1.0 `ADD` result, as relayed by the delegate.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CniResult {
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<CniInterface>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<CniIpConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<CniRoute>,
    #[serde(default)]
    pub dns: CniDns,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CniInterface {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sandbox: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct CniIpConfig {
    /// index into [`CniResult::interfaces`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
    pub address: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct CniRoute {
    pub dst: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<IpAddr>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CniDns {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl CniDns {
    pub fn is_empty(&self) -> bool {
        self.nameservers.is_empty()
            && self.domain.is_empty()
            && self.search.is_empty()
            && self.options.is_empty()
    }
}

impl CniResult {
    /// Picks the interface the plugin created inside the pod sandbox, preferring `requested`
    /// when the plugin reported more than one.
    pub fn sandbox_interface(&self, requested: &str) -> Option<(usize, &CniInterface)> {
        let mut sandboxed = self
            .interfaces
            .iter()
            .enumerate()
            .filter(|(_, iface)| !iface.sandbox.is_empty());

        let first = sandboxed.clone().next();

        sandboxed
            .find(|(_, iface)| !requested.is_empty() && iface.name == requested)
            .or(first)
    }

    pub fn default_gateways(&self) -> Vec<IpAddr> {
        self.routes
            .iter()
            .filter(|route| route.dst.prefix_len() == 0)
            .filter_map(|route| route.gw)
            .collect()
    }
}
