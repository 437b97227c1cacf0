use async_trait::async_trait;
use dynamic_networks_core::annotations::NetworkSelectionElement;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client, Resource,
};
use log::{debug, warn};

pub const REPORTER_NAME: &str = "pod-networks-updates";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodNetworkEventKind {
    AddedInterface,
    FailedAddingInterface,
    RemovedInterface,
    FailedRemovingInterface,
    InterfaceAddRejected,
}

impl PodNetworkEventKind {
    pub fn reason(&self) -> &'static str {
        match self {
            PodNetworkEventKind::AddedInterface => "AddedInterface",
            PodNetworkEventKind::FailedAddingInterface => "FailedAddingInterface",
            PodNetworkEventKind::RemovedInterface => "RemovedInterface",
            PodNetworkEventKind::FailedRemovingInterface => "FailedRemovingInterface",
            PodNetworkEventKind::InterfaceAddRejected => "InterfaceAddRejected",
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            PodNetworkEventKind::RemovedInterface
            | PodNetworkEventKind::FailedRemovingInterface => "RemoveInterface",
            _ => "AddInterface",
        }
    }

    pub fn is_warning(&self) -> bool {
        !matches!(
            self,
            PodNetworkEventKind::AddedInterface | PodNetworkEventKind::RemovedInterface
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PodNetworkEvent {
    pub kind: PodNetworkEventKind,
    pub message: String,
}

impl PodNetworkEvent {
    pub fn added_interface(pod: &str, network: &NetworkSelectionElement) -> Self {
        Self {
            kind: PodNetworkEventKind::AddedInterface,
            message: format!(
                "pod [{pod}]: added interface {} to network: {}{}",
                network.interface_request,
                network.name,
                attributes_suffix(network)
            ),
        }
    }

    pub fn failed_adding_interface(pod: &str, network: &NetworkSelectionElement) -> Self {
        Self {
            kind: PodNetworkEventKind::FailedAddingInterface,
            message: format!(
                "pod [{pod}]: failed adding interface {} to network: {}{}",
                network.interface_request,
                network.name,
                attributes_suffix(network)
            ),
        }
    }

    pub fn removed_interface(pod: &str, network: &NetworkSelectionElement) -> Self {
        Self {
            kind: PodNetworkEventKind::RemovedInterface,
            message: format!(
                "pod [{pod}]: removed interface {} from network: {}",
                network.interface_request, network.name
            ),
        }
    }

    pub fn failed_removing_interface(pod: &str, network: &NetworkSelectionElement) -> Self {
        Self {
            kind: PodNetworkEventKind::FailedRemovingInterface,
            message: format!(
                "pod [{pod}]: failed removing interface {} from network: {}",
                network.interface_request, network.name
            ),
        }
    }

    pub fn interface_add_rejected(pod: &str) -> Self {
        Self {
            kind: PodNetworkEventKind::InterfaceAddRejected,
            message: format!("pod [{pod}]: will not add interface to host networked pod"),
        }
    }
}

fn attributes_suffix(network: &NetworkSelectionElement) -> String {
    if !network.has_interface_attributes() {
        return String::new();
    }

    let cni_args = network
        .cni_args
        .as_ref()
        .and_then(|args| serde_json::to_string(args).ok())
        .unwrap_or_else(|| "{}".to_owned());

    format!(
        "(ips: [{}], mac: {}, cni-args: {})",
        network.ip_request.join(" "),
        network.mac_request,
        cni_args
    )
}

#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, pod: &Pod, event: PodNetworkEvent);
}

/// Publishes pod events through the events API, logging (and otherwise ignoring) failures.
pub struct KubeEventRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeEventRecorder {
    pub fn new(client: Client, node_name: &str) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: REPORTER_NAME.to_owned(),
                instance: Some(node_name.to_owned()),
            },
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, pod: &Pod, event: PodNetworkEvent) {
        debug!("{}: {}", event.kind.reason(), event.message);

        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            pod.object_ref(&()),
        );

        let result = recorder
            .publish(Event {
                type_: match event.kind.is_warning() {
                    true => EventType::Warning,
                    false => EventType::Normal,
                },
                reason: event.kind.reason().to_owned(),
                note: Some(event.message),
                action: event.kind.action().to_owned(),
                secondary: None,
            })
            .await;

        if let Err(err) = result {
            warn!("Couldn't publish {} event! {err:?}", event.kind.reason());
        }
    }
}

#[cfg(test)]
mod tests {
    use dynamic_networks_core::annotations::NetworkSelectionElement;

    use super::{PodNetworkEvent, PodNetworkEventKind};

    #[test]
    fn formats_plain_add_and_remove_messages() {
        let network = NetworkSelectionElement::new("ns1", "tenant-network", "net1");

        assert_eq!(
            PodNetworkEvent::added_interface("ns1/tpod", &network).message,
            "pod [ns1/tpod]: added interface net1 to network: tenant-network"
        );
        assert_eq!(
            PodNetworkEvent::removed_interface("ns1/tpod", &network).message,
            "pod [ns1/tpod]: removed interface net1 from network: tenant-network"
        );
        assert_eq!(
            PodNetworkEvent::failed_removing_interface("ns1/tpod", &network).message,
            "pod [ns1/tpod]: failed removing interface net1 from network: tenant-network"
        );
    }

    #[test]
    fn appends_requested_attributes() {
        let network: NetworkSelectionElement = serde_json::from_str(
            r#"{"name": "tenant-network", "namespace": "ns1", "interface": "net1", "ips": ["10.10.10.2/24"], "mac": "02:03:04:05:06:07"}"#,
        )
        .unwrap();

        assert_eq!(
            PodNetworkEvent::failed_adding_interface("ns1/tpod", &network).message,
            "pod [ns1/tpod]: failed adding interface net1 to network: tenant-network(ips: [10.10.10.2/24], mac: 02:03:04:05:06:07, cni-args: {})"
        );
    }

    #[test]
    fn attributes_follow_the_network_name_directly() {
        let network: NetworkSelectionElement = serde_json::from_str(
            r#"{"name": "tenant-network", "interface": "net1", "ips": ["10.10.10.2/24", "fd00::2/64"], "cni-args": {"foo": "bar"}}"#,
        )
        .unwrap();

        assert_eq!(
            PodNetworkEvent::added_interface("ns1/tpod", &network).message,
            r#"pod [ns1/tpod]: added interface net1 to network: tenant-network(ips: [10.10.10.2/24 fd00::2/64], mac: , cni-args: {"foo":"bar"})"#
        );
    }

    #[test]
    fn classifies_event_kinds() {
        assert!(!PodNetworkEventKind::AddedInterface.is_warning());
        assert!(!PodNetworkEventKind::RemovedInterface.is_warning());
        assert!(PodNetworkEventKind::FailedAddingInterface.is_warning());
        assert!(PodNetworkEventKind::InterfaceAddRejected.is_warning());
        assert_eq!(
            PodNetworkEvent::interface_add_rejected("ns1/tpod").kind.reason(),
            "InterfaceAddRejected"
        );
    }
}
