//! In-memory stand-ins for the cluster, runtime and delegate, shared by the controller tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use dynamic_networks_core::{
    annotations::{parse_observed, NetworkStatus},
    cni::CniResult,
    cri::{ContainerRuntime, RuntimeError},
    delegate::{DelegateClient, DelegateCommand, DelegateError, DelegateRequest, DelegateResponse},
    resources::{NetworkAttachmentDefinition, NetworkAttachmentDefinitionSpec},
    NETWORK_ATTACHMENT_ANNOTATION, NETWORK_STATUS_ANNOTATION,
};
use k8s_openapi::{
    api::core::v1::{Pod, PodSpec},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::error::ErrorResponse;

use crate::events::{EventRecorder, PodNetworkEvent, PodNetworkEventKind};

use super::{
    cache::{NetDefLookup, PodLookup, PodStatusWriter},
    reconciler::context::ReconcilerContext,
};

pub(crate) const NAMESPACE: &str = "ns1";
const POD_NAME: &str = "tpod";
pub(crate) const POD_KEY: &str = "ns1/tpod";
const NETNS: &str = "/var/run/netns/cni-1234";
const SANDBOX: &str = "sandbox-1234";

#[derive(Default)]
pub(crate) struct FakePods(HashMap<(String, String), Arc<Pod>>);

impl PodLookup for FakePods {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<Pod>> {
        self.0.get(&(namespace.to_owned(), name.to_owned())).cloned()
    }

    fn list(&self) -> Vec<Arc<Pod>> {
        self.0.values().cloned().collect()
    }
}

#[derive(Default)]
pub(crate) struct FakeNetDefs(HashMap<(String, String), Arc<NetworkAttachmentDefinition>>);

impl NetDefLookup for FakeNetDefs {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<NetworkAttachmentDefinition>> {
        self.0.get(&(namespace.to_owned(), name.to_owned())).cloned()
    }
}

pub(crate) struct FakeRuntime {
    available: bool,
    lookups: AtomicUsize,
}

impl FakeRuntime {
    /// Number of network namespace lookups, one per pass that got past parsing.
    pub(crate) fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn pod_sandbox_id(&self, pod_uid: &str) -> Result<String, RuntimeError> {
        match self.available {
            true => Ok(SANDBOX.to_owned()),
            false => Err(RuntimeError::SandboxNotFound(pod_uid.to_owned())),
        }
    }

    async fn network_namespace(&self, pod_uid: &str) -> Result<String, RuntimeError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        match self.available {
            true => Ok(NETNS.to_owned()),
            false => Err(RuntimeError::SandboxNotFound(pod_uid.to_owned())),
        }
    }
}

/// Plugs interfaces in and out, failing the interfaces it was told to fail and any
/// interface listed in `depends_on` whose dependency hasn't been added yet. Interfaces in
/// `empty_results` are added without a CNI result.
#[derive(Default)]
pub(crate) struct FakeDelegate {
    failing: HashSet<String>,
    empty_results: HashSet<String>,
    depends_on: HashMap<String, String>,
    calls: Mutex<Vec<(DelegateCommand, String)>>,
}

impl FakeDelegate {
    pub(crate) fn calls(&self) -> Vec<(DelegateCommand, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DelegateClient for FakeDelegate {
    async fn invoke(&self, request: &DelegateRequest) -> Result<DelegateResponse, DelegateError> {
        let mut calls = self.calls.lock().unwrap();
        let interface = match request.interface_name.is_empty() {
            true => format!("net{}", calls.len() + 1),
            false => request.interface_name.to_owned(),
        };

        calls.push((request.command, interface.to_owned()));

        let dependency_missing = self.depends_on.get(&interface).map(|dependency| {
            !calls.iter().any(|(command, added)| {
                *command == DelegateCommand::Add && added == dependency
            })
        });

        if self.failing.contains(&interface) || dependency_missing == Some(true) {
            return Err(DelegateError::UnexpectedStatus(500, "plugin failed".to_owned()));
        }

        if request.command == DelegateCommand::Del || self.empty_results.contains(&interface) {
            return Ok(DelegateResponse::default());
        }

        let result: CniResult = serde_json::from_value(serde_json::json!({
            "cniVersion": "1.0.0",
            "interfaces": [{ "name": interface, "mac": "02:03:04:05:06:07", "sandbox": request.netns_path }],
            "ips": [{ "interface": 0, "address": "10.10.10.2/24" }]
        }))
        .unwrap();

        Ok(DelegateResponse::new(result))
    }
}

#[derive(Default)]
pub(crate) struct FakeEvents(Mutex<Vec<PodNetworkEvent>>);

impl FakeEvents {
    pub(crate) fn kinds(&self) -> Vec<PodNetworkEventKind> {
        self.0.lock().unwrap().iter().map(|event| event.kind).collect()
    }
}

#[async_trait]
impl EventRecorder for FakeEvents {
    async fn record(&self, _pod: &Pod, event: PodNetworkEvent) {
        self.0.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub(crate) struct FakeStatusWriter {
    failing: bool,
    pub(crate) writes: Mutex<Vec<String>>,
}

impl FakeStatusWriter {
    pub(crate) fn last_status(&self) -> Option<Vec<NetworkStatus>> {
        self.writes
            .lock()
            .unwrap()
            .last()
            .map(|status| parse_observed(status).unwrap())
    }

    pub(crate) fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

#[async_trait]
impl PodStatusWriter for FakeStatusWriter {
    async fn write_network_status(
        &self,
        _namespace: &str,
        _name: &str,
        status: &str,
    ) -> Result<(), kube::Error> {
        self.writes.lock().unwrap().push(status.to_owned());

        match self.failing {
            true => Err(kube::Error::Api(ErrorResponse {
                status: "Failure".to_owned(),
                message: "the server rejected our request".to_owned(),
                reason: "Conflict".to_owned(),
                code: 409,
            })),
            false => Ok(()),
        }
    }
}

pub(crate) struct Harness {
    pub(crate) runtime: Arc<FakeRuntime>,
    pub(crate) delegate: Arc<FakeDelegate>,
    pub(crate) events: Arc<FakeEvents>,
    pub(crate) status: Arc<FakeStatusWriter>,
    pub(crate) context: ReconcilerContext,
}

pub(crate) struct HarnessBuilder {
    pods: FakePods,
    netdefs: FakeNetDefs,
    runtime_available: bool,
    delegate: FakeDelegate,
    status: FakeStatusWriter,
}

impl HarnessBuilder {
    pub(crate) fn new() -> Self {
        Self {
            pods: FakePods::default(),
            netdefs: FakeNetDefs::default(),
            runtime_available: true,
            delegate: FakeDelegate::default(),
            status: FakeStatusWriter::default(),
        }
    }

    pub(crate) fn pod(mut self, pod: Pod) -> Self {
        let key = (
            pod.metadata.namespace.clone().unwrap(),
            pod.metadata.name.clone().unwrap(),
        );
        self.pods.0.insert(key, Arc::new(pod));
        self
    }

    pub(crate) fn netdefs(mut self, names: &[&str]) -> Self {
        for name in names {
            let mut netdef = NetworkAttachmentDefinition::new(
                name,
                NetworkAttachmentDefinitionSpec {
                    config: Some(r#"{"cniVersion": "1.0.0", "type": "macvlan"}"#.to_owned()),
                },
            );
            netdef.metadata.namespace = Some(NAMESPACE.to_owned());
            self.netdefs
                .0
                .insert((NAMESPACE.to_owned(), name.to_string()), Arc::new(netdef));
        }
        self
    }

    pub(crate) fn failing_interfaces(mut self, interfaces: &[&str]) -> Self {
        self.delegate.failing = interfaces.iter().map(|iface| iface.to_string()).collect();
        self
    }

    pub(crate) fn empty_add_results(mut self, interfaces: &[&str]) -> Self {
        self.delegate.empty_results = interfaces.iter().map(|iface| iface.to_string()).collect();
        self
    }

    pub(crate) fn dependency(mut self, interface: &str, depends_on: &str) -> Self {
        self.delegate
            .depends_on
            .insert(interface.to_owned(), depends_on.to_owned());
        self
    }

    pub(crate) fn runtime_unavailable(mut self) -> Self {
        self.runtime_available = false;
        self
    }

    pub(crate) fn failing_status_writes(mut self) -> Self {
        self.status.failing = true;
        self
    }

    pub(crate) fn build(self) -> Harness {
        let delegate = Arc::new(self.delegate);
        let events = Arc::new(FakeEvents::default());
        let status = Arc::new(self.status);
        let runtime = Arc::new(FakeRuntime {
            available: self.runtime_available,
            lookups: AtomicUsize::new(0),
        });

        Harness {
            context: ReconcilerContext {
                pods: Arc::new(self.pods),
                netdefs: Arc::new(self.netdefs),
                runtime: runtime.clone(),
                delegate: delegate.clone(),
                events: events.clone(),
                status_writer: status.clone(),
            },
            runtime,
            delegate,
            events,
            status,
        }
    }
}

pub(crate) fn pod(networks: Option<&str>, status: Option<&str>) -> Pod {
    named_pod(POD_NAME, networks, status)
}

pub(crate) fn named_pod(name: &str, networks: Option<&str>, status: Option<&str>) -> Pod {
    let mut annotations = BTreeMap::new();

    if let Some(networks) = networks {
        annotations.insert(NETWORK_ATTACHMENT_ANNOTATION.to_owned(), networks.to_owned());
    }

    if let Some(status) = status {
        annotations.insert(NETWORK_STATUS_ANNOTATION.to_owned(), status.to_owned());
    }

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(NAMESPACE.to_owned()),
            uid: Some("8b5a3f1e".to_owned()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(PodSpec::default()),
        ..Default::default()
    }
}

pub(crate) fn host_networked(mut pod: Pod) -> Pod {
    pod.spec = Some(PodSpec {
        host_network: Some(true),
        ..Default::default()
    });
    pod
}

pub(crate) fn default_status() -> &'static str {
    r#"[{"name": "kindnet", "interface": "eth0", "ips": ["10.244.1.4"], "default": true}]"#
}

pub(crate) fn status_with(entries: &[(&str, &str)]) -> String {
    let mut status = vec![serde_json::json!({
        "name": "kindnet", "interface": "eth0", "ips": ["10.244.1.4"], "default": true
    })];
    status.extend(
        entries
            .iter()
            .map(|(name, iface)| serde_json::json!({ "name": name, "interface": iface })),
    );

    serde_json::to_string(&status).unwrap()
}
