use std::collections::HashSet;

use dynamic_networks_core::{
    annotations::{
        index_observed, merge, pod_network_selection_elements, pod_network_status,
        selection::has_network_selection_annotation, serialize_status, AttachmentResult,
        NetworkSelectionElement, NetworkStatus,
    },
    delegate::{DelegateCommand, DelegateRequest, DelegateRequestBuilder, DelegateResponse},
    helpers::{namespaced_name, split_namespaced_name, RequireMetadata},
};
use k8s_openapi::api::core::v1::Pod;
use log::{debug, error, info, warn};

use crate::events::PodNetworkEvent;

use self::{context::ReconcilerContext, error::ReconcilerError};

pub mod context;
pub mod error;

/// Attachments a single pass has to plug in and unplug.
#[derive(Debug, Default, PartialEq)]
pub struct NetworkDiff {
    pub to_add: Vec<NetworkSelectionElement>,
    pub to_remove: Vec<NetworkSelectionElement>,
}

impl NetworkDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

struct PodTarget<'a> {
    pod: &'a Pod,
    key: &'a str,
    namespace: &'a str,
    name: &'a str,
    uid: &'a str,
    sandbox_id: String,
    netns: String,
}

/// Runs a single reconciliation pass for the pod behind `key` (`namespace/name`).
pub async fn reconcile_pod(key: &str, context: &ReconcilerContext) -> Result<(), ReconcilerError> {
    let (namespace, name) =
        split_namespaced_name(key).ok_or_else(|| ReconcilerError::InvalidKey(key.to_owned()))?;

    let pod = match context.pods.get(namespace, name) {
        Some(pod) => pod,
        None => {
            info!("Pod '{key}' is gone, nothing to reconcile");
            return Ok(());
        }
    };

    if is_host_networked(&pod) {
        if has_network_selection_annotation(&pod) {
            warn!("Refusing to add interfaces to host networked pod '{key}'");
            context
                .events
                .record(&pod, PodNetworkEvent::interface_add_rejected(key))
                .await;
        } else {
            debug!("Host networked pod '{key}' got filtered out");
        }

        return Ok(());
    }

    let desired = pod_network_selection_elements(&pod).map_err(ReconcilerError::Annotation)?;
    let observed = pod_network_status(&pod).map_err(ReconcilerError::Annotation)?;

    let uid = pod.require_uid_or_else(|| ReconcilerError::MissingPodUid(key.to_owned()))?;
    let netns = context
        .runtime
        .network_namespace(uid)
        .await
        .map_err(ReconcilerError::Runtime)?;
    let sandbox_id = context
        .runtime
        .pod_sandbox_id(uid)
        .await
        .map_err(ReconcilerError::Runtime)?;

    let diff = compute_diff(&desired, &observed);

    if diff.is_empty() {
        debug!("Pod '{key}' networks are up to date");
        return Ok(());
    }

    let target = PodTarget {
        pod: &pod,
        key,
        namespace,
        name,
        uid,
        sandbox_id,
        netns,
    };

    let (added, add_error) = add_networks(&target, &diff.to_add, context).await;
    let (removed, remove_error) = remove_networks(&target, &diff.to_remove, context).await;

    if !added.is_empty() || !removed.is_empty() {
        persist_status(&target, &observed, &added, &removed, context).await;
    }

    match add_error.or(remove_error) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Splits the pod's networks into the attachments to plug in (in document order) and the ones
/// to unplug (in index key order). Default status entries are never unplugged.
///
/// A desired element without an interface name is satisfied by any observed entry of the same
/// network that no other element claims.
pub fn compute_diff(desired: &[NetworkSelectionElement], observed: &[NetworkStatus]) -> NetworkDiff {
    let observed_index = index_observed(observed, true);
    let mut claimed = HashSet::new();

    for element in desired.iter().filter(|element| !element.interface_request.is_empty()) {
        let key = element.index_key();

        if observed_index.contains_key(&key) {
            claimed.insert(key);
        }
    }

    let mut seen = HashSet::new();
    let mut to_add = Vec::new();

    for element in desired {
        if !seen.insert(element.index_key()) {
            continue;
        }

        if !element.interface_request.is_empty() {
            if !claimed.contains(&element.index_key()) {
                to_add.push(element.clone());
            }

            continue;
        }

        let status_name = element.status_name();
        let mut candidates = observed
            .iter()
            .filter(|entry| !entry.default && entry.name == status_name)
            .map(NetworkStatus::index_key)
            .filter(|key| !claimed.contains(key))
            .collect::<Vec<_>>();
        candidates.sort();

        match candidates.into_iter().next() {
            Some(key) => {
                claimed.insert(key);
            }
            None => to_add.push(element.clone()),
        }
    }

    let mut to_remove = observed_index
        .into_iter()
        .filter(|(key, _)| !claimed.contains(key))
        .collect::<Vec<_>>();
    to_remove.sort_by(|(left, _), (right, _)| left.cmp(right));

    NetworkDiff {
        to_add,
        to_remove: to_remove
            .into_iter()
            .map(|(_, entry)| removal_element(entry))
            .collect(),
    }
}

fn removal_element(entry: &NetworkStatus) -> NetworkSelectionElement {
    match entry.name.split_once('/') {
        Some((namespace, name)) => NetworkSelectionElement::new(namespace, name, &entry.interface),
        None => NetworkSelectionElement::new("", &entry.name, &entry.interface),
    }
}

pub fn is_host_networked(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.host_network)
        .unwrap_or(false)
}

async fn add_networks(
    target: &PodTarget<'_>,
    to_add: &[NetworkSelectionElement],
    context: &ReconcilerContext,
) -> (Vec<AttachmentResult>, Option<ReconcilerError>) {
    let mut results = Vec::new();

    for network in to_add {
        info!("Adding network '{}' to pod '{}'...", network.index_key(), target.key);

        let response = match build_request(target, network, DelegateCommand::Add, context) {
            Ok(request) => context
                .delegate
                .invoke(&request)
                .await
                .and_then(DelegateResponse::require_result)
                .map_err(|err| ReconcilerError::AddDelegate(network.index_key(), err)),
            Err(err) => Err(err),
        };

        match response {
            Ok(response) => {
                results.push(AttachmentResult::new(network.to_owned(), Some(response)));
                context
                    .events
                    .record(target.pod, PodNetworkEvent::added_interface(target.key, network))
                    .await;
                info!(
                    "Added interface '{}' to pod '{}'",
                    network.index_key(),
                    target.key
                );
            }
            Err(err) => {
                error!("Couldn't add network '{}' to pod '{}'! {err}", network.index_key(), target.key);
                context
                    .events
                    .record(
                        target.pod,
                        PodNetworkEvent::failed_adding_interface(target.key, network),
                    )
                    .await;

                return (results, Some(err));
            }
        }
    }

    (results, None)
}

async fn remove_networks(
    target: &PodTarget<'_>,
    to_remove: &[NetworkSelectionElement],
    context: &ReconcilerContext,
) -> (Vec<NetworkSelectionElement>, Option<ReconcilerError>) {
    let mut removed = Vec::new();

    for network in to_remove {
        info!("Removing network '{}' from pod '{}'...", network.index_key(), target.key);

        let response = match build_request(target, network, DelegateCommand::Del, context) {
            Ok(request) => context
                .delegate
                .invoke(&request)
                .await
                .map_err(|err| ReconcilerError::RemoveDelegate(network.index_key(), err)),
            Err(err) => Err(err),
        };

        match response {
            Ok(_) => {
                removed.push(network.to_owned());
                context
                    .events
                    .record(target.pod, PodNetworkEvent::removed_interface(target.key, network))
                    .await;
                info!(
                    "Removed interface '{}' from pod '{}'",
                    network.index_key(),
                    target.key
                );
            }
            Err(err) => {
                error!(
                    "Couldn't remove network '{}' from pod '{}'! {err}",
                    network.index_key(),
                    target.key
                );
                context
                    .events
                    .record(
                        target.pod,
                        PodNetworkEvent::failed_removing_interface(target.key, network),
                    )
                    .await;

                return (removed, Some(err));
            }
        }
    }

    (removed, None)
}

fn build_request(
    target: &PodTarget<'_>,
    network: &NetworkSelectionElement,
    command: DelegateCommand,
    context: &ReconcilerContext,
) -> Result<DelegateRequest, ReconcilerError> {
    // status entries recorded without a namespace belong to the pod's namespace
    let netdef_namespace = match network.namespace.is_empty() {
        true => target.namespace,
        false => network.namespace.as_str(),
    };

    let netdef = context
        .netdefs
        .get(netdef_namespace, &network.name)
        .ok_or_else(|| {
            ReconcilerError::NetAttachDefNotFound(namespaced_name(netdef_namespace, &network.name))
        })?;

    let config = netdef
        .cni_config_with_defaults()
        .map_err(ReconcilerError::NetAttachDef)?;

    DelegateRequestBuilder::default()
        .command(command)
        .sandbox_id(target.sandbox_id.to_owned())
        .netns_path(target.netns.to_owned())
        .pod_namespace(target.namespace.to_owned())
        .pod_name(target.name.to_owned())
        .pod_uid(target.uid.to_owned())
        .config(config)
        .with_selection(network)
        .build()
        .map_err(ReconcilerError::DelegateRequest)
}

async fn persist_status(
    target: &PodTarget<'_>,
    observed: &[NetworkStatus],
    added: &[AttachmentResult],
    removed: &[NetworkSelectionElement],
    context: &ReconcilerContext,
) {
    let status = match serialize_status(&merge(observed, added, removed)) {
        Ok(status) => status,
        Err(err) => {
            error!("Couldn't compute pod '{}' network status! {err}", target.key);
            return;
        }
    };

    debug!("Updating pod '{}' network status to {status}", target.key);

    if let Err(err) = context
        .status_writer
        .write_network_status(target.namespace, target.name, &status)
        .await
    {
        error!("Couldn't update pod '{}' network status! {err:?}", target.key);
    }
}
