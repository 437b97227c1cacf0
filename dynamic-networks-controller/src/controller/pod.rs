use std::{collections::HashMap, time::Duration};

use backoff::ExponentialBackoff;
use dynamic_networks_core::{
    annotations::selection::network_selection_annotation,
    helpers::{namespaced_name, pretty_type_name, RequireMetadata},
};
use futures::{Future, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    runtime::{
        reflector::{self, reflector, Store},
        watcher::{self, watcher, Config, Event},
        WatchStreamExt,
    },
    Api, Client,
};
use log::{debug, info, warn};
use tokio::sync::watch;

use crate::queue::WorkQueue;

/// Remembers the networks annotation of every pod seen on this node so that only changes to it
/// trigger a reconciliation.
#[derive(Debug, Default)]
pub struct PodChangeTracker {
    known: HashMap<String, Option<String>>,
}

impl PodChangeTracker {
    /// Returns the pod's key when it was already known and its networks annotation changed.
    /// Pods seen for the first time are only recorded, the startup sweep covers them.
    pub fn observe(&mut self, pod: &Pod) -> Option<String> {
        let key = pod_key(pod)?;
        let networks = network_selection_annotation(pod).map(ToOwned::to_owned);

        match self.known.insert(key.to_owned(), networks.to_owned()) {
            Some(previous) if previous != networks => Some(key),
            _ => None,
        }
    }

    pub fn forget(&mut self, pod: &Pod) {
        if let Some(key) = pod_key(pod) {
            self.known.remove(&key);
        }
    }

    /// Replaces the known pods with a fresh listing, returning the keys whose networks changed.
    pub fn restart(&mut self, pods: &[Pod]) -> Vec<String> {
        let previous = std::mem::take(&mut self.known);

        pods.iter()
            .filter_map(|pod| {
                let key = pod_key(pod)?;
                let networks = network_selection_annotation(pod).map(ToOwned::to_owned);
                let changed = matches!(previous.get(&key), Some(known) if *known != networks);

                self.known.insert(key.to_owned(), networks);

                changed.then_some(key)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }
}

fn pod_key(pod: &Pod) -> Option<String> {
    let namespace = pod.require_namespace_or(()).ok()?;
    let name = pod.require_name_or(()).ok()?;

    Some(namespaced_name(namespace, name))
}

/// Retries failed watches with a growing pause, forever.
pub fn watch_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(800),
        max_interval: Duration::from_secs(30),
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}

pub fn pod_field_selector(node_name: &str) -> String {
    format!("spec.nodeName={node_name},status.phase=Running")
}

/// Watches the running pods scheduled to `node_name`, queueing the ones whose networks
/// annotation changed. `synced` flips to `true` after the first full listing.
pub fn start_pod_reflector(
    client: &Client,
    node_name: &str,
    queue: WorkQueue<String>,
) -> (impl Future<Output = ()>, Store<Pod>, watch::Receiver<bool>) {
    let (synced_tx, synced_rx) = watch::channel(false);
    let watcher_config = Config::default().fields(&pod_field_selector(node_name));
    let watcher = watcher(Api::<Pod>::all(client.clone()), watcher_config).backoff(watch_backoff());
    let (store, writer) = reflector::store();
    let mut tracker = PodChangeTracker::default();

    let reflector = reflector(writer, watcher).for_each(move |event| {
        let keys = match event {
            Ok(Event::Applied(pod)) => tracker.observe(&pod).into_iter().collect(),
            Ok(Event::Deleted(pod)) => {
                tracker.forget(&pod);
                Vec::new()
            }
            Ok(Event::Restarted(pods)) => {
                let keys = tracker.restart(&pods);

                if !*synced_tx.borrow() {
                    info!("{} cache synced with {} pod(s)", pretty_type_name::<Pod>(), tracker.len());
                }
                synced_tx.send_replace(true);

                keys
            }
            Err(err) => {
                log_watcher_error::<Pod>(&err);
                Vec::new()
            }
        };

        let queue = queue.clone();

        async move {
            for key in keys {
                debug!("Networks of pod '{key}' changed");
                queue.add(key).await;
            }
        }
    });

    (reflector, store, synced_rx)
}

pub fn log_watcher_error<T>(err: &watcher::Error) {
    warn!("{} watcher failed! {err}", pretty_type_name::<T>());
}
