use std::{future::Future, sync::Arc};

use dynamic_networks_core::helpers::{namespaced_name, RequireMetadata};
use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::queue::WorkQueue;

use self::reconciler::{
    context::ReconcilerContext, error::ReconcilerError, is_host_networked, reconcile_pod,
};

pub mod cache;
pub mod netattachdef;
pub mod pod;
pub mod reconciler;

#[cfg(test)]
mod fakes;

pub const CONTROLLER_FIELD_MANAGER: &str = "pod-networks-controller";

/// Drains the pod work queue, reconciling one pod at a time.
pub struct PodNetworksController {
    queue: WorkQueue<String>,
    context: Arc<ReconcilerContext>,
    max_retries: u32,
}

impl PodNetworksController {
    pub fn new(queue: WorkQueue<String>, context: Arc<ReconcilerContext>, max_retries: u32) -> Self {
        Self {
            queue,
            context,
            max_retries,
        }
    }

    /// Waits for the caches, queues every pod on the node once and works the queue until
    /// `shutdown` resolves. Whatever is already queued at that point still gets reconciled.
    pub async fn run(&self, caches_synced: impl Future<Output = bool>, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        info!("Waiting for informer caches to sync...");

        let synced = tokio::select! {
            synced = caches_synced => synced,
            _ = &mut shutdown => false,
        };

        if !synced {
            warn!("Stopped before the informer caches synced!");
            self.queue.shutdown().await;
            return;
        }

        self.reconcile_on_startup().await;

        info!("Pod networks controller started!");

        let worker = self.run_worker();
        tokio::pin!(worker);

        let stopping = tokio::select! {
            _ = &mut worker => false,
            _ = &mut shutdown => true,
        };

        if stopping {
            info!("Shutting down, draining {} queued pod(s)...", self.queue.len().await);
            self.queue.shutdown().await;
            worker.await;
        }

        info!("Pod networks controller stopped!");
    }

    async fn reconcile_on_startup(&self) {
        let pods = self.context.pods.list();
        let mut queued = 0;

        for pod in pods.iter().filter(|pod| !is_host_networked(pod)) {
            let key = match (
                pod.require_namespace_or(()),
                pod.require_name_or(()),
            ) {
                (Ok(namespace), Ok(name)) => namespaced_name(namespace, name),
                _ => continue,
            };

            self.queue.add(key).await;
            queued += 1;
        }

        info!("Queued {queued} pod(s) for the startup reconciliation");
    }

    async fn run_worker(&self) {
        while let Some(key) = self.queue.get().await {
            let result = reconcile_pod(&key, &self.context).await;

            self.handle_result(&key, result).await;
            self.queue.done(&key).await;
        }
    }

    async fn handle_result(&self, key: &String, result: Result<(), ReconcilerError>) {
        let err = match result {
            Ok(()) => {
                debug!("Reconciled pod '{key}'");
                self.queue.forget(key).await;
                return;
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            error!("Dropping pod '{key}' from the queue! {err}");
            self.queue.forget(key).await;
            return;
        }

        let requeues = self.queue.num_requeues(key).await;

        if requeues < self.max_retries {
            warn!(
                "Reconciling pod '{key}' failed, retrying ({}/{})! {err}",
                requeues + 1,
                self.max_retries
            );
            self.queue.add_rate_limited(key.to_owned()).await;
        } else {
            error!(
                "Dropping pod '{key}' from the queue after {} retries! {err}",
                self.max_retries
            );
            self.queue.forget(key).await;
        }
    }
}

/// Resolves to `true` once every receiver has seen its cache sync, `false` when a reflector
/// went away first.
pub async fn wait_until_synced(receivers: Vec<watch::Receiver<bool>>) -> bool {
    for mut receiver in receivers {
        while !*receiver.borrow_and_update() {
            if receiver.changed().await.is_err() {
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::{sync::watch, time::sleep};

    use crate::queue::WorkQueue;

    use super::{
        fakes::{default_status, host_networked, named_pod, HarnessBuilder},
        wait_until_synced, PodNetworksController,
    };

    #[tokio::test(start_paused = true)]
    async fn failing_pod_is_retried_max_retries_times() {
        let harness = HarnessBuilder::new()
            .pod(named_pod("tpod", Some("net1@eth10"), Some(default_status())))
            .netdefs(&["net1"])
            .runtime_unavailable()
            .build();
        let runtime = harness.runtime.clone();
        let controller =
            PodNetworksController::new(WorkQueue::default(), Arc::new(harness.context), 2);

        controller
            .run(async { true }, sleep(Duration::from_secs(10)))
            .await;

        assert_eq!(runtime.lookups(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn startup_sweep_skips_host_networked_pods() {
        let harness = HarnessBuilder::new()
            .pod(named_pod("tpod", Some("net1@eth10"), Some(default_status())))
            .pod(host_networked(named_pod("hostpod", Some("net1@eth10"), None)))
            .netdefs(&["net1"])
            .build();
        let delegate = harness.delegate.clone();
        let events = harness.events.clone();
        let controller =
            PodNetworksController::new(WorkQueue::default(), Arc::new(harness.context), 2);

        controller
            .run(async { true }, sleep(Duration::from_secs(1)))
            .await;

        assert_eq!(delegate.calls().len(), 1);
        assert_eq!(events.kinds().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_reconciled_before_caches_sync() {
        let harness = HarnessBuilder::new()
            .pod(named_pod("tpod", Some("net1@eth10"), Some(default_status())))
            .netdefs(&["net1"])
            .build();
        let delegate = harness.delegate.clone();
        let controller =
            PodNetworksController::new(WorkQueue::default(), Arc::new(harness.context), 2);

        controller
            .run(std::future::pending(), sleep(Duration::from_secs(1)))
            .await;

        assert!(delegate.calls().is_empty());
    }

    #[tokio::test]
    async fn waits_for_every_cache() {
        let (pods_tx, pods_rx) = watch::channel(false);
        let (netdefs_tx, netdefs_rx) = watch::channel(false);
        let waiter = tokio::spawn(wait_until_synced(vec![pods_rx, netdefs_rx]));

        pods_tx.send_replace(true);
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        netdefs_tx.send_replace(true);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn dropped_reflector_never_syncs() {
        let (tx, rx) = watch::channel(false);
        drop(tx);

        assert!(!wait_until_synced(vec![rx]).await);
    }
}
