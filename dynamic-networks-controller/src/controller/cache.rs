use std::sync::Arc;

use async_trait::async_trait;
use dynamic_networks_core::{resources::NetworkAttachmentDefinition, NETWORK_STATUS_ANNOTATION};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Patch, PatchParams},
    runtime::reflector::{ObjectRef, Store},
    Api, Client,
};
use serde_json::json;

use super::CONTROLLER_FIELD_MANAGER;

/// Read access to the node-local pod cache.
pub trait PodLookup: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<Pod>>;
    fn list(&self) -> Vec<Arc<Pod>>;
}

pub trait NetDefLookup: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<NetworkAttachmentDefinition>>;
}

impl PodLookup for Store<Pod> {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<Pod>> {
        Store::get(self, &ObjectRef::new(name).within(namespace))
    }

    fn list(&self) -> Vec<Arc<Pod>> {
        self.state()
    }
}

impl NetDefLookup for Store<NetworkAttachmentDefinition> {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<NetworkAttachmentDefinition>> {
        Store::get(self, &ObjectRef::new(name).within(namespace))
    }
}

#[async_trait]
pub trait PodStatusWriter: Send + Sync {
    async fn write_network_status(
        &self,
        namespace: &str,
        name: &str,
        status: &str,
    ) -> Result<(), kube::Error>;
}

pub struct KubePodStatusWriter {
    client: Client,
}

impl KubePodStatusWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodStatusWriter for KubePodStatusWriter {
    async fn write_network_status(
        &self,
        namespace: &str,
        name: &str,
        status: &str,
    ) -> Result<(), kube::Error> {
        let patch = json!({
            "metadata": {
                "annotations": {
                    NETWORK_STATUS_ANNOTATION: status
                }
            }
        });

        Api::<Pod>::namespaced(self.client.clone(), namespace)
            .patch_status(
                name,
                &PatchParams {
                    field_manager: Some(CONTROLLER_FIELD_MANAGER.to_owned()),
                    ..Default::default()
                },
                &Patch::Merge(patch),
            )
            .await?;

        Ok(())
    }
}
