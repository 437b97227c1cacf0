use std::sync::Arc;

use dynamic_networks_core::{cri::ContainerRuntime, delegate::DelegateClient};

use crate::{
    controller::cache::{NetDefLookup, PodLookup, PodStatusWriter},
    events::EventRecorder,
};

pub struct ReconcilerContext {
    pub pods: Arc<dyn PodLookup>,
    pub netdefs: Arc<dyn NetDefLookup>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub delegate: Arc<dyn DelegateClient>,
    pub events: Arc<dyn EventRecorder>,
    pub status_writer: Arc<dyn PodStatusWriter>,
}
