use dynamic_networks_core::{helpers::pretty_type_name, resources::NetworkAttachmentDefinition};
use futures::{Future, StreamExt};
use kube::{
    runtime::{
        reflector::{self, reflector, Store},
        watcher::{watcher, Config, Event},
        WatchStreamExt,
    },
    Api, Client,
};
use log::{debug, info};
use tokio::sync::watch;

use super::pod::{log_watcher_error, watch_backoff};

/// Caches the network attachment definitions of every namespace.
pub fn start_netattachdef_reflector(
    client: &Client,
) -> (
    impl Future<Output = ()>,
    Store<NetworkAttachmentDefinition>,
    watch::Receiver<bool>,
) {
    let (synced_tx, synced_rx) = watch::channel(false);
    let api = Api::<NetworkAttachmentDefinition>::all(client.clone());
    let (store, writer) = reflector::store();

    let watcher = watcher(api, Config::default()).backoff(watch_backoff());

    let reflector = reflector(writer, watcher).for_each(move |event| {
        match event {
            Ok(Event::Restarted(netdefs)) => {
                if !*synced_tx.borrow() {
                    info!(
                        "{} cache synced with {} definition(s)",
                        pretty_type_name::<NetworkAttachmentDefinition>(),
                        netdefs.len()
                    );
                }
                synced_tx.send_replace(true);
            }
            Ok(Event::Applied(netdef)) => {
                debug!("Cached network attachment definition '{}'", netdef.namespaced_name());
            }
            Ok(Event::Deleted(netdef)) => {
                debug!("Dropped network attachment definition '{}'", netdef.namespaced_name());
            }
            Err(err) => log_watcher_error::<NetworkAttachmentDefinition>(&err),
        }

        futures::future::ready(())
    });

    (reflector, store, synced_rx)
}
