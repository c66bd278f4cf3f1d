/*!
 * Service Subscriber
 *
 * Push fabric for service changes. Two subscription modes co-exist:
 *
 * - **Batch**: one client, many service fingerprints, one shared channel.
 * - **Namespace**: one client receives every service change under
 *   `tenant:namespace:group`, with a distinct channel per subscriber.
 *
 * All sends are non-blocking under the shared lock; overflow drops.
 */

use std::collections::{HashMap, HashSet};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use gatehub_domain::event::ServiceChangeEvent;

use crate::fingerprint::{entry_fingerprint, namespace_fingerprint};

/// One batch subscriber: all service fingerprints share the same channel
struct BatchEntry {
    tx: mpsc::Sender<ServiceChangeEvent>,
    fingerprints: HashSet<String>,
}

/// Fan-out registry for long-lived service subscription streams
pub struct ServiceSubscriber {
    capacity: usize,
    batch: RwLock<HashMap<String, BatchEntry>>,
    /// `namespace fingerprint -> subscriber id -> channel`
    namespaces: RwLock<HashMap<String, HashMap<String, mpsc::Sender<ServiceChangeEvent>>>>,
}

impl ServiceSubscriber {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            batch: RwLock::new(HashMap::new()),
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe one client to a batch of services over one shared channel
    ///
    /// The receiver is handed out when the channel is created; repeat calls
    /// extend the fingerprint set and return `None`.
    pub async fn subscribe_multiple_services(
        &self,
        tenant_id: &str,
        namespace_id: &str,
        group_name: &str,
        service_names: &[String],
        subscriber_id: &str,
    ) -> Option<mpsc::Receiver<ServiceChangeEvent>> {
        let mut batch = self.batch.write().await;

        let (mut entry, receiver) = match batch.remove(subscriber_id) {
            Some(entry) => (entry, None),
            None => {
                let (tx, rx) = mpsc::channel(self.capacity);
                (
                    BatchEntry {
                        tx,
                        fingerprints: HashSet::new(),
                    },
                    Some(rx),
                )
            }
        };

        for name in service_names {
            entry
                .fingerprints
                .insert(entry_fingerprint(tenant_id, namespace_id, group_name, name));
        }

        debug!(
            subscriber = subscriber_id,
            services = service_names.len(),
            "batch subscription registered"
        );
        batch.insert(subscriber_id.to_string(), entry);
        receiver
    }

    /// Drop a batch subscriber; the shared channel closes exactly once
    pub async fn unsubscribe_multiple_services(&self, subscriber_id: &str) {
        if self.batch.write().await.remove(subscriber_id).is_some() {
            debug!(subscriber = subscriber_id, "batch subscription removed");
        }
    }

    /// Subscribe one client to every service under a namespace
    pub async fn subscribe_namespace(
        &self,
        tenant_id: &str,
        namespace_id: &str,
        group_name: &str,
        subscriber_id: &str,
    ) -> mpsc::Receiver<ServiceChangeEvent> {
        let fingerprint = namespace_fingerprint(tenant_id, namespace_id, group_name);
        let (tx, rx) = mpsc::channel(self.capacity);

        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(fingerprint.clone())
            .or_default()
            .insert(subscriber_id.to_string(), tx);

        debug!(
            subscriber = subscriber_id,
            namespace = %fingerprint,
            "namespace subscription registered"
        );
        rx
    }

    /// Drop a namespace subscriber; empty buckets are deleted
    pub async fn unsubscribe_namespace(
        &self,
        tenant_id: &str,
        namespace_id: &str,
        group_name: &str,
        subscriber_id: &str,
    ) {
        let fingerprint = namespace_fingerprint(tenant_id, namespace_id, group_name);
        let mut namespaces = self.namespaces.write().await;

        if let Some(bucket) = namespaces.get_mut(&fingerprint) {
            bucket.remove(subscriber_id);
            if bucket.is_empty() {
                namespaces.remove(&fingerprint);
            }
            debug!(
                subscriber = subscriber_id,
                namespace = %fingerprint,
                "namespace subscription removed"
            );
        }
    }

    pub async fn batch_count(&self) -> usize {
        self.batch.read().await.len()
    }

    pub async fn namespace_count(&self) -> usize {
        self.namespaces.read().await.len()
    }

    /// Enrich and fan an event out to matching batch and namespace channels
    ///
    /// An event reaches each subscriber at most once per notify call, and
    /// never reaches one whose fingerprints exclude it. A full channel means
    /// that subscriber misses this event; the publisher never blocks.
    pub async fn notify_service_change(
        &self,
        tenant_id: &str,
        namespace_id: &str,
        group_name: &str,
        service_name: &str,
        mut event: ServiceChangeEvent,
    ) {
        event.tenant_id = tenant_id.to_string();
        event.namespace_id = namespace_id.to_string();
        event.group_name = group_name.to_string();
        event.service_name = service_name.to_string();

        let service_fp = entry_fingerprint(tenant_id, namespace_id, group_name, service_name);
        {
            let batch = self.batch.read().await;
            for (subscriber_id, entry) in batch.iter() {
                if !entry.fingerprints.contains(&service_fp) {
                    continue;
                }
                if let Err(e) = entry.tx.try_send(event.clone()) {
                    warn!(
                        subscriber = %subscriber_id,
                        service = service_name,
                        error = %e,
                        "batch channel full, dropping service event"
                    );
                }
            }
        }

        let namespace_fp = namespace_fingerprint(tenant_id, namespace_id, group_name);
        {
            let namespaces = self.namespaces.read().await;
            if let Some(bucket) = namespaces.get(&namespace_fp) {
                for (subscriber_id, tx) in bucket.iter() {
                    if let Err(e) = tx.try_send(event.clone()) {
                        warn!(
                            subscriber = %subscriber_id,
                            namespace = %namespace_fp,
                            error = %e,
                            "namespace channel full, dropping service event"
                        );
                    }
                }
            }
        }
    }

    /// Direct non-blocking delivery to one batch subscriber (initial push)
    pub async fn send_to_subscriber(&self, subscriber_id: &str, event: ServiceChangeEvent) {
        let batch = self.batch.read().await;
        if let Some(entry) = batch.get(subscriber_id) {
            if let Err(e) = entry.tx.try_send(event) {
                warn!(subscriber = subscriber_id, error = %e, "channel full, dropping initial push");
            }
        }
    }
}
