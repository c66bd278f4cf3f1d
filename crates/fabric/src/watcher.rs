/*!
 * Config Watcher
 *
 * Push fabric for configuration: a client registers one or more config
 * fingerprints and receives change events over a single shared channel.
 *
 * Delivery is non-blocking by design: a full channel drops the event rather
 * than stalling the publisher. Receivers must tolerate gaps after drops and
 * reconcile by refetching the config by id.
 */

use std::collections::{HashMap, HashSet};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use gatehub_domain::config_entry::ConfigEntry;
use gatehub_domain::event::{ConfigChangeEvent, ConfigEventType, format_event_timestamp};

/// One registered watcher: all of its fingerprints share the same channel
struct WatcherEntry {
    tx: mpsc::Sender<ConfigChangeEvent>,
    fingerprints: HashSet<String>,
}

/// Fingerprint-keyed subscription index with per-watcher fan-in channels
pub struct ConfigWatcher {
    capacity: usize,
    watchers: RwLock<HashMap<String, WatcherEntry>>,
}

impl ConfigWatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            watchers: RwLock::new(HashMap::new()),
        }
    }

    /// Register interest in a set of data ids
    ///
    /// The watcher's channel is created lazily at first `watch`; the receiver
    /// is handed out on that first call (`Some`). Subsequent calls extend the
    /// fingerprint set over the same channel and return `None`.
    pub async fn watch(
        &self,
        tenant_id: &str,
        namespace_id: &str,
        group_name: &str,
        data_ids: &[String],
        watcher_id: &str,
    ) -> Option<mpsc::Receiver<ConfigChangeEvent>> {
        let mut watchers = self.watchers.write().await;

        let (entry, receiver) = match watchers.remove(watcher_id) {
            Some(entry) => (entry, None),
            None => {
                let (tx, rx) = mpsc::channel(self.capacity);
                (
                    WatcherEntry {
                        tx,
                        fingerprints: HashSet::new(),
                    },
                    Some(rx),
                )
            }
        };

        let mut entry = entry;
        for data_id in data_ids {
            entry.fingerprints.insert(crate::fingerprint::entry_fingerprint(
                tenant_id,
                namespace_id,
                group_name,
                data_id,
            ));
        }

        debug!(
            watcher = watcher_id,
            fingerprints = entry.fingerprints.len(),
            "config watch registered"
        );
        watchers.insert(watcher_id.to_string(), entry);
        receiver
    }

    /// Drop a watcher; its channel closes exactly once. Idempotent.
    pub async fn unwatch(&self, watcher_id: &str) {
        if self.watchers.write().await.remove(watcher_id).is_some() {
            // Dropping the last sender closes the channel for the receiver
            debug!(watcher = watcher_id, "config watch removed");
        }
    }

    pub async fn watcher_count(&self) -> usize {
        self.watchers.read().await.len()
    }

    /// Fan a change event out to every watcher of its fingerprint
    ///
    /// Sends happen under the shared lock and never block: a full buffer
    /// drops the event for that watcher.
    pub async fn notify_config_change(
        &self,
        tenant_id: &str,
        namespace_id: &str,
        group_name: &str,
        data_id: &str,
        event: ConfigChangeEvent,
    ) {
        let fingerprint =
            crate::fingerprint::entry_fingerprint(tenant_id, namespace_id, group_name, data_id);
        let watchers = self.watchers.read().await;

        for (watcher_id, entry) in watchers.iter() {
            if !entry.fingerprints.contains(&fingerprint) {
                continue;
            }
            if let Err(e) = entry.tx.try_send(event.clone()) {
                warn!(
                    watcher = %watcher_id,
                    fingerprint = %fingerprint,
                    error = %e,
                    "watcher channel full, dropping config event"
                );
            }
        }
    }

    /// Convenience wrapper publishing a CONFIG_UPDATED event for an entry
    pub async fn notify_config_update(&self, config: &ConfigEntry) {
        let event = ConfigChangeEvent {
            event_type: ConfigEventType::ConfigUpdated,
            timestamp: format_event_timestamp(chrono::Utc::now()),
            tenant_id: config.tenant_id.clone(),
            namespace_id: config.namespace_id.clone(),
            group_name: config.group_name.clone(),
            data_id: config.data_id.clone(),
            producer: String::new(),
            message: "config updated".to_string(),
            content: Some(config.content.clone()),
            content_md5: Some(config.content_md5.clone()),
        };
        self.notify_config_change(
            &config.tenant_id,
            &config.namespace_id,
            &config.group_name,
            &config.data_id,
            event,
        )
        .await;
    }

    /// Convenience wrapper publishing a CONFIG_DELETED event
    pub async fn notify_config_delete(
        &self,
        tenant_id: &str,
        namespace_id: &str,
        group_name: &str,
        data_id: &str,
    ) {
        let event = ConfigChangeEvent {
            event_type: ConfigEventType::ConfigDeleted,
            timestamp: format_event_timestamp(chrono::Utc::now()),
            tenant_id: tenant_id.to_string(),
            namespace_id: namespace_id.to_string(),
            group_name: group_name.to_string(),
            data_id: data_id.to_string(),
            producer: String::new(),
            message: "config deleted".to_string(),
            content: None,
            content_md5: None,
        };
        self.notify_config_change(tenant_id, namespace_id, group_name, data_id, event)
            .await;
    }

    /// Direct non-blocking delivery to one watcher (initial snapshots)
    pub async fn send_to_watcher(&self, watcher_id: &str, event: ConfigChangeEvent) {
        let watchers = self.watchers.read().await;
        if let Some(entry) = watchers.get(watcher_id) {
            if let Err(e) = entry.tx.try_send(event) {
                warn!(watcher = watcher_id, error = %e, "watcher channel full, dropping snapshot event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(data_id: &str, content: &str) -> ConfigEntry {
        ConfigEntry::new("t1", "default", "DEFAULT_GROUP", data_id, content)
    }

    #[tokio::test]
    async fn test_watch_shares_one_channel_across_fingerprints() {
        let watcher = ConfigWatcher::new(100);

        let mut rx = watcher
            .watch(
                "t1",
                "default",
                "DEFAULT_GROUP",
                &["a.yaml".to_string(), "b.yaml".to_string()],
                "w1",
            )
            .await
            .expect("first watch returns the receiver");

        // Extending the subscription reuses the same channel
        assert!(
            watcher
                .watch("t1", "default", "DEFAULT_GROUP", &["c.yaml".to_string()], "w1")
                .await
                .is_none()
        );

        watcher.notify_config_update(&entry("a.yaml", "1")).await;
        watcher.notify_config_update(&entry("c.yaml", "2")).await;

        assert_eq!(rx.recv().await.unwrap().data_id, "a.yaml");
        assert_eq!(rx.recv().await.unwrap().data_id, "c.yaml");
    }

    #[tokio::test]
    async fn test_notify_skips_unrelated_watchers() {
        let watcher = ConfigWatcher::new(100);

        let mut rx1 = watcher
            .watch("t1", "default", "g", &["a.yaml".to_string()], "w1")
            .await
            .unwrap();
        let mut rx2 = watcher
            .watch("t1", "default", "g", &["b.yaml".to_string()], "w2")
            .await
            .unwrap();

        watcher
            .notify_config_update(&ConfigEntry::new("t1", "default", "g", "a.yaml", "x"))
            .await;

        assert_eq!(rx1.recv().await.unwrap().data_id, "a.yaml");
        assert!(rx2.try_recv().is_err(), "w2 must not see a.yaml events");
    }

    #[tokio::test]
    async fn test_overflow_drops_without_blocking() {
        let watcher = ConfigWatcher::new(2);
        let mut rx = watcher
            .watch("t1", "n", "g", &["a".to_string()], "w1")
            .await
            .unwrap();

        let config = ConfigEntry::new("t1", "n", "g", "a", "v");
        for _ in 0..5 {
            // Must return immediately even with a full buffer
            watcher.notify_config_update(&config).await;
        }

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2, "buffer capacity bounds delivery");
    }

    #[tokio::test]
    async fn test_unwatch_closes_channel_once() {
        let watcher = ConfigWatcher::new(100);
        let mut rx = watcher
            .watch("t1", "n", "g", &["a".to_string()], "w1")
            .await
            .unwrap();

        watcher.unwatch("w1").await;
        assert!(rx.recv().await.is_none(), "channel closed after unwatch");

        // Idempotent; further notifies are no-ops, not panics
        watcher.unwatch("w1").await;
        watcher
            .notify_config_update(&ConfigEntry::new("t1", "n", "g", "a", "v"))
            .await;
        assert_eq!(watcher.watcher_count().await, 0);
    }

    #[tokio::test]
    async fn test_delete_event_has_no_content() {
        let watcher = ConfigWatcher::new(100);
        let mut rx = watcher
            .watch("t1", "n", "g", &["a".to_string()], "w1")
            .await
            .unwrap();

        watcher.notify_config_delete("t1", "n", "g", "a").await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, ConfigEventType::ConfigDeleted);
        assert!(event.content.is_none());
        assert!(event.content_md5.is_none());
    }

    #[tokio::test]
    async fn test_send_to_watcher_targets_one_channel() {
        let watcher = ConfigWatcher::new(100);
        let mut rx1 = watcher
            .watch("t1", "n", "g", &["a".to_string()], "w1")
            .await
            .unwrap();
        let mut rx2 = watcher
            .watch("t1", "n", "g", &["a".to_string()], "w2")
            .await
            .unwrap();

        let snapshot = ConfigChangeEvent {
            event_type: ConfigEventType::ConfigUpdated,
            timestamp: format_event_timestamp(chrono::Utc::now()),
            tenant_id: "t1".to_string(),
            namespace_id: "n".to_string(),
            group_name: "g".to_string(),
            data_id: "a".to_string(),
            producer: String::new(),
            message: "initial snapshot".to_string(),
            content: Some("v".to_string()),
            content_md5: None,
        };
        watcher.send_to_watcher("w1", snapshot).await;

        assert_eq!(rx1.recv().await.unwrap().message, "initial snapshot");
        assert!(rx2.try_recv().is_err());
    }
}
