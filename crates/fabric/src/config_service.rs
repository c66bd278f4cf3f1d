/*!
 * Config Service
 *
 * The write path for configuration documents: upserts and deletes land in
 * the entry map and immediately fan out through the config watcher. Also
 * builds the initial snapshot pushed to a watcher right after its
 * subscription opens, so clients start from current state instead of
 * waiting for the next change.
 */

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use gatehub_common::{Error, Result};
use gatehub_domain::config_entry::ConfigEntry;
use gatehub_domain::event::{ConfigChangeEvent, ConfigEventType, format_event_timestamp};

use crate::fingerprint::entry_fingerprint;
use crate::watcher::ConfigWatcher;

pub struct ConfigService {
    watcher: Arc<ConfigWatcher>,
    entries: RwLock<HashMap<String, ConfigEntry>>,
}

impl ConfigService {
    pub fn new(watcher: Arc<ConfigWatcher>) -> Self {
        Self {
            watcher,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create or update a config document and notify watchers
    pub async fn publish_config(
        &self,
        tenant_id: &str,
        namespace_id: &str,
        group_name: &str,
        data_id: &str,
        content: &str,
    ) -> Result<ConfigEntry> {
        if data_id.is_empty() {
            return Err(Error::Validation("data id is required".to_string()));
        }

        let fingerprint = entry_fingerprint(tenant_id, namespace_id, group_name, data_id);
        let entry = {
            let mut entries = self.entries.write().await;
            match entries.get_mut(&fingerprint) {
                Some(existing) => {
                    existing.update_content(content);
                    existing.clone()
                }
                None => {
                    let entry =
                        ConfigEntry::new(tenant_id, namespace_id, group_name, data_id, content);
                    entries.insert(fingerprint.clone(), entry.clone());
                    entry
                }
            }
        };

        info!(
            data_id,
            version = entry.version,
            md5 = %entry.content_md5,
            "config published"
        );
        self.watcher.notify_config_update(&entry).await;
        Ok(entry)
    }

    /// Delete a config document and notify watchers
    pub async fn delete_config(
        &self,
        tenant_id: &str,
        namespace_id: &str,
        group_name: &str,
        data_id: &str,
    ) -> Result<()> {
        let fingerprint = entry_fingerprint(tenant_id, namespace_id, group_name, data_id);
        let removed = self.entries.write().await.remove(&fingerprint);
        if removed.is_none() {
            return Err(Error::NotFound(format!("config {fingerprint}")));
        }

        info!(data_id, "config deleted");
        self.watcher
            .notify_config_delete(tenant_id, namespace_id, group_name, data_id)
            .await;
        Ok(())
    }

    pub async fn get_config(
        &self,
        tenant_id: &str,
        namespace_id: &str,
        group_name: &str,
        data_id: &str,
    ) -> Result<ConfigEntry> {
        let fingerprint = entry_fingerprint(tenant_id, namespace_id, group_name, data_id);
        self.entries
            .read()
            .await
            .get(&fingerprint)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("config {fingerprint}")))
    }

    /// Push the current state of the requested ids to one watcher
    ///
    /// Called right after a subscription opens; absent ids are skipped (the
    /// client learns about them when they first appear).
    pub async fn send_snapshot(
        &self,
        watcher_id: &str,
        tenant_id: &str,
        namespace_id: &str,
        group_name: &str,
        data_ids: &[String],
    ) -> usize {
        let entries = self.entries.read().await;
        let mut sent = 0;

        for data_id in data_ids {
            let fingerprint = entry_fingerprint(tenant_id, namespace_id, group_name, data_id);
            let Some(entry) = entries.get(&fingerprint) else {
                continue;
            };

            let event = ConfigChangeEvent {
                event_type: ConfigEventType::ConfigUpdated,
                timestamp: format_event_timestamp(Utc::now()),
                tenant_id: entry.tenant_id.clone(),
                namespace_id: entry.namespace_id.clone(),
                group_name: entry.group_name.clone(),
                data_id: entry.data_id.clone(),
                producer: String::new(),
                message: "initial snapshot".to_string(),
                content: Some(entry.content.clone()),
                content_md5: Some(entry.content_md5.clone()),
            };
            self.watcher.send_to_watcher(watcher_id, event).await;
            sent += 1;
        }

        debug!(watcher = watcher_id, sent, "initial config snapshot pushed");
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (ConfigService, Arc<ConfigWatcher>) {
        let watcher = Arc::new(ConfigWatcher::new(100));
        (ConfigService::new(watcher.clone()), watcher)
    }

    #[tokio::test]
    async fn test_publish_notifies_watchers() {
        let (service, watcher) = service();
        let mut rx = watcher
            .watch("t1", "n", "g", &["db.yaml".to_string()], "w1")
            .await
            .unwrap();

        let entry = service
            .publish_config("t1", "n", "g", "db.yaml", "pool: 10")
            .await
            .unwrap();
        assert_eq!(entry.version, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, ConfigEventType::ConfigUpdated);
        assert_eq!(event.content.as_deref(), Some("pool: 10"));
        assert_eq!(event.content_md5.as_deref(), Some(entry.content_md5.as_str()));
    }

    #[tokio::test]
    async fn test_republish_bumps_version() {
        let (service, _watcher) = service();

        service
            .publish_config("t1", "n", "g", "db.yaml", "pool: 10")
            .await
            .unwrap();
        let second = service
            .publish_config("t1", "n", "g", "db.yaml", "pool: 20")
            .await
            .unwrap();

        assert_eq!(second.version, 2);
        assert_eq!(
            service
                .get_config("t1", "n", "g", "db.yaml")
                .await
                .unwrap()
                .content,
            "pool: 20"
        );
    }

    #[tokio::test]
    async fn test_delete_notifies_and_is_typed() {
        let (service, watcher) = service();
        let mut rx = watcher
            .watch("t1", "n", "g", &["db.yaml".to_string()], "w1")
            .await
            .unwrap();

        service
            .publish_config("t1", "n", "g", "db.yaml", "x")
            .await
            .unwrap();
        service.delete_config("t1", "n", "g", "db.yaml").await.unwrap();

        assert_eq!(rx.recv().await.unwrap().event_type, ConfigEventType::ConfigUpdated);
        assert_eq!(rx.recv().await.unwrap().event_type, ConfigEventType::ConfigDeleted);

        assert!(
            service
                .delete_config("t1", "n", "g", "db.yaml")
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(
            service
                .get_config("t1", "n", "g", "db.yaml")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_snapshot_covers_known_ids_only() {
        let (service, watcher) = service();
        service
            .publish_config("t1", "n", "g", "a.yaml", "1")
            .await
            .unwrap();
        service
            .publish_config("t1", "n", "g", "b.yaml", "2")
            .await
            .unwrap();

        let mut rx = watcher
            .watch(
                "t1",
                "n",
                "g",
                &["a.yaml".to_string(), "ghost.yaml".to_string()],
                "w1",
            )
            .await
            .unwrap();

        let sent = service
            .send_snapshot(
                "w1",
                "t1",
                "n",
                "g",
                &["a.yaml".to_string(), "ghost.yaml".to_string()],
            )
            .await;
        assert_eq!(sent, 1, "only existing configs are snapshotted");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.data_id, "a.yaml");
        assert_eq!(event.message, "initial snapshot");
        assert!(rx.try_recv().is_err());
    }
}
