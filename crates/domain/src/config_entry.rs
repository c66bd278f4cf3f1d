use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// One configuration document scoped by tenant, namespace, group and data id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub tenant_id: String,
    pub namespace_id: String,
    pub group_name: String,
    pub data_id: String,
    pub content: String,
    /// Digest of `content`; recomputed whenever content changes
    pub content_md5: String,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl ConfigEntry {
    pub fn new(
        tenant_id: &str,
        namespace_id: &str,
        group_name: &str,
        data_id: &str,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let content_md5 = content_digest(&content);
        Self {
            tenant_id: tenant_id.to_string(),
            namespace_id: namespace_id.to_string(),
            group_name: group_name.to_string(),
            data_id: data_id.to_string(),
            content,
            content_md5,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    /// Replace the content, bumping version and digest
    pub fn update_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.content_md5 = content_digest(&self.content);
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

/// Hex MD5 of configuration content, as carried in `contentMd5` frames
pub fn content_digest(content: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_digest_is_hex_md5() {
        // Well-known MD5 test vector
        assert_eq!(content_digest(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(content_digest("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_update_content_bumps_version_and_digest() {
        let mut entry = ConfigEntry::new("t1", "default", "DEFAULT_GROUP", "db.yaml", "a: 1");
        let first_md5 = entry.content_md5.clone();
        assert_eq!(entry.version, 1);

        entry.update_content("a: 2");
        assert_eq!(entry.version, 2);
        assert_ne!(entry.content_md5, first_md5);
        assert_eq!(entry.content_md5, content_digest("a: 2"));
    }
}
