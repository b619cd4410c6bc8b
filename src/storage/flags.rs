//! Typed access to the tracking flags and worker id in the key-value store.

use super::KeyValueStore;
use crate::error::{Error, Result};
use crate::model::TrackingFlags;
use tracing::{info, warn};

/// Key holding the serialized [`TrackingFlags`] record.
pub const FLAGS_KEY: &str = "trackingFlags";
/// Key holding the worker's numeric id. Written by the login flow.
pub const WORKER_ID_KEY: &str = "unique";

const LEGACY_NULL_COORDINATES: &str = "nullCoordinates";
const LEGACY_PREVIOUS_ENABLED: &str = "previousEnabled";
const LEGACY_DOC_ID: &str = "firebaseDocId";
const LEGACY_TRACKING_ENABLED: &str = "trackingEnabled";

/// Reads and writes flags as one record.
pub struct FlagStore<K> {
    kv: K,
}

impl<K: KeyValueStore> FlagStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    /// Current flags. Store failures and unreadable records fall back to
    /// defaults, which can only cause a redundant write, never a lost one.
    pub async fn load(&self) -> TrackingFlags {
        match self.try_load().await {
            Ok(flags) => flags,
            Err(e) => {
                warn!("tracking flags unavailable, using defaults: {e}");
                TrackingFlags::default()
            }
        }
    }

    /// Current flags, surfacing store and decode failures.
    pub async fn try_load(&self) -> Result<TrackingFlags> {
        match self.kv.get(FLAGS_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => self.migrate_legacy().await,
        }
    }

    /// Fold the old one-key-per-flag layout into the single record.
    async fn migrate_legacy(&self) -> Result<TrackingFlags> {
        let null_coordinates = self.kv.get(LEGACY_NULL_COORDINATES).await?;
        let previous_enabled = self.kv.get(LEGACY_PREVIOUS_ENABLED).await?;
        let doc_id = self.kv.get(LEGACY_DOC_ID).await?;
        let tracking_enabled = self.kv.get(LEGACY_TRACKING_ENABLED).await?;

        if null_coordinates.is_none()
            && previous_enabled.is_none()
            && doc_id.is_none()
            && tracking_enabled.is_none()
        {
            return Ok(TrackingFlags::default());
        }

        let flags = TrackingFlags::from_legacy(
            null_coordinates.as_deref(),
            previous_enabled.as_deref(),
            doc_id.as_deref(),
            tracking_enabled.as_deref(),
        );
        self.save(&flags).await?;
        for key in [
            LEGACY_NULL_COORDINATES,
            LEGACY_PREVIOUS_ENABLED,
            LEGACY_DOC_ID,
            LEGACY_TRACKING_ENABLED,
        ] {
            if let Err(e) = self.kv.remove(key).await {
                warn!(key, "failed to remove legacy flag: {e}");
            }
        }
        info!(last_report = %flags.last_report, "migrated legacy tracking flags");
        Ok(flags)
    }

    pub async fn save(&self, flags: &TrackingFlags) -> Result<()> {
        let raw = serde_json::to_string(flags)?;
        self.kv.set(FLAGS_KEY, &raw).await
    }

    /// Drop the record. The next load sees an untouched device.
    pub async fn reset(&self) -> Result<()> {
        self.kv.remove(FLAGS_KEY).await
    }

    /// The logged-in worker's id, if present and numeric.
    pub async fn worker_id(&self) -> Result<i64> {
        let raw = self
            .kv
            .get(WORKER_ID_KEY)
            .await?
            .ok_or_else(|| Error::NotFound(format!("key-value entry {WORKER_ID_KEY:?}")))?;
        raw.trim()
            .parse()
            .map_err(|_| Error::KeyValue(format!("worker id is not numeric: {raw:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReportState;
    use crate::storage::MemoryKv;

    #[tokio::test]
    async fn save_then_load() {
        let store = FlagStore::new(MemoryKv::new());
        let flags = TrackingFlags::default().after_write(ReportState::SentPresent, "doc-9");
        store.save(&flags).await.unwrap();
        assert_eq!(store.load().await, flags);
    }

    #[tokio::test]
    async fn legacy_keys_are_migrated_once() {
        let kv = MemoryKv::new();
        kv.set("nullCoordinates", "true").await.unwrap();
        kv.set("firebaseDocId", "abc").await.unwrap();
        kv.set("trackingEnabled", "false").await.unwrap();

        let store = FlagStore::new(kv.clone());
        let flags = store.load().await;
        assert_eq!(flags.last_report, ReportState::SentAbsent);
        assert_eq!(flags.document_id.as_deref(), Some("abc"));

        let entries = kv.entries().await;
        assert!(entries.contains_key(FLAGS_KEY));
        assert!(!entries.contains_key("nullCoordinates"));
        assert!(!entries.contains_key("firebaseDocId"));
    }

    #[tokio::test]
    async fn unreadable_store_falls_back_to_defaults() {
        let kv = MemoryKv::new();
        kv.set(FLAGS_KEY, "{garbage").await.unwrap();
        let store = FlagStore::new(kv.clone());
        assert_eq!(store.load().await, TrackingFlags::default());

        kv.set_failing(true);
        assert_eq!(store.load().await, TrackingFlags::default());
    }

    #[tokio::test]
    async fn worker_id_must_be_numeric() {
        let kv = MemoryKv::new();
        let store = FlagStore::new(kv.clone());
        assert!(matches!(store.worker_id().await, Err(Error::NotFound(_))));

        kv.set(WORKER_ID_KEY, "w-12").await.unwrap();
        assert!(matches!(store.worker_id().await, Err(Error::KeyValue(_))));

        kv.set(WORKER_ID_KEY, " 12 ").await.unwrap();
        assert_eq!(store.worker_id().await.unwrap(), 12);
    }
}
