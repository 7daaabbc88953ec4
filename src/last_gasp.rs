//! Record and expire emergency "last known location" markers, independent of
//! normal heartbeats.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{CellInfo, LastGasp};
use crate::ports::Store;

pub struct LastGaspTracker {
    store: Arc<dyn Store>,
}

impl LastGaspTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a LastGasp marker. Multiple may coexist for a user; creation
    /// does not overwrite or invalidate earlier rows — "last write wins" is
    /// resolved purely by `GetActive` picking the newest non-expired one.
    pub async fn record(
        &self,
        user_id: Uuid,
        lat: f64,
        lng: f64,
        accuracy_m: f64,
        cell_info: CellInfo,
        now: DateTime<Utc>,
        timeout: chrono::Duration,
    ) -> Result<LastGasp, StoreError> {
        let last_gasp = LastGasp {
            id: Uuid::new_v4(),
            user_id,
            lat,
            lng,
            accuracy_m,
            cell_info,
            created_at: now,
            expiry_ts: now + timeout,
        };
        self.store.insert_last_gasp(last_gasp.clone()).await?;
        Ok(last_gasp)
    }

    /// Newest row with `expiry_ts > now`. Expired rows are filtered out of
    /// the query, not swept from storage.
    pub async fn get_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<LastGasp>, StoreError> {
        self.store.active_last_gasp(user_id, now).await
    }
}
