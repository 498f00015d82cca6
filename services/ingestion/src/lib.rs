pub mod api;
pub mod transport;
#[cfg(feature = "async-transport")]
pub mod transport_axum;

use schema::PlacementRecord;
use serde_json::Value;
use store::{PlacementStore, ReplaceStats, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::InvalidJson(_) => true,
            Self::Store(err) => err.is_client_error(),
        }
    }
}

/// Decodes a raw upload body and replaces the whole registry with it.
pub fn ingest_payload(store: &PlacementStore, body: &[u8]) -> Result<ReplaceStats, IngestError> {
    let payload: Value = serde_json::from_slice(body)?;
    Ok(store.replace_all(payload)?)
}

/// Placements currently registered for `location`, in upload order.
pub fn query_location(store: &PlacementStore, location: &str) -> Vec<PlacementRecord> {
    store.lookup(location).to_vec()
}
