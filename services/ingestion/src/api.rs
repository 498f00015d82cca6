use schema::PlacementRecord;
use serde::{Deserialize, Serialize};
use store::ReplaceStats;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadApiResponse {
    pub status: String,
    pub message: String,
    pub records: usize,
    pub locations: usize,
    pub generation: u64,
}

impl UploadApiResponse {
    pub fn from_stats(stats: &ReplaceStats) -> Self {
        Self {
            status: "success".to_string(),
            message: "ad placements uploaded".to_string(),
            records: stats.record_count,
            locations: stats.location_count,
            generation: stats.generation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationAdsResponse {
    pub location: String,
    pub ads: Vec<PlacementRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            code: None,
            index: None,
        }
    }
}
