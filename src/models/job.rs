use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload of a `photo-analyze` job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhotoAnalyzeJob {
    pub photo_id: Uuid,
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    #[serde(default)]
    pub force: bool,
}

impl PhotoAnalyzeJob {
    /// Queue identity; re-submitting the same photo collapses onto one job.
    pub fn job_id(&self) -> String {
        format!("photo-{}", self.photo_id)
    }
}

/// Payload of an `inventory-sync` job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InventorySyncJob {
    pub project_id: Uuid,
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
}

impl InventorySyncJob {
    pub fn job_id(&self) -> String {
        match self.batch_id {
            Some(batch_id) => format!("inventory-{}-batch-{}", self.project_id, batch_id),
            None => format!("inventory-{}", self.project_id),
        }
    }
}

/// Value a photo job resolves with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PhotoJobOutcome {
    /// Photo was already DONE and the job did not force a re-run.
    Skipped { photo_id: Uuid },
    Analyzed {
        photo_id: Uuid,
        room_type: Option<String>,
        items_count: usize,
        volume_m3: f64,
    },
}
