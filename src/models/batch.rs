use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::inventory::InventorySummary;
use crate::models::photo::{Photo, PhotoStatus};
use crate::services::classifier::ErrorCode;

/// Aggregate status of a batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Queued,
    Processing,
    Completed,
    Partial,
    Failed,
}

impl BatchStatus {
    /// True once every photo has settled one way or another.
    pub fn is_settled(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Partial | BatchStatus::Failed)
    }

    /// Statuses that expose an inventory summary in progress snapshots.
    pub fn has_inventory(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Partial)
    }
}

/// Per-status photo counters stored on the batch row.
///
/// `queued + processing + completed + failed` always equals the number of
/// photos in the batch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchCounts {
    pub queued: u32,
    pub processing: u32,
    pub completed: u32,
    pub failed: u32,
}

impl BatchCounts {
    pub fn tally<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = PhotoStatus>,
    {
        let mut counts = Self::default();
        for status in statuses {
            counts.add(status, 1);
        }
        counts
    }

    /// Count `n` more photos in `status`.
    pub fn add(&mut self, status: PhotoStatus, n: u32) {
        match status {
            PhotoStatus::Pending => self.queued += n,
            PhotoStatus::Processing => self.processing += n,
            PhotoStatus::Done => self.completed += n,
            PhotoStatus::Error => self.failed += n,
        }
    }

    pub fn total(&self) -> u32 {
        self.queued + self.processing + self.completed + self.failed
    }

    /// Nothing left waiting or running.
    pub fn is_drained(&self) -> bool {
        self.queued == 0 && self.processing == 0
    }

    /// Apply the batch decision table; first matching row wins.
    ///
    /// When no row matches (every photo still pending) the current status is kept.
    pub fn derive_status(&self, current: BatchStatus) -> BatchStatus {
        let total = self.total();
        let settled = self.completed + self.failed;

        if self.processing > 0 || (self.queued > 0 && settled > 0) {
            BatchStatus::Processing
        } else if self.completed == total {
            BatchStatus::Completed
        } else if self.failed == total {
            BatchStatus::Failed
        } else if self.completed > 0 && self.failed > 0 && self.is_drained() {
            BatchStatus::Partial
        } else {
            current
        }
    }

    /// `round(100 * settled / total)`, 0 for an empty batch.
    pub fn progress_percent(&self) -> u8 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        let settled = f64::from(self.completed + self.failed);
        (settled * 100.0 / f64::from(total)).round() as u8
    }
}

/// A batch row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub status: BatchStatus,
    pub counts: BatchCounts,
    pub inventory_queued: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of recomputing a batch's counters.
#[derive(Debug, Clone)]
pub struct BatchUpdate {
    pub batch: Batch,
    pub counts: BatchCounts,
    pub is_complete: bool,
}

/// Counters as exposed to progress consumers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressCounts {
    pub queued: u32,
    pub processing: u32,
    pub completed: u32,
    pub failed: u32,
    pub total: u32,
}

impl From<BatchCounts> for ProgressCounts {
    fn from(counts: BatchCounts) -> Self {
        Self {
            queued: counts.queued,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            total: counts.total(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoProgress {
    pub id: Uuid,
    pub filename: String,
    pub status: PhotoStatus,
    pub room_type: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
}

impl From<&Photo> for PhotoProgress {
    fn from(photo: &Photo) -> Self {
        Self {
            id: photo.id,
            filename: photo.filename.clone(),
            status: photo.status,
            room_type: photo.room_type.clone(),
            error_code: photo.error_code,
            error_message: photo.error_message.clone(),
        }
    }
}

/// Read-only progress snapshot; the contract consumed by export collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub batch_id: Uuid,
    pub project_id: Uuid,
    pub status: BatchStatus,
    pub progress: u8,
    pub counts: ProgressCounts,
    pub photos: Vec<PhotoProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory_summary: Option<InventorySummary>,
}
