use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::photo::{Photo, PhotoStatus};

/// Room label used when a photo carries none.
pub const UNKNOWN_ROOM: &str = "unknown";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_type: String,
    pub items_count: usize,
    #[serde(rename = "volume_m3")]
    pub volume_m3: f64,
    pub photos_count: usize,
}

/// Room-level inventory folded from analyzed photos.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InventorySummary {
    pub rooms: Vec<RoomSummary>,
    pub total_items: usize,
    pub total_volume: f64,
    pub photos_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InventorySummary {
    /// Fold DONE photos with an analysis into per-room totals. Anything else is ignored.
    pub fn from_photos<'a, I>(photos: I) -> Self
    where
        I: IntoIterator<Item = &'a Photo>,
    {
        let mut rooms: BTreeMap<String, RoomSummary> = BTreeMap::new();
        let mut summary = Self::default();

        for photo in photos {
            if photo.status != PhotoStatus::Done {
                continue;
            }
            let Some(analysis) = &photo.analysis else {
                continue;
            };

            let room_type = photo
                .room_type
                .clone()
                .unwrap_or_else(|| UNKNOWN_ROOM.to_string());
            let room = rooms.entry(room_type.clone()).or_insert_with(|| RoomSummary {
                room_type,
                items_count: 0,
                volume_m3: 0.0,
                photos_count: 0,
            });

            room.items_count += analysis.items.len();
            room.volume_m3 += analysis.totals.volume_m3;
            room.photos_count += 1;

            summary.total_items += analysis.items.len();
            summary.total_volume += analysis.totals.volume_m3;
            summary.photos_count += 1;
        }

        summary.rooms = rooms.into_values().collect();
        if summary.photos_count == 0 {
            summary.message = Some("No analyzed photos yet; inventory is empty".to_string());
        }
        summary
    }

    pub fn is_empty(&self) -> bool {
        self.photos_count == 0
    }
}
