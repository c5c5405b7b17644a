use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::services::classifier::ErrorCode;

/// Processing state of a single photo.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PhotoStatus {
    Pending,
    Processing,
    Done,
    Error,
}

/// A photo row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Photo {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub project_id: Uuid,
    pub filename: String,
    pub file_path: Option<String>,
    pub url: Option<String>,
    pub room_type: Option<String>,
    pub checksum: String,
    pub status: PhotoStatus,
    pub analysis: Option<PhotoAnalysis>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Structured result of the vision analysis, stored only on DONE photos.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PhotoAnalysis {
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub totals: AnalysisTotals,
}

impl PhotoAnalysis {
    /// Build an analysis whose totals are summed from the items.
    pub fn from_items(items: Vec<Item>) -> Self {
        let volume_m3 = items
            .iter()
            .map(|item| item.volume_m3.unwrap_or(0.0) * f64::from(item.quantity))
            .sum();
        Self {
            items,
            totals: AnalysisTotals { volume_m3 },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisTotals {
    #[serde(default)]
    pub volume_m3: f64,
}

/// One detected object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub dimensions_cm: Option<Dimensions>,
    #[serde(default)]
    pub volume_m3: Option<f64>,
}

fn default_quantity() -> u32 {
    1
}

impl Item {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: None,
            quantity: 1,
            dimensions_cm: None,
            volume_m3: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Dimensions {
    pub length: f64,
    pub width: f64,
    pub height: f64,
}

/// A submitted asset, ready to become a PENDING photo.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Asset {
    #[garde(length(min = 1, max = 255))]
    pub filename: String,

    #[garde(skip)]
    pub file_path: Option<String>,

    #[garde(skip)]
    pub url: Option<String>,

    #[garde(length(min = 1, max = 64))]
    pub room_type: Option<String>,

    /// Hex SHA-256 of the file contents.
    #[garde(length(min = 64, max = 64))]
    pub checksum: String,
}

impl Asset {
    /// Asset for a file already written under the upload directory.
    pub fn from_upload(filename: impl Into<String>, file_path: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            filename: filename.into(),
            file_path: Some(file_path.into()),
            url: None,
            room_type: None,
            checksum: content_checksum(bytes),
        }
    }

    pub fn with_room_type(mut self, room_type: Option<String>) -> Self {
        self.room_type = room_type;
        self
    }
}

/// Content-derived checksum used to spot duplicate uploads.
pub fn content_checksum(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_text_round_trip() {
        assert_eq!(PhotoStatus::Processing.to_string(), "PROCESSING");
        assert_eq!(PhotoStatus::from_str("DONE").unwrap(), PhotoStatus::Done);
        assert!(PhotoStatus::from_str("done?").is_err());
    }

    #[test]
    fn test_totals_from_items() {
        let mut sofa = Item::new("sofa");
        sofa.volume_m3 = Some(1.2);
        let mut chair = Item::new("chair");
        chair.volume_m3 = Some(0.25);
        chair.quantity = 2;
        let lamp = Item::new("lamp");

        let analysis = PhotoAnalysis::from_items(vec![sofa, chair, lamp]);
        assert_eq!(analysis.items.len(), 3);
        assert!((analysis.totals.volume_m3 - 1.7).abs() < 1e-9);
    }

    #[test]
    fn test_analysis_tolerates_sparse_json() {
        let analysis: PhotoAnalysis =
            serde_json::from_str(r#"{"items":[{"name":"box"}],"totals":{"volume_m3":0.1}}"#).unwrap();
        assert_eq!(analysis.items[0].quantity, 1);
        assert_eq!(analysis.totals.volume_m3, 0.1);
    }

    #[test]
    fn test_checksum_is_stable() {
        let asset = Asset::from_upload("a.jpg", "p/a.jpg", b"hello");
        assert_eq!(
            asset.checksum,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(asset.validate().is_ok());
    }

    #[test]
    fn test_asset_validation_rejects_empty_filename() {
        let asset = Asset::from_upload("", "p/a.jpg", b"hello");
        assert!(asset.validate().is_err());
    }
}
