//! Sample photos and analyses shared by the integration and E2E tests
#![allow(dead_code)]

use photo_inventory::models::photo::{Dimensions, Item, PhotoAnalysis};

/// Smallest byte string `image::guess_format` accepts as PNG.
pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

/// Smallest byte string `image::guess_format` accepts as JPEG.
pub const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];

/// One photo's expected analysis.
#[derive(Debug, Clone)]
pub struct PhotoFixture {
    pub filename: &'static str,
    pub room_type: &'static str,
    pub items: &'static [(&'static str, u32, f64)],
}

impl PhotoFixture {
    pub fn analysis(&self) -> PhotoAnalysis {
        PhotoAnalysis::from_items(
            self.items
                .iter()
                .map(|(name, quantity, volume)| Item {
                    quantity: *quantity,
                    volume_m3: Some(*volume),
                    ..Item::new(*name)
                })
                .collect(),
        )
    }

    pub fn total_volume(&self) -> f64 {
        self.items
            .iter()
            .map(|(_, quantity, volume)| f64::from(*quantity) * volume)
            .sum()
    }
}

pub const LIVING_ROOM: PhotoFixture = PhotoFixture {
    filename: "living_room.jpg",
    room_type: "living_room",
    items: &[("sofa", 1, 1.0), ("armchair", 1, 0.5)],
};

pub const BEDROOM: PhotoFixture = PhotoFixture {
    filename: "bedroom.jpg",
    room_type: "bedroom",
    items: &[("bed", 1, 2.0)],
};

pub const KITCHEN: PhotoFixture = PhotoFixture {
    filename: "kitchen.jpg",
    room_type: "kitchen",
    items: &[("table", 1, 0.8), ("chair", 4, 0.1)],
};

pub const FIXTURES: &[PhotoFixture] = &[LIVING_ROOM, BEDROOM, KITCHEN];

/// A sofa with measured dimensions, as a provider answer would carry it.
pub fn measured_sofa() -> Item {
    Item {
        category: Some("furniture".to_string()),
        dimensions_cm: Some(Dimensions {
            length: 200.0,
            width: 90.0,
            height: 85.0,
        }),
        volume_m3: Some(1.53),
        ..Item::new("sofa")
    }
}
