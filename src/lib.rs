//! Photo inventory service
//!
//! Users upload photos in batches; each photo is analyzed by a vision model
//! on a background worker, and settled batches are folded into a per-room
//! moving inventory. The API binary accepts uploads and serves progress;
//! the `worker` binary drains the `photo-analyze` and `inventory-sync` queues.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
