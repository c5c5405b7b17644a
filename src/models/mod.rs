pub mod api;
pub mod batch;
pub mod inventory;
pub mod job;
pub mod photo;
pub mod project;
