//! Create or update a container-optimized VM in Yandex Cloud.
//!
//! A run looks the VM up by name in a folder. When it is missing, a new
//! instance is created from the latest container-optimized image with the
//! rendered cloud-init and docker-compose files in its metadata. When it
//! exists, those metadata keys are upserted in place.

pub mod action;
pub mod config;
pub mod error;
pub mod gateway;
pub mod reconcile;
pub mod render;
pub mod size;
pub mod yc;

pub use error::{Error, Result};
