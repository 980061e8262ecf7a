//! Yandex Cloud API interaction module
//!
//! Thin REST clients for the parts of Yandex Cloud this tool touches: service
//! account authentication, Compute images and instances, IAM service accounts
//! and long-running operations.
//!
//! # Module Structure
//!
//! - [`auth`] - Authorized key parsing and IAM token exchange
//! - [`client`] - Main client for making API requests
//! - [`http`] - HTTP utilities for REST API calls
//! - [`compute`] - Image and instance calls
//! - [`iam`] - Service account lookup
//! - [`operation`] - Polling long-running operations
//! - [`types`] - REST models
//!
//! # Example
//!
//! ```ignore
//! use crate::yc::{auth::ServiceAccountKey, client::{Endpoints, YcClient}};
//!
//! async fn example(document: &str) -> crate::error::Result<()> {
//!     let key = ServiceAccountKey::from_json(document)?;
//!     let client = YcClient::new(key, Endpoints::default())?;
//!     let vms = crate::yc::compute::list_instances_by_name(&client, "b1gfolder", "web").await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod compute;
pub mod http;
pub mod iam;
pub mod operation;
pub mod types;
