//! Compute API
//!
//! Images and instances.

use super::client::{name_filter, YcClient};
use super::types::{
    CreateInstanceRequest, Image, Instance, ListInstancesResponse, Operation,
    UpdateInstanceMetadataRequest,
};
use crate::error::Result;
use std::collections::BTreeMap;

/// Latest image of `family` published in `folder_id`
pub async fn get_latest_image_by_family(client: &YcClient, folder_id: &str, family: &str) -> Result<Image> {
    let url = client.compute_url(
        "images:latestByFamily",
        &[("folderId", folder_id), ("family", family)],
    )?;
    client.get(url).await
}

/// List instances in a folder whose name matches exactly (auto-paginate)
pub async fn list_instances_by_name(client: &YcClient, folder_id: &str, name: &str) -> Result<Vec<Instance>> {
    let filter = name_filter(name);
    let mut all_items = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let mut query = vec![("folderId", folder_id), ("filter", filter.as_str())];
        if let Some(token) = page_token.as_deref() {
            query.push(("pageToken", token));
        }
        let url = client.compute_url("instances", &query)?;
        let page: ListInstancesResponse = client.get(url).await?;
        all_items.extend(page.instances);

        match page.next_page_token.filter(|t| !t.is_empty()) {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    Ok(all_items)
}

/// Full view of an instance, including metadata
pub async fn get_instance(client: &YcClient, instance_id: &str) -> Result<Instance> {
    let url = client.compute_url(
        &format!("instances/{}", urlencoding::encode(instance_id)),
        &[("view", "FULL")],
    )?;
    client.get(url).await
}

pub async fn create_instance(client: &YcClient, request: &CreateInstanceRequest) -> Result<Operation> {
    let url = client.compute_url("instances", &[])?;
    client.post(url, request).await
}

/// Add or overwrite the given metadata keys, leaving the rest untouched
pub async fn update_instance_metadata(
    client: &YcClient,
    instance_id: &str,
    upsert: BTreeMap<String, String>,
) -> Result<Operation> {
    let url = client.compute_url(
        &format!("instances/{}:updateMetadata", urlencoding::encode(instance_id)),
        &[],
    )?;
    client.post(url, &UpdateInstanceMetadataRequest { upsert }).await
}
