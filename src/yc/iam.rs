//! IAM API
//!
//! Service account lookup.

use super::client::{name_filter, YcClient};
use super::types::{ListServiceAccountsResponse, ServiceAccount};
use crate::error::Result;

/// List service accounts in a folder whose name matches exactly.
/// Names are unique within a folder, so the first page is enough.
pub async fn list_service_accounts_by_name(
    client: &YcClient,
    folder_id: &str,
    name: &str,
) -> Result<Vec<ServiceAccount>> {
    let filter = name_filter(name);
    let url = client.iam_url(
        "serviceAccounts",
        &[("folderId", folder_id), ("filter", filter.as_str())],
    )?;
    let response: ListServiceAccountsResponse = client.get(url).await?;
    Ok(response.service_accounts)
}
