//! Yandex Cloud REST models
//!
//! Only the fields this tool reads or sends are modelled. The REST gateway
//! encodes int64 values as JSON strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Metadata key carrying the rendered cloud-init config
pub const USER_DATA_KEY: &str = "user-data";
/// Metadata key carrying the rendered docker-compose file
pub const DOCKER_COMPOSE_KEY: &str = "docker-compose";
/// Metadata key written by the COI container declaration mechanism
pub const DOCKER_CONTAINER_DECLARATION_KEY: &str = "docker-container-declaration";
pub const ENABLE_OSLOGIN_KEY: &str = "enable-oslogin";

mod int64_string {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }
}

// =============================================================================
// Compute: images and instances
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub family: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Instance {
    pub id: String,
    pub folder_id: String,
    pub name: String,
    pub zone_id: String,
    pub status: String,
    pub metadata: BTreeMap<String, String>,
    pub boot_disk: Option<AttachedDisk>,
    pub network_interfaces: Vec<NetworkInterface>,
}

impl Instance {
    pub fn disk_id(&self) -> Option<&str> {
        self.boot_disk.as_ref().map(|d| d.disk_id.as_str())
    }

    /// One-to-one NAT address of the first network interface, if any
    pub fn public_ip(&self) -> Option<&str> {
        self.network_interfaces
            .first()
            .and_then(|nic| nic.primary_v4_address.as_ref())
            .and_then(|addr| addr.one_to_one_nat.as_ref())
            .map(|nat| nat.address.as_str())
            .filter(|addr| !addr.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachedDisk {
    pub disk_id: String,
    pub device_name: String,
    pub auto_delete: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkInterface {
    pub subnet_id: String,
    pub primary_v4_address: Option<PrimaryAddress>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PrimaryAddress {
    pub address: String,
    pub one_to_one_nat: Option<OneToOneNat>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct OneToOneNat {
    pub address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListInstancesResponse {
    pub instances: Vec<Instance>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesSpec {
    #[serde(with = "int64_string")]
    pub memory: u64,
    #[serde(with = "int64_string")]
    pub cores: u64,
    #[serde(with = "int64_string")]
    pub core_fraction: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    pub folder_id: String,
    pub name: String,
    pub description: String,
    pub labels: BTreeMap<String, String>,
    pub zone_id: String,
    pub platform_id: String,
    pub resources_spec: ResourcesSpec,
    pub metadata: BTreeMap<String, String>,
    pub boot_disk_spec: AttachedDiskSpec,
    pub network_interface_specs: Vec<NetworkInterfaceSpec>,
    pub service_account_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDiskSpec {
    pub mode: DiskMode,
    pub auto_delete: bool,
    pub disk_spec: DiskSpec,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiskMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiskSpec {
    pub type_id: String,
    #[serde(with = "int64_string")]
    pub size: u64,
    pub image_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceSpec {
    pub subnet_id: String,
    pub primary_v4_address_spec: PrimaryAddressSpec,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryAddressSpec {
    pub one_to_one_nat_spec: OneToOneNatSpec,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OneToOneNatSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub ip_version: IpVersion,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IpVersion {
    Ipv4,
    Ipv6,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInstanceMetadataRequest {
    pub upsert: BTreeMap<String, String>,
}

// =============================================================================
// IAM
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceAccount {
    pub id: String,
    pub folder_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListServiceAccountsResponse {
    pub service_accounts: Vec<ServiceAccount>,
    pub next_page_token: Option<String>,
}

// =============================================================================
// Operations
// =============================================================================

/// Handle of an asynchronous remote task
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Operation {
    pub id: String,
    pub description: String,
    pub done: bool,
    pub error: Option<OperationError>,
    /// Resulting resource, tagged with `@type`
    pub response: Option<Value>,
}

impl Operation {
    /// Decode the response payload into a concrete resource
    pub fn decode_response<T: serde::de::DeserializeOwned>(&self) -> Option<serde_json::Result<T>> {
        self.response
            .as_ref()
            .map(|value| serde_json::from_value(value.clone()))
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationError {
    pub code: i32,
    pub message: String,
    pub details: Vec<Value>,
}
