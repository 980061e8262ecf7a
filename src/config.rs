//! Configuration
//!
//! Inputs arrive as GitHub Actions `INPUT_*` variables (or the equivalent
//! flags) and are assembled once into [`Settings`]. Nothing below this module
//! reads the process environment.

use crate::error::{Error, Result};
use crate::size::parse_size;
use clap::Args;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_ZONE: &str = "ru-central1-a";
pub const DEFAULT_PLATFORM: &str = "standard-v3";
pub const DEFAULT_CORES: u64 = 2;
pub const DEFAULT_MEMORY: &str = "2GB";
pub const DEFAULT_CORE_FRACTION: u64 = 100;
pub const DEFAULT_DISK_TYPE: &str = "network-ssd";
pub const DEFAULT_DISK_SIZE: &str = "30GB";

/// String that never shows up in logs
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl FromStr for Secret {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// Raw action inputs. Empty values count as absent.
#[derive(Args, Debug, Clone, Default)]
pub struct Inputs {
    /// Authorized key JSON of the service account used to call the API
    #[arg(long = "yc-sa-json-credentials", env = "INPUT_YC-SA-JSON-CREDENTIALS", hide_env_values = true)]
    pub credentials: Option<Secret>,

    /// Folder to deploy into
    #[arg(long, env = "INPUT_FOLDER-ID")]
    pub folder_id: Option<String>,

    /// Cloud-init template, relative to the workspace
    #[arg(long, env = "INPUT_USER-DATA-PATH")]
    pub user_data_path: Option<String>,

    /// docker-compose template, relative to the workspace
    #[arg(long, env = "INPUT_DOCKER-COMPOSE-PATH")]
    pub docker_compose_path: Option<String>,

    /// VM name, used to find an existing instance
    #[arg(long, env = "INPUT_VM-NAME")]
    pub vm_name: Option<String>,

    /// Service account attached to the VM
    #[arg(long, env = "INPUT_VM-SERVICE-ACCOUNT-ID")]
    pub vm_service_account_id: Option<String>,

    /// Service account attached to the VM, looked up by name when no id is given
    #[arg(long, env = "INPUT_VM-SERVICE-ACCOUNT-NAME")]
    pub vm_service_account_name: Option<String>,

    /// Availability zone [default: ru-central1-a]
    #[arg(long, env = "INPUT_VM-ZONE-ID")]
    pub vm_zone_id: Option<String>,

    /// Subnet for the VM network interface
    #[arg(long, env = "INPUT_VM-SUBNET-ID")]
    pub vm_subnet_id: Option<String>,

    /// Reserved static address for the one-to-one NAT
    #[arg(long, env = "INPUT_VM-PUBLIC-IP")]
    pub vm_public_ip: Option<String>,

    /// Hardware platform [default: standard-v3]
    #[arg(long, env = "INPUT_VM-PLATFORM-ID")]
    pub vm_platform_id: Option<String>,

    /// Number of vCPUs [default: 2]
    #[arg(long, env = "INPUT_VM-CORES")]
    pub vm_cores: Option<String>,

    /// Memory size, e.g. 2GB [default: 2GB]
    #[arg(long, env = "INPUT_VM-MEMORY")]
    pub vm_memory: Option<String>,

    /// Boot disk type [default: network-ssd]
    #[arg(long, env = "INPUT_VM-DISK-TYPE")]
    pub vm_disk_type: Option<String>,

    /// Boot disk size, e.g. 30GB [default: 30GB]
    #[arg(long, env = "INPUT_VM-DISK-SIZE")]
    pub vm_disk_size: Option<String>,

    /// Guaranteed vCPU share in percent [default: 100]
    #[arg(long, env = "INPUT_VM-CORE-FRACTION")]
    pub vm_core_fraction: Option<String>,

    /// Value of the enable-oslogin metadata key [default: false]
    #[arg(long, env = "INPUT_METADATA-ENABLE-OSLOGIN")]
    pub metadata_enable_oslogin: Option<String>,
}

/// How the VM's service account is identified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceAccountRef {
    Id(String),
    /// Looked up in the target folder before any instance call
    Name(String),
}

impl ServiceAccountRef {
    /// Build from the optional id and name inputs. The id wins when both are set.
    pub fn from_inputs(id: Option<String>, name: Option<String>) -> Result<Self> {
        match (non_empty(id), non_empty(name)) {
            (Some(id), _) => Ok(Self::Id(id)),
            (None, Some(name)) => Ok(Self::Name(name)),
            (None, None) => Err(Error::Configuration(
                "Either id or name of service account should be provided".to_string(),
            )),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Id(id) => Some(id),
            Self::Name(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resources {
    pub cores: u64,
    pub memory_bytes: u64,
    pub core_fraction: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    pub type_id: String,
    pub size_bytes: u64,
}

/// Desired state of the VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSpec {
    pub folder_id: String,
    pub name: String,
    pub zone_id: String,
    pub platform_id: String,
    pub subnet_id: String,
    pub public_ip: Option<String>,
    pub resources: Resources,
    pub disk: Disk,
    pub service_account: ServiceAccountRef,
    pub user_data_path: PathBuf,
    pub docker_compose_path: PathBuf,
    /// Value of the `enable-oslogin` metadata key
    pub enable_oslogin: String,
    pub description: String,
    pub labels: BTreeMap<String, String>,
}

/// Everything a run needs, assembled once at startup
#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials: Secret,
    pub spec: VmSpec,
    /// Directory template paths are resolved against
    pub workspace: PathBuf,
    /// Variables available to templates as `env.*`
    pub template_env: BTreeMap<String, String>,
}

impl Settings {
    /// Validate inputs and apply defaults. `env` is a snapshot of the process
    /// environment, used for the workspace, the description and templates.
    pub fn from_inputs(inputs: Inputs, env: BTreeMap<String, String>) -> Result<Self> {
        let credentials = inputs
            .credentials
            .filter(|c| !c.expose().trim().is_empty())
            .ok_or_else(|| required("yc-sa-json-credentials"))?;
        let folder_id = require(inputs.folder_id, "folder-id")?;
        let user_data_path = require(inputs.user_data_path, "user-data-path")?;
        let docker_compose_path = require(inputs.docker_compose_path, "docker-compose-path")?;
        let name = require(inputs.vm_name, "vm-name")?;

        let service_account = ServiceAccountRef::from_inputs(
            inputs.vm_service_account_id,
            inputs.vm_service_account_name,
        )?;

        let subnet_id = require(inputs.vm_subnet_id, "vm-subnet-id")?;

        let resources = Resources {
            cores: parse_count(inputs.vm_cores, "vm-cores", DEFAULT_CORES)?,
            memory_bytes: parse_size(&or_default(inputs.vm_memory, DEFAULT_MEMORY))?,
            core_fraction: parse_count(inputs.vm_core_fraction, "vm-core-fraction", DEFAULT_CORE_FRACTION)?,
        };
        let disk = Disk {
            type_id: or_default(inputs.vm_disk_type, DEFAULT_DISK_TYPE),
            size_bytes: parse_size(&or_default(inputs.vm_disk_size, DEFAULT_DISK_SIZE))?,
        };

        let description = env
            .get("GITHUB_REPOSITORY")
            .filter(|repo| !repo.is_empty())
            .map(|repo| format!("Created from: {}", repo))
            .unwrap_or_default();
        let workspace = env.get("GITHUB_WORKSPACE").map(PathBuf::from).unwrap_or_default();

        let spec = VmSpec {
            folder_id,
            name,
            zone_id: or_default(inputs.vm_zone_id, DEFAULT_ZONE),
            platform_id: or_default(inputs.vm_platform_id, DEFAULT_PLATFORM),
            subnet_id,
            public_ip: non_empty(inputs.vm_public_ip),
            resources,
            disk,
            service_account,
            user_data_path: PathBuf::from(user_data_path),
            docker_compose_path: PathBuf::from(docker_compose_path),
            enable_oslogin: or_default(inputs.metadata_enable_oslogin, "false"),
            description,
            labels: BTreeMap::new(),
        };

        Ok(Self {
            credentials,
            spec,
            workspace,
            template_env: env,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn or_default(value: Option<String>, default: &str) -> String {
    non_empty(value).unwrap_or_else(|| default.to_string())
}

fn required(name: &str) -> Error {
    Error::Configuration(format!("Input required and not supplied: {}", name))
}

fn require(value: Option<String>, name: &str) -> Result<String> {
    non_empty(value).ok_or_else(|| required(name))
}

fn parse_count(value: Option<String>, name: &str, default: u64) -> Result<u64> {
    match non_empty(value) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Configuration(format!("{} must be a whole number, got '{}'", name, raw))),
    }
}
