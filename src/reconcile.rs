//! Reconciliation
//!
//! Brings one VM in line with a [`VmSpec`]: resolve the service account, look
//! the VM up by name, then either create it or check it is compatible and
//! upsert its managed metadata. The pending operation is awaited and the
//! resulting instance reported through an [`OutputSink`].

use crate::action::OutputSink;
use crate::config::{ServiceAccountRef, VmSpec};
use crate::error::{Error, Result};
use crate::gateway::RemoteGateway;
use crate::render::Renderer;
use crate::yc::types::{
    AttachedDiskSpec, CreateInstanceRequest, DiskMode, DiskSpec, Instance, IpVersion,
    NetworkInterfaceSpec, OneToOneNatSpec, Operation, PrimaryAddressSpec, ResourcesSpec,
    DOCKER_COMPOSE_KEY, DOCKER_CONTAINER_DECLARATION_KEY, ENABLE_OSLOGIN_KEY, USER_DATA_KEY,
};
use std::collections::BTreeMap;
use std::fmt;

/// Folder publishing the public base images
pub const STANDARD_IMAGES_FOLDER: &str = "standard-images";
/// Family of the container-optimized image
pub const COI_IMAGE_FAMILY: &str = "container-optimized-image";

pub const OUTPUT_INSTANCE_ID: &str = "instance-id";
pub const OUTPUT_DISK_ID: &str = "disk-id";
pub const OUTPUT_PUBLIC_IP: &str = "public-ip";
pub const OUTPUT_CREATED: &str = "created";

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    ResolveServiceAccount,
    Lookup,
    Create,
    VerifyCompatible,
    Update,
    AwaitCompletion,
    ReportOutputs,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::ResolveServiceAccount => "resolve service account",
            Stage::Lookup => "find VM by name",
            Stage::Create => "create new VM",
            Stage::VerifyCompatible => "check metadata",
            Stage::Update => "update metadata",
            Stage::AwaitCompletion => "wait for operation",
            Stage::ReportOutputs => "report outputs",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What the run ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutputs {
    pub instance_id: String,
    pub disk_id: String,
    pub public_ip: Option<String>,
    /// The create branch was taken
    pub created: bool,
}

/// Create-or-update driver for a single VM
pub struct Reconciler<G> {
    gateway: G,
    renderer: Renderer,
    stage: Stage,
}

impl<G: RemoteGateway> Reconciler<G> {
    pub fn new(gateway: G, renderer: Renderer) -> Self {
        Self {
            gateway,
            renderer,
            stage: Stage::Start,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    fn enter(&mut self, stage: Stage) {
        tracing::info!("{}", stage);
        self.stage = stage;
    }

    /// Run one reconciliation. Outputs are written as they become known;
    /// on error no instance or disk id is written.
    pub async fn run<O: OutputSink + Send>(&mut self, mut spec: VmSpec, outputs: &mut O) -> Result<RunOutputs> {
        self.enter(Stage::Start);
        tracing::info!("Folder ID: {}, name: {}", spec.folder_id, spec.name);

        let result = self.reconcile(&mut spec, outputs).await;
        match &result {
            Ok(_) => self.enter(Stage::Done),
            Err(e) => {
                tracing::debug!("Run failed in stage '{}': {}", self.stage, e);
                self.stage = Stage::Failed;
            }
        }
        result
    }

    async fn reconcile<O: OutputSink + Send>(&mut self, spec: &mut VmSpec, outputs: &mut O) -> Result<RunOutputs> {
        self.enter(Stage::ResolveServiceAccount);
        let service_account_id = self.resolve_service_account(spec).await?;
        spec.service_account = ServiceAccountRef::Id(service_account_id);

        self.enter(Stage::Lookup);
        let existing = self.find_vm(&spec.folder_id, &spec.name).await?;

        let (op, created) = match existing {
            None => {
                self.enter(Stage::Create);
                (self.create_vm(spec, outputs).await?, true)
            }
            Some(instance_id) => {
                self.enter(Stage::VerifyCompatible);
                self.verify_compatible(&instance_id).await?;
                self.enter(Stage::Update);
                (self.update_metadata(&instance_id, spec, outputs).await?, false)
            }
        };

        self.enter(Stage::AwaitCompletion);
        let instance = self.await_completion(op, created).await?;

        self.enter(Stage::ReportOutputs);
        report_outputs(&instance, created, outputs)
    }

    /// Id of the VM's service account, looked up by name if needed
    async fn resolve_service_account(&self, spec: &VmSpec) -> Result<String> {
        let name = match &spec.service_account {
            ServiceAccountRef::Id(id) if !id.trim().is_empty() => return Ok(id.clone()),
            ServiceAccountRef::Name(name) if !name.trim().is_empty() => name,
            _ => {
                return Err(Error::Configuration(
                    "Either id or name of service account should be provided".to_string(),
                ))
            }
        };

        let accounts = self
            .gateway
            .list_service_accounts(&spec.folder_id, name)
            .await?;
        // First match wins when several accounts share the name
        let account = accounts.into_iter().next().ok_or_else(|| {
            Error::NotFound(format!(
                "There is no service account '{}' in folder {}",
                name, spec.folder_id
            ))
        })?;

        tracing::info!("Resolved service account '{}' to {}", name, account.id);
        Ok(account.id)
    }

    async fn find_vm(&self, folder_id: &str, name: &str) -> Result<Option<String>> {
        let instances = self.gateway.list_instances(folder_id, name).await?;
        if instances.len() > 1 {
            tracing::warn!("{} instances named '{}', using the first", instances.len(), name);
        }
        Ok(instances.into_iter().next().map(|i| i.id))
    }

    /// Managed metadata: the OS login flag and both rendered templates
    fn managed_metadata(&self, spec: &VmSpec) -> Result<BTreeMap<String, String>> {
        let mut metadata = BTreeMap::new();
        metadata.insert(ENABLE_OSLOGIN_KEY.to_string(), spec.enable_oslogin.clone());
        metadata.insert(
            USER_DATA_KEY.to_string(),
            self.renderer.render_file(&spec.user_data_path)?,
        );
        metadata.insert(
            DOCKER_COMPOSE_KEY.to_string(),
            self.renderer.render_file(&spec.docker_compose_path)?,
        );
        Ok(metadata)
    }

    async fn create_vm<O: OutputSink + Send>(&self, spec: &VmSpec, outputs: &mut O) -> Result<Operation> {
        let image_id = self
            .gateway
            .latest_image_by_family(STANDARD_IMAGES_FOLDER, COI_IMAGE_FAMILY)
            .await?;
        tracing::info!("COI image id: {}", image_id);

        outputs.set_output(OUTPUT_CREATED, "true")?;

        let request = build_create_request(spec, &image_id, self.managed_metadata(spec)?);
        self.gateway.create_instance(&request).await
    }

    /// Refuse to touch a VM whose containers come from a declaration key
    async fn verify_compatible(&self, instance_id: &str) -> Result<()> {
        let instance = self.gateway.get_instance(instance_id).await?;
        if instance.metadata.contains_key(DOCKER_CONTAINER_DECLARATION_KEY) {
            return Err(Error::Conflict(format!(
                "Provided VM was created with '{DOCKER_CONTAINER_DECLARATION_KEY}' metadata key.\n\
                 It will conflict with '{DOCKER_COMPOSE_KEY}' key this action using.\n\
                 Either recreate VM using docker-compose as container definition\n\
                 or let the action create the new one by dropping 'name' parameter."
            )));
        }
        Ok(())
    }

    async fn update_metadata<O: OutputSink + Send>(
        &self,
        instance_id: &str,
        spec: &VmSpec,
        outputs: &mut O,
    ) -> Result<Operation> {
        outputs.set_output(OUTPUT_CREATED, "false")?;
        let upsert = self.managed_metadata(spec)?;
        self.gateway
            .update_instance_metadata(instance_id, upsert)
            .await
    }

    async fn await_completion(&self, op: Operation, created: bool) -> Result<Instance> {
        let failure = if created {
            "Failed to create instance"
        } else {
            "Failed to update instance metadata"
        };

        let finished = self.gateway.wait_operation(op).await?;

        if let Some(error) = finished.error {
            tracing::error!("{}: code {}: {}", failure, error.code, error.message);
            return Err(Error::RemoteOperation {
                code: error.code,
                message: error.message,
                details: error.details,
            });
        }

        let instance: Instance = match finished.decode_response() {
            Some(decoded) => decoded?,
            None => {
                tracing::error!("{}: operation {} has no response", failure, finished.id);
                return Err(Error::RemoteOperation {
                    code: 0,
                    message: "operation finished without a response".to_string(),
                    details: Vec::new(),
                });
            }
        };

        if created {
            tracing::info!("Created instance with id '{}'", instance.id);
        } else {
            tracing::info!("Updated instance with id '{}'", instance.id);
        }
        Ok(instance)
    }
}

/// Assemble the create-instance request for the resolved image
pub fn build_create_request(
    spec: &VmSpec,
    image_id: &str,
    metadata: BTreeMap<String, String>,
) -> CreateInstanceRequest {
    CreateInstanceRequest {
        folder_id: spec.folder_id.clone(),
        name: spec.name.clone(),
        description: spec.description.clone(),
        labels: spec.labels.clone(),
        zone_id: spec.zone_id.clone(),
        platform_id: spec.platform_id.clone(),
        resources_spec: ResourcesSpec {
            memory: spec.resources.memory_bytes,
            cores: spec.resources.cores,
            core_fraction: spec.resources.core_fraction,
        },
        metadata,
        boot_disk_spec: AttachedDiskSpec {
            mode: DiskMode::ReadWrite,
            auto_delete: true,
            disk_spec: DiskSpec {
                type_id: spec.disk.type_id.clone(),
                size: spec.disk.size_bytes,
                image_id: image_id.to_string(),
            },
        },
        network_interface_specs: vec![NetworkInterfaceSpec {
            subnet_id: spec.subnet_id.clone(),
            primary_v4_address_spec: PrimaryAddressSpec {
                one_to_one_nat_spec: OneToOneNatSpec {
                    address: spec.public_ip.clone(),
                    ip_version: IpVersion::Ipv4,
                },
            },
        }],
        service_account_id: spec
            .service_account
            .id()
            .unwrap_or_default()
            .to_string(),
    }
}

/// Write instance id, disk id and public address. Missing ids are written empty.
fn report_outputs<O: OutputSink>(instance: &Instance, created: bool, outputs: &mut O) -> Result<RunOutputs> {
    let run = RunOutputs {
        instance_id: instance.id.clone(),
        disk_id: instance.disk_id().unwrap_or_default().to_string(),
        public_ip: instance.public_ip().map(str::to_string),
        created,
    };

    outputs.set_output(OUTPUT_INSTANCE_ID, &run.instance_id)?;
    outputs.set_output(OUTPUT_DISK_ID, &run.disk_id)?;
    if let Some(ip) = &run.public_ip {
        outputs.set_output(OUTPUT_PUBLIC_IP, ip)?;
    }
    Ok(run)
}
