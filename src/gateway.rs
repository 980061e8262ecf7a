//! Remote gateway
//!
//! The calls the reconciler needs from the cloud, behind one trait so the
//! decision logic can run against an in-memory fake.

use crate::error::Result;
use crate::yc::client::YcClient;
use crate::yc::operation::{self, WaitPolicy};
use crate::yc::types::{CreateInstanceRequest, Instance, Operation, ServiceAccount};
use crate::yc::{compute, iam};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Cloud operations consumed by a deployment run
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Id of the latest image in `family`, published in `folder_id`
    async fn latest_image_by_family(&self, folder_id: &str, family: &str) -> Result<String>;

    /// Instances in the folder with exactly this name
    async fn list_instances(&self, folder_id: &str, name: &str) -> Result<Vec<Instance>>;

    async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<Operation>;

    /// Upsert metadata keys on an instance
    async fn update_instance_metadata(
        &self,
        instance_id: &str,
        upsert: BTreeMap<String, String>,
    ) -> Result<Operation>;

    /// Full view of an instance, metadata included
    async fn get_instance(&self, instance_id: &str) -> Result<Instance>;

    /// Service accounts in the folder with exactly this name
    async fn list_service_accounts(&self, folder_id: &str, name: &str) -> Result<Vec<ServiceAccount>>;

    /// Block until the operation is done
    async fn wait_operation(&self, op: Operation) -> Result<Operation>;
}

/// [`RemoteGateway`] backed by the Yandex Cloud REST API
#[derive(Clone)]
pub struct YcGateway {
    client: YcClient,
    wait_policy: WaitPolicy,
}

impl YcGateway {
    pub fn new(client: YcClient, wait_policy: WaitPolicy) -> Self {
        Self { client, wait_policy }
    }
}

#[async_trait]
impl RemoteGateway for YcGateway {
    async fn latest_image_by_family(&self, folder_id: &str, family: &str) -> Result<String> {
        let image = compute::get_latest_image_by_family(&self.client, folder_id, family).await?;
        Ok(image.id)
    }

    async fn list_instances(&self, folder_id: &str, name: &str) -> Result<Vec<Instance>> {
        compute::list_instances_by_name(&self.client, folder_id, name).await
    }

    async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<Operation> {
        compute::create_instance(&self.client, request).await
    }

    async fn update_instance_metadata(
        &self,
        instance_id: &str,
        upsert: BTreeMap<String, String>,
    ) -> Result<Operation> {
        compute::update_instance_metadata(&self.client, instance_id, upsert).await
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Instance> {
        compute::get_instance(&self.client, instance_id).await
    }

    async fn list_service_accounts(&self, folder_id: &str, name: &str) -> Result<Vec<ServiceAccount>> {
        iam::list_service_accounts_by_name(&self.client, folder_id, name).await
    }

    async fn wait_operation(&self, op: Operation) -> Result<Operation> {
        let client = &self.client;
        operation::wait_for_operation(op, &self.wait_policy, |id| async move {
            operation::get_operation(client, &id).await
        })
        .await
    }
}
