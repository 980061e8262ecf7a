//! Integration tests for the Yandex Cloud client using wiremock
//!
//! Every service is routed to one mock server. The IAM token exchange is
//! mocked too, so these tests exercise the full request path: JWT signing,
//! token caching, URL building, JSON encoding and error mapping.

use chrono::{Duration as ChronoDuration, Utc};
use coi_deploy::action::MemoryOutputs;
use coi_deploy::config::{Disk, Resources, ServiceAccountRef, VmSpec};
use coi_deploy::gateway::{RemoteGateway, YcGateway};
use coi_deploy::reconcile::Reconciler;
use coi_deploy::render::Renderer;
use coi_deploy::yc::auth::ServiceAccountKey;
use coi_deploy::yc::client::{Endpoints, YcClient};
use coi_deploy::yc::operation::WaitPolicy;
use coi_deploy::yc::{compute, iam};
use coi_deploy::Error;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{bearer_token, body_json, body_partial_json, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEST_PEM: &str = include_str!("fixtures/sa-private-key.pem");
const TOKEN: &str = "t1.test-iam-token";

fn test_key() -> ServiceAccountKey {
    let document = json!({
        "id": "ajekeyid",
        "service_account_id": "ajesaid",
        "private_key": TEST_PEM,
    });
    ServiceAccountKey::from_json(&document.to_string()).unwrap()
}

fn test_client(server: &MockServer) -> YcClient {
    let base = Url::parse(&server.uri()).unwrap();
    YcClient::new(test_key(), Endpoints::single(base)).unwrap()
}

fn fast_policy() -> WaitPolicy {
    WaitPolicy {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        multiplier: 2,
        timeout: Some(Duration::from_secs(5)),
    }
}

/// Mount the IAM token endpoint, expecting exactly `times` exchanges
async fn mount_token(server: &MockServer, times: u64) {
    let expires_at = Utc::now() + ChronoDuration::hours(12);
    Mock::given(method("POST"))
        .and(path("/iam/v1/tokens"))
        .and(header_exists("x-client-request-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "iamToken": TOKEN,
            "expiresAt": expires_at.to_rfc3339(),
        })))
        .expect(times)
        .mount(server)
        .await;
}

fn instance_json(id: &str, metadata: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "folderId": "folderid",
        "name": "vmname",
        "status": "RUNNING",
        "metadata": metadata,
        "bootDisk": {"mode": "READ_WRITE", "deviceName": "fhmdisk", "autoDelete": true, "diskId": "diskid"},
        "networkInterfaces": [{
            "index": "0",
            "subnetId": "subnetid",
            "primaryV4Address": {
                "address": "10.128.0.5",
                "oneToOneNat": {"address": "51.250.1.1", "ipVersion": "IPV4"}
            }
        }]
    })
}

mod client_tests {
    use super::*;

    /// Test the IAM token is exchanged once and reused across calls
    #[tokio::test]
    async fn test_token_is_exchanged_once_and_reused() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/compute/v1/images:latestByFamily"))
            .and(query_param("folderId", "standard-images"))
            .and(query_param("family", "container-optimized-image"))
            .and(bearer_token(TOKEN))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "fd8coiimage",
                "folderId": "standard-images",
                "family": "container-optimized-image",
                "name": "container-optimized-image-v20240101"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = test_client(&server);
        for _ in 0..2 {
            let image = compute::get_latest_image_by_family(&client, "standard-images", "container-optimized-image")
                .await
                .unwrap();
            assert_eq!(image.id, "fd8coiimage");
        }
    }

    /// Test a 401 refreshes the IAM token and retries once
    #[tokio::test]
    async fn test_rejected_token_is_refreshed_once() {
        let server = MockServer::start().await;
        mount_token(&server, 2).await;

        Mock::given(method("GET"))
            .and(path("/compute/v1/instances/inst1"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "code": 16,
                "message": "The token has expired"
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/compute/v1/instances/inst1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(instance_json("inst1", json!({}))))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let instance = compute::get_instance(&client, "inst1").await.unwrap();
        assert_eq!(instance.id, "inst1");
    }

    /// Test a failed token exchange surfaces as an API error
    #[tokio::test]
    async fn test_token_exchange_failure_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/iam/v1/tokens"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "code": 16,
                "message": "The token is invalid"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client.credentials.get_token().await.unwrap_err();
        match err {
            Error::Api { status, message, .. } => {
                assert_eq!(status, 401);
                assert!(message.contains("The token is invalid"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    /// Test API errors keep the request and trace ids
    #[tokio::test]
    async fn test_api_error_keeps_support_ids() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/compute/v1/instances/missing"))
            .respond_with(
                ResponseTemplate::new(404)
                    .insert_header("x-request-id", "req-123")
                    .insert_header("x-server-trace-id", "trace-456")
                    .set_body_json(json!({"code": 5, "message": "Instance missing not found"})),
            )
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = compute::get_instance(&client, "missing").await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "API request failed: 404 Not Found (code 5): Instance missing not found"
        );
        assert_eq!(
            err.support_ids().as_deref(),
            Some("x-request-id: req-123\nx-server-trace-id: trace-456")
        );
    }

    /// Test an API error without a body still maps to an API error
    #[tokio::test]
    async fn test_api_error_without_body() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/compute/v1/instances/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = compute::get_instance(&client, "broken").await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 503, .. }));
        assert_eq!(
            err.support_ids().as_deref(),
            Some("x-request-id: -\nx-server-trace-id: -")
        );
    }

    /// Test instance listing follows nextPageToken
    #[tokio::test]
    async fn test_list_instances_follows_pages() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/compute/v1/instances"))
            .and(query_param("folderId", "folderid"))
            .and(query_param("filter", "name = 'vmname'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instances": [instance_json("first", json!({}))],
                "nextPageToken": "page-2"
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/compute/v1/instances"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instances": [instance_json("second", json!({}))]
            })))
            .with_priority(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let instances = compute::list_instances_by_name(&client, "folderid", "vmname")
            .await
            .unwrap();
        let ids: Vec<&str> = instances.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    /// Test an empty listing response yields no instances
    #[tokio::test]
    async fn test_list_instances_empty_response() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/compute/v1/instances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let instances = compute::list_instances_by_name(&client, "folderid", "vmname")
            .await
            .unwrap();
        assert!(instances.is_empty());
    }

    /// Test service accounts are listed with a name filter
    #[tokio::test]
    async fn test_list_service_accounts_by_name() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/iam/v1/serviceAccounts"))
            .and(query_param("folderId", "folderid"))
            .and(query_param("filter", "name = 'deployer'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "serviceAccounts": [{
                    "id": "ajedeployer",
                    "folderId": "folderid",
                    "createdAt": "2024-01-01T00:00:00Z",
                    "name": "deployer"
                }]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let accounts = iam::list_service_accounts_by_name(&client, "folderid", "deployer")
            .await
            .unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].id, "ajedeployer");
    }

    /// Test the metadata update sends only the upsert map
    #[tokio::test]
    async fn test_update_metadata_sends_upsert() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/compute/v1/instances/inst1:updateMetadata"))
            .and(body_json(json!({"upsert": {"docker-compose": "services: {}"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "op-update",
                "description": "Update instance metadata",
                "done": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let mut upsert = BTreeMap::new();
        upsert.insert("docker-compose".to_string(), "services: {}".to_string());
        let op = compute::update_instance_metadata(&client, "inst1", upsert)
            .await
            .unwrap();
        assert_eq!(op.id, "op-update");
        assert!(!op.done);
    }
}

mod gateway_tests {
    use super::*;

    /// Test operation polling continues until the operation is done
    #[tokio::test]
    async fn test_wait_operation_polls_until_done() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/operations/op1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "op1", "done": false})))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/op1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "op1",
                "done": true,
                "response": instance_json("inst1", json!({}))
            })))
            .mount(&server)
            .await;

        let gateway = YcGateway::new(test_client(&server), fast_policy());
        let pending = coi_deploy::yc::types::Operation {
            id: "op1".to_string(),
            ..Default::default()
        };
        let finished = gateway.wait_operation(pending).await.unwrap();

        assert!(finished.done);
        let instance: coi_deploy::yc::types::Instance = finished.decode_response().unwrap().unwrap();
        assert_eq!(instance.id, "inst1");
        assert_eq!(instance.public_ip(), Some("51.250.1.1"));
    }

    /// Test operation polling stops on an API error
    #[tokio::test]
    async fn test_wait_operation_aborts_on_api_error() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/operations/op1"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "code": 7,
                "message": "Permission denied"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = YcGateway::new(test_client(&server), fast_policy());
        let pending = coi_deploy::yc::types::Operation {
            id: "op1".to_string(),
            ..Default::default()
        };
        let err = gateway.wait_operation(pending).await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 403, .. }));
    }
}

mod end_to_end_tests {
    use super::*;

    struct Templates {
        dir: tempfile::TempDir,
    }

    impl Templates {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("user-data.yaml"), "#cloud-config\n").unwrap();
            std::fs::write(
                dir.path().join("docker-compose.yaml"),
                "services:\n  web:\n    image: {{ env.IMAGE }}\n",
            )
            .unwrap();
            Self { dir }
        }

        fn renderer(&self) -> Renderer {
            let mut env = BTreeMap::new();
            env.insert("IMAGE".to_string(), "nginx:1.27".to_string());
            Renderer::new(self.dir.path(), env)
        }
    }

    fn spec() -> VmSpec {
        VmSpec {
            folder_id: "folderid".to_string(),
            name: "vmname".to_string(),
            zone_id: "ru-central1-a".to_string(),
            platform_id: "standard-v3".to_string(),
            subnet_id: "subnetid".to_string(),
            public_ip: None,
            resources: Resources {
                cores: 2,
                memory_bytes: 2 << 30,
                core_fraction: 100,
            },
            disk: Disk {
                type_id: "network-ssd".to_string(),
                size_bytes: 30 << 30,
            },
            service_account: ServiceAccountRef::Name("deployer".to_string()),
            user_data_path: PathBuf::from("user-data.yaml"),
            docker_compose_path: PathBuf::from("docker-compose.yaml"),
            enable_oslogin: "false".to_string(),
            description: "Created from: owner/repo".to_string(),
            labels: BTreeMap::new(),
        }
    }

    async fn mount_service_account(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/iam/v1/serviceAccounts"))
            .and(query_param("filter", "name = 'deployer'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "serviceAccounts": [{"id": "ajedeployer", "folderId": "folderid", "name": "deployer"}]
            })))
            .mount(server)
            .await;
    }

    /// Test a full create run against the REST endpoints
    #[tokio::test]
    async fn test_creates_vm_through_rest_api() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        mount_service_account(&server).await;

        Mock::given(method("GET"))
            .and(path("/compute/v1/instances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/compute/v1/images:latestByFamily"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "fd8coiimage"})))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/compute/v1/instances"))
            .and(body_partial_json(json!({
                "folderId": "folderid",
                "name": "vmname",
                "description": "Created from: owner/repo",
                "zoneId": "ru-central1-a",
                "platformId": "standard-v3",
                "serviceAccountId": "ajedeployer",
                "resourcesSpec": {"memory": "2147483648", "cores": "2", "coreFraction": "100"},
                "bootDiskSpec": {
                    "mode": "READ_WRITE",
                    "autoDelete": true,
                    "diskSpec": {"typeId": "network-ssd", "size": "32212254720", "imageId": "fd8coiimage"}
                },
                "networkInterfaceSpecs": [{
                    "subnetId": "subnetid",
                    "primaryV4AddressSpec": {"oneToOneNatSpec": {"ipVersion": "IPV4"}}
                }],
                "metadata": {
                    "enable-oslogin": "false",
                    "user-data": "#cloud-config\n",
                    "docker-compose": "services:\n  web:\n    image: nginx:1.27\n"
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "op-create",
                "description": "Create instance",
                "done": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/op-create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "op-create",
                "done": true,
                "response": instance_json("fhmnewvm", json!({}))
            })))
            .mount(&server)
            .await;

        let templates = Templates::new();
        let gateway = YcGateway::new(test_client(&server), fast_policy());
        let mut reconciler = Reconciler::new(gateway, templates.renderer());
        let mut outputs = MemoryOutputs::default();

        let run = reconciler.run(spec(), &mut outputs).await.unwrap();

        assert!(run.created);
        assert_eq!(outputs.get("created"), Some("true"));
        assert_eq!(outputs.get("instance-id"), Some("fhmnewvm"));
        assert_eq!(outputs.get("disk-id"), Some("diskid"));
        assert_eq!(outputs.get("public-ip"), Some("51.250.1.1"));
    }

    /// Test a full update run never calls create
    #[tokio::test]
    async fn test_updates_existing_vm_through_rest_api() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        mount_service_account(&server).await;

        Mock::given(method("GET"))
            .and(path("/compute/v1/instances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instances": [instance_json("fhmexisting", json!({"user-data": "old"}))]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/compute/v1/instances/fhmexisting"))
            .and(query_param("view", "FULL"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(instance_json("fhmexisting", json!({"user-data": "old", "ssh-keys": "k"}))),
            )
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/compute/v1/instances/fhmexisting:updateMetadata"))
            .and(body_json(json!({
                "upsert": {
                    "enable-oslogin": "false",
                    "user-data": "#cloud-config\n",
                    "docker-compose": "services:\n  web:\n    image: nginx:1.27\n"
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "op-update",
                "done": true,
                "response": instance_json("fhmexisting", json!({}))
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/compute/v1/instances"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let templates = Templates::new();
        let gateway = YcGateway::new(test_client(&server), fast_policy());
        let mut reconciler = Reconciler::new(gateway, templates.renderer());
        let mut outputs = MemoryOutputs::default();

        let run = reconciler.run(spec(), &mut outputs).await.unwrap();

        assert!(!run.created);
        assert_eq!(outputs.get("created"), Some("false"));
        assert_eq!(outputs.get("instance-id"), Some("fhmexisting"));
        assert_eq!(outputs.get("disk-id"), Some("diskid"));
    }

    /// Test a failed create operation fails the run
    #[tokio::test]
    async fn test_create_operation_error_is_reported() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        mount_service_account(&server).await;

        Mock::given(method("GET"))
            .and(path("/compute/v1/instances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/compute/v1/images:latestByFamily"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "fd8coiimage"})))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/compute/v1/instances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "op-create",
                "done": true,
                "error": {"code": 8, "message": "Quota limit compute.instances.count exceeded"}
            })))
            .mount(&server)
            .await;

        let templates = Templates::new();
        let gateway = YcGateway::new(test_client(&server), fast_policy());
        let mut reconciler = Reconciler::new(gateway, templates.renderer());
        let mut outputs = MemoryOutputs::default();

        let err = reconciler.run(spec(), &mut outputs).await.unwrap_err();

        assert!(matches!(err, Error::RemoteOperation { code: 8, .. }));
        assert_eq!(outputs.get("instance-id"), None);
    }
}
