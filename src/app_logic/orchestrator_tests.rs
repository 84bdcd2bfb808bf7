use super::orchestrator::{DeploymentError, DeploymentOrchestrator};

use crate::core::models::{
    APPLICATION_NAME_KEY, APPLICATION_TYPE_VERSION_KEY, ApplicationParameterSet, AttributeMap,
    AttributeValue, UpgradeParams, UpgradeValue,
};
use crate::core::{
    ClusterConnection, ClusterError, ClusterOperations, CoreProfileResolver, CoreStager,
    CreateApplicationRequest, LocalClusterManager, ProfileResolverOperations, RepublishPolicy,
    ResolvedProfile, StagingError, StagingOperations,
};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::{TempDir, tempdir};

/*
 * This module contains unit tests for `DeploymentOrchestrator`. A recording
 * mock stands in for the cluster boundary so each test can assert the exact
 * call sequence an operation issues and inject a failure at any step. The
 * last tests run the whole lifecycle against `LocalClusterManager` with a
 * profile resolved from disk.
 */

const IMAGE_STORE: &str = "file:/mock/ImageStore";

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClusterCall {
    Connect(String),
    GetClusterManifest,
    CopyPackage {
        destination: String,
        image_store: Option<String>,
        staged_manifest_present: bool,
    },
    RegisterType(String),
    CreateApplication {
        name: String,
        type_name: String,
        type_version: String,
        parameters: ApplicationParameterSet,
    },
    DeleteApplication {
        name: String,
        force: bool,
    },
    UnregisterType {
        type_name: String,
        type_version: String,
        force: bool,
    },
    StartUpgrade(UpgradeParams),
    RemoveStagedPackage {
        destination: String,
        image_store: Option<String>,
    },
}

// --- Mock Cluster ---
struct MockCluster {
    calls: Mutex<Vec<ClusterCall>>,
    failing_operation: Mutex<Option<&'static str>>,
}

impl MockCluster {
    fn new() -> Self {
        MockCluster {
            calls: Mutex::new(Vec::new()),
            failing_operation: Mutex::new(None),
        }
    }

    fn fail_on(&self, operation: &'static str) {
        *self.failing_operation.lock().unwrap() = Some(operation);
    }

    fn get_calls(&self) -> Vec<ClusterCall> {
        self.calls.lock().unwrap().clone()
    }

    // Records the call, then fails it if it is the configured failing operation.
    fn record(&self, operation: &'static str, call: ClusterCall) -> Result<(), ClusterError> {
        self.calls.lock().unwrap().push(call);
        if *self.failing_operation.lock().unwrap() == Some(operation) {
            return Err(ClusterError::operation(operation, "mock", "injected failure"));
        }
        Ok(())
    }
}

impl ClusterOperations for MockCluster {
    fn connect(&self, parameters: &AttributeMap) -> Result<ClusterConnection, ClusterError> {
        let endpoint = parameters
            .get("Endpoint")
            .map(ToString::to_string)
            .unwrap_or_default();
        self.record("Connect", ClusterCall::Connect(endpoint.clone()))?;
        Ok(ClusterConnection {
            endpoint,
            session_id: 7,
        })
    }

    fn get_cluster_manifest(
        &self,
        _connection: &ClusterConnection,
    ) -> Result<String, ClusterError> {
        self.record("GetClusterManifest", ClusterCall::GetClusterManifest)?;
        Ok(format!(
            r#"<ClusterManifest><FabricSettings><Section Name="Management">
                 <Parameter Name="ImageStoreConnectionString" Value="{IMAGE_STORE}" />
               </Section></FabricSettings></ClusterManifest>"#
        ))
    }

    fn copy_package(
        &self,
        _connection: &ClusterConnection,
        local_path: &Path,
        destination: &str,
        image_store_connection_string: Option<&str>,
    ) -> Result<(), ClusterError> {
        self.record(
            "CopyPackage",
            ClusterCall::CopyPackage {
                destination: destination.to_string(),
                image_store: image_store_connection_string.map(str::to_string),
                staged_manifest_present: local_path.join("ApplicationManifest.xml").is_file(),
            },
        )
    }

    fn register_type(
        &self,
        _connection: &ClusterConnection,
        destination: &str,
    ) -> Result<(), ClusterError> {
        self.record("RegisterType", ClusterCall::RegisterType(destination.to_string()))
    }

    fn create_application(
        &self,
        _connection: &ClusterConnection,
        request: &CreateApplicationRequest<'_>,
    ) -> Result<(), ClusterError> {
        self.record(
            "CreateApplication",
            ClusterCall::CreateApplication {
                name: request.application_name.to_string(),
                type_name: request.type_name.to_string(),
                type_version: request.type_version.to_string(),
                parameters: request.parameters.clone(),
            },
        )
    }

    fn delete_application(
        &self,
        _connection: &ClusterConnection,
        application_name: &str,
        force: bool,
    ) -> Result<(), ClusterError> {
        self.record(
            "DeleteApplication",
            ClusterCall::DeleteApplication {
                name: application_name.to_string(),
                force,
            },
        )
    }

    fn unregister_type(
        &self,
        _connection: &ClusterConnection,
        type_name: &str,
        type_version: &str,
        force: bool,
    ) -> Result<(), ClusterError> {
        self.record(
            "UnregisterType",
            ClusterCall::UnregisterType {
                type_name: type_name.to_string(),
                type_version: type_version.to_string(),
                force,
            },
        )
    }

    fn start_upgrade(
        &self,
        _connection: &ClusterConnection,
        params: &UpgradeParams,
    ) -> Result<(), ClusterError> {
        self.record("StartUpgrade", ClusterCall::StartUpgrade(params.clone()))
    }

    fn remove_staged_package(
        &self,
        _connection: &ClusterConnection,
        destination: &str,
        image_store_connection_string: Option<&str>,
    ) -> Result<(), ClusterError> {
        self.record(
            "RemovePackage",
            ClusterCall::RemoveStagedPackage {
                destination: destination.to_string(),
                image_store: image_store_connection_string.map(str::to_string),
            },
        )
    }
}
// --- End MockCluster ---

struct TestContext {
    orchestrator: DeploymentOrchestrator,
    cluster: Arc<MockCluster>,
    package: PathBuf,
    temp_dir: TempDir,
}

fn setup_orchestrator_with_mocks(policy: RepublishPolicy) -> TestContext {
    crate::initialize_logging();
    let temp_dir = tempdir().expect("Failed to create temp dir for test");
    let package = temp_dir.path().join("pkg");
    fs::create_dir_all(&package).unwrap();
    fs::write(package.join("ApplicationManifest.xml"), "<ApplicationManifest/>").unwrap();

    let cluster = Arc::new(MockCluster::new());
    let stager = Arc::new(CoreStager::new(temp_dir.path().join("staging")));
    let orchestrator = DeploymentOrchestrator::new(
        Arc::clone(&cluster) as Arc<dyn ClusterOperations>,
        stager as Arc<dyn StagingOperations>,
    )
    .with_republish_policy(policy);

    TestContext {
        orchestrator,
        cluster,
        package,
        temp_dir,
    }
}

fn sample_profile() -> ResolvedProfile {
    let mut connection = AttributeMap::new();
    connection.insert("Endpoint".to_string(), AttributeValue::from("cluster1"));
    let mut parameters = ApplicationParameterSet::new();
    parameters.insert("Count".to_string(), "3".to_string());

    ResolvedProfile {
        profile_path: PathBuf::from("/proj/PublishProfiles/Cloud.xml"),
        cluster_connection_parameters: connection,
        upgrade_deployment: None,
        copy_package_parameters: AttributeMap::new(),
        register_application_parameters: AttributeMap::new(),
        application_parameter_file: PathBuf::from("/proj/ApplicationParameters/Cloud.xml"),
        application_name: "App1".to_string(),
        application_parameters: parameters,
        application_type_name: "App1Type".to_string(),
        application_type_version: "1.0.0".to_string(),
        fabric_namespace: "fabric:".to_string(),
        properties: AttributeMap::new(),
        upgrade_params: None,
    }
}

fn sample_upgrade_params() -> UpgradeParams {
    let mut params = BTreeMap::new();
    params.insert(
        APPLICATION_NAME_KEY.to_string(),
        UpgradeValue::Attribute(AttributeValue::from("App1")),
    );
    params.insert(
        APPLICATION_TYPE_VERSION_KEY.to_string(),
        UpgradeValue::Attribute(AttributeValue::from("1.0.0")),
    );
    params.insert(
        "Monitored".to_string(),
        UpgradeValue::Attribute(AttributeValue::Flag(true)),
    );
    params
}

fn copy_call() -> ClusterCall {
    ClusterCall::CopyPackage {
        destination: "App1Type".to_string(),
        image_store: Some(IMAGE_STORE.to_string()),
        staged_manifest_present: true,
    }
}

fn remove_package_call() -> ClusterCall {
    ClusterCall::RemoveStagedPackage {
        destination: "App1Type".to_string(),
        image_store: Some(IMAGE_STORE.to_string()),
    }
}

fn publish_calls() -> Vec<ClusterCall> {
    let profile = sample_profile();
    vec![
        ClusterCall::Connect("cluster1".to_string()),
        ClusterCall::GetClusterManifest,
        copy_call(),
        ClusterCall::RegisterType("App1Type".to_string()),
        ClusterCall::CreateApplication {
            name: "App1".to_string(),
            type_name: "App1Type".to_string(),
            type_version: "1.0.0".to_string(),
            parameters: profile.application_parameters,
        },
        remove_package_call(),
    ]
}

fn remove_calls() -> Vec<ClusterCall> {
    vec![
        ClusterCall::Connect("cluster1".to_string()),
        ClusterCall::DeleteApplication {
            name: "App1".to_string(),
            force: true,
        },
        ClusterCall::UnregisterType {
            type_name: "App1Type".to_string(),
            type_version: "1.0.0".to_string(),
            force: true,
        },
    ]
}

#[test]
fn test_publish_issues_calls_in_order() {
    // Arrange
    let ctx = setup_orchestrator_with_mocks(RepublishPolicy::default());

    // Act
    ctx.orchestrator
        .publish(&sample_profile(), &ctx.package)
        .expect("publish should succeed");

    // Assert
    assert_eq!(ctx.cluster.get_calls(), publish_calls());
}

#[test]
fn test_publish_stops_at_first_failure() {
    // Arrange
    let ctx = setup_orchestrator_with_mocks(RepublishPolicy::default());
    ctx.cluster.fail_on("RegisterType");

    // Act
    let result = ctx.orchestrator.publish(&sample_profile(), &ctx.package);

    // Assert
    assert!(matches!(
        result,
        Err(DeploymentError::Cluster(ClusterError::Operation {
            operation: "RegisterType",
            ..
        }))
    ));
    assert_eq!(ctx.cluster.get_calls(), publish_calls()[..4].to_vec());
}

#[test]
fn test_publish_staged_copy_is_cleaned_up() {
    let ctx = setup_orchestrator_with_mocks(RepublishPolicy::default());
    let staging_root = ctx.temp_dir.path().join("staging");

    ctx.orchestrator
        .publish(&sample_profile(), &ctx.package)
        .unwrap();

    assert_eq!(fs::read_dir(&staging_root).unwrap().count(), 0);
    // The source package itself is left alone.
    assert!(ctx.package.join("ApplicationManifest.xml").is_file());
}

#[test]
fn test_publish_rejects_incomplete_profile_before_any_call() {
    let ctx = setup_orchestrator_with_mocks(RepublishPolicy::default());
    let mut profile = sample_profile();
    profile.application_type_version = String::new();

    let result = ctx.orchestrator.publish(&profile, &ctx.package);

    assert!(matches!(
        result,
        Err(DeploymentError::IncompleteProfile("ApplicationTypeVersion"))
    ));
    assert!(ctx.cluster.get_calls().is_empty());
}

#[test]
fn test_publish_staging_failure_stops_before_copy() {
    let ctx = setup_orchestrator_with_mocks(RepublishPolicy::default());
    let missing_package = ctx.temp_dir.path().join("no_such_package");

    let result = ctx.orchestrator.publish(&sample_profile(), &missing_package);

    assert!(matches!(
        result,
        Err(DeploymentError::Staging(StagingError::InvalidPackage(_)))
    ));
    assert_eq!(ctx.cluster.get_calls(), publish_calls()[..2].to_vec());
}

#[test]
fn test_remove_issues_calls_in_order() {
    let ctx = setup_orchestrator_with_mocks(RepublishPolicy::default());

    ctx.orchestrator.remove(&sample_profile()).unwrap();

    assert_eq!(ctx.cluster.get_calls(), remove_calls());
}

#[test]
fn test_remove_connect_failure_surfaces_immediately() {
    let ctx = setup_orchestrator_with_mocks(RepublishPolicy::default());
    ctx.cluster.fail_on("Connect");

    let result = ctx.orchestrator.remove(&sample_profile());

    assert!(matches!(result, Err(DeploymentError::Cluster(_))));
    assert_eq!(ctx.cluster.get_calls().len(), 1);
}

#[test]
fn test_republish_is_remove_then_publish() {
    let ctx = setup_orchestrator_with_mocks(RepublishPolicy::default());

    let report = ctx
        .orchestrator
        .republish(&sample_profile(), &ctx.package)
        .unwrap();

    assert!(report.remove_error.is_none());
    let mut expected = remove_calls();
    expected.extend(publish_calls());
    assert_eq!(ctx.cluster.get_calls(), expected);
}

#[test]
fn test_republish_continues_after_failed_removal() {
    // Arrange
    let ctx = setup_orchestrator_with_mocks(RepublishPolicy::ContinueOnRemoveFailure);
    ctx.cluster.fail_on("DeleteApplication");

    // Act
    let report = ctx
        .orchestrator
        .republish(&sample_profile(), &ctx.package)
        .expect("publish half should still succeed");

    // Assert
    assert!(matches!(
        report.remove_error,
        Some(DeploymentError::Cluster(ClusterError::Operation {
            operation: "DeleteApplication",
            ..
        }))
    ));
    let mut expected = remove_calls()[..2].to_vec();
    expected.extend(publish_calls());
    assert_eq!(ctx.cluster.get_calls(), expected);
}

#[test]
fn test_republish_aborts_after_failed_removal_when_configured() {
    let ctx = setup_orchestrator_with_mocks(RepublishPolicy::AbortOnRemoveFailure);
    ctx.cluster.fail_on("UnregisterType");

    let result = ctx.orchestrator.republish(&sample_profile(), &ctx.package);

    assert!(matches!(result, Err(DeploymentError::Cluster(_))));
    assert_eq!(ctx.cluster.get_calls(), remove_calls());
}

#[test]
fn test_republish_returns_publish_failure() {
    let ctx = setup_orchestrator_with_mocks(RepublishPolicy::ContinueOnRemoveFailure);
    ctx.cluster.fail_on("CreateApplication");

    let result = ctx.orchestrator.republish(&sample_profile(), &ctx.package);

    assert!(matches!(
        result,
        Err(DeploymentError::Cluster(ClusterError::Operation {
            operation: "CreateApplication",
            ..
        }))
    ));
}

#[test]
fn test_upgrade_issues_calls_in_order() {
    let ctx = setup_orchestrator_with_mocks(RepublishPolicy::default());
    let mut profile = sample_profile();
    profile.upgrade_params = Some(sample_upgrade_params());

    ctx.orchestrator.upgrade(&profile, &ctx.package).unwrap();

    assert_eq!(
        ctx.cluster.get_calls(),
        vec![
            ClusterCall::Connect("cluster1".to_string()),
            ClusterCall::GetClusterManifest,
            copy_call(),
            ClusterCall::RegisterType("App1Type".to_string()),
            ClusterCall::StartUpgrade(sample_upgrade_params()),
            remove_package_call(),
        ]
    );
}

#[test]
fn test_upgrade_without_upgrade_params_makes_no_calls() {
    let ctx = setup_orchestrator_with_mocks(RepublishPolicy::default());

    let result = ctx.orchestrator.upgrade(&sample_profile(), &ctx.package);

    assert!(matches!(result, Err(DeploymentError::MissingUpgradeParameters)));
    assert!(ctx.cluster.get_calls().is_empty());
}

#[test]
fn test_upgrade_failure_leaves_staged_package_in_image_store() {
    let ctx = setup_orchestrator_with_mocks(RepublishPolicy::default());
    ctx.cluster.fail_on("StartUpgrade");
    let mut profile = sample_profile();
    profile.upgrade_params = Some(sample_upgrade_params());

    let result = ctx.orchestrator.upgrade(&profile, &ctx.package);

    assert!(result.is_err());
    let calls = ctx.cluster.get_calls();
    assert!(matches!(calls.last(), Some(ClusterCall::StartUpgrade(_))));
    assert!(!calls.contains(&remove_package_call()));
}

// --- Lifecycle against the local cluster ---

fn write_project(root: &Path, version: &str, upgrade_section: &str) -> (PathBuf, PathBuf) {
    let write = |relative: &str, content: String| {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    };
    write(
        "PublishProfiles/Cloud.xml",
        format!(
            r#"<PublishProfile>
  <ClusterConnectionParameters ConnectionEndpoint="localhost:19000" />
  {upgrade_section}
  <ApplicationParameterFile Path="..\ApplicationParameters\Cloud.xml" />
</PublishProfile>"#
        ),
    );
    write(
        "ApplicationParameters/Cloud.xml",
        r#"<Application Name="fabric:/App1"><Parameters><Parameter Name="Count" Value="3" /></Parameters></Application>"#
            .to_string(),
    );
    let manifest = format!(
        r#"<ApplicationManifest ApplicationTypeName="App1Type" ApplicationTypeVersion="{version}" />"#
    );
    write("ApplicationPackageRoot/ApplicationManifest.xml", manifest.clone());
    write(format!("pkg_{version}/ApplicationManifest.xml").as_str(), manifest);
    (
        root.join("PublishProfiles").join("Cloud.xml"),
        root.join(format!("pkg_{version}")),
    )
}

#[test]
fn test_lifecycle_against_local_cluster() {
    crate::initialize_logging();
    let temp_dir = tempdir().unwrap();
    let cluster = Arc::new(LocalClusterManager::new(temp_dir.path().join("cluster")));
    let orchestrator = DeploymentOrchestrator::new(
        Arc::clone(&cluster) as Arc<dyn ClusterOperations>,
        Arc::new(CoreStager::new(temp_dir.path().join("staging"))),
    );
    let resolver = CoreProfileResolver::new();

    // Publish 1.0.0
    let (profile_path, package) = write_project(temp_dir.path(), "1.0.0", "");
    let profile = resolver.resolve(&profile_path).unwrap();
    orchestrator.publish(&profile, &package).unwrap();

    let state = cluster.load_state().unwrap();
    assert_eq!(state.applications.len(), 1);
    assert_eq!(state.applications[0].name, "fabric:/App1");
    assert_eq!(state.applications[0].type_version, "1.0.0");
    assert!(!cluster.default_image_store().join("App1Type").exists());

    // Publishing again fails: the type version is already registered.
    assert!(orchestrator.publish(&profile, &package).is_err());

    // Upgrade to 2.0.0
    let (profile_path, package) = write_project(
        temp_dir.path(),
        "2.0.0",
        r#"<UpgradeDeployment Mode="Monitored"><Parameters FailureAction="Rollback" /></UpgradeDeployment>"#,
    );
    let upgraded = resolver.resolve(&profile_path).unwrap();
    orchestrator.upgrade(&upgraded, &package).unwrap();

    let state = cluster.load_state().unwrap();
    assert_eq!(state.applications[0].type_version, "2.0.0");
    assert_eq!(state.upgrades[0].mode.as_deref(), Some("Monitored"));

    // Remove the 2.0.0 instance; 1.0.0 stays registered.
    orchestrator.remove(&upgraded).unwrap();
    let state = cluster.load_state().unwrap();
    assert!(state.applications.is_empty());
    assert_eq!(state.application_types.len(), 1);
    assert_eq!(state.application_types[0].type_version, "1.0.0");
}

#[test]
fn test_republish_against_local_cluster_with_nothing_to_remove() {
    crate::initialize_logging();
    let temp_dir = tempdir().unwrap();
    let cluster = Arc::new(LocalClusterManager::new(temp_dir.path().join("cluster")));
    let orchestrator = DeploymentOrchestrator::new(
        Arc::clone(&cluster) as Arc<dyn ClusterOperations>,
        Arc::new(CoreStager::new(temp_dir.path().join("staging"))),
    );
    let (profile_path, package) = write_project(temp_dir.path(), "1.0.0", "");
    let profile = CoreProfileResolver::new().resolve(&profile_path).unwrap();

    let report = orchestrator.republish(&profile, &package).unwrap();

    assert!(report.remove_error.is_some());
    assert_eq!(cluster.load_state().unwrap().applications.len(), 1);
}
