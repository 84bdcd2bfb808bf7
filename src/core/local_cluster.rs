/*
 * A cluster-management endpoint emulated on the local file system. The
 * cluster root holds an image store folder (packages copied under their
 * destination name) and a JSON state file recording registered application
 * types, application instances and upgrades. It enforces the same ordering
 * rules a real endpoint would (a type must be registered before it is
 * instantiated, a type in use cannot be unregistered, and so on), which makes
 * it suitable both for local dry runs from the command line and as a
 * realistic collaborator in tests.
 */
use super::cluster::{
    ClusterConnection, ClusterError, ClusterOperations, CreateApplicationRequest, Result,
};
use super::manifests;
use super::models::{
    APPLICATION_NAME_KEY, APPLICATION_PARAMETER_KEY, APPLICATION_TYPE_VERSION_KEY,
    ApplicationParameterSet, AttributeMap, AttributeValue, UpgradeParams, active_upgrade_mode,
};
use super::staging;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;

const IMAGE_STORE_DIR: &str = "ImageStore";
const STATE_FILE_NAME: &str = "cluster_state.json";
const APPLICATION_MANIFEST_FILE: &str = "ApplicationManifest.xml";
const FILE_CONNECTION_PREFIX: &str = "file:";
const ENDPOINT_KEYS: [&str; 2] = ["ConnectionEndpoint", "Endpoint"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredApplicationType {
    pub type_name: String,
    pub type_version: String,
    pub image_store_path: String,
    pub manifest_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInstance {
    pub name: String,
    pub type_name: String,
    pub type_version: String,
    pub parameters: ApplicationParameterSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRecord {
    pub application_name: String,
    pub from_version: String,
    pub target_version: String,
    pub mode: Option<String>,
    pub started_at_unix: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub application_types: Vec<RegisteredApplicationType>,
    pub applications: Vec<ApplicationInstance>,
    pub upgrades: Vec<UpgradeRecord>,
}

pub struct LocalClusterManager {
    root: PathBuf,
    next_session: AtomicU64,
}

impl LocalClusterManager {
    pub fn new(root: PathBuf) -> Self {
        LocalClusterManager {
            root,
            next_session: AtomicU64::new(1),
        }
    }

    pub fn default_image_store(&self) -> PathBuf {
        self.root.join(IMAGE_STORE_DIR)
    }

    pub fn load_state(&self) -> Result<ClusterState> {
        let path = self.root.join(STATE_FILE_NAME);
        if !path.exists() {
            return Ok(ClusterState::default());
        }
        let reader = BufReader::new(File::open(&path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    fn save_state(&self, state: &ClusterState) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let writer = BufWriter::new(File::create(self.root.join(STATE_FILE_NAME))?);
        serde_json::to_writer_pretty(writer, state)?;
        Ok(())
    }

    fn update_state<T>(&self, f: impl FnOnce(&mut ClusterState) -> Result<T>) -> Result<T> {
        let mut state = self.load_state()?;
        let value = f(&mut state)?;
        self.save_state(&state)?;
        Ok(value)
    }

    // A `file:` connection string names the image store folder; otherwise the default is used.
    fn image_store_path(&self, connection_string: Option<&str>) -> PathBuf {
        match connection_string.and_then(|s| s.strip_prefix(FILE_CONNECTION_PREFIX)) {
            Some(path) => PathBuf::from(path),
            None => self.default_image_store(),
        }
    }

    fn cluster_manifest_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<ClusterManifest xmlns="http://schemas.microsoft.com/2011/01/fabric" Name="LocalCluster" Version="1.0">
  <FabricSettings>
    <Section Name="Management">
      <Parameter Name="ImageStoreConnectionString" Value="{FILE_CONNECTION_PREFIX}{}" />
    </Section>
  </FabricSettings>
</ClusterManifest>
"#,
            xml_escape(&self.default_image_store().to_string_lossy())
        )
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn sha256_hex(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn upgrade_text<'a>(params: &'a UpgradeParams, key: &'static str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_text())
        .ok_or_else(|| ClusterError::operation("StartUpgrade", key, "parameter missing"))
}

impl ClusterOperations for LocalClusterManager {
    fn connect(&self, parameters: &AttributeMap) -> Result<ClusterConnection> {
        let endpoint = ENDPOINT_KEYS
            .iter()
            .find_map(|key| parameters.get(*key).and_then(AttributeValue::as_text))
            .ok_or_else(|| {
                ClusterError::Connection("no ConnectionEndpoint in connection parameters".into())
            })?;
        fs::create_dir_all(self.default_image_store())?;
        let session_id = self.next_session.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "LocalCluster: Session {session_id} connected to '{endpoint}' at {:?}",
            self.root
        );
        Ok(ClusterConnection {
            endpoint: endpoint.to_string(),
            session_id,
        })
    }

    fn get_cluster_manifest(&self, _connection: &ClusterConnection) -> Result<String> {
        Ok(self.cluster_manifest_xml())
    }

    fn copy_package(
        &self,
        _connection: &ClusterConnection,
        local_path: &Path,
        destination: &str,
        image_store_connection_string: Option<&str>,
    ) -> Result<()> {
        let target = self
            .image_store_path(image_store_connection_string)
            .join(destination);
        if target.exists() {
            fs::remove_dir_all(&target)?;
        }
        staging::copy_dir_recursive(local_path, &target).map_err(|e| {
            ClusterError::operation("CopyPackage", destination, e.to_string())
        })?;
        log::debug!("LocalCluster: Copied {local_path:?} to image store path '{destination}'.");
        Ok(())
    }

    fn register_type(&self, _connection: &ClusterConnection, destination: &str) -> Result<()> {
        let manifest_path = self
            .default_image_store()
            .join(destination)
            .join(APPLICATION_MANIFEST_FILE);
        let identity = manifests::extract_application_identity(&manifest_path)?.ok_or_else(|| {
            ClusterError::operation(
                "RegisterType",
                destination,
                "package manifest declares no application type",
            )
        })?;
        let manifest_sha256 = sha256_hex(&manifest_path)?;

        self.update_state(|state| {
            if state.application_types.iter().any(|t| {
                t.type_name == identity.application_type_name
                    && t.type_version == identity.application_type_version
            }) {
                return Err(ClusterError::operation(
                    "RegisterType",
                    &identity.application_type_name,
                    format!("version {} is already registered", identity.application_type_version),
                ));
            }
            state.application_types.push(RegisteredApplicationType {
                type_name: identity.application_type_name.clone(),
                type_version: identity.application_type_version.clone(),
                image_store_path: destination.to_string(),
                manifest_sha256,
            });
            Ok(())
        })?;
        log::debug!(
            "LocalCluster: Registered {} {}.",
            identity.application_type_name,
            identity.application_type_version
        );
        Ok(())
    }

    fn create_application(
        &self,
        _connection: &ClusterConnection,
        request: &CreateApplicationRequest<'_>,
    ) -> Result<()> {
        self.update_state(|state| {
            if !state
                .application_types
                .iter()
                .any(|t| t.type_name == request.type_name && t.type_version == request.type_version)
            {
                return Err(ClusterError::operation(
                    "CreateApplication",
                    request.application_name,
                    format!(
                        "application type {} {} is not registered",
                        request.type_name, request.type_version
                    ),
                ));
            }
            if state
                .applications
                .iter()
                .any(|a| a.name == request.application_name)
            {
                return Err(ClusterError::operation(
                    "CreateApplication",
                    request.application_name,
                    "application already exists",
                ));
            }
            state.applications.push(ApplicationInstance {
                name: request.application_name.to_string(),
                type_name: request.type_name.to_string(),
                type_version: request.type_version.to_string(),
                parameters: request.parameters.clone(),
            });
            Ok(())
        })?;
        log::debug!("LocalCluster: Created application '{}'.", request.application_name);
        Ok(())
    }

    fn delete_application(
        &self,
        _connection: &ClusterConnection,
        application_name: &str,
        force: bool,
    ) -> Result<()> {
        self.update_state(|state| {
            let before = state.applications.len();
            state.applications.retain(|a| a.name != application_name);
            if state.applications.len() == before {
                return Err(ClusterError::operation(
                    "DeleteApplication",
                    application_name,
                    "application does not exist",
                ));
            }
            Ok(())
        })?;
        log::debug!("LocalCluster: Deleted application '{application_name}' (force: {force}).");
        Ok(())
    }

    fn unregister_type(
        &self,
        _connection: &ClusterConnection,
        type_name: &str,
        type_version: &str,
        force: bool,
    ) -> Result<()> {
        self.update_state(|state| {
            if let Some(app) = state
                .applications
                .iter()
                .find(|a| a.type_name == type_name && a.type_version == type_version)
            {
                return Err(ClusterError::operation(
                    "UnregisterType",
                    type_name,
                    format!("version {type_version} is still used by '{}'", app.name),
                ));
            }
            let before = state.application_types.len();
            state
                .application_types
                .retain(|t| !(t.type_name == type_name && t.type_version == type_version));
            if state.application_types.len() == before {
                return Err(ClusterError::operation(
                    "UnregisterType",
                    type_name,
                    format!("version {type_version} is not registered"),
                ));
            }
            Ok(())
        })?;
        log::debug!("LocalCluster: Unregistered {type_name} {type_version} (force: {force}).");
        Ok(())
    }

    fn start_upgrade(&self, _connection: &ClusterConnection, params: &UpgradeParams) -> Result<()> {
        let application_name = upgrade_text(params, APPLICATION_NAME_KEY)?;
        let target_version = upgrade_text(params, APPLICATION_TYPE_VERSION_KEY)?;
        let parameters = params
            .get(APPLICATION_PARAMETER_KEY)
            .and_then(|v| v.as_table())
            .cloned()
            .unwrap_or_default();
        let mode = active_upgrade_mode(params).map(str::to_string);

        self.update_state(|state| {
            let registered: Vec<(String, String)> = state
                .application_types
                .iter()
                .map(|t| (t.type_name.clone(), t.type_version.clone()))
                .collect();
            let app = state
                .applications
                .iter_mut()
                .find(|a| a.name == application_name)
                .ok_or_else(|| {
                    ClusterError::operation(
                        "StartUpgrade",
                        application_name,
                        "application does not exist",
                    )
                })?;
            if !registered
                .iter()
                .any(|(name, version)| *name == app.type_name && version == target_version)
            {
                return Err(ClusterError::operation(
                    "StartUpgrade",
                    application_name,
                    format!(
                        "target version {target_version} of {} is not registered",
                        app.type_name
                    ),
                ));
            }
            if app.type_version == target_version {
                return Err(ClusterError::operation(
                    "StartUpgrade",
                    application_name,
                    format!("application already runs version {target_version}"),
                ));
            }
            let from_version = std::mem::replace(&mut app.type_version, target_version.to_string());
            app.parameters = parameters;
            state.upgrades.push(UpgradeRecord {
                application_name: application_name.to_string(),
                from_version,
                target_version: target_version.to_string(),
                mode: mode.clone(),
                started_at_unix: OffsetDateTime::now_utc().unix_timestamp(),
            });
            Ok(())
        })?;
        log::debug!(
            "LocalCluster: Upgrading '{application_name}' to {target_version} (mode: {mode:?})."
        );
        Ok(())
    }

    fn remove_staged_package(
        &self,
        _connection: &ClusterConnection,
        destination: &str,
        image_store_connection_string: Option<&str>,
    ) -> Result<()> {
        let target = self
            .image_store_path(image_store_connection_string)
            .join(destination);
        if !target.is_dir() {
            return Err(ClusterError::operation(
                "RemovePackage",
                destination,
                "no such package in the image store",
            ));
        }
        fs::remove_dir_all(&target)?;
        log::debug!("LocalCluster: Removed image store path '{destination}'.");
        Ok(())
    }
}
