/*
 * The boundary to the cluster-management endpoint. Every remote call the
 * deployment orchestrator makes goes through `ClusterOperations`; `connect`
 * hands back an explicit `ClusterConnection` that the caller threads through
 * each subsequent call, so no call depends on ambient session state.
 *
 * Implementations perform each call as a single blocking operation. Retries
 * and timeouts, if any, belong to the implementation, not to its callers.
 */
use super::documents::DocumentError;
use super::models::{ApplicationParameterSet, AttributeMap, UpgradeParams};
use std::io;
use std::path::Path;

#[derive(Debug)]
pub enum ClusterError {
    Connection(String),
    Operation {
        operation: &'static str,
        resource: String,
        message: String,
    },
    Io(io::Error),
    Serde(serde_json::Error),
    Document(DocumentError),
}

impl ClusterError {
    pub fn operation(operation: &'static str, resource: &str, message: impl Into<String>) -> Self {
        ClusterError::Operation {
            operation,
            resource: resource.to_string(),
            message: message.into(),
        }
    }
}

impl From<io::Error> for ClusterError {
    fn from(err: io::Error) -> Self {
        ClusterError::Io(err)
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        ClusterError::Serde(err)
    }
}

impl From<DocumentError> for ClusterError {
    fn from(err: DocumentError) -> Self {
        ClusterError::Document(err)
    }
}

impl std::fmt::Display for ClusterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterError::Connection(msg) => write!(f, "Cluster connection failed: {msg}"),
            ClusterError::Operation {
                operation,
                resource,
                message,
            } => write!(f, "{operation} failed for '{resource}': {message}"),
            ClusterError::Io(e) => write!(f, "Cluster I/O error: {e}"),
            ClusterError::Serde(e) => write!(f, "Cluster state serialization error: {e}"),
            ClusterError::Document(e) => write!(f, "Cluster document error: {e}"),
        }
    }
}

impl std::error::Error for ClusterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClusterError::Io(e) => Some(e),
            ClusterError::Serde(e) => Some(e),
            ClusterError::Document(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;

/// An open session against one cluster endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConnection {
    pub endpoint: String,
    pub session_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateApplicationRequest<'a> {
    pub application_name: &'a str,
    pub type_name: &'a str,
    pub type_version: &'a str,
    pub parameters: &'a ApplicationParameterSet,
}

pub trait ClusterOperations: Send + Sync {
    fn connect(&self, parameters: &AttributeMap) -> Result<ClusterConnection>;

    /// The cluster manifest document as XML text.
    fn get_cluster_manifest(&self, connection: &ClusterConnection) -> Result<String>;

    fn copy_package(
        &self,
        connection: &ClusterConnection,
        local_path: &Path,
        destination: &str,
        image_store_connection_string: Option<&str>,
    ) -> Result<()>;

    fn register_type(&self, connection: &ClusterConnection, destination: &str) -> Result<()>;

    fn create_application(
        &self,
        connection: &ClusterConnection,
        request: &CreateApplicationRequest<'_>,
    ) -> Result<()>;

    fn delete_application(
        &self,
        connection: &ClusterConnection,
        application_name: &str,
        force: bool,
    ) -> Result<()>;

    fn unregister_type(
        &self,
        connection: &ClusterConnection,
        type_name: &str,
        type_version: &str,
        force: bool,
    ) -> Result<()>;

    fn start_upgrade(&self, connection: &ClusterConnection, params: &UpgradeParams) -> Result<()>;

    fn remove_staged_package(
        &self,
        connection: &ClusterConnection,
        destination: &str,
        image_store_connection_string: Option<&str>,
    ) -> Result<()>;
}
