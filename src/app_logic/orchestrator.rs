use crate::core::{
    ClusterConnection, ClusterError, ClusterOperations, CreateApplicationRequest, RepublishPolicy,
    ResolvedProfile, StagingError, StagingOperations, manifests,
};
use std::path::Path;
use std::sync::Arc;

/*
 * Drives the deployment lifecycle for one resolved profile against the
 * cluster-management boundary. Each operation is a fixed, ordered sequence of
 * blocking remote calls; the first failing call ends the operation and its
 * error is returned unchanged. Nothing is retried and no partially completed
 * step is rolled back, including packages left in the image store.
 */

#[derive(Debug)]
pub enum DeploymentError {
    Cluster(ClusterError),
    Staging(StagingError),
    IncompleteProfile(&'static str),
    MissingUpgradeParameters,
}

impl From<ClusterError> for DeploymentError {
    fn from(err: ClusterError) -> Self {
        DeploymentError::Cluster(err)
    }
}

impl From<StagingError> for DeploymentError {
    fn from(err: StagingError) -> Self {
        DeploymentError::Staging(err)
    }
}

impl std::fmt::Display for DeploymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentError::Cluster(e) => write!(f, "{e}"),
            DeploymentError::Staging(e) => write!(f, "Package staging failed: {e}"),
            DeploymentError::IncompleteProfile(field) => {
                write!(f, "Resolved profile has no value for {field}")
            }
            DeploymentError::MissingUpgradeParameters => write!(
                f,
                "Profile declares no UpgradeDeployment parameters; cannot upgrade"
            ),
        }
    }
}

impl std::error::Error for DeploymentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeploymentError::Cluster(e) => Some(e),
            DeploymentError::Staging(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DeploymentError>;

/// Outcome of a republish that got as far as attempting the publish.
#[derive(Debug)]
pub struct RepublishReport {
    /// The removal failure that republish chose to continue past, if any.
    pub remove_error: Option<DeploymentError>,
}

pub struct DeploymentOrchestrator {
    cluster: Arc<dyn ClusterOperations>,
    stager: Arc<dyn StagingOperations>,
    republish_policy: RepublishPolicy,
}

impl DeploymentOrchestrator {
    pub fn new(cluster: Arc<dyn ClusterOperations>, stager: Arc<dyn StagingOperations>) -> Self {
        DeploymentOrchestrator {
            cluster,
            stager,
            republish_policy: RepublishPolicy::default(),
        }
    }

    pub fn with_republish_policy(mut self, policy: RepublishPolicy) -> Self {
        self.republish_policy = policy;
        self
    }

    fn require(value: &str, field: &'static str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(DeploymentError::IncompleteProfile(field));
        }
        Ok(())
    }

    fn require_identity(profile: &ResolvedProfile) -> Result<()> {
        Self::require(&profile.application_type_name, "ApplicationTypeName")?;
        Self::require(&profile.application_type_version, "ApplicationTypeVersion")
    }

    /*
     * Connects, then copies the staged package into the image store under the
     * application type name and registers it. Returns the open connection and
     * the image store connection string for the steps that follow.
     */
    fn connect_and_register(
        &self,
        profile: &ResolvedProfile,
        package: &Path,
    ) -> Result<(ClusterConnection, String)> {
        let type_name = profile.application_type_name.as_str();
        let connection = self
            .cluster
            .connect(&profile.cluster_connection_parameters)?;
        log::debug!(
            "Orchestrator: Connected to '{}' (session {}).",
            connection.endpoint,
            connection.session_id
        );

        let cluster_manifest = self.cluster.get_cluster_manifest(&connection)?;
        let image_store = manifests::image_store_connection_string(
            Path::new("<cluster manifest>"),
            &cluster_manifest,
        )
        .map_err(ClusterError::from)?;

        let staged = self.stager.stage_package(package, type_name)?;
        log::info!("Orchestrator: Copying package {package:?} to image store as '{type_name}'.");
        self.cluster
            .copy_package(&connection, staged.path(), type_name, Some(&image_store))?;
        drop(staged);

        log::info!("Orchestrator: Registering application type '{type_name}'.");
        self.cluster.register_type(&connection, type_name)?;
        Ok((connection, image_store))
    }

    pub fn publish(&self, profile: &ResolvedProfile, package: &Path) -> Result<()> {
        log::trace!(
            "Orchestrator: Publishing '{}' from {package:?}",
            profile.application_name
        );
        Self::require_identity(profile)?;
        Self::require(&profile.application_name, "ApplicationName")?;

        let (connection, image_store) = self.connect_and_register(profile, package)?;

        log::info!(
            "Orchestrator: Creating application '{}' of type {} {}.",
            profile.application_name,
            profile.application_type_name,
            profile.application_type_version
        );
        self.cluster.create_application(
            &connection,
            &CreateApplicationRequest {
                application_name: &profile.application_name,
                type_name: &profile.application_type_name,
                type_version: &profile.application_type_version,
                parameters: &profile.application_parameters,
            },
        )?;

        self.cluster.remove_staged_package(
            &connection,
            &profile.application_type_name,
            Some(&image_store),
        )?;
        log::info!("Orchestrator: Published '{}'.", profile.application_name);
        Ok(())
    }

    pub fn remove(&self, profile: &ResolvedProfile) -> Result<()> {
        log::trace!("Orchestrator: Removing '{}'", profile.application_name);
        Self::require_identity(profile)?;
        Self::require(&profile.application_name, "ApplicationName")?;

        let connection = self
            .cluster
            .connect(&profile.cluster_connection_parameters)?;

        log::info!("Orchestrator: Deleting application '{}'.", profile.application_name);
        self.cluster
            .delete_application(&connection, &profile.application_name, true)?;

        log::info!(
            "Orchestrator: Unregistering application type {} {}.",
            profile.application_type_name,
            profile.application_type_version
        );
        self.cluster.unregister_type(
            &connection,
            &profile.application_type_name,
            &profile.application_type_version,
            true,
        )?;
        Ok(())
    }

    /*
     * Remove followed by publish. Under `ContinueOnRemoveFailure` a failed
     * removal is logged and carried in the report while publish still runs;
     * under `AbortOnRemoveFailure` the removal error is returned and publish
     * is not attempted. A publish failure is always returned as the error.
     */
    pub fn republish(&self, profile: &ResolvedProfile, package: &Path) -> Result<RepublishReport> {
        let remove_error = match self.remove(profile) {
            Ok(()) => None,
            Err(e) => match self.republish_policy {
                RepublishPolicy::AbortOnRemoveFailure => {
                    log::error!("Orchestrator: Removal failed, not publishing: {e}");
                    return Err(e);
                }
                RepublishPolicy::ContinueOnRemoveFailure => {
                    log::warn!("Orchestrator: Removal failed, publishing anyway: {e}");
                    Some(e)
                }
            },
        };
        self.publish(profile, package)?;
        Ok(RepublishReport { remove_error })
    }

    pub fn upgrade(&self, profile: &ResolvedProfile, package: &Path) -> Result<()> {
        log::trace!(
            "Orchestrator: Upgrading '{}' from {package:?}",
            profile.application_name
        );
        let upgrade_params = profile
            .upgrade_params
            .as_ref()
            .ok_or(DeploymentError::MissingUpgradeParameters)?;
        Self::require_identity(profile)?;

        let (connection, image_store) = self.connect_and_register(profile, package)?;

        log::info!(
            "Orchestrator: Starting upgrade of '{}' to {}.",
            profile.application_name,
            profile.application_type_version
        );
        self.cluster.start_upgrade(&connection, upgrade_params)?;

        self.cluster.remove_staged_package(
            &connection,
            &profile.application_type_name,
            Some(&image_store),
        )?;
        Ok(())
    }
}
