/*
 * This module resolves a publish profile document into a `ResolvedProfile`.
 * A profile names the cluster connection, the copy/register/upgrade settings
 * and, through a profile-relative path, the application parameter file. The
 * resolver pulls in that parameter file and the application manifest that
 * sits beside the profile's folder, layers the manifest's type identity over
 * the profile's own fields, and prepares the upgrade parameter set when the
 * profile asks for an upgrade deployment.
 *
 * It includes a trait for resolution (`ProfileResolverOperations`) so the
 * command layer can be exercised with other sources, and the concrete
 * file-backed implementation (`CoreProfileResolver`).
 */
use super::documents::{self, DocumentError, child_element, read_element_attributes};
use super::manifests;
use super::merge::merge_maps;
use super::models::{
    APPLICATION_NAME_KEY, APPLICATION_PARAMETER_KEY, APPLICATION_TYPE_NAME_KEY,
    APPLICATION_TYPE_VERSION_KEY, AttributeMap, AttributeValue, FABRIC_NAMESPACE,
    FABRIC_NAMESPACE_KEY, ResolvedProfile, UpgradeDeployment, UpgradeParams, UpgradeValue,
};
use super::path_utils;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_MANIFEST_RELATIVE_PATH: &str =
    "../ApplicationPackageRoot/ApplicationManifest.xml";

const CLUSTER_CONNECTION_SECTION: &str = "ClusterConnectionParameters";
const UPGRADE_DEPLOYMENT_SECTION: &str = "UpgradeDeployment";
const COPY_PACKAGE_SECTION: &str = "CopyPackageParameters";
const REGISTER_APPLICATION_SECTION: &str = "RegisterApplicationParameters";
const UPGRADE_PARAMETERS_SECTION: &str = "Parameters";
const PARAMETER_FILE_ELEMENT: &str = "ApplicationParameterFile";

#[derive(Debug)]
pub enum ProfileError {
    ProfileNotFound(PathBuf),
    Document(DocumentError),
    Io(io::Error),
}

impl ProfileError {
    /// True when resolution failed because some referenced file does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            ProfileError::ProfileNotFound(_) => true,
            ProfileError::Document(e) => e.is_not_found(),
            ProfileError::Io(e) => e.kind() == io::ErrorKind::NotFound,
        }
    }
}

impl From<DocumentError> for ProfileError {
    fn from(err: DocumentError) -> Self {
        ProfileError::Document(err)
    }
}

impl From<io::Error> for ProfileError {
    fn from(err: io::Error) -> Self {
        ProfileError::Io(err)
    }
}

impl std::fmt::Display for ProfileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileError::ProfileNotFound(path) => write!(f, "Publish profile not found: {path:?}"),
            ProfileError::Document(e) => write!(f, "{e}"),
            ProfileError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ProfileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProfileError::Document(e) => Some(e),
            ProfileError::Io(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProfileError>;

/// Where the application manifest is looked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLocation {
    /// A path relative to the profile's folder (`/` or `\` separated).
    RelativeToProfile(String),
    Explicit(PathBuf),
}

impl Default for ManifestLocation {
    fn default() -> Self {
        ManifestLocation::RelativeToProfile(DEFAULT_MANIFEST_RELATIVE_PATH.to_string())
    }
}

impl ManifestLocation {
    pub fn locate(&self, profile_dir: &Path) -> PathBuf {
        match self {
            ManifestLocation::RelativeToProfile(relative) => {
                path_utils::join_relative_path(profile_dir, relative)
            }
            ManifestLocation::Explicit(path) => path.clone(),
        }
    }
}

pub trait ProfileResolverOperations: Send + Sync {
    fn resolve(&self, profile_path: &Path) -> Result<ResolvedProfile>;
}

// What the profile document itself says, before any other file is consulted.
#[derive(Debug)]
struct ProfileDocument {
    root_attributes: AttributeMap,
    cluster_connection_parameters: AttributeMap,
    upgrade_deployment: Option<UpgradeDeployment>,
    copy_package_parameters: AttributeMap,
    register_application_parameters: AttributeMap,
    parameter_file_relative: String,
}

pub struct CoreProfileResolver {
    manifest_location: ManifestLocation,
}

impl CoreProfileResolver {
    pub fn new() -> Self {
        CoreProfileResolver {
            manifest_location: ManifestLocation::default(),
        }
    }

    pub fn with_manifest_location(manifest_location: ManifestLocation) -> Self {
        CoreProfileResolver { manifest_location }
    }

    fn read_profile_document(profile_path: &Path) -> Result<ProfileDocument> {
        let document = documents::with_document(profile_path, |doc| {
            let root = doc.root_element();

            let upgrade_deployment = child_element(root, UPGRADE_DEPLOYMENT_SECTION).map(|node| {
                let mut upgrade = UpgradeDeployment {
                    attributes: read_element_attributes(node),
                    parameters: documents::read_section_attributes(
                        node,
                        UPGRADE_PARAMETERS_SECTION,
                    ),
                };
                // The declared mode becomes a switch inside the parameter set.
                if let Some(mode) = upgrade.mode().map(str::to_string) {
                    upgrade.parameters.insert(mode, AttributeValue::Flag(true));
                }
                upgrade
            });

            let parameter_file_relative = child_element(root, PARAMETER_FILE_ELEMENT)
                .and_then(|node| node.attribute("Path"))
                .map(str::to_string)
                .ok_or_else(|| {
                    DocumentError::missing(profile_path, "ApplicationParameterFile/@Path")
                })?;

            Ok(ProfileDocument {
                root_attributes: read_element_attributes(root),
                cluster_connection_parameters: documents::read_section_attributes(
                    root,
                    CLUSTER_CONNECTION_SECTION,
                ),
                upgrade_deployment,
                copy_package_parameters: documents::read_section_attributes(
                    root,
                    COPY_PACKAGE_SECTION,
                ),
                register_application_parameters: documents::read_section_attributes(
                    root,
                    REGISTER_APPLICATION_SECTION,
                ),
                parameter_file_relative,
            })
        })?;
        Ok(document)
    }

    /*
     * Builds the upgrade-ready parameter set from the profile's upgrade
     * parameters. Name, target version and application parameters always come
     * from the resolved configuration, replacing same-named entries.
     */
    fn build_upgrade_params(
        upgrade: &UpgradeDeployment,
        resolved: &ResolvedProfile,
    ) -> Option<UpgradeParams> {
        if upgrade.parameters.is_empty() {
            return None;
        }
        let mut params: UpgradeParams = upgrade
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), UpgradeValue::Attribute(v.clone())))
            .collect();
        params.insert(
            APPLICATION_NAME_KEY.to_string(),
            UpgradeValue::Attribute(AttributeValue::Text(resolved.application_name.clone())),
        );
        params.insert(
            APPLICATION_TYPE_VERSION_KEY.to_string(),
            UpgradeValue::Attribute(AttributeValue::Text(
                resolved.application_type_version.clone(),
            )),
        );
        params.insert(
            APPLICATION_PARAMETER_KEY.to_string(),
            UpgradeValue::Table(resolved.application_parameters.clone()),
        );
        Some(params)
    }
}

impl Default for CoreProfileResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn text_field(map: &AttributeMap, key: &str) -> String {
    map.get(key).map(ToString::to_string).unwrap_or_default()
}

impl ProfileResolverOperations for CoreProfileResolver {
    fn resolve(&self, profile_path: &Path) -> Result<ResolvedProfile> {
        log::trace!("ProfileResolver: Resolving publish profile {profile_path:?}");
        if !profile_path.is_file() {
            log::debug!("ProfileResolver: Profile {profile_path:?} does not exist.");
            return Err(ProfileError::ProfileNotFound(profile_path.to_path_buf()));
        }
        let profile_path = std::path::absolute(profile_path)?;
        let profile_dir = path_utils::containing_dir(&profile_path);

        let document = Self::read_profile_document(&profile_path)?;

        let application_parameter_file =
            path_utils::join_relative_path(&profile_dir, &document.parameter_file_relative);
        log::debug!(
            "ProfileResolver: Application parameter file resolved to {application_parameter_file:?}"
        );
        let application_name = manifests::extract_application_name(&application_parameter_file)?;
        let application_parameters =
            manifests::extract_application_parameters(&application_parameter_file)?;

        let manifest_path = self.manifest_location.locate(&profile_dir);
        let identity = match manifests::extract_application_identity(&manifest_path) {
            Ok(identity) => identity,
            Err(DocumentError::Parse { path, message }) => {
                log::warn!(
                    "ProfileResolver: Could not load application manifest {path:?}: {message}"
                );
                None
            }
            Err(e) => return Err(e.into()),
        };

        let mut profile_fields = document.root_attributes.clone();
        profile_fields.insert(
            APPLICATION_NAME_KEY.to_string(),
            AttributeValue::Text(application_name.clone()),
        );
        let properties = match &identity {
            Some(identity) => merge_maps(&profile_fields, &identity.to_attribute_map()),
            None => {
                log::warn!(
                    "ProfileResolver: No application type identity in {manifest_path:?}; keeping profile values."
                );
                profile_fields
            }
        };

        let fabric_namespace = match properties.get(FABRIC_NAMESPACE_KEY) {
            Some(value) => value.to_string(),
            None => FABRIC_NAMESPACE.to_string(),
        };

        let mut resolved = ResolvedProfile {
            cluster_connection_parameters: document.cluster_connection_parameters,
            upgrade_deployment: document.upgrade_deployment,
            copy_package_parameters: document.copy_package_parameters,
            register_application_parameters: document.register_application_parameters,
            application_parameter_file,
            application_name,
            application_parameters,
            application_type_name: text_field(&properties, APPLICATION_TYPE_NAME_KEY),
            application_type_version: text_field(&properties, APPLICATION_TYPE_VERSION_KEY),
            fabric_namespace,
            properties,
            upgrade_params: None,
            profile_path,
        };
        resolved.upgrade_params = resolved
            .upgrade_deployment
            .as_ref()
            .and_then(|upgrade| Self::build_upgrade_params(upgrade, &resolved));

        log::debug!(
            "ProfileResolver: Resolved '{}' as {} {} (upgrade parameters: {}).",
            resolved.application_name,
            resolved.application_type_name,
            resolved.application_type_version,
            resolved.upgrade_params.is_some()
        );
        Ok(resolved)
    }
}
