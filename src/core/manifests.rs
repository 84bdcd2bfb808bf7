/*
 * Readers that pull individual facts out of the documents surrounding a
 * publish profile: the application type identity from an application
 * manifest, the application instance name and parameters from an application
 * parameter file, and the image-store connection string from a cluster
 * manifest.
 */
use super::documents::{self, DocumentError, Result, child_element, child_elements};
use super::models::{ApplicationIdentity, ApplicationParameterSet};
use std::path::Path;

const APPLICATION_MANIFEST_ROOT: &str = "ApplicationManifest";
const IMAGE_STORE_SECTION: &str = "Management";
const IMAGE_STORE_PARAMETER: &str = "ImageStoreConnectionString";

/*
 * Reads `ApplicationTypeName`/`ApplicationTypeVersion` from an application
 * manifest. A missing file or malformed XML is an error. A well-formed document
 * that is not an application manifest, or lacks either attribute, yields
 * `Ok(None)`: there is no identity to contribute and the caller keeps whatever
 * it already had.
 */
pub fn extract_application_identity(path: &Path) -> Result<Option<ApplicationIdentity>> {
    documents::with_document(path, |doc| {
        let root = doc.root_element();
        if root.tag_name().name() != APPLICATION_MANIFEST_ROOT {
            log::warn!(
                "Manifests: {path:?} has root '{}', expected '{APPLICATION_MANIFEST_ROOT}'.",
                root.tag_name().name()
            );
            return Ok(None);
        }
        match (
            root.attribute("ApplicationTypeName"),
            root.attribute("ApplicationTypeVersion"),
        ) {
            (Some(name), Some(version)) => {
                log::debug!("Manifests: {path:?} declares application type {name} {version}.");
                Ok(Some(ApplicationIdentity::new(name, version)))
            }
            _ => {
                log::warn!("Manifests: {path:?} does not declare a complete application type.");
                Ok(None)
            }
        }
    })
}

pub fn extract_application_name(path: &Path) -> Result<String> {
    documents::with_document(path, |doc| {
        doc.root_element()
            .attribute("Name")
            .map(str::to_string)
            .ok_or_else(|| DocumentError::missing(path, "Application/@Name"))
    })
}

/*
 * Collects `Application/Parameters/Parameter` entries into a name-to-value map.
 * Sibling nodes with other names are skipped, a later duplicate name replaces
 * an earlier one, and a missing `Value` attribute reads as an empty string.
 */
pub fn extract_application_parameters(path: &Path) -> Result<ApplicationParameterSet> {
    documents::with_document(path, |doc| {
        let mut parameters = ApplicationParameterSet::new();
        let Some(section) = child_element(doc.root_element(), "Parameters") else {
            log::debug!("Manifests: {path:?} declares no Parameters section.");
            return Ok(parameters);
        };
        for node in child_elements(section, "Parameter") {
            let Some(name) = node.attribute("Name") else {
                log::warn!("Manifests: Skipping unnamed Parameter in {path:?}.");
                continue;
            };
            parameters.insert(
                name.to_string(),
                node.attribute("Value").unwrap_or_default().to_string(),
            );
        }
        Ok(parameters)
    })
}

/*
 * Finds `FabricSettings/Section[Name="Management"]/Parameter[Name="ImageStoreConnectionString"]`
 * in cluster manifest text. `origin` labels errors.
 */
pub fn image_store_connection_string(origin: &Path, manifest_text: &str) -> Result<String> {
    documents::with_document_text(origin, manifest_text, |doc| {
        child_element(doc.root_element(), "FabricSettings")
            .into_iter()
            .flat_map(|settings| child_elements(settings, "Section"))
            .filter(|section| section.attribute("Name") == Some(IMAGE_STORE_SECTION))
            .flat_map(|section| child_elements(section, "Parameter"))
            .find(|param| param.attribute("Name") == Some(IMAGE_STORE_PARAMETER))
            .and_then(|param| param.attribute("Value"))
            .map(str::to_string)
            .ok_or_else(|| {
                DocumentError::missing(
                    origin,
                    "FabricSettings/Section[@Name='Management']/Parameter[@Name='ImageStoreConnectionString']",
                )
            })
    })
}

pub fn read_image_store_connection_string(path: &Path) -> Result<String> {
    let text = documents::load_document_text(path)?;
    image_store_connection_string(path, &text)
}
