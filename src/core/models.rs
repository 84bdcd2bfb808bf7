/*
 * Data structures shared by the resolution engine and the deployment
 * orchestrator: the tagged attribute values read from XML elements, the
 * application identity taken from an application manifest, and the
 * `ResolvedProfile` snapshot that a single publish/remove/upgrade run consumes.
 */
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub const FABRIC_NAMESPACE: &str = "fabric:";

pub const APPLICATION_NAME_KEY: &str = "ApplicationName";
pub const APPLICATION_TYPE_NAME_KEY: &str = "ApplicationTypeName";
pub const APPLICATION_TYPE_VERSION_KEY: &str = "ApplicationTypeVersion";
pub const FABRIC_NAMESPACE_KEY: &str = "FabricNamespace";
pub const APPLICATION_PARAMETER_KEY: &str = "ApplicationParameter";
pub const UPGRADE_MODE_KEY: &str = "Mode";

/// Upgrade modes understood by the cluster's upgrade call when present as flags.
pub const UPGRADE_MODES: [&str; 3] = ["Monitored", "UnmonitoredAuto", "UnmonitoredManual"];

/// A single attribute value. Booleans are recognised once, when the element is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Flag(bool),
    Text(String),
}

impl AttributeValue {
    /*
     * Classifies a raw attribute string. Only an unambiguous `true`/`false`
     * (any letter case, surrounding whitespace ignored) becomes a flag; every
     * other value, including "yes" or "1", is kept verbatim.
     */
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("true") {
            AttributeValue::Flag(true)
        } else if trimmed.eq_ignore_ascii_case("false") {
            AttributeValue::Flag(false)
        } else {
            AttributeValue::Text(raw.to_string())
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            AttributeValue::Flag(_) => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            AttributeValue::Flag(b) => Some(*b),
            AttributeValue::Text(_) => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Flag(b) => write!(f, "{b}"),
            AttributeValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Flag(value)
    }
}

pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// Application parameter name to value, as declared in an application parameter file.
pub type ApplicationParameterSet = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApplicationIdentity {
    pub application_type_name: String,
    pub application_type_version: String,
    pub fabric_namespace: String,
}

impl ApplicationIdentity {
    pub fn new(type_name: &str, type_version: &str) -> Self {
        ApplicationIdentity {
            application_type_name: type_name.to_string(),
            application_type_version: type_version.to_string(),
            fabric_namespace: FABRIC_NAMESPACE.to_string(),
        }
    }

    /// The identity as attribute entries, keyed the way a profile would name them.
    pub fn to_attribute_map(&self) -> AttributeMap {
        let mut map = AttributeMap::new();
        map.insert(
            APPLICATION_TYPE_NAME_KEY.to_string(),
            AttributeValue::Text(self.application_type_name.clone()),
        );
        map.insert(
            APPLICATION_TYPE_VERSION_KEY.to_string(),
            AttributeValue::Text(self.application_type_version.clone()),
        );
        map.insert(
            FABRIC_NAMESPACE_KEY.to_string(),
            AttributeValue::Text(self.fabric_namespace.clone()),
        );
        map
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpgradeDeployment {
    pub attributes: AttributeMap,
    pub parameters: AttributeMap,
}

impl UpgradeDeployment {
    pub fn mode(&self) -> Option<&str> {
        self.attributes
            .get(UPGRADE_MODE_KEY)
            .and_then(AttributeValue::as_text)
    }
}

/// A value in the upgrade-ready parameter set. `Table` carries the application parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpgradeValue {
    Attribute(AttributeValue),
    Table(ApplicationParameterSet),
}

impl UpgradeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            UpgradeValue::Attribute(value) => value.as_text(),
            UpgradeValue::Table(_) => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            UpgradeValue::Attribute(value) => value.as_flag(),
            UpgradeValue::Table(_) => None,
        }
    }

    pub fn as_table(&self) -> Option<&ApplicationParameterSet> {
        match self {
            UpgradeValue::Table(table) => Some(table),
            UpgradeValue::Attribute(_) => None,
        }
    }
}

pub type UpgradeParams = BTreeMap<String, UpgradeValue>;

/// The first upgrade mode flagged `true` in an upgrade parameter set.
pub fn active_upgrade_mode(params: &UpgradeParams) -> Option<&'static str> {
    UPGRADE_MODES
        .iter()
        .copied()
        .find(|mode| params.get(*mode).and_then(UpgradeValue::as_flag) == Some(true))
}

/*
 * The fully materialized deployment configuration for one publish profile.
 * Built once per resolution call and handed, read-only, to exactly one
 * orchestration operation. `properties` holds the merged top-level scalar
 * fields (profile root attributes overlaid with the manifest identity); the
 * typed identity fields are read back out of that merge.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResolvedProfile {
    pub profile_path: PathBuf,
    pub cluster_connection_parameters: AttributeMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_deployment: Option<UpgradeDeployment>,
    pub copy_package_parameters: AttributeMap,
    pub register_application_parameters: AttributeMap,
    pub application_parameter_file: PathBuf,
    pub application_name: String,
    pub application_parameters: ApplicationParameterSet,
    pub application_type_name: String,
    pub application_type_version: String,
    pub fabric_namespace: String,
    pub properties: AttributeMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_params: Option<UpgradeParams>,
}
