/*
 * This module consolidates the platform-agnostic engine of the deployer:
 * reading XML documents, extracting manifest facts, merging attribute maps,
 * resolving publish profiles, the cluster-management boundary (with a local
 * directory-backed implementation), package staging and archives, and the
 * persisted settings.
 */
pub mod archiver;
pub mod cluster;
pub mod config;
pub mod documents;
pub mod local_cluster;
pub mod manifests;
pub mod merge;
pub mod models;
pub mod path_utils;
pub mod profiles;
pub mod staging;

// Re-export key structures and enums
pub use models::ResolvedProfile;

// Re-export profile resolution items
pub use profiles::{
    CoreProfileResolver, ManifestLocation, ProfileError, ProfileResolverOperations,
};

// Re-export cluster boundary items
pub use cluster::{ClusterConnection, ClusterError, ClusterOperations, CreateApplicationRequest};
pub use local_cluster::LocalClusterManager;

// Re-export staging items
pub use staging::{CoreStager, StagingError, StagingOperations};

// Re-export config related items
pub use config::{ConfigManagerOperations, CoreConfigManager, DeploySettings, RepublishPolicy};
