/*
 * This module provides the application logic layer, centered around
 * `DeploymentOrchestrator`, which sequences publish, remove, republish and
 * upgrade against the cluster boundary for a resolved profile.
 * Unit tests for the orchestrator are in `orchestrator_tests.rs`.
 */
pub mod orchestrator;

#[cfg(test)]
mod orchestrator_tests;

pub use orchestrator::DeploymentOrchestrator;
