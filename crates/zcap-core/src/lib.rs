//! zcap core - device identity and provenance signing for media capture.
//!
//! This crate implements:
//! - Credential storage abstraction (in-memory and sealed file store)
//! - Hardware-bound device key, wallet key and escrowed content key managers
//! - Device attestation and registration with the provenance API
//! - First-run setup state machine with retry and full reset
//! - Capture payload signing, verification and publish

#![forbid(unsafe_code)]

// Key managers
pub mod device_identity;
pub mod wallet;
pub mod content_key;

// Flows
pub mod attestation;
pub mod setup;
pub mod capture;

// Wire types and remote seams
pub mod api;
pub mod payload;
pub mod ledger;

// Infrastructure
pub mod store;
pub mod settings;
pub mod config;
pub mod services;

// Supporting modules
pub mod errors;
pub mod platform;
pub mod software;
pub mod harness;

// Optional HTTP clients
#[cfg(feature = "http")]
pub mod http;

#[cfg(test)]
mod proptests;
