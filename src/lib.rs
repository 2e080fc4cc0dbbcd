//! Deployment discovery and explorer source-verification tracking for EVM
//! smart contracts.
//!
//! [`studio::Studio`] is the entry point: it reconstructs a wallet's
//! deployments from block-explorer history, fills in missing token names
//! over JSON-RPC, and drives source verification through submission,
//! polling and an already-verified sweep. [`tools`] exposes the same
//! operations to tool-calling clients.

pub mod bootstrap;
pub mod chains;
pub mod cli;
pub mod config;
pub mod decoder;
pub mod discovery;
pub mod error;
pub mod explorer;
pub mod hydration;
pub mod records;
pub mod rpc;
pub mod settings;
pub mod store;
pub mod studio;
pub mod tools;
pub mod verification;

pub use config::Config;
pub use error::{Error, ErrorPayload};
pub use studio::Studio;
