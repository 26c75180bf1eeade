//! # Kubernetes module
//!
//! This module provide helpers to create a kubernetes client, compute patches
//! and report errors on fields of objects

pub mod client;
pub mod field;
pub mod resource;
