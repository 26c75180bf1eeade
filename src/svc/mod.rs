//! # Services module
//!
//! This module provide the database custom resources, the admission server and
//! helpers to interact with kubernetes.
pub mod catalog;
pub mod cfg;
pub mod crd;
pub mod http;
pub mod k8s;
pub mod webhook;
