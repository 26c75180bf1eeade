//! # Resource module
//!
//! This module provide helpers on kubernetes [`Resource`] and on the compute
//! resources requested by their containers

use std::{cmp::Ordering, collections::BTreeMap};

use k8s_openapi::{api::core::v1::ResourceRequirements, apimachinery::pkg::api::resource::Quantity};
use serde::Serialize;

// -----------------------------------------------------------------------------
// Constants

pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";

// -----------------------------------------------------------------------------
// Helpers functions

/// returns difference between the two given object serialize as json patch
pub fn diff<T>(origin: &T, modified: &T) -> Result<json_patch::Patch, serde_json::Error>
where
    T: Serialize,
{
    Ok(json_patch::diff(
        &serde_json::to_value(origin)?,
        &serde_json::to_value(modified)?,
    ))
}

/// returns resource requirements made of a cpu request and a memory request and
/// limit
pub fn requirements(cpu: &str, memory_request: &str, memory_limit: &str) -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            (CPU.to_owned(), Quantity(cpu.to_owned())),
            (MEMORY.to_owned(), Quantity(memory_request.to_owned())),
        ])),
        limits: Some(BTreeMap::from([(
            MEMORY.to_owned(),
            Quantity(memory_limit.to_owned()),
        )])),
        ..Default::default()
    }
}

/// returns if neither requests nor limits are set
pub fn is_unset(requirements: &ResourceRequirements) -> bool {
    requirements.requests.is_none() && requirements.limits.is_none()
}

/// fills the limits and requests named in `defaults` that are missing from the
/// given requirements.
///
/// A missing limit equals the request if one is given and the default
/// otherwise, a missing request is the lowest of the limit and the default.
/// Values given by the user are kept, except a limit lower than its request
/// which is raised to the request.
pub fn set_default_resource_limits(
    requirements: &mut ResourceRequirements,
    defaults: &ResourceRequirements,
) {
    let requests = requirements.requests.to_owned().unwrap_or_default();
    let mut limits = requirements.limits.to_owned().unwrap_or_default();

    for (name, default) in defaults.limits.iter().flatten() {
        let limit = match (requests.get(name), limits.get(name)) {
            (Some(request), Some(limit)) => max(limit, request),
            (Some(request), None) => request.to_owned(),
            (None, Some(limit)) => limit.to_owned(),
            (None, None) => default.to_owned(),
        };

        limits.insert(name.to_owned(), limit);
    }

    let mut computed = requests.to_owned();
    for (name, default) in defaults.requests.iter().flatten() {
        let request = match (requests.get(name), limits.get(name)) {
            (Some(request), _) => request.to_owned(),
            (None, Some(limit)) => min(limit, default),
            (None, None) => default.to_owned(),
        };

        computed.insert(name.to_owned(), request);
    }

    if !limits.is_empty() {
        requirements.limits = Some(limits);
    }

    if !computed.is_empty() {
        requirements.requests = Some(computed);
    }
}

/// returns the value of the quantity in its base unit, `None` if the quantity
/// is not well formed
pub fn value(quantity: &Quantity) -> Option<f64> {
    let raw = quantity.0.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(raw.len());

    let (number, suffix) = raw.split_at(split);
    let number: f64 = number.parse().ok()?;
    let multiplier = match suffix {
        "" => 1f64,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        exponent if exponent.starts_with('e') || exponent.starts_with('E') => {
            10f64.powi(exponent[1..].parse().ok()?)
        }
        _ => return None,
    };

    Some(number * multiplier)
}

/// compares two quantities, `None` if one of them is not well formed
pub fn compare(a: &Quantity, b: &Quantity) -> Option<Ordering> {
    value(a)?.partial_cmp(&value(b)?)
}

fn max(a: &Quantity, b: &Quantity) -> Quantity {
    match compare(a, b) {
        Some(Ordering::Less) => b.to_owned(),
        _ => a.to_owned(),
    }
}

fn min(a: &Quantity, b: &Quantity) -> Quantity {
    match compare(a, b) {
        Some(Ordering::Greater) => b.to_owned(),
        _ => a.to_owned(),
    }
}
