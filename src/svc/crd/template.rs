//! # Template module
//!
//! This module provide the pod template embedded in database custom resources
//! and the helpers to default and validate it.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, Container, EnvVar, PodSecurityContext, ResourceRequirements,
    SeccompProfile, SecurityContext, Toleration, Volume, VolumeMount,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::svc::{
    crd::{Kind, MetaTemplate},
    k8s::resource::{self, requirements},
};

// -----------------------------------------------------------------------------
// Constants

pub const SECCOMP_PROFILE_RUNTIME_DEFAULT: &str = "RuntimeDefault";

// -----------------------------------------------------------------------------
// Resource presets

/// resources given to a database container that does not request any
pub fn default_resources() -> ResourceRequirements {
    requirements(".500", "1024Mi", "1024Mi")
}

/// resources given to an init container that does not request any
pub fn default_init_container_resources() -> ResourceRequirements {
    requirements(".200", "256Mi", "512Mi")
}

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, PartialEq, Eq, Clone, Debug)]
pub enum Error {
    #[error("Cannot use a reserve volume name: {0}")]
    ReservedVolume(String),
    #[error("Can't use a reserve volume name: {0}")]
    ReservedVolumeName(String),
    #[error("Can't use a reserved volume name: {0}")]
    ReservedName(String),
    #[error("Can't use a reserve volume mount path name: {0}")]
    ReservedMountPath(String),
}

impl Error {
    /// returns the error as reported for the given kind, some kinds word the
    /// reserved volume error with a contraction
    pub fn reported_for(self, kind: Kind) -> Self {
        match (self, kind) {
            (Self::ReservedVolume(name), Kind::Druid | Kind::Singlestore | Kind::Solr) => {
                Self::ReservedVolumeName(name)
            }
            (Self::ReservedVolume(name), Kind::MsSqlServer) => Self::ReservedName(name),
            (err, _) => err,
        }
    }
}

// -----------------------------------------------------------------------------
// PodSpec structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct PodSpec {
    #[serde(rename = "containers", default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
    #[serde(
        rename = "initContainers",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub init_containers: Vec<Container>,
    #[serde(rename = "volumes", default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(rename = "volumeMounts", default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(rename = "resources", default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(
        rename = "securityContext",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub security_context: Option<PodSecurityContext>,
    #[serde(
        rename = "serviceAccountName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub service_account_name: Option<String>,
    #[serde(
        rename = "nodeSelector",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub node_selector: BTreeMap<String, String>,
    #[serde(rename = "tolerations", default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(rename = "affinity", default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
}

// -----------------------------------------------------------------------------
// PodTemplateSpec structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct PodTemplateSpec {
    #[serde(rename = "metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetaTemplate>,
    #[serde(rename = "controller", default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<MetaTemplate>,
    #[serde(rename = "spec", default)]
    pub spec: PodSpec,
}

impl PodTemplateSpec {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// returns the container with the given name, it is appended if missing
    pub fn container_mut(&mut self, name: &str) -> &mut Container {
        upsert(&mut self.spec.containers, name)
    }

    /// returns the init container with the given name, it is appended if
    /// missing
    pub fn init_container_mut(&mut self, name: &str) -> &mut Container {
        upsert(&mut self.spec.init_containers, name)
    }

    /// returns the environment variables of the container with the given name
    pub fn container_env(&self, name: &str) -> &[EnvVar] {
        self.spec
            .containers
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.env.as_deref())
            .unwrap_or_default()
    }

    /// returns the first environment variable of the container that is
    /// managed by the operator
    pub fn forbidden_env(&self, container: &str, forbidden: &[&str]) -> Option<&str> {
        self.container_env(container)
            .iter()
            .map(|env| env.name.as_str())
            .find(|name| forbidden.contains(name))
    }

    /// applies the restricted security context to the database container and
    /// to its init container, the pod file system group is the database user.
    ///
    /// `with_group` also sets the group of the containers to the user
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    pub fn set_security_context_defaults(
        &mut self,
        container: &str,
        init_container: &str,
        run_as_user: Option<i64>,
        with_group: bool,
    ) {
        let pod = self.spec.security_context.get_or_insert_with(Default::default);
        if pod.fs_group.is_none() {
            pod.fs_group = run_as_user;
        }

        restrict(
            self.container_mut(container)
                .security_context
                .get_or_insert_with(Default::default),
            run_as_user,
            with_group,
        );

        restrict(
            self.init_container_mut(init_container)
                .security_context
                .get_or_insert_with(Default::default),
            run_as_user,
            with_group,
        );
    }

    /// applies the given resources to the container if it exists and does not
    /// declare any requests or limits
    pub fn set_container_resources_defaults(
        &mut self,
        name: &str,
        defaults: &ResourceRequirements,
    ) {
        if let Some(container) = self.spec.containers.iter_mut().find(|c| c.name == name) {
            set_resources_if_unset(container, defaults);
        }
    }

    /// applies the given resources to the init container if it exists and does
    /// not declare any requests or limits
    pub fn set_init_container_resources_defaults(
        &mut self,
        name: &str,
        defaults: &ResourceRequirements,
    ) {
        if let Some(container) = self
            .spec
            .init_containers
            .iter_mut()
            .find(|c| c.name == name)
        {
            set_resources_if_unset(container, defaults);
        }
    }

    /// returns an error on the first user volume using a reserved name
    pub fn validate_volumes<S>(&self, reserved: &[S]) -> Result<(), Error>
    where
        S: AsRef<str>,
    {
        for name in reserved {
            if self.spec.volumes.iter().any(|v| v.name == name.as_ref()) {
                return Err(Error::ReservedVolume(name.as_ref().to_owned()));
            }
        }

        Ok(())
    }

    /// returns an error on the first volume mount targeting a reserved path,
    /// mounts of containers, init containers and of the template are checked
    pub fn validate_volume_mount_paths(&self, reserved: &[&str]) -> Result<(), Error> {
        let mounts = self
            .spec
            .containers
            .iter()
            .chain(self.spec.init_containers.iter())
            .flat_map(|c| c.volume_mounts.iter().flatten())
            .chain(self.spec.volume_mounts.iter());

        for mount in mounts {
            if let Some(path) = reserved.iter().find(|path| **path == mount.mount_path) {
                return Err(Error::ReservedMountPath(path.to_string()));
            }
        }

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Helpers

fn upsert<'a>(containers: &'a mut Vec<Container>, name: &str) -> &'a mut Container {
    let idx = match containers.iter().position(|c| c.name == name) {
        Some(idx) => idx,
        None => {
            containers.push(Container {
                name: name.to_owned(),
                ..Default::default()
            });
            containers.len() - 1
        }
    };

    &mut containers[idx]
}

fn set_resources_if_unset(container: &mut Container, defaults: &ResourceRequirements) {
    let resources = container.resources.get_or_insert_with(Default::default);
    if resource::is_unset(resources) {
        resource::set_default_resource_limits(resources, defaults);
    }
}

/// fills the unset fields of the security context with a restricted profile
pub fn restrict(ctx: &mut SecurityContext, run_as_user: Option<i64>, with_group: bool) {
    ctx.allow_privilege_escalation.get_or_insert(false);
    ctx.capabilities.get_or_insert_with(|| Capabilities {
        drop: Some(vec!["ALL".to_owned()]),
        ..Default::default()
    });
    ctx.run_as_non_root.get_or_insert(true);

    if ctx.run_as_user.is_none() {
        ctx.run_as_user = run_as_user;
    }

    if with_group && ctx.run_as_group.is_none() {
        ctx.run_as_group = run_as_user;
    }

    ctx.seccomp_profile.get_or_insert_with(|| SeccompProfile {
        type_: SECCOMP_PROFILE_RUNTIME_DEFAULT.to_owned(),
        ..Default::default()
    });
}
