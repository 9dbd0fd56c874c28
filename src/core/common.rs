//! Primitives shared by all kubernetes objects in the simulator.

use std::collections::BTreeMap;
use std::fmt;

use downcast_rs::{impl_downcast, Downcast};
use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};

/// Identifier of a component registered in dslab simulation.
pub type SimComponentId = u32;

/// Any event which can be emitted by simulation components or read from a trace.
/// Implemented with `#[derive(IsSimulationEvent)]`.
pub trait SimulationEvent: Downcast + DynClone + erased_serde::Serialize {}

impl_downcast!(SimulationEvent);
dyn_clone::clone_trait_object!(SimulationEvent);
erased_serde::serialize_trait_object!(SimulationEvent);

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OwnerReference {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub controller: bool,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub generate_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Simulation time in seconds.
    #[serde(default)]
    pub creation_timestamp: f64,
    #[serde(default)]
    pub generation: i64,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

pub const DEFAULT_NAMESPACE: &str = "default";

impl ObjectMeta {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    /// Owner reference marked as controller, if any.
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|owner| owner.controller)
    }

    /// Objects read from traces may omit namespace.
    pub fn set_default_namespace(&mut self) {
        if self.namespace.is_empty() {
            self.namespace = DEFAULT_NAMESPACE.to_string();
        }
    }

    /// `<namespace>/<name>` key used by stores and logs.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeResources {
    pub cpu: u32, // in millicores
    pub ram: u64, // in bytes
}

impl RuntimeResources {
    pub fn new(cpu: u32, ram: u64) -> Self {
        Self { cpu, ram }
    }

    pub fn fits_into(&self, available: &RuntimeResources) -> bool {
        self.cpu <= available.cpu && self.ram <= available.ram
    }

    pub fn saturating_add(&self, other: &RuntimeResources) -> RuntimeResources {
        RuntimeResources {
            cpu: self.cpu.saturating_add(other.cpu),
            ram: self.ram.saturating_add(other.ram),
        }
    }

    pub fn saturating_sub(&self, other: &RuntimeResources) -> RuntimeResources {
        RuntimeResources {
            cpu: self.cpu.saturating_sub(other.cpu),
            ram: self.ram.saturating_sub(other.ram),
        }
    }
}

/// True, False or Unknown.
#[derive(Default, Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::{ObjectMeta, OwnerReference, RuntimeResources};

    #[test]
    fn test_resources_arithmetic_saturates() {
        let small = RuntimeResources::new(100, 100);
        let big = RuntimeResources::new(1000, 1000);
        assert_eq!(small.saturating_sub(&big), RuntimeResources::new(0, 0));
        assert_eq!(small.saturating_add(&big), RuntimeResources::new(1100, 1100));
        assert!(small.fits_into(&big));
        assert!(!big.fits_into(&small));
    }

    #[test]
    fn test_controller_ref() {
        let mut meta = ObjectMeta::new("default", "pod");
        assert!(meta.controller_ref().is_none());
        meta.owner_references.push(OwnerReference {
            kind: "ReplicaSet".to_string(),
            name: "rs".to_string(),
            controller: true,
            ..Default::default()
        });
        assert_eq!(meta.controller_ref().unwrap().name, "rs");
        assert_eq!(meta.key(), "default/pod");
    }
}
