//! Registry of external binaries a run depends on.
//!
//! Entries keep insertion order (reported that way in errors) and are unique by
//! name. The registry is assembled per run from the enabled features, then
//! checked once before anything external is mutated.

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::command::{CommandInvocation, CommandRunner};
use crate::config::ProvisioningSpec;
use crate::{Error, Result, CLUSTERCTL, KIND, KUBECTL, TRIDENTCTL};

/// Ordered, name-keyed set of required tools
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    name: String,
    tools: IndexMap<String, CommandInvocation>,
}

impl ToolRegistry {
    /// Empty registry for the named provisioner
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: IndexMap::new(),
        }
    }

    /// Tools a run of `spec` needs: kind, clusterctl and kubectl, plus
    /// tridentctl when the SolidFire addon is enabled
    pub fn for_spec(spec: &ProvisioningSpec) -> Self {
        let mut registry = Self::new("capv");
        for tool in [KIND, CLUSTERCTL, KUBECTL] {
            registry.add_command(tool, CommandInvocation::new(tool));
        }
        if spec.addons.solidfire.enable {
            registry.add_command(TRIDENTCTL, CommandInvocation::new(TRIDENTCTL));
        }
        registry
    }

    /// Name of the provisioner this registry belongs to
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a tool. Re-adding a name replaces its invocation in place.
    pub fn add_command(&mut self, name: impl Into<String>, invocation: CommandInvocation) {
        self.tools.insert(name.into(), invocation);
    }

    /// Builder form of [`ToolRegistry::add_command`]
    pub fn with_command(mut self, name: impl Into<String>, invocation: CommandInvocation) -> Self {
        self.add_command(name, invocation);
        self
    }

    /// Drop a tool, keeping the order of the rest
    pub fn remove(&mut self, name: &str) -> Option<CommandInvocation> {
        self.tools.shift_remove(name)
    }

    /// Whether a tool is registered
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names in insertion order
    pub fn get_all(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Names whose binaries are not on `$PATH`, in insertion order
    pub fn exist(&self, runner: &dyn CommandRunner) -> Vec<String> {
        self.tools
            .iter()
            .filter(|(_, invocation)| !runner.exists(invocation))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Fail with every missing tool at once
    pub fn preflight(&self, runner: &dyn CommandRunner) -> Result<()> {
        let missing = self.exist(runner);
        if !missing.is_empty() {
            return Err(Error::ToolsMissing { names: missing });
        }
        debug!(registry = %self.name, tools = ?self.get_all(), "all tools present");
        info!(registry = %self.name, count = self.tools.len(), "preflight checks passed");
        Ok(())
    }
}
