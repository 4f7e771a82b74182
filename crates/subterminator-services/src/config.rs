//! `ServiceConfig` and `ServiceRegistry`: per-service policy as data, not
//! branching code.
//!
//! Grounded on `openclaw-agent/src/tools.rs`'s registry-of-boxed-behavior
//! pattern (`ToolRegistry` mapping name -> `Box<dyn Tool>`), generalized
//! here from trait objects to plain predicate function pointers, since a
//! service's entire policy is a handful of pure checks over a snapshot —
//! no per-service state, no trait needed.

use std::collections::HashMap;

use subterminator_core::{EngineError, NormalizedSnapshot, ToolCall};

/// `(proposed tool, current snapshot) -> bool`. Fires when the action the
/// LLM is about to take is irreversible enough to need a human nod first.
pub type CheckpointPredicate = fn(&ToolCall, &NormalizedSnapshot) -> bool;

/// `snapshot -> bool`. Used for success/failure/auth-wall detection, none
/// of which depend on the tool that produced the snapshot.
pub type SnapshotPredicate = fn(&NormalizedSnapshot) -> bool;

/// Immutable per-service policy, registered once at startup.
pub struct ServiceConfig {
    pub name: &'static str,
    /// Minimal ambient surface for `subterminator list`; not a stand-in for
    /// the excluded fuzzy-matching interactive menu.
    pub description: &'static str,
    /// Where the Task Runner navigates at startup, before the first
    /// snapshot is captured.
    pub initial_url: &'static str,
    /// Formatted into the seed user message alongside the first snapshot,
    /// telling the LLM what it's trying to accomplish.
    pub goal_template: &'static str,
    pub system_prompt_addition: &'static str,
    pub checkpoint_conditions: Vec<CheckpointPredicate>,
    pub success_indicators: Vec<SnapshotPredicate>,
    pub failure_indicators: Vec<SnapshotPredicate>,
    pub auth_edge_case_detectors: Vec<SnapshotPredicate>,
}

impl ServiceConfig {
    /// True if any checkpoint predicate or any auth detector fires —
    /// the full "should we pause before running this tool" question.
    pub fn should_checkpoint(&self, tool: &ToolCall, snapshot: &NormalizedSnapshot) -> bool {
        self.checkpoint_conditions.iter().any(|p| p(tool, snapshot))
            || self.auth_edge_case_detectors.iter().any(|p| p(snapshot))
    }

    pub fn is_auth_wall(&self, snapshot: &NormalizedSnapshot) -> bool {
        self.auth_edge_case_detectors.iter().any(|p| p(snapshot))
    }

    /// Failure indicators override success: check failure first.
    pub fn verify(&self, snapshot: &NormalizedSnapshot) -> Option<bool> {
        if self.failure_indicators.iter().any(|p| p(snapshot)) {
            Some(false)
        } else if self.success_indicators.iter().any(|p| p(snapshot)) {
            Some(true)
        } else {
            None
        }
    }
}

/// `name -> ServiceConfig`. Built once at process startup from the
/// compiled-in service modules.
pub struct ServiceRegistry {
    services: HashMap<&'static str, ServiceConfig>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    pub fn register(&mut self, config: ServiceConfig) {
        self.services.insert(config.name, config);
    }

    pub fn get(&self, name: &str) -> Result<&ServiceConfig, EngineError> {
        self.services
            .get(name)
            .ok_or_else(|| EngineError::ServiceNotFound(name.to_string()))
    }

    /// `(name, description)` pairs for `subterminator list`, in
    /// registration order isn't guaranteed (HashMap) so callers sort if a
    /// stable order matters for display.
    pub fn list(&self) -> Vec<(&'static str, &'static str)> {
        self.services.values().map(|s| (s.name, s.description)).collect()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(crate::netflix::config());
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_service_raises_service_not_found() {
        let registry = ServiceRegistry::default();
        let err = registry.get("hulu").unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn default_registry_has_netflix() {
        let registry = ServiceRegistry::default();
        assert!(registry.get("netflix").is_ok());
    }
}
