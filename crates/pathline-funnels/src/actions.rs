//! Collaborator seams: the action registry and the cohort directory.
//!
//! Both are external services from the compiler's point of view; the traits
//! here are the only surface it depends on. In-memory implementations are
//! provided for embedding and tests.

use crate::types::PropertyFilter;
use std::collections::HashMap;

/// One event pattern an action expands to; patterns are OR'd together
#[derive(Debug, Clone, PartialEq)]
pub struct ActionMatcher {
    pub event: String,
    pub properties: Vec<PropertyFilter>,
}

/// An action resolved to its constituent event matchers
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDefinition {
    pub id: i64,
    pub name: String,
    pub matchers: Vec<ActionMatcher>,
}

/// Resolves action references in step definitions
pub trait ActionRegistry: Send + Sync {
    fn resolve(&self, action_id: i64) -> Option<ActionDefinition>;
}

/// Resolves cohort ids to display names for result formatting
pub trait CohortDirectory: Send + Sync {
    fn display_name(&self, cohort_id: i64) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct InMemoryActionRegistry {
    actions: HashMap<i64, ActionDefinition>,
}

impl InMemoryActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, action: ActionDefinition) {
        self.actions.insert(action.id, action);
    }
}

impl ActionRegistry for InMemoryActionRegistry {
    fn resolve(&self, action_id: i64) -> Option<ActionDefinition> {
        self.actions.get(&action_id).cloned()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCohortDirectory {
    names: HashMap<i64, String>,
}

impl InMemoryCohortDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cohort_id: i64, name: impl Into<String>) {
        self.names.insert(cohort_id, name.into());
    }
}

impl CohortDirectory for InMemoryCohortDirectory {
    fn display_name(&self, cohort_id: i64) -> Option<String> {
        self.names.get(&cohort_id).cloned()
    }
}
