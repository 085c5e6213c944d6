use sea_orm::Value;
use std::collections::BTreeMap;

/// Immutable named parameter map accumulated across compiler components.
///
/// Every component that contributes an expression to a compiled query returns
/// the expression together with the `Params` it references; the caller merges
/// the maps explicitly. Names are assigned by the component that owns the
/// value (e.g. `step_0_event`, `date_from`), so two components never race for
/// the same slot and the merge is order-independent.
///
/// Positional `$N` numbering only happens when the full statement is
/// rendered, see `CompiledQuery`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: BTreeMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-entry map, convenient for leaf components
    pub fn single(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().with(name, value)
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(name.into(), value.into());
        self
    }

    /// Union of two maps. Components own distinct name prefixes, so a
    /// conflicting binding indicates a compiler bug; the left-hand value wins
    /// and the conflict is logged.
    pub fn merge(mut self, other: Params) -> Params {
        for (name, value) in other.entries {
            match self.entries.get(&name) {
                Some(existing) if *existing != value => {
                    tracing::warn!(param = %name, "conflicting parameter binding dropped");
                }
                Some(_) => {}
                None => {
                    self.entries.insert(name, value);
                }
            }
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
