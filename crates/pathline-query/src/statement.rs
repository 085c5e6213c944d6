use crate::error::{Result, StoreError};
use crate::params::Params;
use sea_orm::{DatabaseBackend, Statement, Value};
use std::collections::BTreeMap;

/// A fully rendered, parameterized query ready for execution
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub values: Vec<Value>,
}

impl CompiledQuery {
    pub fn new(sql: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }

    pub fn to_statement(&self, backend: DatabaseBackend) -> Statement {
        Statement::from_sql_and_values(backend, self.sql.clone(), self.values.clone())
    }
}

/// Assigns positional `$N` placeholders to named parameters at render time.
///
/// The compiler builds expressions against named parameters and merges the
/// accompanying [`Params`] maps; a `Binder` is created once per statement and
/// hands out `$N` placeholders in first-use order. Requesting a name that was
/// never bound is a compile error, which catches components that emitted an
/// expression without returning its parameters.
#[derive(Debug)]
pub struct Binder {
    params: Params,
    order: Vec<Value>,
    assigned: BTreeMap<String, usize>,
}

impl Binder {
    pub fn new(params: Params) -> Self {
        Self {
            params,
            order: Vec::new(),
            assigned: BTreeMap::new(),
        }
    }

    /// Positional placeholder for a named parameter, e.g. `$3`
    pub fn placeholder(&mut self, name: &str) -> Result<String> {
        if let Some(index) = self.assigned.get(name) {
            return Ok(format!("${}", index + 1));
        }
        let value = self
            .params
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::invalid_query(format!("unbound parameter `{name}`")))?;
        self.order.push(value);
        let index = self.order.len() - 1;
        self.assigned.insert(name.to_string(), index);
        Ok(format!("${}", index + 1))
    }

    /// Finalize into a `CompiledQuery`, consuming the binder
    pub fn finish(self, sql: String) -> CompiledQuery {
        CompiledQuery::new(sql, self.order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_assigned_in_first_use_order() {
        let params = Params::new()
            .with("b", 2i64)
            .with("a", 1i64);
        let mut binder = Binder::new(params);

        assert_eq!(binder.placeholder("b").unwrap(), "$1");
        assert_eq!(binder.placeholder("a").unwrap(), "$2");
        // Repeated use reuses the slot
        assert_eq!(binder.placeholder("b").unwrap(), "$1");

        let query = binder.finish("SELECT $1, $2".to_string());
        assert_eq!(query.values, vec![Value::from(2i64), Value::from(1i64)]);
    }

    #[test]
    fn test_unbound_parameter_is_an_error() {
        let mut binder = Binder::new(Params::new());
        assert!(binder.placeholder("missing").is_err());
    }
}
