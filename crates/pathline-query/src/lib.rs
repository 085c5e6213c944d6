//! # pathline-query
//!
//! Execution-engine seam for the Pathline analytics compilers.
//!
//! The query compilers in this workspace are pure functions from a request
//! specification to a [`CompiledQuery`]: one parameterized SQL string plus the
//! ordered parameter values it references. Executing that query is delegated
//! to an [`EventStore`] implementation; the compilers never touch a
//! connection themselves.
//!
//! - **Params**: immutable named parameter map. Each compiler component
//!   returns an expression plus its own `Params`; callers merge maps
//!   explicitly, so correctness never depends on call order.
//! - **CompiledQuery**: the rendered statement, with named parameters already
//!   resolved to positional `$N` values.
//! - **EventStore**: async trait over the event-log backend. The provided
//!   [`PostgresEventStore`] runs statements through `sea_orm`.

pub mod error;
pub mod params;
pub mod statement;
pub mod store;

// Re-export commonly used items
pub use error::{Result, StoreError};
pub use params::Params;
pub use statement::{Binder, CompiledQuery};
pub use store::{EventStore, PostgresEventStore};
