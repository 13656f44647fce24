//! RelSpec — annotation-driven query specifications verified against a
//! live PostgreSQL catalog.
//!
//! This is the public meta-crate. Downstream users depend on **relspec**
//! only; it re-exports the stable surface of `relspec-core`.

pub use relspec_core as core;

pub use relspec_core::{Error, process};

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

///
/// Prelude
///

pub mod prelude {
    pub use relspec_core::prelude::*;
}
