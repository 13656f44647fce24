//! Core pipeline for RelSpec: annotated record types are parsed into a
//! typed query IR and checked against a live database catalog, producing
//! the generator-ready form exported via the `prelude`.
#![warn(unreachable_pub)]

pub mod analyze;
pub mod catalog;
pub mod check;
pub mod error;
pub mod ident;
pub mod ir;
pub mod predicate;
pub mod reflect;
pub mod typecheck;

// test
#[cfg(test)]
pub(crate) mod test_fixtures;

pub use error::Error;

/// Run the whole pipeline over one annotated record type: analyze it into
/// the unchecked IR, then check it against `catalog`. Query types produce
/// the generator-ready IR; filter types check to `None`.
pub fn process(
    ty: &reflect::TypeDesc,
    catalog: &catalog::Catalog,
) -> Result<Option<ir::CheckedQuery>, Error> {
    let target = analyze::analyze_type(ty)?;
    let checked = check::Checker::new(catalog).check(&target)?;

    Ok(checked)
}

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No errors, caches, or stage internals are re-exported here.
///

pub mod prelude {
    pub use crate::{
        catalog::{Catalog, CatalogSource},
        ident::{ColId, RelId},
        ir::{CheckedQuery, FilterSpec, QueryKind, QuerySpec, Target},
        predicate::{Predicate, Quantifier},
        reflect::{Directive, FieldDesc, TypeDesc, TypeKind},
    };
}
