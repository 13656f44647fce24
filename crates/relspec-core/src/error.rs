//! Module: error
//! Responsibility: the crate-level error type, aggregating the per-stage
//! error families behind one conversion surface.

use crate::{
    analyze::AnalysisError, catalog::CatalogError, check::TypeCheckError, ident::IdentError,
};
use thiserror::Error as ThisError;

///
/// Error
///
/// Every failure the pipeline can produce, stage by stage.
///

#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Ident(#[from] IdentError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    TypeCheck(#[from] TypeCheckError),
}

impl From<crate::check::PredicateError> for Error {
    fn from(err: crate::check::PredicateError) -> Self {
        Self::TypeCheck(err.into())
    }
}
