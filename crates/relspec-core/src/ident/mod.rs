//! Module: ident
//! Responsibility: validated relation and column identifiers parsed from
//! annotation literals.
//! Does not own: predicate grammar, catalog resolution, or alias scoping.
//!
//! Invariants:
//! - Segments match `[A-Za-z_]\w*`; anything else is rejected at construction.
//! - Column identifiers never collide with the reserved-word set; relation
//!   identifiers are exempt from that check.
//! - Parsed identifiers are canonical: no surrounding whitespace, qualifier
//!   and alias stored separately from the bare name.


use regex::Regex;
use serde::Serialize;
use std::{
    fmt::{self, Display},
    sync::LazyLock,
};
use thiserror::Error as ThisError;

static SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_]\w*$").expect("segment regex is valid"));

/// Words that cannot be used as a column identifier, matched
/// case-insensitively. Relation identifiers are not subject to this set.
const RESERVED_WORDS: &[&str] = &[
    "true",
    "false",
    "null",
    "unknown",
    "current_date",
    "current_time",
    "current_timestamp",
    "localtime",
    "localtimestamp",
    "session_user",
    "current_user",
    "user",
];

fn is_reserved(word: &str) -> bool {
    RESERVED_WORDS.iter().any(|w| word.eq_ignore_ascii_case(w))
}

fn is_segment(s: &str) -> bool {
    SEGMENT_RE.is_match(s)
}

///
/// IdentError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum IdentError {
    #[error("invalid relation identifier: '{literal}'")]
    BadRelId { literal: String },

    #[error("invalid column identifier: '{literal}'")]
    BadColId { literal: String },

    #[error("reserved word used as column identifier: '{literal}'")]
    ReservedColId { literal: String },
}

///
/// RelId
///
/// A relation reference parsed from `[schema.]name[:alias]`.
///

#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize)]
pub struct RelId {
    pub qual: String,
    pub name: String,
    pub alias: String,
}

impl RelId {
    /// Parse a relation identifier literal.
    pub fn parse(literal: &str) -> Result<Self, IdentError> {
        let literal = literal.trim();
        let bad = || IdentError::BadRelId {
            literal: literal.to_string(),
        };

        let (body, alias) = match literal.split_once(':') {
            Some((body, alias)) => (body, alias),
            None => (literal, ""),
        };
        if !alias.is_empty() && !is_segment(alias) {
            return Err(bad());
        }
        if alias.is_empty() && literal.contains(':') {
            return Err(bad());
        }

        let (qual, name) = match body.split_once('.') {
            Some((qual, name)) => (qual, name),
            None => ("", body),
        };
        if !qual.is_empty() && !is_segment(qual) {
            return Err(bad());
        }
        if qual.is_empty() && body.contains('.') {
            return Err(bad());
        }
        if !is_segment(name) {
            return Err(bad());
        }

        Ok(Self {
            qual: qual.to_string(),
            name: name.to_string(),
            alias: alias.to_string(),
        })
    }

    /// The key under which a loaded relation is cached and later resolved
    /// from a column qualifier: the alias when present, else the bare name.
    #[must_use]
    pub fn key(&self) -> &str {
        if self.alias.is_empty() {
            &self.name
        } else {
            &self.alias
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

impl Display for RelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.qual.is_empty() {
            write!(f, "{}.", self.qual)?;
        }
        write!(f, "{}", self.name)?;
        if !self.alias.is_empty() {
            write!(f, ":{}", self.alias)?;
        }
        Ok(())
    }
}

///
/// ColId
///
/// A column reference parsed from `[qualifier.]name`. The qualifier resolves
/// through the per-check relation alias map, never against the catalog
/// directly.
///

#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize)]
pub struct ColId {
    pub qual: String,
    pub name: String,
}

impl ColId {
    /// Parse a column identifier literal.
    pub fn parse(literal: &str) -> Result<Self, IdentError> {
        let literal = literal.trim();
        let bad = || IdentError::BadColId {
            literal: literal.to_string(),
        };

        let (qual, name) = match literal.split_once('.') {
            Some((qual, name)) => (qual, name),
            None => ("", literal),
        };
        if !qual.is_empty() && !is_segment(qual) {
            return Err(bad());
        }
        if qual.is_empty() && literal.contains('.') {
            return Err(bad());
        }
        if !is_segment(name) {
            return Err(bad());
        }
        if is_reserved(name) {
            return Err(IdentError::ReservedColId {
                literal: literal.to_string(),
            });
        }

        Ok(Self {
            qual: qual.to_string(),
            name: name.to_string(),
        })
    }

    /// Construct an unqualified column id from an already-validated name.
    #[must_use]
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            qual: String::new(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

impl Display for ColId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.qual.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.qual, self.name)
        }
    }
}
