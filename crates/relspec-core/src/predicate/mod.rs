//! Module: predicate
//! Responsibility: the predicate expression mini-language — operator and
//! quantifier vocabulary plus the annotation-string splitter.
//! Does not own: identifier validation, type checking, or IR construction.
//!
//! This layer is a pure tokenizer. Whether a parsed shape is *legal* (unary
//! operators with a right-hand side, quantifiers on non-array fields, and so
//! on) is decided by the analyzer and checker passes.


use serde::Serialize;
use std::fmt::{self, Display};

///
/// Predicate
///
/// Canonical comparison/predicate operators of the annotation language.
/// Each operator has a stable literal spelling used in annotations.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum Predicate {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Match,
    MatchI,
    NotMatch,
    NotMatchI,
    IsNull,
    NotNull,
    IsTrue,
    NotTrue,
    IsFalse,
    NotFalse,
    IsUnknown,
    NotUnknown,
    IsDistinct,
    NotDistinct,
    IsLike,
    NotLike,
    IsILike,
    NotILike,
    IsSimilar,
    NotSimilar,
    IsBetween,
    NotBetween,
    IsBetweenSym,
    NotBetweenSym,
    IsIn,
    NotIn,
}

impl Predicate {
    /// Stable annotation spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Match => "~",
            Self::MatchI => "~*",
            Self::NotMatch => "!~",
            Self::NotMatchI => "!~*",
            Self::IsNull => "isnull",
            Self::NotNull => "notnull",
            Self::IsTrue => "istrue",
            Self::NotTrue => "nottrue",
            Self::IsFalse => "isfalse",
            Self::NotFalse => "notfalse",
            Self::IsUnknown => "isunknown",
            Self::NotUnknown => "notunknown",
            Self::IsDistinct => "isdistinct",
            Self::NotDistinct => "notdistinct",
            Self::IsLike => "islike",
            Self::NotLike => "notlike",
            Self::IsILike => "isilike",
            Self::NotILike => "notilike",
            Self::IsSimilar => "issimilar",
            Self::NotSimilar => "notsimilar",
            Self::IsBetween => "isbetween",
            Self::NotBetween => "notbetween",
            Self::IsBetweenSym => "isbetweensym",
            Self::NotBetweenSym => "notbetweensym",
            Self::IsIn => "isin",
            Self::NotIn => "notin",
        }
    }

    /// Parse a keyword-family operator token. The optional `is`/`not` prefix
    /// may be fused with the adjective; a bare adjective normalizes to its
    /// `is` form.
    #[must_use]
    pub fn from_keyword(word: &str) -> Option<Self> {
        let pred = match word {
            "isnull" | "null" => Self::IsNull,
            "notnull" => Self::NotNull,
            "istrue" | "true" => Self::IsTrue,
            "nottrue" => Self::NotTrue,
            "isfalse" | "false" => Self::IsFalse,
            "notfalse" => Self::NotFalse,
            "isunknown" | "unknown" => Self::IsUnknown,
            "notunknown" => Self::NotUnknown,
            "isdistinct" | "distinct" => Self::IsDistinct,
            "notdistinct" => Self::NotDistinct,
            "islike" | "like" => Self::IsLike,
            "notlike" => Self::NotLike,
            "isilike" | "ilike" => Self::IsILike,
            "notilike" => Self::NotILike,
            "issimilar" | "similar" => Self::IsSimilar,
            "notsimilar" => Self::NotSimilar,
            "isbetween" | "between" => Self::IsBetween,
            "notbetween" => Self::NotBetween,
            "isbetweensym" | "betweensym" => Self::IsBetweenSym,
            "notbetweensym" => Self::NotBetweenSym,
            "isin" | "in" => Self::IsIn,
            "notin" => Self::NotIn,
            _ => return None,
        };

        Some(pred)
    }

    /// Unary predicates take no right-hand side and no quantifier.
    #[must_use]
    pub const fn is_unary(self) -> bool {
        matches!(
            self,
            Self::IsNull
                | Self::NotNull
                | Self::IsTrue
                | Self::NotTrue
                | Self::IsFalse
                | Self::NotFalse
                | Self::IsUnknown
                | Self::NotUnknown
        )
    }

    /// Truth-form unary predicates; these require a boolean column.
    #[must_use]
    pub const fn is_truth(self) -> bool {
        matches!(
            self,
            Self::IsTrue
                | Self::NotTrue
                | Self::IsFalse
                | Self::NotFalse
                | Self::IsUnknown
                | Self::NotUnknown
        )
    }

    /// Null-form unary predicates; these require a nullable column.
    #[must_use]
    pub const fn is_null_form(self) -> bool {
        matches!(self, Self::IsNull | Self::NotNull)
    }

    /// Range predicates; these take a two-member x/y group instead of a
    /// single right-hand side.
    #[must_use]
    pub const fn is_range(self) -> bool {
        matches!(
            self,
            Self::IsBetween | Self::NotBetween | Self::IsBetweenSym | Self::NotBetweenSym
        )
    }

    /// Pattern-matching predicates.
    #[must_use]
    pub const fn is_pattern(self) -> bool {
        matches!(
            self,
            Self::Match
                | Self::MatchI
                | Self::NotMatch
                | Self::NotMatchI
                | Self::IsLike
                | Self::NotLike
                | Self::IsILike
                | Self::NotILike
                | Self::IsSimilar
                | Self::NotSimilar
        )
    }

    /// Whether a quantifier may modify this predicate: binary comparisons
    /// and pattern operators only.
    #[must_use]
    pub const fn is_quantifiable(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Lte | Self::Gt | Self::Gte
        ) || self.is_pattern()
    }

    /// The base comparison operator name looked up in the operator catalog,
    /// or `None` for unary predicates. Membership and distinctness reduce to
    /// equality; range predicates reduce to their lower-bound comparison.
    #[must_use]
    pub const fn base_operator(self) -> Option<&'static str> {
        let name = match self {
            Self::Eq | Self::IsDistinct | Self::NotDistinct | Self::IsIn | Self::NotIn => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte | Self::IsBetween | Self::NotBetween | Self::IsBetweenSym
            | Self::NotBetweenSym => ">=",
            Self::Match | Self::IsSimilar | Self::NotSimilar => "~",
            Self::MatchI => "~*",
            Self::NotMatch => "!~",
            Self::NotMatchI => "!~*",
            Self::IsLike => "~~",
            Self::NotLike => "!~~",
            Self::IsILike => "~~*",
            Self::NotILike => "!~~*",
            Self::IsNull
            | Self::NotNull
            | Self::IsTrue
            | Self::NotTrue
            | Self::IsFalse
            | Self::NotFalse
            | Self::IsUnknown
            | Self::NotUnknown => return None,
        };

        Some(name)
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

///
/// Quantifier
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum Quantifier {
    Any,
    All,
    Some,
}

impl Quantifier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::All => "all",
            Self::Some => "some",
        }
    }

    #[must_use]
    fn from_word(word: &str) -> Option<Self> {
        match word {
            "any" => Some(Self::Any),
            "all" => Some(Self::All),
            "some" => Some(Self::Some),
            _ => None,
        }
    }
}

impl Display for Quantifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

///
/// PredicateExpr
///
/// The split of one annotation string into
/// `column [ predicate [ quantifier ] { column | literal } ]` parts.
/// A missing operator leaves the whole string in `lhs`; the caller supplies
/// the contextual default operator.
///

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PredicateExpr {
    pub lhs: String,
    pub pred: Option<Predicate>,
    pub quant: Option<Quantifier>,
    pub rhs: String,
}

/// Split an annotation string into its predicate parts.
///
/// Operators are recognized in priority order: symbol operators first
/// (`=`, `!=`/`<>`, `<`, `<=`, `>`, `>=`, `~`, `~*`, `!~`, `!~*`), then the
/// keyword family introduced by whitespace. Whitespace is trimmed at every
/// boundary. A malformed trailing operator leaves `rhs` empty; rejecting
/// that shape is the caller's decision.
#[must_use]
pub fn parse_predicate(input: &str) -> PredicateExpr {
    let s = input.trim();
    let bytes = s.as_bytes();

    let mut found: Option<(usize, usize, Predicate)> = None;

    let mut i = 0;
    while i < bytes.len() {
        let rest = &s[i..];
        let (pred, len) = match bytes[i] {
            b'=' => (Predicate::Eq, 1),
            b'!' if rest.starts_with("!=") => (Predicate::Ne, 2),
            b'!' if rest.starts_with("!~*") => (Predicate::NotMatchI, 3),
            b'!' if rest.starts_with("!~") => (Predicate::NotMatch, 2),
            b'<' if rest.starts_with("<>") => (Predicate::Ne, 2),
            b'<' if rest.starts_with("<=") => (Predicate::Lte, 2),
            b'<' => (Predicate::Lt, 1),
            b'>' if rest.starts_with(">=") => (Predicate::Gte, 2),
            b'>' => (Predicate::Gt, 1),
            b'~' if rest.starts_with("~*") => (Predicate::MatchI, 2),
            b'~' => (Predicate::Match, 1),
            b' ' | b'\t' => {
                let word_start = i + s[i..].len() - s[i..].trim_start().len();
                let word = next_word(&s[word_start..]);
                if let Some(pred) = Predicate::from_keyword(word) {
                    found = Some((i, word_start + word.len(), pred));
                    break;
                }
                i += 1;
                continue;
            }
            _ => {
                i += 1;
                continue;
            }
        };

        found = Some((i, i + len, pred));
        break;
    }

    let Some((start, end, pred)) = found else {
        return PredicateExpr {
            lhs: s.to_string(),
            ..PredicateExpr::default()
        };
    };

    let lhs = s[..start].trim().to_string();
    let mut rhs = s[end..].trim();

    let mut quant = None;
    let word = next_word(rhs);
    if let Some(q) = Quantifier::from_word(word) {
        // A quantifier token must end at a word boundary so that a column
        // literally named e.g. `anything` is not misread.
        let after = &rhs[word.len()..];
        if after.is_empty() || after.starts_with(char::is_whitespace) {
            quant = Some(q);
            rhs = after.trim_start();
        }
    }

    PredicateExpr {
        lhs,
        pred: Some(pred),
        quant,
        rhs: rhs.to_string(),
    }
}

/// The leading run of word characters (`\w`) of `s`.
fn next_word(s: &str) -> &str {
    let end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len());

    &s[..end]
}
