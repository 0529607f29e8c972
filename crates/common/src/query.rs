//! Metadata predicates used by `Store::select`

use std::collections::BTreeMap;

use regex::Regex;

use crate::metadata::Metadata;
use crate::{Error, Result};

/// One per-key constraint
#[derive(Debug, Clone)]
pub enum Constraint {
    Equals(String),
    /// Whole-value regular expression match
    Matches(Regex),
}

impl Constraint {
    fn accepts(&self, value: &str) -> bool {
        match self {
            Constraint::Equals(expected) => expected == value,
            Constraint::Matches(re) => re.is_match(value),
        }
    }
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constraint::Equals(v) => write!(f, "{:?}", v),
            Constraint::Matches(re) => write!(f, "re:{}", re.as_str()),
        }
    }
}

/// Predicate over [`Metadata`]: either everything, or a conjunction of
/// per-key constraints. A material lacking a constrained key never matches.
#[derive(Debug, Clone, Default)]
pub enum QueryOnMetadata {
    #[default]
    Any,
    All(BTreeMap<String, Constraint>),
}

impl QueryOnMetadata {
    pub const ANY: QueryOnMetadata = QueryOnMetadata::Any;

    pub fn builder() -> QueryBuilder {
        QueryBuilder::default()
    }

    /// Every constrained key must be present and accepted
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            QueryOnMetadata::Any => true,
            QueryOnMetadata::All(constraints) => constraints.iter().all(|(key, c)| {
                metadata.get(key).map(|v| c.accepts(v)).unwrap_or(false)
            }),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, QueryOnMetadata::Any)
    }
}

impl std::fmt::Display for QueryOnMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryOnMetadata::Any => write!(f, "*"),
            QueryOnMetadata::All(constraints) => {
                let parts: Vec<String> = constraints
                    .iter()
                    .map(|(k, c)| format!("{:?}:{}", k, c))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct QueryBuilder {
    constraints: BTreeMap<String, Constraint>,
}

impl QueryBuilder {
    pub fn equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints
            .insert(key.into(), Constraint::Equals(value.into()));
        self
    }

    /// Constrain `key` to values fully matching `pattern`
    pub fn matches(mut self, key: impl Into<String>, pattern: &str) -> Result<Self> {
        let re = Regex::new(&format!("^(?:{})$", pattern))
            .map_err(|e| Error::InvalidQuery(format!("{}: {}", pattern, e)))?;
        self.constraints.insert(key.into(), Constraint::Matches(re));
        Ok(self)
    }

    /// An empty builder yields [`QueryOnMetadata::Any`]
    pub fn build(self) -> QueryOnMetadata {
        if self.constraints.is_empty() {
            QueryOnMetadata::Any
        } else {
            QueryOnMetadata::All(self.constraints)
        }
    }
}
