// src/filter.rs

//! Item filter expressions
//!
//! Expressions have the form `key=literal`, `key!=literal`, `key~regex` or
//! `key!~regex`. A list of expressions is a conjunction: an item passes only
//! when every expression holds.
//!
//! An expression on a key the item does not carry is false, whether or not it
//! is negated. A typo in a key therefore filters out every item; the region
//! pass logs and reports the number of rejected items, with a warning when
//! nothing matches at all.

use crate::error::{Error, Result};
use crate::streams::CatalogItem;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

fn expression_syntax() -> &'static Regex {
    static SYNTAX: OnceLock<Regex> = OnceLock::new();
    SYNTAX.get_or_init(|| {
        Regex::new(r"^\s*([\w\-]+)\s*(!?[=~])\s*(.*?)\s*$").expect("static filter syntax")
    })
}

/// Comparison performed by a filter expression
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Exact, case-sensitive string equality
    Literal(String),
    /// Unanchored regular-expression search
    Pattern(Regex),
}

/// One parsed filter expression
#[derive(Debug, Clone)]
pub struct ItemFilter {
    key: String,
    negate: bool,
    matcher: Matcher,
    source: String,
}

impl ItemFilter {
    /// Parse an expression such as `arch~(x86_64|amd64)` or `ftype!=root.tar.xz`
    pub fn parse(expression: &str) -> Result<Self> {
        let caps = expression_syntax().captures(expression).ok_or_else(|| {
            Error::ConfigError(format!("Invalid filter expression '{}'", expression))
        })?;

        let key = caps[1].to_string();
        let op = &caps[2];
        let value = caps[3].to_string();

        let negate = op.starts_with('!');
        let matcher = if op.ends_with('~') {
            let regex = Regex::new(&value).map_err(|e| {
                Error::ConfigError(format!("Invalid regex in filter '{}': {e}", expression))
            })?;
            Matcher::Pattern(regex)
        } else {
            Matcher::Literal(value)
        };

        Ok(Self {
            key,
            negate,
            matcher,
            source: expression.to_string(),
        })
    }

    /// Attribute this expression inspects
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Evaluate against an item
    pub fn matches(&self, item: &CatalogItem) -> bool {
        let Some(value) = item.attr_text(&self.key) else {
            return false;
        };
        let hit = match &self.matcher {
            Matcher::Literal(literal) => value == *literal,
            Matcher::Pattern(regex) => regex.is_match(&value),
        };
        hit != self.negate
    }
}

impl fmt::Display for ItemFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Whether an item passes every filter (an empty list passes everything)
pub fn matches_all(filters: &[ItemFilter], item: &CatalogItem) -> bool {
    filters.iter().all(|f| f.matches(item))
}

/// Parse a list of expressions
pub fn parse_all<S: AsRef<str>>(expressions: &[S]) -> Result<Vec<ItemFilter>> {
    expressions
        .iter()
        .map(|e| ItemFilter::parse(e.as_ref()))
        .collect()
}
