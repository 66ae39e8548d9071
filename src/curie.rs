//! Compact identifiers (CURIEs) for ontology terms
//!
//! OBO Graphs exports identify every node by its PURL, e.g.
//! `http://purl.obolibrary.org/obo/HP_0004322`. Everything downstream works
//! with the compact `HP:0004322` form.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

lazy_static::lazy_static! {
    static ref PURL_PATTERN: Regex =
        Regex::new(r"^http://purl\.obolibrary\.org/obo/(?P<prefix>\w+)_(?P<id>\w+)").unwrap();
    static ref CURIE_PATTERN: Regex =
        Regex::new(r"^(?P<prefix>[A-Za-z][\w.-]*):(?P<id>\S+)$").unwrap();
}

/// A `PREFIX:LOCALID` term identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Curie {
    prefix: String,
    local_id: String,
}

/// Error returned when a string is not a CURIE
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a CURIE: '{0}'")]
pub struct CurieParseError(pub String);

impl Curie {
    pub fn new(prefix: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            local_id: local_id.into(),
        }
    }

    /// Parse `PREFIX:LOCALID`
    pub fn parse(s: &str) -> Result<Self, CurieParseError> {
        let caps = CURIE_PATTERN
            .captures(s.trim())
            .ok_or_else(|| CurieParseError(s.to_string()))?;
        Ok(Self::new(&caps["prefix"], &caps["id"]))
    }

    /// Convert an OBO PURL to a CURIE.
    ///
    /// Returns `None` for URIs outside the OBO namespace (blank nodes,
    /// `oboInOwl` annotation properties, foreign IRIs). Those are not terms.
    ///
    /// The local id is everything after the last underscore, so
    /// `http://purl.obolibrary.org/obo/HP_0000118` yields `HP:0000118`.
    pub fn from_purl(purl: &str) -> Option<Self> {
        PURL_PATTERN
            .captures(purl)
            .map(|caps| Self::new(&caps["prefix"], &caps["id"]))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Whether the identifier belongs to the given namespace
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.prefix == prefix
    }

    /// The PURL this CURIE expands to
    pub fn to_purl(&self) -> String {
        format!(
            "http://purl.obolibrary.org/obo/{}_{}",
            self.prefix, self.local_id
        )
    }
}

impl fmt::Display for Curie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.prefix, self.local_id)
    }
}

impl FromStr for Curie {
    type Err = CurieParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Curie {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Curie {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Curie::parse(&s).map_err(serde::de::Error::custom)
    }
}
