use lazy_static::lazy_static;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Map as JsonMap;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

use crate::error::JsonLdError;

lazy_static! {
    pub(crate) static ref KEYWORDS: HashSet<&'static str> = vec![
        "@base",
        "@container",
        "@context",
        "@direction",
        "@graph",
        "@id",
        "@import",
        "@included",
        "@index",
        "@json",
        "@language",
        "@list",
        "@nest",
        "@none",
        "@prefix",
        "@propagate",
        "@protected",
        "@reverse",
        "@set",
        "@type",
        "@value",
        "@version",
        "@vocab",
    ]
    .into_iter()
    .collect();
}

/// RFC 3986 gen-delims, plus `$` which the grammar treats the same way
/// when deciding whether a simple term may act as a prefix.
pub(crate) const GEN_DELIMS: &[char] = &[':', '/', '?', '#', '[', ']', '@', '$'];

pub(crate) fn is_keyword(value: &str) -> bool {
    KEYWORDS.contains(value)
}

/// An at-sign followed by one or more ASCII letters. Terms of this shape
/// that are not recognized keywords are reserved for future revisions and
/// are skipped, not defined.
pub(crate) fn has_keyword_form(value: &str) -> bool {
    let mut chars = value.chars();
    chars.next() == Some('@') && value.len() > 1 && chars.all(|c| c.is_ascii_alphabetic())
}

/// Base direction of text, attached to a context or a single term.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Ltr,
    Rtl,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Ltr => "ltr",
            Direction::Rtl => "rtl",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = JsonLdError;

    fn from_str(value: &str) -> Result<Direction, JsonLdError> {
        match value {
            "ltr" => Ok(Direction::Ltr),
            "rtl" => Ok(Direction::Rtl),
            _ => Err(JsonLdError::InvalidBaseDirection),
        }
    }
}

/// The per-term record stored in an active context. Never shared between
/// contexts and never mutated once stored; redefinition replaces the whole
/// record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TermDefinition {
    /// Expanded IRI, compact form, or keyword. `None` means the term
    /// explicitly has no mapping and suppresses expansion.
    pub iri_mapping: Option<String>,
    /// The term denotes a reverse property; type, language, direction and
    /// nest are not meaningful when set.
    pub reverse: bool,
    /// `@id`, `@vocab`, `@none`, `@json`, or an absolute IRI.
    pub type_mapping: Option<String>,
    /// Container keywords; empty means no container.
    pub container_mapping: BTreeSet<String>,
    /// `None` inherits the context default, `Some(None)` clears it.
    pub language_mapping: Option<Option<String>>,
    /// `None` inherits the context default, `Some(None)` clears it.
    pub direction_mapping: Option<Option<Direction>>,
    /// Only valid alongside an `@index` container.
    pub index_mapping: Option<String>,
    pub nest_value: Option<String>,
    /// Unprocessed scoped context, kept verbatim for lazy re-application
    /// by the consuming algorithms.
    pub context: Option<Value>,
    /// The term may be used as a compact-IRI prefix.
    pub prefix_flag: bool,
    /// A protected definition is only replaced by an identical one unless
    /// an explicit override is in force.
    pub protected: bool,
}

impl TermDefinition {
    /// Field-for-field equality except for the protected flag, used by the
    /// protected-term redefinition guard.
    pub(crate) fn matches_ignoring_protected(&self, other: &TermDefinition) -> bool {
        self.iri_mapping == other.iri_mapping
            && self.reverse == other.reverse
            && self.type_mapping == other.type_mapping
            && self.container_mapping == other.container_mapping
            && self.language_mapping == other.language_mapping
            && self.direction_mapping == other.direction_mapping
            && self.index_mapping == other.index_mapping
            && self.nest_value == other.nest_value
            && self.context == other.context
            && self.prefix_flag == other.prefix_flag
    }
}

/// The resolved active context: base and vocabulary mappings, defaults,
/// and the term table every consuming algorithm looks terms up in.
///
/// Contexts are immutable once returned by processing. Cloning is cheap:
/// the term table sits behind an `Arc` and is copied only when a clone
/// defines or removes a term.
#[derive(Clone, Debug, PartialEq)]
pub struct Context {
    /// Resolution root for relative IRIs. `None` after `"@base": null`.
    pub base: Option<Url>,
    /// The document's own base, fixed when the root context is created;
    /// a context that nullifies itself is reseeded from this.
    pub original_base: Option<Url>,
    pub vocab: Option<String>,
    pub language: Option<String>,
    pub direction: Option<Direction>,
    /// Snapshot of the context that was active before a non-propagating
    /// local context was applied; set at most once per chain.
    pub previous_context: Option<Arc<Context>>,
    terms: Arc<BTreeMap<String, TermDefinition>>,
}

impl Context {
    pub fn new(base: Option<Url>) -> Context {
        Context {
            original_base: base.clone(),
            base,
            vocab: None,
            language: None,
            direction: None,
            previous_context: None,
            terms: Arc::new(BTreeMap::new()),
        }
    }

    pub fn term(&self, name: &str) -> Option<&TermDefinition> {
        self.terms.get(name)
    }

    pub fn terms(&self) -> &BTreeMap<String, TermDefinition> {
        &self.terms
    }

    pub fn has_protected_terms(&self) -> bool {
        self.terms.values().any(|definition| definition.protected)
    }

    pub(crate) fn set_term(&mut self, name: &str, definition: TermDefinition) {
        Arc::make_mut(&mut self.terms).insert(name.to_owned(), definition);
    }

    pub(crate) fn remove_term(&mut self, name: &str) -> Option<TermDefinition> {
        if self.terms.contains_key(name) {
            Arc::make_mut(&mut self.terms).remove(name)
        } else {
            None
        }
    }
}

impl Serialize for TermDefinition {
    /// Serializes the definition as an explicit local-context entry, the
    /// form that reprocessing from a fresh root context accepts.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        if self.reverse {
            map.serialize_entry("@reverse", &self.iri_mapping)?;
            if let Some(container) = self.container_mapping.iter().next() {
                map.serialize_entry("@container", container)?;
            }
        } else {
            map.serialize_entry("@id", &self.iri_mapping)?;
            if let Some(type_mapping) = &self.type_mapping {
                map.serialize_entry("@type", type_mapping)?;
            }
            let mut containers = self.container_mapping.iter();
            match (containers.next(), containers.next()) {
                (Some(only), None) => map.serialize_entry("@container", only)?,
                (Some(_), Some(_)) => map.serialize_entry("@container", &self.container_mapping)?,
                _ => {}
            }
            if let Some(language) = &self.language_mapping {
                map.serialize_entry("@language", language)?;
            }
            if let Some(direction) = &self.direction_mapping {
                map.serialize_entry("@direction", &direction.map(|d| d.as_str()))?;
            }
            if let Some(index) = &self.index_mapping {
                map.serialize_entry("@index", index)?;
            }
            if let Some(nest) = &self.nest_value {
                map.serialize_entry("@nest", nest)?;
            }
            if let Some(context) = &self.context {
                map.serialize_entry("@context", context)?;
            }
            if self.prefix_flag {
                map.serialize_entry("@prefix", &true)?;
            }
        }
        if self.protected {
            map.serialize_entry("@protected", &true)?;
        }
        map.end()
    }
}

impl Serialize for Context {
    /// Serializes the active context back into a local-context map that,
    /// reprocessed against a fresh root context, reproduces the same term
    /// table.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        if let Some(base) = &self.base {
            map.serialize_entry("@base", base.as_str())?;
        }
        if let Some(vocab) = &self.vocab {
            map.serialize_entry("@vocab", vocab)?;
        }
        if let Some(language) = &self.language {
            map.serialize_entry("@language", language)?;
        }
        if let Some(direction) = &self.direction {
            map.serialize_entry("@direction", direction.as_str())?;
        }
        for (term, definition) in self.terms.iter() {
            if term == "@type" {
                // the only legal redefinition of @type
                let mut value = JsonMap::new();
                value.insert("@container".to_owned(), Value::String("@set".to_owned()));
                if definition.protected {
                    value.insert("@protected".to_owned(), Value::Bool(true));
                }
                map.serialize_entry(term, &value)?;
            } else {
                map.serialize_entry(term, definition)?;
            }
        }
        map.end()
    }
}
