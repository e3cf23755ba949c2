use serde_json::Map as JsonMap;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;
use url::Url;

use crate::context::{has_keyword_form, is_keyword, Context, TermDefinition, GEN_DELIMS};
use crate::error::JsonLdError;
use crate::iri::{is_absolute_iri, is_iri};
use crate::processing::{ContextProcessor, ProcessingMode};
use crate::{RemoteContextCache, RemoteContextLoader};

/// Per-term progress inside one processing call. `Defining` marks a term
/// whose construction is still on the stack; meeting it again is a cycle.
pub(crate) enum DefineStatus {
    Defining,
    Defined,
    Reserved,
}

/// What became of a term definition request. Terms that merely look like
/// keywords are skipped rather than defined, and callers can tell the two
/// apart without a side channel.
#[derive(Debug, PartialEq)]
pub(crate) enum TermOutcome {
    Defined,
    ReservedSkipped,
}

const CONTAINER_KEYWORDS: [&str; 7] = [
    "@graph",
    "@id",
    "@index",
    "@language",
    "@list",
    "@set",
    "@type",
];

/// Containers that may accompany `@set`.
const SET_COMBINABLE: [&str; 5] = ["@graph", "@id", "@index", "@language", "@type"];

/// The closed set of keys a term definition value may carry.
const TERM_VALUE_KEYS: [&str; 11] = [
    "@container",
    "@context",
    "@direction",
    "@id",
    "@index",
    "@language",
    "@nest",
    "@prefix",
    "@protected",
    "@reverse",
    "@type",
];

fn inner_colon_position(term: &str) -> Option<usize> {
    term.match_indices(':').map(|(i, _)| i).find(|&i| i > 0)
}

impl<L: RemoteContextLoader, C: RemoteContextCache> ContextProcessor<L, C> {
    /// Builds one term definition from its raw local-context entry and
    /// stores it in `active_ctx`, recursing through IRI expansion for
    /// dependencies declared in the same local context.
    pub(crate) fn create_term_definition(
        &mut self,
        active_ctx: &mut Context,
        local_ctx: &JsonMap<String, Value>,
        term: &str,
        defined: &mut HashMap<String, DefineStatus>,
        base: Option<&Url>,
        ambient_protected: bool,
        override_protected: bool,
    ) -> Result<TermOutcome, JsonLdError> {
        match defined.get(term) {
            Some(DefineStatus::Defining) => return Err(JsonLdError::CyclicIriMapping),
            Some(DefineStatus::Defined) => return Ok(TermOutcome::Defined),
            Some(DefineStatus::Reserved) => return Ok(TermOutcome::ReservedSkipped),
            None => (),
        }
        defined.insert(term.to_owned(), DefineStatus::Defining);

        let raw = local_ctx.get(term).cloned().unwrap_or(Value::Null);
        let mode_10 = self.options().processing_mode == ProcessingMode::JsonLd10;

        if term == "@type" && !mode_10 {
            // the sole permitted keyword redefinition
            let map = match &raw {
                Value::Object(map) => map,
                _ => return Err(JsonLdError::KeywordRedefinition),
            };
            let keys: Vec<&str> = map
                .keys()
                .map(String::as_str)
                .filter(|key| *key != "@protected")
                .collect();
            if keys != ["@container"]
                || map.get("@container") != Some(&Value::String("@set".to_owned()))
            {
                return Err(JsonLdError::KeywordRedefinition);
            }
        } else {
            if is_keyword(term) {
                return Err(JsonLdError::KeywordRedefinition);
            }
            if has_keyword_form(term) {
                warn!("term {} has the form of a keyword and is reserved, skipping", term);
                defined.insert(term.to_owned(), DefineStatus::Reserved);
                return Ok(TermOutcome::ReservedSkipped);
            }
        }

        // in-flight lookups of this term must see it as undefined
        let previous = active_ctx.remove_term(term);

        let mut simple_term = false;
        let value = match raw {
            // no explicit @id: the mapping is resolved from the term itself
            Value::Null => JsonMap::new(),
            Value::String(id) => {
                simple_term = true;
                let mut map = JsonMap::new();
                map.insert("@id".to_owned(), Value::String(id));
                map
            }
            Value::Object(map) => map,
            _ => return Err(JsonLdError::InvalidTermDefinition),
        };

        let mut definition = TermDefinition::default();
        definition.protected = match value.get("@protected") {
            Some(Value::Bool(flag)) => *flag,
            Some(_) => return Err(JsonLdError::InvalidTermDefinition),
            None => ambient_protected,
        };

        if let Some(type_value) = value.get("@type") {
            let type_str = type_value.as_str().ok_or(JsonLdError::InvalidTypeMapping)?;
            let expanded = self
                .expand_iri_with(active_ctx, type_str, true, false, Some(local_ctx), defined)?
                .ok_or(JsonLdError::InvalidTypeMapping)?;
            if (expanded == "@json" || expanded == "@none") && mode_10 {
                return Err(JsonLdError::InvalidTypeMapping);
            }
            if expanded != "@id"
                && expanded != "@vocab"
                && expanded != "@none"
                && expanded != "@json"
                && !is_absolute_iri(&expanded)
            {
                return Err(JsonLdError::InvalidTypeMapping);
            }
            definition.type_mapping = Some(expanded);
        }

        if let Some(reverse) = value.get("@reverse") {
            if value.contains_key("@id") || value.contains_key("@nest") {
                return Err(JsonLdError::InvalidReverseProperty);
            }
            let reverse_str = reverse.as_str().ok_or(JsonLdError::InvalidIriMapping)?;
            if has_keyword_form(reverse_str) && !is_keyword(reverse_str) {
                warn!("@reverse value {} has the form of a keyword, skipping", reverse_str);
                defined.insert(term.to_owned(), DefineStatus::Reserved);
                return Ok(TermOutcome::ReservedSkipped);
            }
            let expanded = self.expand_iri_with(
                active_ctx,
                reverse_str,
                true,
                false,
                Some(local_ctx),
                defined,
            )?;
            definition.iri_mapping = match expanded {
                Some(iri) if is_absolute_iri(&iri) || iri.starts_with("_:") => Some(iri),
                _ => return Err(JsonLdError::InvalidIriMapping),
            };

            if let Some(container) = value.get("@container") {
                match container {
                    Value::Null => {}
                    Value::String(s) if s == "@set" || s == "@index" => {
                        definition.container_mapping.insert(s.clone());
                    }
                    _ => return Err(JsonLdError::InvalidReverseProperty),
                }
            }

            definition.reverse = true;
            active_ctx.set_term(term, definition);
            defined.insert(term.to_owned(), DefineStatus::Defined);
            return Ok(TermOutcome::Defined);
        }

        let mut iri_resolved = false;
        if let Some(id) = value.get("@id") {
            // an @id equal to the term itself is treated as absent
            if id.as_str().map_or(true, |s| s != term) {
                iri_resolved = true;
                match id {
                    // explicitly no mapping; expansion of this term is suppressed
                    Value::Null => {}
                    Value::String(id_str) => {
                        if has_keyword_form(id_str) && !is_keyword(id_str) {
                            warn!("@id value {} has the form of a keyword, skipping", id_str);
                            defined.insert(term.to_owned(), DefineStatus::Reserved);
                            return Ok(TermOutcome::ReservedSkipped);
                        }
                        let expanded = self
                            .expand_iri_with(
                                active_ctx,
                                id_str,
                                true,
                                false,
                                Some(local_ctx),
                                defined,
                            )?
                            .ok_or(JsonLdError::InvalidIriMapping)?;
                        if !is_keyword(&expanded)
                            && !is_absolute_iri(&expanded)
                            && !expanded.contains(':')
                        {
                            return Err(JsonLdError::InvalidIriMapping);
                        }
                        if expanded == "@context" {
                            return Err(JsonLdError::InvalidKeywordAlias);
                        }
                        definition.iri_mapping = Some(expanded);

                        // a term that is itself a compact IRI or path must
                        // not contradict the mapping it just declared
                        if inner_colon_position(term).is_some() || term.contains('/') {
                            defined.insert(term.to_owned(), DefineStatus::Defined);
                            let again = self.expand_iri_with(
                                active_ctx,
                                term,
                                true,
                                false,
                                Some(local_ctx),
                                defined,
                            )?;
                            if again != definition.iri_mapping {
                                return Err(JsonLdError::InvalidIriMapping);
                            }
                        }

                        if !term.contains(':')
                            && !term.contains('/')
                            && simple_term
                            && definition
                                .iri_mapping
                                .as_deref()
                                .map_or(false, |m| m.ends_with(GEN_DELIMS))
                        {
                            definition.prefix_flag = true;
                        }
                    }
                    _ => return Err(JsonLdError::InvalidIriMapping),
                }
            }
        }

        if !iri_resolved {
            if let Some(position) = inner_colon_position(term) {
                let prefix = &term[..position];
                let suffix = &term[position + 1..];
                if local_ctx.contains_key(prefix) {
                    // the prefix must be defined before this term resolves
                    self.create_term_definition(
                        active_ctx, local_ctx, prefix, defined, base, false, false,
                    )?;
                }
                if let Some(mapping) = active_ctx.term(prefix).and_then(|d| d.iri_mapping.clone())
                {
                    definition.iri_mapping = Some(mapping + suffix);
                } else {
                    definition.iri_mapping = Some(term.to_owned());
                }
            } else if term.contains('/') {
                let expanded = self.expand_iri_with(
                    active_ctx,
                    term,
                    true,
                    false,
                    Some(local_ctx),
                    defined,
                )?;
                definition.iri_mapping = match expanded {
                    Some(iri) if is_iri(&iri) => Some(iri),
                    _ => return Err(JsonLdError::InvalidIriMapping),
                };
            } else if term == "@type" {
                definition.iri_mapping = Some("@type".to_owned());
            } else if let Some(vocab) = active_ctx.vocab.clone() {
                definition.iri_mapping = Some(vocab + term);
            } else {
                return Err(JsonLdError::InvalidIriMapping);
            }
        }

        if let Some(container) = value.get("@container") {
            let entries: Vec<String> = match container {
                Value::String(s) => vec![s.clone()],
                Value::Array(items) => items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_owned)
                            .ok_or(JsonLdError::InvalidContainerMapping)
                    })
                    .collect::<Result<_, _>>()?,
                _ => return Err(JsonLdError::InvalidContainerMapping),
            };
            if entries
                .iter()
                .any(|entry| !CONTAINER_KEYWORDS.contains(&entry.as_str()))
            {
                return Err(JsonLdError::InvalidContainerMapping);
            }
            let combination_ok = entries.len() == 1
                || entries.iter().any(|e| e == "@id" || e == "@index")
                || (entries.iter().any(|e| e == "@set")
                    && entries.len() == 2
                    && entries
                        .iter()
                        .any(|e| SET_COMBINABLE.contains(&e.as_str())));
            if !combination_ok {
                return Err(JsonLdError::InvalidContainerMapping);
            }
            if mode_10 {
                let legal_in_10 = matches!(
                    container,
                    Value::String(s) if s != "@graph" && s != "@id" && s != "@type"
                );
                if !legal_in_10 {
                    return Err(JsonLdError::InvalidTermDefinition);
                }
            }
            definition.container_mapping.extend(entries);

            if definition.container_mapping.contains("@type") {
                if definition.type_mapping.is_none() {
                    definition.type_mapping = Some("@id".to_owned());
                }
                let type_mapping = definition.type_mapping.as_deref();
                if type_mapping != Some("@id") && type_mapping != Some("@vocab") {
                    return Err(JsonLdError::InvalidTypeMapping);
                }
            }
        }

        if let Some(index) = value.get("@index") {
            if mode_10 || !definition.container_mapping.contains("@index") {
                return Err(JsonLdError::InvalidTermDefinition);
            }
            let index_str = index.as_str().ok_or(JsonLdError::InvalidTermDefinition)?;
            let expanded =
                self.expand_iri_with(active_ctx, index_str, false, false, None, defined)?;
            if !expanded.as_deref().map_or(false, is_iri) {
                return Err(JsonLdError::InvalidTermDefinition);
            }
            definition.index_mapping = Some(index_str.to_owned());
        }

        if let Some(scoped) = value.get("@context") {
            if mode_10 {
                return Err(JsonLdError::InvalidTermDefinition);
            }
            // validated eagerly, applied lazily by the consuming algorithms
            self.process_inner(active_ctx, scoped, base, &[], true, true)?;
            definition.context = Some(scoped.clone());
        }

        if !value.contains_key("@type") {
            if let Some(language) = value.get("@language") {
                definition.language_mapping = match language {
                    Value::Null => Some(None),
                    Value::String(tag) => Some(Some(tag.clone())),
                    _ => return Err(JsonLdError::InvalidLanguageMapping),
                };
            }
            if let Some(direction) = value.get("@direction") {
                definition.direction_mapping = match direction {
                    Value::Null => Some(None),
                    Value::String(d) => Some(Some(d.parse()?)),
                    _ => return Err(JsonLdError::InvalidBaseDirection),
                };
            }
        }

        if let Some(nest) = value.get("@nest") {
            if mode_10 {
                return Err(JsonLdError::InvalidTermDefinition);
            }
            let nest_str = nest.as_str().ok_or(JsonLdError::InvalidNestValue)?;
            if is_keyword(nest_str) && nest_str != "@nest" {
                return Err(JsonLdError::InvalidNestValue);
            }
            definition.nest_value = Some(nest_str.to_owned());
        }

        if let Some(prefix) = value.get("@prefix") {
            if mode_10 || term.contains(':') || term.contains('/') {
                return Err(JsonLdError::InvalidTermDefinition);
            }
            definition.prefix_flag = prefix.as_bool().ok_or(JsonLdError::InvalidTermDefinition)?;
            if definition.prefix_flag
                && definition.iri_mapping.as_deref().map_or(false, is_keyword)
            {
                return Err(JsonLdError::InvalidTermDefinition);
            }
        }

        if value
            .keys()
            .any(|key| !TERM_VALUE_KEYS.contains(&key.as_str()))
        {
            return Err(JsonLdError::InvalidTermDefinition);
        }

        if let Some(previous) = previous {
            if previous.protected && !override_protected {
                if !definition.matches_ignoring_protected(&previous) {
                    return Err(JsonLdError::ProtectedTermRedefinition);
                }
                // identical redefinition keeps the protected original
                definition = previous;
            }
        }

        active_ctx.set_term(term, definition);
        defined.insert(term.to_owned(), DefineStatus::Defined);
        Ok(TermOutcome::Defined)
    }
}
