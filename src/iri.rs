use serde_json::Map as JsonMap;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use crate::context::{has_keyword_form, is_keyword, Context};
use crate::creation::DefineStatus;
use crate::error::JsonLdError;
use crate::processing::ContextProcessor;
use crate::{RemoteContextCache, RemoteContextLoader};

const ILLEGAL_IRI_CHARS: &[char] = &[
    ' ', '\t', '\n', '\r', '<', '>', '"', '{', '}', '|', '\\', '^', '`',
];

/// A string that could syntactically be an IRI or IRI reference.
pub(crate) fn is_iri(value: &str) -> bool {
    !value.is_empty() && !value.contains(ILLEGAL_IRI_CHARS)
}

/// A syntactically absolute IRI: a scheme, then anything legal.
pub(crate) fn is_absolute_iri(value: &str) -> bool {
    if !is_iri(value) {
        return false;
    }
    match value.find(':') {
        None | Some(0) => false,
        Some(position) => {
            let scheme = &value[..position];
            let mut chars = scheme.chars();
            chars.next().map_or(false, |c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        }
    }
}

impl<L: RemoteContextLoader, C: RemoteContextCache> ContextProcessor<L, C> {
    /// Expands `value` to an absolute IRI, a keyword, or `None`, consulting
    /// the active context. With `vocab`, term definitions and the active
    /// vocabulary mapping apply; with `document_relative`, what is left
    /// over is resolved against the context base.
    pub fn expand_iri(
        &mut self,
        active_ctx: &mut Context,
        value: &str,
        vocab: bool,
        document_relative: bool,
    ) -> Result<Option<String>, JsonLdError> {
        self.expand_iri_with(
            active_ctx,
            value,
            vocab,
            document_relative,
            None,
            &mut HashMap::new(),
        )
    }

    /// Expansion as used while a local context is still being processed:
    /// a value naming a term that the local context declares but the
    /// active context does not yet define triggers its definition
    /// mid-flight, threading the shared cycle guard.
    pub(crate) fn expand_iri_with(
        &mut self,
        active_ctx: &mut Context,
        value: &str,
        vocab: bool,
        document_relative: bool,
        local_ctx: Option<&JsonMap<String, Value>>,
        defined: &mut HashMap<String, DefineStatus>,
    ) -> Result<Option<String>, JsonLdError> {
        if is_keyword(value) {
            return Ok(Some(value.to_owned()));
        }
        if has_keyword_form(value) {
            warn!("expansion of {} ignored: term has the form of a keyword", value);
            return Ok(None);
        }

        if let Some(local) = local_ctx {
            if local.contains_key(value) && !is_settled(defined.get(value)) {
                self.create_term_definition(active_ctx, local, value, defined, None, false, false)?;
            }
        }

        if vocab {
            if let Some(definition) = active_ctx.term(value) {
                return Ok(definition.iri_mapping.clone());
            }
        }

        if let Some(position) = value.find(':') {
            let prefix = &value[..position];
            let suffix = &value[position + 1..];

            // blank nodes and scheme-looking prefixes are never compact IRIs
            if prefix == "_" || suffix.starts_with("//") {
                return Ok(Some(value.to_owned()));
            }

            if let Some(local) = local_ctx {
                if local.contains_key(prefix) && !is_settled(defined.get(prefix)) {
                    self.create_term_definition(
                        active_ctx, local, prefix, defined, None, false, false,
                    )?;
                }
            }

            if let Some(mapping) = active_ctx.term(prefix).and_then(|d| d.iri_mapping.clone()) {
                if !mapping.starts_with("_:") {
                    return Ok(Some(mapping + suffix));
                }
            }

            return Ok(Some(value.to_owned()));
        }

        if vocab {
            if let Some(vocab_mapping) = &active_ctx.vocab {
                return Ok(Some(format!("{}{}", vocab_mapping, value)));
            }
        }

        if document_relative {
            if let Some(base) = &active_ctx.base {
                if let Ok(joined) = base.join(value) {
                    return Ok(Some(joined.to_string()));
                }
            }
        }

        Ok(Some(value.to_owned()))
    }
}

/// A term is settled once it is fully defined or skipped as reserved;
/// only then is re-invoking term creation for it a no-op.
fn is_settled(status: Option<&DefineStatus>) -> bool {
    matches!(status, Some(DefineStatus::Defined) | Some(DefineStatus::Reserved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::tests::processor_11;

    #[test]
    fn absolute_iri_syntax() {
        assert!(is_absolute_iri("http://example.com/a"));
        assert!(is_absolute_iri("urn:isbn:0451450523"));
        assert!(is_absolute_iri("ex:suffix"));
        assert!(!is_absolute_iri("relative/path"));
        assert!(!is_absolute_iri(":no-scheme"));
        assert!(!is_absolute_iri("_:blank"));
        assert!(!is_absolute_iri("http://example.com/with space"));
    }

    #[test]
    fn keywords_pass_through() {
        let mut processor = processor_11(None);
        let mut ctx = processor.initial_context();
        let expanded = processor.expand_iri(&mut ctx, "@type", true, false).unwrap();
        assert_eq!(expanded.as_deref(), Some("@type"));
    }

    #[test]
    fn keyword_form_expands_to_none() {
        let mut processor = processor_11(None);
        let mut ctx = processor.initial_context();
        let expanded = processor.expand_iri(&mut ctx, "@future", true, false).unwrap();
        assert_eq!(expanded, None);
    }

    #[test]
    fn blank_nodes_pass_through() {
        let mut processor = processor_11(None);
        let mut ctx = processor.initial_context();
        let expanded = processor.expand_iri(&mut ctx, "_:b0", true, false).unwrap();
        assert_eq!(expanded.as_deref(), Some("_:b0"));
    }

    #[test]
    fn document_relative_resolution() {
        let mut processor = processor_11(Some("http://example.com/doc/"));
        let mut ctx = processor.initial_context();
        let expanded = processor
            .expand_iri(&mut ctx, "fragment", false, true)
            .unwrap();
        assert_eq!(expanded.as_deref(), Some("http://example.com/doc/fragment"));
    }
}
