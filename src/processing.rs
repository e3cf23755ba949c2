use serde_json::Map as JsonMap;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::context::Context;
use crate::creation::DefineStatus;
use crate::error::JsonLdError;
use crate::iri::is_iri;
use crate::{RemoteContextCache, RemoteContextLoader};

/// Format version the processor conforms to; gates the 1.1-only keywords
/// and value shapes. Immutable for the lifetime of a processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingMode {
    JsonLd10,
    JsonLd11,
}

impl Default for ProcessingMode {
    fn default() -> ProcessingMode {
        ProcessingMode::JsonLd11
    }
}

/// Configuration for a [`ContextProcessor`].
#[derive(Clone, Debug)]
pub struct ProcessorOptions {
    /// The document's base IRI; seeds root contexts and resolves relative
    /// remote-context references.
    pub base: Option<Url>,
    pub processing_mode: ProcessingMode,
    /// Upper bound on the remote-context dereference chain, the guard
    /// against cyclic or adversarial context documents.
    pub max_remote_contexts: usize,
}

impl Default for ProcessorOptions {
    fn default() -> ProcessorOptions {
        ProcessorOptions {
            base: None,
            processing_mode: ProcessingMode::default(),
            max_remote_contexts: 10,
        }
    }
}

/// Default in-memory remote-context cache, keyed by the resolved absolute
/// URL string.
#[derive(Debug, Default)]
pub struct MemoryContextCache {
    entries: HashMap<String, Value>,
}

impl MemoryContextCache {
    pub fn new() -> MemoryContextCache {
        MemoryContextCache::default()
    }
}

impl RemoteContextCache for MemoryContextCache {
    fn get(&self, url: &Url) -> Option<Value> {
        self.entries.get(url.as_str()).cloned()
    }

    fn put(&mut self, url: &Url, context: Value) {
        self.entries.insert(url.as_str().to_owned(), context);
    }
}

/// A cache that never retains anything; every remote reference is fetched
/// again.
#[derive(Debug, Default)]
pub struct NoopContextCache;

impl RemoteContextCache for NoopContextCache {
    fn get(&self, _url: &Url) -> Option<Value> {
        None
    }

    fn put(&mut self, _url: &Url, _context: Value) {}
}

/// Reserved context keys handled before term definitions are created.
const RESERVED_CONTEXT_KEYS: [&str; 8] = [
    "@base",
    "@direction",
    "@import",
    "@language",
    "@propagate",
    "@protected",
    "@version",
    "@vocab",
];

/// The entry point of context processing: applies local contexts to active
/// contexts, dereferencing remote references through the injected loader
/// and cache.
pub struct ContextProcessor<L, C = MemoryContextCache> {
    loader: L,
    cache: C,
    options: ProcessorOptions,
}

impl<L: RemoteContextLoader> ContextProcessor<L> {
    pub fn new(loader: L, options: ProcessorOptions) -> ContextProcessor<L> {
        ContextProcessor {
            loader,
            cache: MemoryContextCache::new(),
            options,
        }
    }
}

impl<L: RemoteContextLoader, C: RemoteContextCache> ContextProcessor<L, C> {
    pub fn with_cache(loader: L, cache: C, options: ProcessorOptions) -> ContextProcessor<L, C> {
        ContextProcessor {
            loader,
            cache,
            options,
        }
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    /// A fresh root context seeded from the document base.
    pub fn initial_context(&self) -> Context {
        Context::new(self.options.base.clone())
    }

    /// Applies `local_ctx` on top of `active_ctx` and returns the new
    /// active context. The inputs are not mutated; the first violation
    /// aborts the whole call.
    pub fn process(
        &mut self,
        active_ctx: &Context,
        local_ctx: &Value,
    ) -> Result<Context, JsonLdError> {
        self.process_inner(active_ctx, local_ctx, None, &[], false, true)
    }

    /// [`ContextProcessor::process`] with the knobs the consuming
    /// algorithms need: an overriding base, permission to replace
    /// protected terms (used for scoped contexts), and whether the result
    /// should outlive the node that introduced it.
    pub fn process_with(
        &mut self,
        active_ctx: &Context,
        local_ctx: &Value,
        base: Option<&Url>,
        override_protected: bool,
        propagate: bool,
    ) -> Result<Context, JsonLdError> {
        self.process_inner(
            active_ctx,
            local_ctx,
            base,
            &[],
            override_protected,
            propagate,
        )
    }

    /// Fetches a remote context document and extracts its `@context`
    /// member. Any loader failure or malformed body is reported as
    /// `loading remote context failed`.
    fn load_remote_context(&mut self, url: &Url) -> Result<Value, JsonLdError> {
        let body = self
            .loader
            .load_context(url)
            .map_err(JsonLdError::loading_failed)?;
        match body {
            Value::Object(mut map) => map
                .remove("@context")
                .ok_or_else(JsonLdError::loading_failed_opaque),
            _ => Err(JsonLdError::loading_failed_opaque()),
        }
    }

    pub(crate) fn process_inner(
        &mut self,
        active_ctx: &Context,
        local_ctx: &Value,
        base: Option<&Url>,
        remote_contexts: &[Url],
        override_protected: bool,
        propagate: bool,
    ) -> Result<Context, JsonLdError> {
        let mut propagate = propagate;
        let mut result = active_ctx.clone();

        if let Value::Object(map) = local_ctx {
            if let Some(value) = map.get("@propagate") {
                propagate = value.as_bool().ok_or(JsonLdError::InvalidPropagateValue)?;
            }
        }

        if !propagate && result.previous_context.is_none() {
            result.previous_context = Some(Arc::new(active_ctx.clone()));
        }

        let entries: Vec<&Value> = match local_ctx {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        for entry in entries {
            match entry {
                Value::Null => {
                    if !override_protected && active_ctx.has_protected_terms() {
                        return Err(JsonLdError::InvalidContextNullification);
                    }
                    let previous = result;
                    result = Context::new(previous.original_base.clone());
                    if propagate {
                        result.previous_context = Some(Arc::new(previous));
                    }
                }

                Value::String(reference) => {
                    let resolved = {
                        let base_url = base.or_else(|| self.options.base.as_ref());
                        resolve_reference(base_url, reference)
                            .ok_or_else(JsonLdError::loading_failed_opaque)?
                    };
                    if remote_contexts.len() >= self.options.max_remote_contexts {
                        return Err(JsonLdError::ContextOverflow);
                    }
                    let context = match self.cache.get(&resolved) {
                        Some(context) => context,
                        None => {
                            let context = self.load_remote_context(&resolved)?;
                            self.cache.put(&resolved, context.clone());
                            context
                        }
                    };
                    let mut chain = remote_contexts.to_vec();
                    chain.push(resolved.clone());
                    result =
                        self.process_inner(&result, &context, Some(&resolved), &chain, false, true)?;
                }

                Value::Object(map) => {
                    let mode_10 = self.options.processing_mode == ProcessingMode::JsonLd10;

                    if let Some(version) = map.get("@version") {
                        if version.as_f64() != Some(1.1) {
                            return Err(JsonLdError::InvalidVersionValue(version.clone()));
                        }
                        if mode_10 {
                            return Err(JsonLdError::ProcessingModeConflict);
                        }
                    }

                    let mut context_map: Cow<JsonMap<String, Value>> = Cow::Borrowed(map);
                    if let Some(import) = map.get("@import") {
                        if mode_10 {
                            return Err(JsonLdError::InvalidContextEntry);
                        }
                        let reference = import.as_str().ok_or(JsonLdError::InvalidImportValue)?;
                        let import_url = {
                            let base_url = base.or_else(|| self.options.base.as_ref());
                            resolve_reference(base_url, reference)
                                .ok_or_else(JsonLdError::loading_failed_opaque)?
                        };
                        let imported = match self.load_remote_context(&import_url)? {
                            Value::Object(imported) => imported,
                            _ => return Err(JsonLdError::InvalidRemoteContext),
                        };
                        if imported.contains_key("@import") {
                            return Err(JsonLdError::InvalidContextEntry);
                        }
                        // the import supplies defaults; this entry wins on collision
                        let merged = context_map.to_mut();
                        for (key, value) in imported {
                            merged.entry(key).or_insert(value);
                        }
                    }

                    if remote_contexts.is_empty() {
                        if let Some(value) = context_map.get("@base") {
                            match value {
                                Value::Null => result.base = None,
                                Value::String(reference) => {
                                    if let Ok(url) = Url::parse(reference) {
                                        result.base = Some(url);
                                    } else if let Some(current) = &result.base {
                                        result.base = Some(
                                            current
                                                .join(reference)
                                                .map_err(|_| JsonLdError::InvalidBaseIri)?,
                                        );
                                    } else {
                                        return Err(JsonLdError::InvalidBaseIri);
                                    }
                                }
                                _ => return Err(JsonLdError::InvalidBaseIri),
                            }
                        }
                    }

                    if let Some(value) = context_map.get("@vocab") {
                        match value {
                            Value::Null => result.vocab = None,
                            Value::String(vocab)
                                if vocab.starts_with('_') || is_iri(vocab) =>
                            {
                                let expanded = self.expand_iri_with(
                                    &mut result,
                                    vocab,
                                    true,
                                    true,
                                    None,
                                    &mut HashMap::new(),
                                )?;
                                result.vocab = expanded;
                            }
                            // other shapes have no effect
                            _ => {}
                        }
                    }

                    if let Some(value) = context_map.get("@language") {
                        match value {
                            Value::Null => result.language = None,
                            Value::String(language) => result.language = Some(language.clone()),
                            _ => return Err(JsonLdError::InvalidDefaultLanguage),
                        }
                    }

                    if let Some(value) = context_map.get("@direction") {
                        if mode_10 {
                            return Err(JsonLdError::InvalidContextEntry);
                        }
                        match value {
                            Value::Null => result.direction = None,
                            Value::String(direction) => {
                                result.direction = Some(direction.parse()?)
                            }
                            _ => return Err(JsonLdError::InvalidBaseDirection),
                        }
                    }

                    if let Some(value) = context_map.get("@propagate") {
                        if mode_10 {
                            return Err(JsonLdError::InvalidContextEntry);
                        }
                        if !value.is_boolean() {
                            return Err(JsonLdError::InvalidPropagateValue);
                        }
                    }

                    let ambient_protected =
                        matches!(context_map.get("@protected"), Some(Value::Bool(true)));

                    // descending order is the deterministic tie-break that
                    // visits a prefix after the terms depending on it have
                    // already requested it
                    let mut keys: Vec<String> = context_map
                        .keys()
                        .filter(|key| !RESERVED_CONTEXT_KEYS.contains(&key.as_str()))
                        .cloned()
                        .collect();
                    keys.sort_unstable();

                    let mut defined: HashMap<String, DefineStatus> = HashMap::new();
                    for key in keys.iter().rev() {
                        self.create_term_definition(
                            &mut result,
                            &context_map,
                            key,
                            &mut defined,
                            base,
                            ambient_protected,
                            override_protected,
                        )?;
                    }
                }

                _ => return Err(JsonLdError::InvalidLocalContext),
            }
        }

        Ok(result)
    }
}

fn resolve_reference(base: Option<&Url>, reference: &str) -> Option<Url> {
    match base {
        Some(base) => base.join(reference).ok(),
        None => Url::parse(reference).ok(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::LoaderError;
    use serde_json::json;
    use std::cell::RefCell;

    pub(crate) struct NullLoader;

    impl RemoteContextLoader for NullLoader {
        fn load_context(&self, _url: &Url) -> Result<Value, LoaderError> {
            Err("remote contexts unavailable".into())
        }
    }

    /// Serves documents from a fixture table and records every fetch.
    pub(crate) struct FixtureLoader {
        pub documents: HashMap<String, Value>,
        pub fetches: RefCell<Vec<String>>,
    }

    impl FixtureLoader {
        pub fn new(documents: Vec<(&str, Value)>) -> FixtureLoader {
            FixtureLoader {
                documents: documents
                    .into_iter()
                    .map(|(url, doc)| (url.to_owned(), doc))
                    .collect(),
                fetches: RefCell::new(Vec::new()),
            }
        }
    }

    impl RemoteContextLoader for FixtureLoader {
        fn load_context(&self, url: &Url) -> Result<Value, LoaderError> {
            self.fetches.borrow_mut().push(url.to_string());
            self.documents
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| format!("no fixture for {}", url).into())
        }
    }

    pub(crate) fn processor_11(base: Option<&str>) -> ContextProcessor<NullLoader> {
        ContextProcessor::new(
            NullLoader,
            ProcessorOptions {
                base: base.map(|b| Url::parse(b).expect("test base")),
                ..ProcessorOptions::default()
            },
        )
    }

    pub(crate) fn processor_10(base: Option<&str>) -> ContextProcessor<NullLoader> {
        ContextProcessor::new(
            NullLoader,
            ProcessorOptions {
                base: base.map(|b| Url::parse(b).expect("test base")),
                processing_mode: ProcessingMode::JsonLd10,
                ..ProcessorOptions::default()
            },
        )
    }

    #[test]
    fn version_entry() {
        let mut processor = processor_11(None);
        let ctx = processor.initial_context();
        processor
            .process(&ctx, &json!({"@version": 1.1, "@vocab": "http://example.com/"}))
            .unwrap();

        let err = processor
            .process(&ctx, &json!({"@version": 1.0}))
            .unwrap_err();
        assert!(matches!(err, JsonLdError::InvalidVersionValue(_)));

        let mut processor = processor_10(None);
        let ctx = processor.initial_context();
        let err = processor
            .process(&ctx, &json!({"@version": 1.1}))
            .unwrap_err();
        assert!(matches!(err, JsonLdError::ProcessingModeConflict));
    }

    #[test]
    fn base_entry() {
        let mut processor = processor_11(Some("http://example.com/doc"));
        let ctx = processor.initial_context();

        let result = processor
            .process(&ctx, &json!({"@base": "http://other.example/"}))
            .unwrap();
        assert_eq!(
            result.base.as_ref().map(Url::as_str),
            Some("http://other.example/")
        );

        let result = processor.process(&ctx, &json!({"@base": "sub/"})).unwrap();
        assert_eq!(
            result.base.as_ref().map(Url::as_str),
            Some("http://example.com/sub/")
        );

        let result = processor.process(&ctx, &json!({"@base": null})).unwrap();
        assert!(result.base.is_none());

        let err = processor.process(&ctx, &json!({"@base": 7})).unwrap_err();
        assert!(matches!(err, JsonLdError::InvalidBaseIri));
    }

    #[test]
    fn vocab_entry() {
        let mut processor = processor_11(Some("http://example.com/doc/"));
        let ctx = processor.initial_context();

        let result = processor
            .process(&ctx, &json!({"@vocab": "ns/"}))
            .unwrap();
        assert_eq!(result.vocab.as_deref(), Some("http://example.com/doc/ns/"));

        let cleared = processor
            .process(&result, &json!({"@vocab": null}))
            .unwrap();
        assert!(cleared.vocab.is_none());
    }

    #[test]
    fn language_entry() {
        let mut processor = processor_11(None);
        let ctx = processor.initial_context();

        let result = processor
            .process(&ctx, &json!({"@language": "en-GB"}))
            .unwrap();
        assert_eq!(result.language.as_deref(), Some("en-GB"));

        let cleared = processor
            .process(&result, &json!({"@language": null}))
            .unwrap();
        assert!(cleared.language.is_none());

        let err = processor
            .process(&ctx, &json!({"@language": 13}))
            .unwrap_err();
        assert!(matches!(err, JsonLdError::InvalidDefaultLanguage));
    }

    #[test]
    fn direction_entry() {
        let mut processor = processor_11(None);
        let ctx = processor.initial_context();

        let result = processor
            .process(&ctx, &json!({"@direction": "rtl"}))
            .unwrap();
        assert_eq!(result.direction, Some(crate::Direction::Rtl));

        let err = processor
            .process(&ctx, &json!({"@direction": "up"}))
            .unwrap_err();
        assert!(matches!(err, JsonLdError::InvalidBaseDirection));

        let mut processor = processor_10(None);
        let ctx = processor.initial_context();
        let err = processor
            .process(&ctx, &json!({"@direction": "ltr"}))
            .unwrap_err();
        assert!(matches!(err, JsonLdError::InvalidContextEntry));
    }

    #[test]
    fn propagate_entry_validation() {
        let mut processor = processor_11(None);
        let ctx = processor.initial_context();

        let err = processor
            .process(&ctx, &json!({"@propagate": "yes"}))
            .unwrap_err();
        assert!(matches!(err, JsonLdError::InvalidPropagateValue));

        let mut processor = processor_10(None);
        let ctx = processor.initial_context();
        let err = processor
            .process(&ctx, &json!({"@propagate": true}))
            .unwrap_err();
        assert!(matches!(err, JsonLdError::InvalidContextEntry));
    }

    #[test]
    fn scalar_local_context_rejected() {
        let mut processor = processor_11(None);
        let ctx = processor.initial_context();
        let err = processor.process(&ctx, &json!(42)).unwrap_err();
        assert!(matches!(err, JsonLdError::InvalidLocalContext));
    }

    #[test]
    fn import_supplies_defaults_only() {
        let loader = FixtureLoader::new(vec![(
            "http://example.com/imported",
            json!({"@context": {
                "name": "http://imported.example/name",
                "extra": "http://imported.example/extra"
            }}),
        )]);
        let mut processor = ContextProcessor::new(
            loader,
            ProcessorOptions {
                base: Some(Url::parse("http://example.com/doc").expect("test base")),
                ..ProcessorOptions::default()
            },
        );
        let ctx = processor.initial_context();
        let result = processor
            .process(
                &ctx,
                &json!({
                    "@import": "imported",
                    "name": "http://local.example/name"
                }),
            )
            .unwrap();
        assert_eq!(
            result.term("name").unwrap().iri_mapping.as_deref(),
            Some("http://local.example/name")
        );
        assert_eq!(
            result.term("extra").unwrap().iri_mapping.as_deref(),
            Some("http://imported.example/extra")
        );
    }

    #[test]
    fn transitive_import_rejected() {
        let loader = FixtureLoader::new(vec![(
            "http://example.com/imported",
            json!({"@context": {"@import": "http://example.com/deeper"}}),
        )]);
        let mut processor = ContextProcessor::new(loader, ProcessorOptions::default());
        let ctx = processor.initial_context();
        let err = processor
            .process(&ctx, &json!({"@import": "http://example.com/imported"}))
            .unwrap_err();
        assert!(matches!(err, JsonLdError::InvalidContextEntry));
    }

    #[test]
    fn import_must_be_a_map() {
        let loader = FixtureLoader::new(vec![(
            "http://example.com/imported",
            json!({"@context": "http://example.com/other"}),
        )]);
        let mut processor = ContextProcessor::new(loader, ProcessorOptions::default());
        let ctx = processor.initial_context();
        let err = processor
            .process(&ctx, &json!({"@import": "http://example.com/imported"}))
            .unwrap_err();
        assert!(matches!(err, JsonLdError::InvalidRemoteContext));

        let mut processor = processor_11(None);
        let ctx = processor.initial_context();
        let err = processor.process(&ctx, &json!({"@import": 9})).unwrap_err();
        assert!(matches!(err, JsonLdError::InvalidImportValue));

        let mut processor = processor_10(None);
        let ctx = processor.initial_context();
        let err = processor
            .process(&ctx, &json!({"@import": "http://example.com/imported"}))
            .unwrap_err();
        assert!(matches!(err, JsonLdError::InvalidContextEntry));
    }

    #[test]
    fn remote_base_does_not_leak_into_caller() {
        let loader = FixtureLoader::new(vec![(
            "http://example.com/ctx",
            json!({"@context": {
                "@base": "http://sneaky.example/",
                "name": "http://example.com/name"
            }}),
        )]);
        let mut processor = ContextProcessor::new(
            loader,
            ProcessorOptions {
                base: Some(Url::parse("http://example.com/doc").expect("test base")),
                ..ProcessorOptions::default()
            },
        );
        let ctx = processor.initial_context();
        let result = processor
            .process(&ctx, &json!("http://example.com/ctx"))
            .unwrap();
        assert_eq!(
            result.base.as_ref().map(Url::as_str),
            Some("http://example.com/doc")
        );
        assert!(result.term("name").is_some());
    }

    #[test]
    fn loader_errors_are_preserved() {
        let mut processor = processor_11(None);
        let ctx = processor.initial_context();
        let err = processor
            .process(&ctx, &json!("http://example.com/missing"))
            .unwrap_err();
        match err {
            JsonLdError::LoadingRemoteContextFailed { source } => {
                assert!(source.is_some());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
