use serde_json::Value;
use thiserror::Error;

use crate::LoaderError;

/// The closed set of failures context processing can report. The display
/// string of each variant is the error code of the corresponding JSON-LD
/// API condition. The first error raised aborts the whole processing call
/// chain; nothing in this crate retries or rewraps.
#[derive(Debug, Error)]
pub enum JsonLdError {
    #[error("invalid context nullification")]
    InvalidContextNullification,

    #[error("context overflow")]
    ContextOverflow,

    #[error("invalid local context")]
    InvalidLocalContext,

    #[error("invalid @version value: {0}")]
    InvalidVersionValue(Value),

    #[error("processing mode conflict")]
    ProcessingModeConflict,

    #[error("invalid @import value")]
    InvalidImportValue,

    #[error("invalid remote context")]
    InvalidRemoteContext,

    #[error("invalid context entry")]
    InvalidContextEntry,

    #[error("invalid base IRI")]
    InvalidBaseIri,

    #[error("invalid default language")]
    InvalidDefaultLanguage,

    #[error("invalid base direction")]
    InvalidBaseDirection,

    #[error("invalid @propagate value")]
    InvalidPropagateValue,

    #[error("cyclic IRI mapping")]
    CyclicIriMapping,

    #[error("keyword redefinition")]
    KeywordRedefinition,

    #[error("invalid term definition")]
    InvalidTermDefinition,

    #[error("invalid type mapping")]
    InvalidTypeMapping,

    #[error("invalid reverse property")]
    InvalidReverseProperty,

    #[error("invalid IRI mapping")]
    InvalidIriMapping,

    #[error("invalid keyword alias")]
    InvalidKeywordAlias,

    #[error("invalid container mapping")]
    InvalidContainerMapping,

    #[error("invalid language mapping")]
    InvalidLanguageMapping,

    #[error("invalid @nest value")]
    InvalidNestValue,

    #[error("protected term redefinition")]
    ProtectedTermRedefinition,

    /// The loader failed, the body was not a map, or the body carried no
    /// `@context` entry. The loader's own error, if any, is preserved as
    /// the source.
    #[error("loading remote context failed")]
    LoadingRemoteContextFailed {
        #[source]
        source: Option<LoaderError>,
    },
}

impl JsonLdError {
    pub(crate) fn loading_failed(source: impl Into<LoaderError>) -> JsonLdError {
        JsonLdError::LoadingRemoteContextFailed {
            source: Some(source.into()),
        }
    }

    pub(crate) fn loading_failed_opaque() -> JsonLdError {
        JsonLdError::LoadingRemoteContextFailed { source: None }
    }
}
