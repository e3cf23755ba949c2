//! JSON-LD 1.1 context processing.
//!
//! This crate implements the context-processing half of a JSON-LD
//! processor: it resolves a chain of local contexts (inline maps, remote
//! references, or arrays of these) into an active [`Context`] mapping
//! terms to IRIs, containers, types, languages and directions. The
//! consuming algorithms (expansion, compaction, flattening) are expected
//! to live elsewhere and query the structures produced here.

use serde_json::Value;
use url::Url;

mod context;
mod creation;
mod error;
mod iri;
mod processing;

pub use context::{Context, Direction, TermDefinition};
pub use error::JsonLdError;
pub use processing::{
    ContextProcessor, MemoryContextCache, NoopContextCache, ProcessingMode, ProcessorOptions,
};

/// The error type remote-context loaders are allowed to fail with. It is
/// carried inside [`JsonLdError::LoadingRemoteContextFailed`] untouched.
pub type LoaderError = Box<dyn std::error::Error + Send + Sync>;

/// This trait is implemented by consumers of the API, to provide remote
/// contexts. The loader performs the actual dereference (network,
/// filesystem, fixture table) and returns the parsed document body; the
/// processor extracts the `@context` member itself.
pub trait RemoteContextLoader {
    /// Loads a remote JSON-LD document into memory.
    fn load_context(&self, url: &Url) -> Result<Value, LoaderError>;
}

/// Cache for dereferenced remote contexts, keyed by the exact resolved
/// absolute URL. Entries are whole `@context` payloads, never processed
/// active contexts.
///
/// A miss-then-populate is not atomic, so a cache shared between
/// concurrently running processors must serialize access; giving each
/// top-level processing call its own cache is the simple alternative.
pub trait RemoteContextCache {
    fn get(&self, url: &Url) -> Option<Value>;
    fn put(&mut self, url: &Url, context: Value);
}
