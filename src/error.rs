// src/error.rs
//
// Error taxonomy. Only `InvalidInput` ever surfaces as a request failure;
// every other kind is absorbed at the nearest component boundary and
// expressed as flags or diagnostics on the verdict.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    /// Malformed envelope or required field missing. The one kind that fails
    /// the request.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A single provider or embedding call failed; aggregation proceeds.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Collection create / upsert / search failed; the verdict still returns
    /// with pattern analysis degraded.
    #[error("vector store unavailable: {0}")]
    VectorStore(#[from] VectorError),

    /// Generative path failed or returned non-JSON; the lite result stands.
    #[error("generative model unavailable: {0}")]
    Generative(#[from] GenerativeError),

    /// A computed value escaped its documented range or an adapter returned
    /// an unparseable shape it should have caught. Logged, surfaced as an
    /// UNKNOWN tier, never as a crash.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

/// Failure of one IP-reputation provider call. Captured per provider as an
/// error-marked result; never aborts the other providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("deadline exceeded")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("status {0}: {1}")]
    Status(u16, String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum GenerativeError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("status {0}")]
    Status(u16),

    #[error("empty response")]
    Empty,

    #[error("not configured")]
    NotConfigured,
}
