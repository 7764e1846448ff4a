//! Collaborator boundaries for Lore.
//!
//! The persona runtime never talks to a model, an embedding service or a
//! tokenizer directly. It talks to the traits in this crate, so every backend
//! is interchangeable and every component can be tested against the mocks.
//!
//! ```text
//! ┌────────────────────┐  ┌──────────────┐  ┌──────────────┐  ┌────────────┐
//! │  LlmBackend        │  │  Embedder    │  │ VectorSearch │  │ Tokenizer  │
//! │  - complete()      │  │  - embed()   │  │  - search()  │  │  - count() │
//! │  - complete_stream │  └──────────────┘  └──────────────┘  └────────────┘
//! └────────────────────┘
//! ```
//!
//! Shipped implementations:
//! - [`MockBackend`] / [`MockEmbedder`]: deterministic test doubles
//! - [`BruteForceSearch`]: in-process cosine-distance nearest neighbours
//! - [`CharRatioTokenizer`]: character-ratio token estimate

pub mod backend;
pub mod embeddings;
pub mod error;
pub mod search;
pub mod tokenizer;
pub mod types;

pub use backend::{
    LlmBackend, MockBackend, ResponseStream, SharedBackend, StreamEvent, collect_stream,
    with_retry,
};
pub use embeddings::{
    Embedder, MockEmbedder, SharedEmbedder, cosine_distance, cosine_similarity,
    euclidean_distance,
};
pub use error::{LlmError, Result};
pub use search::{BruteForceSearch, SearchHit, SharedSearch, VectorSearch};
pub use tokenizer::{CharRatioTokenizer, SharedTokenizer, Tokenizer};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StopReason, Usage};
