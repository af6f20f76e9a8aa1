//! ENSA Bot Resolve — query-time retrieval over the vector index.
//!
//! `Retriever::search` is plain top-k vector search. The self-query and
//! multi-query modes ask a `QueryReasoner` to rewrite the question first and
//! fall back to plain search whenever that step fails.

pub mod reasoner;
pub mod retriever;
pub mod types;

pub use reasoner::{QueryReasoner, SelfQuery, MAX_ALTERNATIVES};
pub use retriever::Retriever;
pub use types::*;
