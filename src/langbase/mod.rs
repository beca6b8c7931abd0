//! Langbase HTTP client: pipe runs, pipe bootstrap, and memory retrieval.

mod client;
mod types;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use client::LangbaseClient;
pub use types::*;
