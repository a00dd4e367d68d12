//! Language-model backend: the Langbase Pipes HTTP client, its wire types,
//! and the [`LanguageModel`] capability the analysis stages call.

mod client;
mod model;
mod types;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use client::LangbaseClient;
#[cfg(test)]
pub use model::MockLanguageModel;
pub use model::{LangbasePipe, LanguageModel};
pub use types::*;
