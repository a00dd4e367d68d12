//! # Investigative Analysis
//!
//! Multi-stage investigative analysis of news articles. Each article is run
//! through a sequence of LLM-backed stages served by Langbase Pipes, and the
//! evidence and hypotheses gathered along the way are kept in a per-session
//! ledger.
//!
//! ## Stages
//!
//! - **Surface Extraction**: entities and relationships stated in the text
//! - **Deep Analysis**: roles, relationship strength, motivations, patterns
//! - **Cross-Reference Validation**: consistency across earlier passes
//! - **Hypothesis Generation**: candidate explanations and information gaps
//! - **Recursive Refinement**: final synthesis and hypothesis revision
//!
//! ## Architecture
//!
//! ```text
//! Driver → AnalysisController → StageProcessor → LanguageModel → Langbase Pipes (HTTP)
//!                 ↓
//!        session snapshots → Storage (SQLite)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use investigative_analysis::analysis::{AnalysisConfig, AnalysisController, Article};
//! use investigative_analysis::langbase::{LangbaseClient, LangbasePipe};
//! use investigative_analysis::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let client = LangbaseClient::new(&config.langbase, config.request.clone())?;
//!     let model = Arc::new(LangbasePipe::new(client, &config.pipes.analysis));
//!     let controller = AnalysisController::new(model);
//!
//!     let article = Article::new("Title", "Body text");
//!     let session = controller.start_analysis(article, AnalysisConfig::default()).await?;
//!     let done = controller
//!         .wait_for_completion(&session.id, Duration::from_secs(300))
//!         .await?;
//!     println!("{}", serde_json::to_string_pretty(&*done)?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Analysis sessions, stage processors and the evidence ledger.
pub mod analysis;
/// Configuration loaded from the environment.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Langbase API client and the language-model capability.
pub mod langbase;
/// System prompts for the analysis stages.
pub mod prompts;
/// SQLite storage for finished sessions.
pub mod storage;

pub use analysis::{AnalysisConfig, AnalysisController, AnalysisSession, Article};
pub use config::Config;
pub use error::{AppError, AppResult};
