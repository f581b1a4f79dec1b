//! # lessonforge
//!
//! Resumable course generation on top of a generative-AI provider.
//!
//! Given a topic, [`CourseGenerator`] drives a multi-stage pipeline (outline,
//! then per chapter: theory text, flashcards, quiz; podcast script and audio
//! on demand), persists every step, resumes after interruption, and rotates
//! across a pool of API credentials when the provider runs out of quota.
//!
//! ## Design Philosophy
//!
//! - **Resumable** - the run position is derived from stored artifacts, never
//!   from a cursor, so a crash at any point loses at most one provider call
//! - **Single-flight** - one generation-type operation at a time; a second
//!   one fails fast with [`Error::AlreadyRunning`]
//! - **Library-first** - no UI, purely a Rust crate for embedding
//! - **Event-driven** - consumers subscribe to progress events
//!
//! ## Quick Start
//!
//! ```no_run
//! use lessonforge::{Config, CourseGenerator, GenerationOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.provider.credentials = vec!["first-key".into(), "second-key".into()];
//!
//!     let generator = CourseGenerator::open(config).await?;
//!
//!     let mut run = generator
//!         .start_generation("Roman History", GenerationOptions::default())
//!         .await?;
//!     while let Some(event) = run.next_event().await {
//!         println!("Event: {:?}", event);
//!     }
//!     let outcome = run.wait().await?;
//!     println!("{} stages generated", outcome.stages_generated);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Credential pool with rotation
pub mod credentials;
/// SQLite persistence layer
pub mod db;
/// Error types
pub mod error;
/// Generation orchestrator (decomposed into focused submodules)
pub mod generator;
/// Provider seam, Gemini transport and scripted provider
pub mod provider;
/// Operation runner with credential rotation
pub mod retry;
/// Stage generators
pub mod stages;
/// Resumable artifact store
pub mod store;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, GenerationConfig, PersistenceConfig, ProviderConfig};
pub use credentials::CredentialPool;
pub use db::Database;
pub use error::{
    Error, ErrorDetail, ExhaustionCause, Remediation, Result, StorageError,
};
pub use generator::{CourseGenerator, GenerationHandle, RunState};
pub use provider::{
    AudioClip, ContentProvider, FailureClass, GeminiProvider, ProviderError, RecordedCall,
    ScriptedProvider,
};
pub use store::{MemoryStore, ResumableStore, TopicStore};
pub use types::{
    Chapter, ChapterRef, Event, Flashcard, GenerationOptions, GenerationProgress, Outline,
    QuizQuestion, RunKind, RunOutcome, RunStatus, Stage, StageStatus, TopicSnapshot,
};

/// Cancel the in-flight run when the process is asked to stop.
///
/// Waits for a termination signal, then requests cancellation so the run
/// stops at its next checkpoint with everything persisted so far kept
/// resumable. Returns whether a run was cancelled.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to whichever
///   handler could be registered.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use lessonforge::{Config, CourseGenerator, GenerationOptions, cancel_on_shutdown_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let generator = CourseGenerator::open(Config::default()).await?;
///     tokio::spawn(cancel_on_shutdown_signal(generator.clone()));
///
///     generator
///         .run_generation("Roman History", GenerationOptions::default())
///         .await?;
///     Ok(())
/// }
/// ```
pub async fn cancel_on_shutdown_signal(generator: CourseGenerator) -> bool {
    wait_for_signal().await;
    generator.cancel_generation()
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
