//! Credential rotation for a single generation step
//!
//! A provider call that fails with a quota or invalid-credential error may
//! succeed with a different credential, so [`run_with_rotation`] walks the
//! [`CredentialPool`] at most once, starting at its current index. Failures
//! that another credential cannot fix end the step immediately:
//!
//! - [`ProviderError::MalformedOutput`] → [`Error::InvalidFormat`]
//! - [`ProviderError::Unknown`] → [`Error::OperationFailed`]
//!
//! # Example
//!
//! ```no_run
//! use lessonforge::credentials::CredentialPool;
//! use lessonforge::retry::run_with_rotation;
//! use lessonforge::types::Stage;
//! use lessonforge::provider::ProviderError;
//!
//! # async fn example() -> lessonforge::Result<()> {
//! let mut pool = CredentialPool::new(vec!["k1".into(), "k2".into()], 0)
//!     .ok_or(lessonforge::Error::CredentialsRequired)?;
//! let attempted = run_with_rotation(&mut pool, Stage::Outline, |credential| async move {
//!     // one provider call with `credential`
//!     Ok::<_, ProviderError>(credential.len())
//! })
//! .await?;
//! println!("succeeded with credential #{}", attempted.index_used);
//! # Ok(())
//! # }
//! ```

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::credentials::CredentialPool;
use crate::error::{Error, ExhaustionCause, Result};
use crate::provider::{FailureClass, ProviderError};
use crate::types::Stage;

/// Trait for errors that can be fixed by switching to another credential
pub trait IsRotatable {
    /// Returns true if a different credential may succeed where this one failed
    fn is_rotatable(&self) -> bool;
}

impl IsRotatable for ProviderError {
    fn is_rotatable(&self) -> bool {
        matches!(
            self.class(),
            FailureClass::Quota | FailureClass::InvalidCredential
        )
    }
}

/// Successful result of a rotated operation
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    /// Value returned by the provider call
    pub value: T,
    /// Pool index of the credential that succeeded
    pub index_used: usize,
    /// Number of provider calls made, including the successful one
    pub attempts: usize,
}

impl<T> Attempted<T> {
    /// Transform the value, keeping the attempt metadata
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Attempted<U> {
        Attempted {
            value: f(self.value),
            index_used: self.index_used,
            attempts: self.attempts,
        }
    }
}

/// Execute one provider operation, rotating credentials on recoverable failures
///
/// `operation` receives the credential to use and performs exactly one
/// provider call. On success the pool's current index is the one reported in
/// [`Attempted::index_used`]; callers persist it as the next starting point.
///
/// # Errors
///
/// - [`Error::CredentialsRequired`] for an empty pool
/// - [`Error::InvalidFormat`] on the first malformed answer (no rotation)
/// - [`Error::OperationFailed`] on the first unclassified failure (no rotation)
/// - [`Error::AllCredentialsExhausted`] after every credential failed with a
///   rotatable error; exactly `pool.size()` calls are made
pub async fn run_with_rotation<F, Fut, T>(
    pool: &mut CredentialPool,
    stage: Stage,
    mut operation: F,
) -> Result<Attempted<T>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = std::result::Result<T, ProviderError>>,
{
    let size = pool.size();
    if size == 0 {
        return Err(Error::CredentialsRequired);
    }

    let mut quota_failures = 0usize;
    let mut invalid_failures = 0usize;

    for attempt in 1..=size {
        let index = pool.current_index();
        let credential = pool.next().to_string();

        match operation(credential).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(
                        %stage,
                        credential_index = index,
                        attempts = attempt,
                        "Operation succeeded after credential rotation"
                    );
                }
                return Ok(Attempted {
                    value,
                    index_used: index,
                    attempts: attempt,
                });
            }
            Err(ProviderError::MalformedOutput(message)) => {
                tracing::error!(
                    %stage,
                    credential_index = index,
                    error = %message,
                    "Provider returned malformed output, not rotating"
                );
                return Err(Error::InvalidFormat { stage, message });
            }
            Err(e) if e.is_rotatable() => {
                ExhaustionCause::tally(e.class(), &mut quota_failures, &mut invalid_failures);

                if attempt == size {
                    let cause = ExhaustionCause::from_counts(quota_failures, invalid_failures);
                    tracing::error!(
                        %stage,
                        attempts = attempt,
                        %cause,
                        "All credentials exhausted"
                    );
                    return Err(Error::AllCredentialsExhausted {
                        stage,
                        attempts: attempt,
                        cause,
                    });
                }

                let next = pool.advance();
                tracing::warn!(
                    %stage,
                    credential_index = index,
                    next_index = next,
                    class = ?e.class(),
                    attempt,
                    max_attempts = size,
                    "Credential failed, rotating"
                );
            }
            Err(e) => {
                tracing::error!(
                    %stage,
                    credential_index = index,
                    error = %e,
                    "Operation failed with non-rotatable error"
                );
                return Err(Error::OperationFailed {
                    stage,
                    message: e.message().to_string(),
                });
            }
        }
    }

    // Unreachable for a non-empty pool; kept so a broken loop can never report success.
    Err(Error::AllCredentialsExhausted {
        stage,
        attempts: size,
        cause: ExhaustionCause::from_counts(quota_failures, invalid_failures),
    })
}

/// Add random jitter to a delay
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// result lies between `delay` and `2 * delay`.
pub(crate) fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
