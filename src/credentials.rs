//! Credential rotation state
//!
//! [`CredentialPool`] is an ordered list of provider credentials plus the index
//! of the one to try next. It holds no retry logic; [`crate::retry`] decides
//! when to advance.

/// Ordered provider credentials with a wrapping cursor
#[derive(Clone)]
pub struct CredentialPool {
    credentials: Vec<String>,
    current: usize,
}

impl CredentialPool {
    /// Create a pool starting at `start_index`.
    ///
    /// The start index is reduced modulo the pool size so a persisted index
    /// stays valid after the credential list shrinks. Returns `None` for an
    /// empty list; callers report [`Error::CredentialsRequired`](crate::Error::CredentialsRequired).
    pub fn new(credentials: Vec<String>, start_index: usize) -> Option<Self> {
        if credentials.is_empty() {
            return None;
        }
        let current = start_index % credentials.len();
        Some(Self {
            credentials,
            current,
        })
    }

    /// Credential at the current index
    pub fn next(&self) -> &str {
        &self.credentials[self.current]
    }

    /// Move to the following credential, wrapping around; returns the new index
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.credentials.len();
        self.current
    }

    /// Number of credentials
    pub fn size(&self) -> usize {
        self.credentials.len()
    }

    /// Current index
    pub fn current_index(&self) -> usize {
        self.current
    }
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool")
            .field("size", &self.credentials.len())
            .field("current", &self.current)
            .finish()
    }
}
