//! Client key validation.

use super::limiter::LimiterError;

/// A validated, non-empty identifier partitioning rate limit state.
///
/// Usually the client's network address. Keys are compared verbatim, so
/// callers must normalize them consistently across instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Validate a raw client identifier.
    pub fn new(raw: &str) -> Result<Self, LimiterError> {
        if raw.trim().is_empty() {
            return Err(LimiterError::InvalidInput(
                "client key must not be empty".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
