//! Lock modes for the store's admission-controlled reader/writer lock.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lock mode determining concurrency behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Only one holder can acquire the lock
    Exclusive,
    /// Multiple holders can acquire the lock
    Shared,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Exclusive => "exclusive",
            LockMode::Shared => "shared",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_mode_display() {
        assert_eq!(LockMode::Exclusive.to_string(), "exclusive");
        assert_eq!(LockMode::Shared.to_string(), "shared");
    }

    #[test]
    fn test_lock_mode_serde_names() {
        assert_eq!(serde_json::to_string(&LockMode::Shared).unwrap(), "\"Shared\"");
    }
}
