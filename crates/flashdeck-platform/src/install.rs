//! The install invitation.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::PlatformResult;

/// The user's answer to an install invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserChoice {
    Accepted,
    Dismissed,
}

impl UserChoice {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UserChoice::Accepted)
    }
}

/// A single-use invitation to show the platform's install dialog.
///
/// Platforms reject a second `prompt()` on the same invitation.
#[async_trait]
pub trait InstallPrompt: Send + Sync + fmt::Debug {
    /// Present the dialog and wait for the user's choice.
    async fn prompt(&self) -> PlatformResult<UserChoice>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_choice_wire_format() {
        assert_eq!(serde_json::to_string(&UserChoice::Accepted).unwrap(), "\"accepted\"");
        let choice: UserChoice = serde_json::from_str("\"dismissed\"").unwrap();
        assert_eq!(choice, UserChoice::Dismissed);
        assert!(!choice.is_accepted());
    }
}
