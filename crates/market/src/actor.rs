use serde::{Deserialize, Serialize};

use crate::error::MarketError;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Role {
    User,
    Creator,
    Reviewer,
    Admin,
}

/// The authenticated caller of a domain operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Actor {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn can_review(&self) -> bool {
        matches!(self.role, Role::Reviewer | Role::Admin)
    }

    pub fn owns(&self, owner_id: &str) -> bool {
        self.user_id == owner_id
    }

    /// Forbidden unless the actor holds one of `allowed`.
    pub fn require(&self, allowed: &[Role], action: &str) -> Result<(), MarketError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(MarketError::Forbidden(format!(
                "role {} may not {action}",
                self.role
            )))
        }
    }
}
