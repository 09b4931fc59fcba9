use serde::{Deserialize, Serialize};

/// User id used for actions taken by the platform itself (webhooks, sweeps).
pub const SYSTEM_USER: &str = "system";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Companion,
    Admin,
    System,
}

/// An authenticated caller, as produced by verifying a bearer credential upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn client(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Client)
    }

    pub fn companion(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Companion)
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Admin)
    }

    pub fn system() -> Self {
        Self::new(SYSTEM_USER, Role::System)
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}
