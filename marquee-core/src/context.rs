use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Guest,
    Customer,
    Admin,
}

/// Authenticated caller of one request, passed explicitly down the call chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: Uuid,
    /// User id, or guest session id for anonymous checkouts
    pub subject: String,
    pub role: Role,
}

impl RequestContext {
    pub fn new(subject: impl Into<String>, role: Role) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            subject: subject.into(),
            role,
        }
    }

    /// Identity written into seat locks taken before a booking exists.
    pub fn holder_id(&self) -> &str {
        &self.subject
    }

    pub fn user_id(&self) -> Option<&str> {
        match self.role {
            Role::Guest => None,
            _ => Some(&self.subject),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
