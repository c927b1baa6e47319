//! The authenticated actor supplied by the identity provider.

use serde::{Deserialize, Serialize};

use animus_types::policy::ContextActor;

/// The role granting approval-resolution and policy-administration rights.
pub const ADMIN_ROLE: &str = "admin";

/// The identity attached to every inbound request by the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Actor {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            email: None,
            roles: Vec::new(),
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }

    /// The actor slice embedded in policy contexts.
    pub fn as_context_actor(&self) -> ContextActor {
        ContextActor {
            subject: self.subject.clone(),
            email: self.email.clone(),
            roles: self.roles.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_detection() {
        assert!(Actor::new("u1").with_roles(&["admin"]).is_admin());
        assert!(!Actor::new("u1").with_roles(&["researcher"]).is_admin());
    }
}
