use subtle::ConstantTimeEq;

use crate::audit::AuditActor;
use crate::engine::AuthFailure;

/// Who is asking. The engine only ever sees this, never the secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Admin,
    User,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin)
    }
}

impl From<Actor> for AuditActor {
    fn from(actor: Actor) -> Self {
        match actor {
            Actor::Admin => AuditActor::Admin,
            Actor::User => AuditActor::User,
        }
    }
}

/// Turns a presented admin secret into an [`Actor`].
#[derive(Debug)]
pub struct AdminGate {
    secret: Option<String>,
}

impl AdminGate {
    /// An empty secret disables admin access entirely.
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn is_admin(&self, presented: Option<&str>) -> bool {
        match (self.secret.as_deref(), presented) {
            (Some(secret), Some(p)) => bool::from(secret.as_bytes().ct_eq(p.as_bytes())),
            _ => false,
        }
    }

    /// No secret means a regular user; a wrong secret is an error, not a downgrade.
    pub fn resolve(&self, presented: Option<&str>) -> Result<Actor, AuthFailure> {
        match presented.filter(|p| !p.is_empty()) {
            None => Ok(Actor::User),
            Some(p) if self.is_admin(Some(p)) => Ok(Actor::Admin),
            Some(_) => Err(AuthFailure::InvalidAdminSecret),
        }
    }

    pub fn require_admin(&self, presented: Option<&str>) -> Result<Actor, AuthFailure> {
        if self.is_admin(presented) {
            Ok(Actor::Admin)
        } else {
            Err(AuthFailure::AdminRequired)
        }
    }
}
