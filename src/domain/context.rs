use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

/// The caller on whose behalf an operation runs.
///
/// Issued by the authentication layer and passed explicitly into every engine
/// operation; the engine never looks credentials up from ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: UserId,
    pub role: Role,
}

impl RequestContext {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn student(user_id: UserId) -> Self {
        Self::new(user_id, Role::Student)
    }

    pub fn teacher(user_id: UserId) -> Self {
        Self::new(user_id, Role::Teacher)
    }

    pub fn admin(user_id: UserId) -> Self {
        Self::new(user_id, Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_role(&self, role: Role) -> Result<(), EngineError> {
        if self.role == role {
            Ok(())
        } else {
            Err(EngineError::Forbidden(format!(
                "operation requires the {role:?} role"
            )))
        }
    }

    /// Succeeds when the caller is `owner` or an admin.
    pub fn require_owner(&self, owner: UserId) -> Result<(), EngineError> {
        if self.user_id == owner || self.is_admin() {
            Ok(())
        } else {
            Err(EngineError::Forbidden(
                "resource belongs to another user".to_string(),
            ))
        }
    }
}
