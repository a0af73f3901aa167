use uuid::Uuid;
use crate::domains::permission::{ActorScope, Role};
use crate::errors::ServiceError;

/// Represents the authentication context for the current operation.
///
/// Built by the embedding application after authenticating the caller and
/// passed explicitly into every service call; there is no ambient user.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The ID of the authenticated user
    pub user_id: Uuid,

    /// The role of the authenticated user
    pub role: Role,

    /// Hospital the user is attached to, if any
    pub hospital_id: Option<Uuid>,

    /// Geographic zone, denormalized from the hospital at assignment time
    pub zone: Option<String>,

    /// Medical specialty; `ALL` on tutors widens their hospital scope
    pub specialty: Option<String>,

    /// Partner society the user belongs to, if any
    pub society_id: Option<Uuid>,
}

impl AuthContext {
    /// Create a new authentication context
    pub fn new(
        user_id: Uuid,
        role: Role,
        hospital_id: Option<Uuid>,
        zone: Option<String>,
        specialty: Option<String>,
        society_id: Option<Uuid>,
    ) -> Self {
        Self {
            user_id,
            role,
            hospital_id,
            zone,
            specialty,
            society_id,
        }
    }

    /// Create a new authentication context for internal system operations
    pub fn internal_system_context() -> Self {
        Self {
            user_id: Uuid::nil(),
            role: Role::Administrator,
            hospital_id: None,
            zone: None,
            specialty: None,
            society_id: None,
        }
    }

    /// Flatten this context into the scope resolver's actor shape
    pub fn scope(&self) -> ActorScope {
        ActorScope {
            user_id: self.user_id,
            role: self.role,
            hospital_id: self.hospital_id,
            zone: self.zone.clone(),
            specialty: self.specialty.clone(),
            society_id: self.society_id,
        }
    }

    /// Verify user is an admin
    pub fn authorize_admin(&self) -> Result<(), ServiceError> {
        if matches!(self.role, Role::Administrator) {
            Ok(())
        } else {
            Err(ServiceError::PermissionDenied(
                "This action requires administrator privileges".to_string()
            ))
        }
    }

    /// For operations restricted to the user's own records
    pub fn authorize_self_or_admin(&self, resource_owner_id: &Uuid) -> Result<(), ServiceError> {
        if &self.user_id == resource_owner_id || matches!(self.role, Role::Administrator) {
            Ok(())
        } else {
            Err(ServiceError::PermissionDenied(
                "You do not have permission to access this resource".to_string()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize_admin() {
        let admin = AuthContext::internal_system_context();
        assert!(admin.authorize_admin().is_ok());

        let tutor = AuthContext::new(
            Uuid::new_v4(),
            Role::Tutor,
            Some(Uuid::new_v4()),
            None,
            Some("ALL".to_string()),
            None,
        );
        assert!(tutor.authorize_admin().is_err());
    }

    #[test]
    fn test_authorize_self_or_admin() {
        let owner = Uuid::new_v4();
        let ctx = AuthContext::new(owner, Role::Resident, None, None, None, None);
        assert!(ctx.authorize_self_or_admin(&owner).is_ok());
        assert!(ctx.authorize_self_or_admin(&Uuid::new_v4()).is_err());
    }
}
