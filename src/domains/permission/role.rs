use serde::{Deserialize, Serialize};

/// Role enum for authorization in the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Administrator,
    Resident,
    Participant,
    Tutor,
    Professor,
    /// Zone supervisor (CSM): scoped by geographic zone instead of hospital
    ZoneSupervisor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "administrador",
            Role::Resident => "residente",
            Role::Participant => "participante",
            Role::Tutor => "tutor",
            Role::Professor => "profesor",
            Role::ZoneSupervisor => "csm",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "administrador" => Some(Role::Administrator),
            "residente" => Some(Role::Resident),
            "participante" => Some(Role::Participant),
            "tutor" => Some(Role::Tutor),
            "profesor" => Some(Role::Professor),
            "csm" => Some(Role::ZoneSupervisor),
            _ => None,
        }
    }

    /// Roles that complete activities and own progress records.
    pub fn is_trainee(&self) -> bool {
        matches!(self, Role::Resident | Role::Participant)
    }

    /// Roles allowed to validate or reject activities and to drive phase
    /// status. Trainees are never in this set, not even for their own records.
    pub fn is_supervisor(&self) -> bool {
        matches!(
            self,
            Role::Administrator | Role::Tutor | Role::Professor | Role::ZoneSupervisor
        )
    }

    pub fn all() -> Vec<Role> {
        vec![
            Role::Administrator,
            Role::Resident,
            Role::Participant,
            Role::Tutor,
            Role::Professor,
            Role::ZoneSupervisor,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_codec_round_trip() {
        for role in Role::all() {
            assert_eq!(Role::from_str(role.as_str()), Some(role));
        }
        assert_eq!(Role::from_str("alumno"), None);
    }

    #[test]
    fn test_supervisor_set_excludes_trainees() {
        assert!(Role::Administrator.is_supervisor());
        assert!(Role::Tutor.is_supervisor());
        assert!(Role::Professor.is_supervisor());
        assert!(Role::ZoneSupervisor.is_supervisor());
        assert!(!Role::Resident.is_supervisor());
        assert!(!Role::Participant.is_supervisor());

        assert!(Role::Resident.is_trainee());
        assert!(Role::Participant.is_trainee());
        assert!(!Role::Tutor.is_trainee());
    }
}
