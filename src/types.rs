use serde::{Deserialize, Serialize};

// Re-export Role from the permission module
pub use crate::domains::permission::Role;

/// Sentinel specialty on tutors that grants scope over every specialty
/// within their hospital.
pub const ALL_SPECIALTIES: &str = "ALL";

/// Training program track a user (and the phase catalog) belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgramType {
    Residents,
    Societies,
}

impl ProgramType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramType::Residents => "residentes",
            ProgramType::Societies => "sociedades",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "residentes" => Some(ProgramType::Residents),
            "sociedades" => Some(ProgramType::Societies),
            _ => None,
        }
    }
}

/// Pagination parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationParams {
    pub page: u32,
    pub per_page: u32,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

/// Paginated result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

impl<T> PaginatedResult<T> {
    pub fn new(items: Vec<T>, total: u64, params: PaginationParams) -> Self {
        let total_pages = (total as f64 / params.per_page as f64).ceil() as u32;
        Self {
            items,
            total,
            page: params.page,
            per_page: params.per_page,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_type_codec() {
        assert_eq!(ProgramType::Residents.as_str(), "residentes");
        assert_eq!(ProgramType::from_str("sociedades"), Some(ProgramType::Societies));
        assert_eq!(ProgramType::from_str("unknown"), None);
    }
}
