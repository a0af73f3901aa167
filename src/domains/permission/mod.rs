pub mod role;
pub mod scope;

pub use role::Role;
pub use scope::{can_act, ActorScope, ScopeAction, SubjectScope};
