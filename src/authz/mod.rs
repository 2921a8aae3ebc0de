pub mod policy;
pub mod roles;

pub use policy::{can_perform, Action, Decision, Denied, Requester, ResourceKind, Target};
pub use roles::{is_admin, RoleDirectory};
