use crate::db::models::{Role, RoleId, User};
use crate::store::RepositoryResult;

/// Lookup of roles by identifier.
pub trait RoleDirectory {
    fn find_role(&self, id: &RoleId) -> RepositoryResult<Option<Role>>;
}

/// Whether `user` is an administrator, resolved through its role.
///
/// Fails closed: a user without a role, a role id that no longer resolves,
/// and a failed lookup all yield `false`.
pub fn is_admin<D: RoleDirectory + ?Sized>(directory: &D, user: &User) -> bool {
    let Some(role_id) = user.role_id.as_ref() else {
        return false;
    };

    match directory.find_role(role_id) {
        Ok(Some(role)) => role.admin,
        Ok(None) => {
            tracing::warn!(
                user = %user.id,
                role = %role_id,
                "User references a missing role, treating as non-admin"
            );
            false
        }
        Err(e) => {
            tracing::warn!(
                user = %user.id,
                role = %role_id,
                "Role lookup failed, treating as non-admin: {}",
                e
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::UserId;
    use crate::store::RepositoryError;
    use std::collections::HashMap;

    struct FakeDirectory(HashMap<RoleId, Role>);

    impl FakeDirectory {
        fn with(roles: &[(&str, bool)]) -> Self {
            Self(
                roles
                    .iter()
                    .map(|(id, admin)| {
                        let role = Role {
                            id: RoleId::new(*id),
                            name: id.to_string(),
                            admin: *admin,
                            created_at: String::new(),
                        };
                        (role.id.clone(), role)
                    })
                    .collect(),
            )
        }
    }

    impl RoleDirectory for FakeDirectory {
        fn find_role(&self, id: &RoleId) -> RepositoryResult<Option<Role>> {
            Ok(self.0.get(id).cloned())
        }
    }

    struct BrokenDirectory;

    impl RoleDirectory for BrokenDirectory {
        fn find_role(&self, _id: &RoleId) -> RepositoryResult<Option<Role>> {
            Err(RepositoryError::NotFound("roles table".into()))
        }
    }

    fn user_with_role(role: Option<&str>) -> User {
        User {
            id: UserId::new("u1"),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: String::new(),
            role_id: role.map(RoleId::new),
            created_at: String::new(),
        }
    }

    #[test]
    fn user_without_role_is_not_admin() {
        let directory = FakeDirectory::with(&[("admin", true)]);
        assert!(!is_admin(&directory, &user_with_role(None)));
    }

    #[test]
    fn admin_flag_comes_from_role() {
        let directory = FakeDirectory::with(&[("admin", true), ("writer", false)]);
        assert!(is_admin(&directory, &user_with_role(Some("admin"))));
        assert!(!is_admin(&directory, &user_with_role(Some("writer"))));
    }

    #[test]
    fn orphaned_role_reference_is_not_admin() {
        let directory = FakeDirectory::with(&[("writer", false)]);
        assert!(!is_admin(&directory, &user_with_role(Some("deleted-admin"))));
    }

    #[test]
    fn lookup_failure_is_not_admin() {
        assert!(!is_admin(&BrokenDirectory, &user_with_role(Some("admin"))));
    }
}
