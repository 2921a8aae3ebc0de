// Repository traits - isolate all database side effects from handlers and policy
pub mod sqlite;

pub use sqlite::SqliteStore;

use thiserror::Error;

use crate::authz::RoleDirectory;
use crate::db::models::{
    Comment, CommentId, NewUser, Post, PostId, Role, RoleId, User, UserId,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Users and roles.
pub trait IdentityStore: RoleDirectory {
    fn find_user(&self, id: &UserId) -> RepositoryResult<Option<User>>;

    fn find_user_by_username(&self, username: &str) -> RepositoryResult<Option<User>>;

    fn list_users(&self) -> RepositoryResult<Vec<User>>;

    fn count_users(&self) -> RepositoryResult<i64>;

    /// Fails with `Conflict` when the username or email is taken, or the
    /// role does not exist.
    fn create_user(&self, user: NewUser) -> RepositoryResult<User>;

    /// Self-service sign-up. The account count is read and the row inserted
    /// atomically: the first account receives `bootstrap_role`, later ones no
    /// role. Returns `None` when accounts already exist and `open` is false.
    fn register_user(
        &self,
        user: NewUser,
        open: bool,
        bootstrap_role: &RoleId,
    ) -> RepositoryResult<Option<User>>;

    /// Fails with `Conflict` when it would remove the last administrator.
    fn set_user_role(&self, id: &UserId, role_id: Option<&RoleId>) -> RepositoryResult<()>;

    /// Fails with `Conflict` while the user still owns posts, or when they
    /// are the last administrator.
    fn delete_user(&self, id: &UserId) -> RepositoryResult<()>;

    fn list_roles(&self) -> RepositoryResult<Vec<Role>>;

    fn create_role(&self, name: &str, admin: bool) -> RepositoryResult<Role>;

    /// Fails with `Conflict` when clearing `admin` would leave no administrator.
    fn update_role(&self, id: &RoleId, name: &str, admin: bool) -> RepositoryResult<()>;

    /// Users referencing the role are left without one. Refused when that
    /// would leave no administrator.
    fn delete_role(&self, id: &RoleId) -> RepositoryResult<()>;
}

/// Posts and their comments.
pub trait ContentStore {
    /// Newest first.
    fn list_posts(&self) -> RepositoryResult<Vec<Post>>;

    fn find_post(&self, id: &PostId) -> RepositoryResult<Option<Post>>;

    fn create_post(&self, owner: &UserId, title: &str, body: &str) -> RepositoryResult<Post>;

    fn update_post(&self, id: &PostId, title: &str, body: &str) -> RepositoryResult<()>;

    /// Removes the post together with its comments.
    fn delete_post(&self, id: &PostId) -> RepositoryResult<()>;

    /// Oldest first.
    fn list_comments(&self, post_id: &PostId) -> RepositoryResult<Vec<Comment>>;

    fn list_pending_comments(&self) -> RepositoryResult<Vec<Comment>>;

    fn find_comment(&self, id: &CommentId) -> RepositoryResult<Option<Comment>>;

    /// New comments always start unapproved.
    fn create_comment(
        &self,
        post_id: &PostId,
        author: &str,
        body: &str,
    ) -> RepositoryResult<Comment>;

    fn update_comment(&self, id: &CommentId, author: &str, body: &str) -> RepositoryResult<()>;

    fn approve_comment(&self, id: &CommentId) -> RepositoryResult<()>;

    fn delete_comment(&self, id: &CommentId) -> RepositoryResult<()>;
}
