use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};

use crate::authz::RoleDirectory;
use crate::db::models::{
    Comment, CommentId, NewUser, Post, PostId, Role, RoleId, User, UserId,
};
use crate::state::DbPool;
use crate::store::{ContentStore, IdentityStore, RepositoryError, RepositoryResult};

const USER_COLUMNS: &str = "id, username, email, password_hash, role_id, created_at";
const ROLE_COLUMNS: &str = "id, name, admin, created_at";
const POST_COLUMNS: &str = "id, user_id, title, body, created_at, updated_at";
const COMMENT_COLUMNS: &str = "id, post_id, author, body, approved, created_at";

const LAST_ADMIN: &str = "At least one administrator must remain";

/// SQLite implementation of both stores.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Run `change` in a write transaction, rolling it back when it would
    /// leave an install that had administrators with none.
    fn keeping_an_admin<T>(
        &self,
        change: impl FnOnce(&Connection) -> RepositoryResult<T>,
    ) -> RepositoryResult<T> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let before = admin_count(&tx)?;
        let result = change(&*tx)?;
        if before > 0 && admin_count(&tx)? == 0 {
            tracing::warn!("Refusing change that removes the last administrator");
            return Err(RepositoryError::Conflict(LAST_ADMIN.to_string()));
        }

        tx.commit()?;
        Ok(result)
    }
}

/// Users whose role currently grants admin.
fn admin_count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM users u JOIN roles r ON r.id = u.role_id WHERE r.admin = 1",
        [],
        |row| row.get(0),
    )
}

fn insert_user(conn: &Connection, user: NewUser) -> RepositoryResult<User> {
    let id = UserId::generate();
    conn.execute(
        "INSERT INTO users (id, username, email, password_hash, role_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, user.username, user.email, user.password_hash, user.role_id],
    )
    .map_err(|e| {
        if is_foreign_key_violation(&e) {
            RepositoryError::Conflict("Role does not exist".to_string())
        } else {
            constraint_as_conflict(e, "Username or email already taken")
        }
    })?;

    let created = conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![id],
        user_from_row,
    )?;
    Ok(created)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn role_from_row(row: &Row<'_>) -> rusqlite::Result<Role> {
    Ok(Role {
        id: row.get(0)?,
        name: row.get(1)?,
        admin: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author: row.get(2)?,
        body: row.get(3)?,
        approved: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Maps constraint violations to `Conflict`, everything else passes through.
fn constraint_as_conflict(err: rusqlite::Error, message: &str) -> RepositoryError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _) if e.code == ErrorCode::ConstraintViolation => {
            RepositoryError::Conflict(message.to_string())
        }
        other => other.into(),
    }
}

fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

fn expect_changed(rows: usize, what: &str) -> RepositoryResult<()> {
    if rows == 0 {
        Err(RepositoryError::NotFound(what.to_string()))
    } else {
        Ok(())
    }
}

impl RoleDirectory for SqliteStore {
    fn find_role(&self, id: &RoleId) -> RepositoryResult<Option<Role>> {
        let conn = self.pool.get()?;
        let role = conn
            .query_row(
                &format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?1"),
                params![id],
                role_from_row,
            )
            .optional()?;
        Ok(role)
    }
}

impl IdentityStore for SqliteStore {
    fn find_user(&self, id: &UserId) -> RepositoryResult<Option<User>> {
        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn find_user_by_username(&self, username: &str) -> RepositoryResult<Option<User>> {
        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn list_users(&self) -> RepositoryResult<Vec<User>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY username"
        ))?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn count_users(&self) -> RepositoryResult<i64> {
        let conn = self.pool.get()?;
        let count = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }

    fn create_user(&self, user: NewUser) -> RepositoryResult<User> {
        let conn = self.pool.get()?;
        insert_user(&conn, user)
    }

    fn register_user(
        &self,
        user: NewUser,
        open: bool,
        bootstrap_role: &RoleId,
    ) -> RepositoryResult<Option<User>> {
        let mut conn = self.pool.get()?;
        // IMMEDIATE takes the write lock before counting, so concurrent
        // sign-ups serialize on the count as well as the insert
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        if existing > 0 && !open {
            return Ok(None);
        }

        let role_id = (existing == 0).then(|| bootstrap_role.clone());
        let created = insert_user(&tx, NewUser { role_id, ..user })?;
        tx.commit()?;
        Ok(Some(created))
    }

    fn set_user_role(&self, id: &UserId, role_id: Option<&RoleId>) -> RepositoryResult<()> {
        self.keeping_an_admin(|conn| {
            let rows = conn
                .execute(
                    "UPDATE users SET role_id = ?1 WHERE id = ?2",
                    params![role_id, id],
                )
                .map_err(|e| constraint_as_conflict(e, "Role does not exist"))?;
            expect_changed(rows, "user")
        })
    }

    fn delete_user(&self, id: &UserId) -> RepositoryResult<()> {
        self.keeping_an_admin(|conn| {
            let rows = conn
                .execute("DELETE FROM users WHERE id = ?1", params![id])
                .map_err(|e| constraint_as_conflict(e, "User still owns posts"))?;
            expect_changed(rows, "user")
        })
    }

    fn list_roles(&self) -> RepositoryResult<Vec<Role>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name"))?;
        let roles = stmt
            .query_map([], role_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(roles)
    }

    fn create_role(&self, name: &str, admin: bool) -> RepositoryResult<Role> {
        let conn = self.pool.get()?;
        let id = RoleId::generate();
        conn.execute(
            "INSERT INTO roles (id, name, admin) VALUES (?1, ?2, ?3)",
            params![id, name, admin],
        )
        .map_err(|e| constraint_as_conflict(e, "Role name already taken"))?;

        let created = conn.query_row(
            &format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?1"),
            params![id],
            role_from_row,
        )?;
        Ok(created)
    }

    fn update_role(&self, id: &RoleId, name: &str, admin: bool) -> RepositoryResult<()> {
        self.keeping_an_admin(|conn| {
            let rows = conn
                .execute(
                    "UPDATE roles SET name = ?1, admin = ?2 WHERE id = ?3",
                    params![name, admin, id],
                )
                .map_err(|e| constraint_as_conflict(e, "Role name already taken"))?;
            expect_changed(rows, "role")
        })
    }

    fn delete_role(&self, id: &RoleId) -> RepositoryResult<()> {
        self.keeping_an_admin(|conn| {
            let rows = conn.execute("DELETE FROM roles WHERE id = ?1", params![id])?;
            expect_changed(rows, "role")
        })
    }
}

impl ContentStore for SqliteStore {
    fn list_posts(&self) -> RepositoryResult<Vec<Post>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {POST_COLUMNS} FROM posts ORDER BY created_at DESC, id DESC"
        ))?;
        let posts = stmt
            .query_map([], post_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    fn find_post(&self, id: &PostId) -> RepositoryResult<Option<Post>> {
        let conn = self.pool.get()?;
        let post = conn
            .query_row(
                &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"),
                params![id],
                post_from_row,
            )
            .optional()?;
        Ok(post)
    }

    fn create_post(&self, owner: &UserId, title: &str, body: &str) -> RepositoryResult<Post> {
        let conn = self.pool.get()?;
        let id = PostId::generate();
        conn.execute(
            "INSERT INTO posts (id, user_id, title, body) VALUES (?1, ?2, ?3, ?4)",
            params![id, owner, title, body],
        )
        .map_err(|e| constraint_as_conflict(e, "Post owner does not exist"))?;

        let created = conn.query_row(
            &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"),
            params![id],
            post_from_row,
        )?;
        Ok(created)
    }

    fn update_post(&self, id: &PostId, title: &str, body: &str) -> RepositoryResult<()> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE posts SET title = ?1, body = ?2, updated_at = datetime('now') WHERE id = ?3",
            params![title, body, id],
        )?;
        expect_changed(rows, "post")
    }

    fn delete_post(&self, id: &PostId) -> RepositoryResult<()> {
        let conn = self.pool.get()?;
        let rows = conn.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        expect_changed(rows, "post")
    }

    fn list_comments(&self, post_id: &PostId) -> RepositoryResult<Vec<Comment>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE post_id = ?1
             ORDER BY created_at, id"
        ))?;
        let comments = stmt
            .query_map(params![post_id], comment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    fn list_pending_comments(&self) -> RepositoryResult<Vec<Comment>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE approved = 0
             ORDER BY created_at, id"
        ))?;
        let comments = stmt
            .query_map([], comment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    fn find_comment(&self, id: &CommentId) -> RepositoryResult<Option<Comment>> {
        let conn = self.pool.get()?;
        let comment = conn
            .query_row(
                &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1"),
                params![id],
                comment_from_row,
            )
            .optional()?;
        Ok(comment)
    }

    fn create_comment(
        &self,
        post_id: &PostId,
        author: &str,
        body: &str,
    ) -> RepositoryResult<Comment> {
        let conn = self.pool.get()?;
        let id = CommentId::generate();
        conn.execute(
            "INSERT INTO comments (id, post_id, author, body, approved)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![id, post_id, author, body],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref f, _)
                if f.code == ErrorCode::ConstraintViolation =>
            {
                RepositoryError::NotFound("post".to_string())
            }
            other => other.into(),
        })?;

        let created = conn.query_row(
            &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1"),
            params![id],
            comment_from_row,
        )?;
        Ok(created)
    }

    fn update_comment(&self, id: &CommentId, author: &str, body: &str) -> RepositoryResult<()> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE comments SET author = ?1, body = ?2 WHERE id = ?3",
            params![author, body, id],
        )?;
        expect_changed(rows, "comment")
    }

    fn approve_comment(&self, id: &CommentId) -> RepositoryResult<()> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE comments SET approved = 1 WHERE id = ?1",
            params![id],
        )?;
        expect_changed(rows, "comment")
    }

    fn delete_comment(&self, id: &CommentId) -> RepositoryResult<()> {
        let conn = self.pool.get()?;
        let rows = conn.execute("DELETE FROM comments WHERE id = ?1", params![id])?;
        expect_changed(rows, "comment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn store() -> SqliteStore {
        let pool = db::memory_pool().unwrap();
        db::run_migrations(&pool).unwrap();
        SqliteStore::new(pool)
    }

    fn new_user(username: &str, role_id: Option<RoleId>) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: "hash".to_string(),
            role_id,
        }
    }

    #[test]
    fn create_and_find_user() {
        let store = store();
        let user = store.create_user(new_user("alice", None)).unwrap();

        let by_id = store.find_user(&user.id).unwrap().unwrap();
        assert_eq!(by_id.username, "alice");
        assert!(by_id.role_id.is_none());

        let by_name = store.find_user_by_username("alice").unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
        assert_eq!(store.count_users().unwrap(), 1);
    }

    #[test]
    fn duplicate_username_is_a_conflict() {
        let store = store();
        store.create_user(new_user("alice", None)).unwrap();
        let mut dup = new_user("alice", None);
        dup.email = "other@example.com".into();
        let err = store.create_user(dup).unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[test]
    fn assigning_unknown_role_is_a_conflict() {
        let store = store();
        let user = store.create_user(new_user("alice", None)).unwrap();
        let err = store
            .set_user_role(&user.id, Some(&RoleId::new("ghost")))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[test]
    fn unknown_role_on_new_user_is_reported_as_such() {
        let store = store();
        let err = store
            .create_user(new_user("alice", Some(RoleId::new("ghost"))))
            .unwrap_err();
        match err {
            RepositoryError::Conflict(msg) => assert_eq!(msg, "Role does not exist"),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(store.count_users().unwrap(), 0);
    }

    #[test]
    fn first_registration_gets_bootstrap_role() {
        let store = store();
        let admin = RoleId::new("admin");

        let first = store
            .register_user(new_user("alice", None), false, &admin)
            .unwrap()
            .unwrap();
        assert_eq!(first.role_id, Some(admin.clone()));

        let second = store
            .register_user(new_user("bob", None), true, &admin)
            .unwrap()
            .unwrap();
        assert!(second.role_id.is_none());
    }

    #[test]
    fn closed_registration_refuses_later_accounts() {
        let store = store();
        let admin = RoleId::new("admin");
        store
            .register_user(new_user("alice", None), false, &admin)
            .unwrap()
            .unwrap();

        let refused = store
            .register_user(new_user("bob", None), false, &admin)
            .unwrap();
        assert!(refused.is_none());
        assert_eq!(store.count_users().unwrap(), 1);
    }

    #[test]
    fn last_administrator_cannot_be_removed() {
        let store = store();
        let admin = RoleId::new("admin");
        let root = store.create_user(new_user("root", Some(admin.clone()))).unwrap();

        for result in [
            store.set_user_role(&root.id, None),
            store.update_role(&admin, "admin", false),
            store.delete_role(&admin),
            store.delete_user(&root.id),
        ] {
            assert!(matches!(result, Err(RepositoryError::Conflict(ref msg)) if msg == LAST_ADMIN));
        }

        // Nothing was rolled forward
        let root = store.find_user(&root.id).unwrap().unwrap();
        assert_eq!(root.role_id, Some(admin.clone()));
        assert!(store.find_role(&admin).unwrap().unwrap().admin);
    }

    #[test]
    fn administrator_can_step_down_once_another_exists() {
        let store = store();
        let admin = RoleId::new("admin");
        let root = store.create_user(new_user("root", Some(admin.clone()))).unwrap();
        store.create_user(new_user("deputy", Some(admin.clone()))).unwrap();

        store.set_user_role(&root.id, None).unwrap();
        assert!(store.find_user(&root.id).unwrap().unwrap().role_id.is_none());
    }

    #[test]
    fn installs_without_administrators_are_unrestricted() {
        let store = store();
        let user = store.create_user(new_user("alice", None)).unwrap();
        store.delete_user(&user.id).unwrap();
        store.delete_role(&RoleId::new("admin")).unwrap();
    }

    #[test]
    fn user_owning_posts_cannot_be_deleted() {
        let store = store();
        let user = store.create_user(new_user("alice", None)).unwrap();
        let post = store.create_post(&user.id, "Hello", "World").unwrap();

        let err = store.delete_user(&user.id).unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        store.delete_post(&post.id).unwrap();
        store.delete_user(&user.id).unwrap();
        assert!(store.find_user(&user.id).unwrap().is_none());
    }

    #[test]
    fn role_lifecycle() {
        let store = store();
        let role = store.create_role("editors", false).unwrap();
        assert!(!role.admin);

        store.update_role(&role.id, "chief editors", true).unwrap();
        let updated = store.find_role(&role.id).unwrap().unwrap();
        assert_eq!(updated.name, "chief editors");
        assert!(updated.admin);

        store
            .create_user(new_user("root", Some(RoleId::new("admin"))))
            .unwrap();
        let user = store
            .create_user(new_user("bob", Some(role.id.clone())))
            .unwrap();
        store.delete_role(&role.id).unwrap();
        assert!(store.find_role(&role.id).unwrap().is_none());
        assert!(store.find_user(&user.id).unwrap().unwrap().role_id.is_none());
    }

    #[test]
    fn missing_rows_report_not_found() {
        let store = store();
        assert!(matches!(
            store.update_post(&PostId::new("nope"), "t", "b"),
            Err(RepositoryError::NotFound(_))
        ));
        assert!(matches!(
            store.approve_comment(&CommentId::new("nope")),
            Err(RepositoryError::NotFound(_))
        ));
        assert!(matches!(
            store.create_comment(&PostId::new("nope"), "anon", "hi"),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn comments_start_unapproved_and_can_be_approved() {
        let store = store();
        let user = store.create_user(new_user("alice", None)).unwrap();
        let post = store.create_post(&user.id, "Hello", "World").unwrap();
        let comment = store.create_comment(&post.id, "visitor", "Nice").unwrap();
        assert!(!comment.approved);
        assert_eq!(store.list_pending_comments().unwrap().len(), 1);

        store.approve_comment(&comment.id).unwrap();
        assert!(store.find_comment(&comment.id).unwrap().unwrap().approved);
        assert!(store.list_pending_comments().unwrap().is_empty());
    }

    #[test]
    fn deleting_post_removes_its_comments() {
        let store = store();
        let user = store.create_user(new_user("alice", None)).unwrap();
        let post = store.create_post(&user.id, "Hello", "World").unwrap();
        let comment = store.create_comment(&post.id, "visitor", "Nice").unwrap();

        store.delete_post(&post.id).unwrap();
        assert!(store.find_comment(&comment.id).unwrap().is_none());
    }

    #[test]
    fn posts_are_listed_newest_first() {
        let store = store();
        let user = store.create_user(new_user("alice", None)).unwrap();
        let first = store.create_post(&user.id, "First", "1").unwrap();
        let second = store.create_post(&user.id, "Second", "2").unwrap();
        store
            .pool
            .get()
            .unwrap()
            .execute(
                "UPDATE posts SET created_at = datetime('now', '-1 hour') WHERE id = ?1",
                params![first.id],
            )
            .unwrap();

        let ids: Vec<PostId> = store.list_posts().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }
}
