// Authorization policy - pure decisions over already-loaded data, no I/O
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::authz::roles::{is_admin, RoleDirectory};
use crate::db::models::{Comment, Post, Role, User, UserId};

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requester {
    Anonymous,
    /// An authenticated user with admin status already resolved.
    User { id: UserId, admin: bool },
}

impl Requester {
    pub fn user(id: UserId, admin: bool) -> Self {
        Self::User { id, admin }
    }

    /// Build a requester from an optional loaded user, resolving admin
    /// status through `directory`.
    pub fn resolve<D: RoleDirectory + ?Sized>(directory: &D, user: Option<&User>) -> Self {
        match user {
            Some(user) => Self::User {
                id: user.id.clone(),
                admin: is_admin(directory, user),
            },
            None => Self::Anonymous,
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::Anonymous => None,
            Self::User { id, .. } => Some(id),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::User { admin: true, .. })
    }

    fn is(&self, user_id: &UserId) -> bool {
        self.user_id() == Some(user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Approve,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Create,
        Action::Read,
        Action::Update,
        Action::Delete,
        Action::Approve,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Approve => "approve",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Post,
    Comment,
    User,
    Role,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Post => "post",
            Self::Comment => "comment",
            Self::User => "user",
            Self::Role => "role",
        };
        f.write_str(name)
    }
}

/// What an action is aimed at: a loaded instance, or just a kind when no
/// instance exists yet (creation, listings).
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Kind(ResourceKind),
    Post(&'a Post),
    Comment(&'a Comment),
    User(&'a User),
    Role(&'a Role),
}

impl Target<'_> {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Kind(kind) => *kind,
            Self::Post(_) => ResourceKind::Post,
            Self::Comment(_) => ResourceKind::Comment,
            Self::User(_) => ResourceKind::User,
            Self::Role(_) => ResourceKind::Role,
        }
    }
}

impl From<ResourceKind> for Target<'_> {
    fn from(kind: ResourceKind) -> Self {
        Self::Kind(kind)
    }
}

impl<'a> From<&'a Post> for Target<'a> {
    fn from(post: &'a Post) -> Self {
        Self::Post(post)
    }
}

impl<'a> From<&'a Comment> for Target<'a> {
    fn from(comment: &'a Comment) -> Self {
        Self::Comment(comment)
    }
}

impl<'a> From<&'a User> for Target<'a> {
    fn from(user: &'a User) -> Self {
        Self::User(user)
    }
}

impl<'a> From<&'a Role> for Target<'a> {
    fn from(role: &'a Role) -> Self {
        Self::Role(role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    fn from_bool(allowed: bool) -> Self {
        if allowed {
            Self::Allow
        } else {
            Self::Deny
        }
    }

    pub fn is_allowed(self) -> bool {
        self == Self::Allow
    }

    /// `Err(Denied)` for a denial, so callers can use `?`.
    pub fn require(self) -> Result<(), Denied> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny => Err(Denied),
        }
    }
}

/// The only non-allow outcome of an authorization decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Forbidden")]
pub struct Denied;

/// Decide whether `requester` may perform `action` on `target`.
pub fn can_perform<'a>(
    requester: &Requester,
    action: Action,
    target: impl Into<Target<'a>>,
) -> Decision {
    let target = target.into();
    let admin = requester.is_admin();

    let allowed = match (target.kind(), action) {
        // Public blog
        (ResourceKind::Post | ResourceKind::Comment, Action::Read) => true,

        (ResourceKind::Post, Action::Create) => requester.is_authenticated(),
        (ResourceKind::Post, Action::Update | Action::Delete) => match target {
            Target::Post(post) => admin || requester.is(&post.user_id),
            // Ownership cannot be established without an instance
            _ => admin,
        },
        (ResourceKind::Post, Action::Approve) => false,

        (ResourceKind::Comment, Action::Create) => true,
        (ResourceKind::Comment, Action::Update | Action::Delete | Action::Approve) => admin,

        (ResourceKind::User, Action::Read) => match target {
            Target::User(user) => admin || requester.is(&user.id),
            _ => admin,
        },
        (ResourceKind::User | ResourceKind::Role, Action::Approve) => false,
        (ResourceKind::User | ResourceKind::Role, _) => admin,
    };

    Decision::from_bool(allowed)
}
