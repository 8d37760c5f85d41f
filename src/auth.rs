//! Maps the caller identity supplied by the host into an access scope.
//!
//! Authentication happens upstream; requests only carry the already
//! verified user id and role names.

use crate::error::{AppError, AppResult};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessScope {
    /// The host process itself, with no end-user attached.
    System,
    Admin,
    Teacher,
    Student { student_id: String },
}

fn has_role(actor: &Actor, role: &str) -> bool {
    actor.roles.iter().any(|r| r.trim().eq_ignore_ascii_case(role))
}

pub fn resolve_scope(conn: &Connection, actor: Option<&Actor>) -> AppResult<AccessScope> {
    let Some(actor) = actor else {
        return Ok(AccessScope::System);
    };
    if has_role(actor, "Admin") {
        return Ok(AccessScope::Admin);
    }
    if has_role(actor, "Teacher") {
        return Ok(AccessScope::Teacher);
    }
    if has_role(actor, "Student") {
        let Some(user_id) = actor.user_id.as_deref().filter(|u| !u.trim().is_empty()) else {
            return Err(AppError::forbidden("student actor without a user id"));
        };
        let student_id: Option<String> = conn
            .query_row(
                "SELECT id FROM students WHERE user_id = ? AND is_active = 1",
                [user_id],
                |r| r.get(0),
            )
            .optional()?;
        return match student_id {
            Some(student_id) => Ok(AccessScope::Student { student_id }),
            None => Err(AppError::forbidden(
                "no student record is linked to this account",
            )),
        };
    }
    Err(AppError::forbidden("no recognised role"))
}

impl AccessScope {
    pub fn is_staff(&self) -> bool {
        matches!(
            self,
            AccessScope::System | AccessScope::Admin | AccessScope::Teacher
        )
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, AccessScope::System | AccessScope::Admin)
    }

    pub fn student_id(&self) -> Option<&str> {
        match self {
            AccessScope::Student { student_id } => Some(student_id.as_str()),
            _ => None,
        }
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("administrator access required"))
        }
    }

    pub fn require_staff(&self) -> AppResult<()> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(AppError::forbidden("staff access required"))
        }
    }

    /// Staff may act on any student; a student only on themselves.
    pub fn require_student_access(&self, student_id: &str) -> AppResult<()> {
        match self {
            AccessScope::Student { student_id: own } if own != student_id => Err(
                AppError::forbidden("students may only access their own records"),
            ),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn student_scope_is_limited_to_self() {
        let scope = AccessScope::Student {
            student_id: "s1".into(),
        };
        assert!(scope.require_student_access("s1").is_ok());
        assert_eq!(
            scope.require_student_access("s2").expect_err("other").code(),
            "forbidden"
        );
        assert!(scope.require_staff().is_err());
        assert!(AccessScope::Teacher.require_student_access("s2").is_ok());
        assert!(AccessScope::Teacher.require_admin().is_err());
        assert!(AccessScope::System.require_admin().is_ok());
    }

    #[test]
    fn roles_are_case_insensitive_and_admin_wins() {
        let conn = Connection::open_in_memory().expect("memory db");
        let actor = Actor {
            user_id: Some("u1".into()),
            roles: vec!["teacher".into(), "ADMIN".into()],
        };
        assert_eq!(
            resolve_scope(&conn, Some(&actor)).expect("scope"),
            AccessScope::Admin
        );
        assert_eq!(resolve_scope(&conn, None).expect("scope"), AccessScope::System);
    }
}
