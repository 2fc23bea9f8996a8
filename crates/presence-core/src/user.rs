//! User entities resolved from RFID tags.

use crate::ids::{ClassId, OrgId, RfidTag, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a user in the presence system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Teacher,
    Student,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Teacher => write!(f, "teacher"),
            Self::Student => write!(f, "student"),
        }
    }
}

/// A user known to the system (read-mostly; owned by the admin layer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Unique user id
    pub id: UserId,

    /// Display name
    pub name: String,

    /// Registration / roll number shown on reader displays
    pub reg_no: String,

    /// Teacher or student
    pub role: Role,

    /// Enrollment group (students only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<ClassId>,

    /// Owning organization
    pub organization_id: OrgId,

    /// RFID tag bound to this user
    pub rfid_tag: RfidTag,

    /// Contact address for grace-window notifications, when on file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl User {
    /// Returns true if this user is a teacher.
    #[must_use]
    pub fn is_teacher(&self) -> bool {
        matches!(self.role, Role::Teacher)
    }

    /// Returns true if this user is a student.
    #[must_use]
    pub fn is_student(&self) -> bool {
        matches!(self.role, Role::Student)
    }
}
