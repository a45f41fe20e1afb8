use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MonitorError, Result};
use crate::models::StudentRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Mentor,
    Guardian,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Mentor => "Mentor",
            Role::Guardian => "Guardian",
            Role::Student => "Student",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "mentor" => Some(Role::Mentor),
            "guardian" | "parent" => Some(Role::Guardian),
            "student" => Some(Role::Student),
            _ => None,
        }
    }

    /// Guardian and Student accounts are tied to a single roll number.
    pub fn is_pinned(self) -> bool {
        matches!(self, Role::Guardian | Role::Student)
    }

    pub fn greeting(self) -> &'static str {
        match self {
            Role::Admin => "Welcome to the Admin Dashboard",
            Role::Mentor => "Welcome to your Mentor Dashboard",
            Role::Guardian => "Welcome to your Child's Progress Dashboard",
            Role::Student => "Welcome to your Student Dashboard",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    Dashboard,
    Students,
    StudentDetails,
    Upload,
    Settings,
    Reports,
    Insights,
    StudentProfile,
    MyProfile,
    MentalHealthTest,
}

impl View {
    pub fn as_str(self) -> &'static str {
        match self {
            View::Dashboard => "dashboard",
            View::Students => "students",
            View::StudentDetails => "student details",
            View::Upload => "upload",
            View::Settings => "settings",
            View::Reports => "reports",
            View::Insights => "insights",
            View::StudentProfile => "student profile",
            View::MyProfile => "my profile",
            View::MentalHealthTest => "mental health test",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const STAFF_VIEWS: &[View] = &[
    View::Dashboard,
    View::Students,
    View::StudentDetails,
    View::Upload,
    View::Settings,
    View::Reports,
    View::Insights,
];
const GUARDIAN_VIEWS: &[View] = &[View::Dashboard, View::StudentProfile];
const STUDENT_VIEWS: &[View] = &[View::Dashboard, View::MyProfile, View::MentalHealthTest];

pub fn allowed_views(role: Role) -> &'static [View] {
    match role {
        Role::Admin | Role::Mentor => STAFF_VIEWS,
        Role::Guardian => GUARDIAN_VIEWS,
        Role::Student => STUDENT_VIEWS,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub roll_no: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    user: User,
}

impl Session {
    pub fn new(user: User) -> Self {
        Self { user }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn role(&self) -> Role {
        self.user.role
    }

    pub fn authorize(&self, view: View) -> Result<()> {
        if allowed_views(self.role()).contains(&view) {
            Ok(())
        } else {
            tracing::warn!(role = %self.role(), view = %view, "view denied");
            Err(MonitorError::Forbidden {
                role: self.role(),
                view,
            })
        }
    }

    /// Students this session may see: everyone for staff, the linked roll
    /// number only for guardians and students.
    pub fn visible_students<'a>(&self, students: &'a [StudentRecord]) -> Vec<&'a StudentRecord> {
        if !self.role().is_pinned() {
            return students.iter().collect();
        }
        match self.user.roll_no.as_deref() {
            Some(roll_no) => students.iter().filter(|s| s.roll_no == roll_no).collect(),
            None => Vec::new(),
        }
    }

    /// The single record behind the profile views for pinned roles.
    pub fn own_student<'a>(&self, students: &'a [StudentRecord]) -> Option<&'a StudentRecord> {
        let roll_no = self.user.roll_no.as_deref()?;
        students.iter().find(|s| s.roll_no == roll_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeeStatus, RiskLevel, ScoreTrend};

    fn user(role: Role, roll_no: Option<&str>) -> User {
        User {
            id: Uuid::new_v4(),
            email: format!("{}@edu.com", role.as_str().to_lowercase()),
            name: format!("{} User", role),
            role,
            roll_no: roll_no.map(str::to_string),
        }
    }

    fn student(roll_no: &str) -> StudentRecord {
        StudentRecord {
            roll_no: roll_no.to_string(),
            name: format!("Student {roll_no}"),
            classes_attended: 0,
            total_classes: 0,
            attendance_percentage: 0.0,
            test1: 0.0,
            test2: 0.0,
            test3: 0.0,
            average_score: 0.0,
            score_trend: ScoreTrend::Stable,
            fee_status: FeeStatus::Paid,
            due_amount: 0.0,
            parent_name: String::new(),
            parent_email: String::new(),
            parent_phone: String::new(),
            risk_level: RiskLevel::Safe,
            flags: Vec::new(),
        }
    }

    #[test]
    fn staff_can_manage_but_not_take_test() {
        for role in [Role::Admin, Role::Mentor] {
            let session = Session::new(user(role, None));
            assert!(session.authorize(View::Upload).is_ok());
            assert!(session.authorize(View::Settings).is_ok());
            assert!(session.authorize(View::MentalHealthTest).is_err());
        }
    }

    #[test]
    fn only_students_take_the_test() {
        let student_session = Session::new(user(Role::Student, Some("STU001")));
        let guardian_session = Session::new(user(Role::Guardian, Some("STU001")));
        assert!(student_session.authorize(View::MentalHealthTest).is_ok());
        assert!(student_session.authorize(View::Students).is_err());
        assert!(matches!(
            guardian_session.authorize(View::MentalHealthTest),
            Err(MonitorError::Forbidden {
                role: Role::Guardian,
                view: View::MentalHealthTest
            })
        ));
    }

    #[test]
    fn every_role_sees_the_dashboard() {
        for role in [Role::Admin, Role::Mentor, Role::Guardian, Role::Student] {
            assert!(allowed_views(role).contains(&View::Dashboard));
        }
    }

    #[test]
    fn pinned_roles_see_one_student() {
        let students = vec![student("STU001"), student("STU002")];

        let admin = Session::new(user(Role::Admin, None));
        assert_eq!(admin.visible_students(&students).len(), 2);

        let guardian = Session::new(user(Role::Guardian, Some("STU002")));
        let visible = guardian.visible_students(&students);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].roll_no, "STU002");
        assert_eq!(
            guardian.own_student(&students).map(|s| s.roll_no.as_str()),
            Some("STU002")
        );

        let orphan = Session::new(user(Role::Student, None));
        assert!(orphan.visible_students(&students).is_empty());
        assert!(orphan.own_student(&students).is_none());
    }

    #[test]
    fn role_names_parse_case_insensitively() {
        assert_eq!(Role::parse("MENTOR"), Some(Role::Mentor));
        assert_eq!(Role::parse("parent"), Some(Role::Guardian));
        assert_eq!(Role::parse("teacher"), None);
    }
}
