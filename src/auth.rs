use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::access::{Role, User};
use crate::error::{MonitorError, Result};
use crate::models::StudentRecord;

pub const DEMO_PASSWORD: &str = "password123";

struct DemoAccount {
    id: u128,
    email: &'static str,
    name: &'static str,
    role: Role,
    roll_no: Option<&'static str>,
}

static DEMO_ACCOUNTS: [DemoAccount; 4] = [
    DemoAccount {
        id: 1,
        email: "admin@edu.com",
        name: "Admin User",
        role: Role::Admin,
        roll_no: None,
    },
    DemoAccount {
        id: 2,
        email: "mentor@edu.com",
        name: "John Mentor",
        role: Role::Mentor,
        roll_no: None,
    },
    DemoAccount {
        id: 3,
        email: "parent@edu.com",
        name: "Parent Smith",
        role: Role::Guardian,
        roll_no: Some("STU001"),
    },
    DemoAccount {
        id: 4,
        email: "student@edu.com",
        name: "Alice Student",
        role: Role::Student,
        roll_no: Some("STU001"),
    },
];

impl DemoAccount {
    fn to_user(&self) -> User {
        User {
            id: Uuid::from_u128(self.id),
            email: self.email.to_string(),
            name: self.name.to_string(),
            role: self.role,
            roll_no: self.roll_no.map(str::to_string),
        }
    }
}

fn find_demo(email: &str) -> Option<&'static DemoAccount> {
    DEMO_ACCOUNTS
        .iter()
        .find(|account| account.email.eq_ignore_ascii_case(email.trim()))
}

pub fn demo_users() -> Vec<User> {
    DEMO_ACCOUNTS.iter().map(DemoAccount::to_user).collect()
}

pub fn demo_role(email: &str) -> Option<Role> {
    find_demo(email).map(|account| account.role)
}

/// A user profile as kept by the store, with its password digest.
#[derive(Debug, Clone)]
pub struct StoredProfile {
    pub user: User,
    pub password_digest: String,
}

/// Account emails are compared and stored trimmed and lowercased.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn digest_password(user_id: Uuid, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Profile document first, then the locally cached user, then the demo table.
pub fn resolve_role(profile: Option<&User>, cached: Option<&User>, email: &str) -> Option<Role> {
    profile
        .map(|user| user.role)
        .or_else(|| {
            cached
                .filter(|user| user.email.eq_ignore_ascii_case(email.trim()))
                .map(|user| user.role)
        })
        .or_else(|| demo_role(email))
}

pub fn sign_in(
    email: &str,
    password: &str,
    profile: Option<&StoredProfile>,
    cached: Option<&User>,
) -> Result<User> {
    let mut user = match (profile, find_demo(email)) {
        (Some(stored), _) => {
            if digest_password(stored.user.id, password) != stored.password_digest {
                return Err(MonitorError::Auth("invalid credentials".to_string()));
            }
            stored.user.clone()
        }
        (None, Some(demo)) if password == DEMO_PASSWORD => demo.to_user(),
        _ => return Err(MonitorError::Auth("invalid credentials".to_string())),
    };

    user.role = resolve_role(profile.map(|p| &p.user), cached, email)
        .ok_or_else(|| MonitorError::Auth(format!("no role known for {email}")))?;

    tracing::info!(email = %user.email, role = %user.role, "signed in");
    Ok(user)
}

#[derive(Debug, Clone)]
pub struct SignUp<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub name: &'a str,
    pub role: Role,
}

/// Validates a sign-up and builds the profile to store.
///
/// Students must match an uploaded record by parent email, roll number or
/// name; guardians must match a parent email. The matched roll number is
/// linked to the new account.
pub fn sign_up(request: &SignUp<'_>, students: &[StudentRecord]) -> Result<StoredProfile> {
    let entered = request.email.trim();
    let email = normalize_email(entered);
    if request.name.trim().is_empty() {
        return Err(MonitorError::Auth("please enter your name".to_string()));
    }
    if email.is_empty() || request.password.is_empty() {
        return Err(MonitorError::Auth("email and password are required".to_string()));
    }

    let roll_no = match request.role {
        Role::Student => students
            .iter()
            .find(|s| {
                s.parent_email.eq_ignore_ascii_case(&email)
                    || s.roll_no == entered
                    || s.name == request.name.trim()
            })
            .map(|s| s.roll_no.clone())
            .ok_or_else(|| {
                MonitorError::Auth("no student found with this email or name".to_string())
            })
            .map(Some)?,
        Role::Guardian => students
            .iter()
            .find(|s| s.parent_email.eq_ignore_ascii_case(&email))
            .map(|s| s.roll_no.clone())
            .ok_or_else(|| MonitorError::Auth("no parent found with this email".to_string()))
            .map(Some)?,
        Role::Admin | Role::Mentor => None,
    };

    let user = User {
        id: Uuid::new_v4(),
        email,
        name: request.name.trim().to_string(),
        role: request.role,
        roll_no,
    };
    let password_digest = digest_password(user.id, request.password);

    Ok(StoredProfile {
        user,
        password_digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeeStatus, RiskLevel, ScoreTrend};

    fn student(roll_no: &str, name: &str, parent_email: &str) -> StudentRecord {
        StudentRecord {
            roll_no: roll_no.to_string(),
            name: name.to_string(),
            classes_attended: 18,
            total_classes: 20,
            attendance_percentage: 90.0,
            test1: 85.0,
            test2: 78.0,
            test3: 82.0,
            average_score: 81.7,
            score_trend: ScoreTrend::Stable,
            fee_status: FeeStatus::Paid,
            due_amount: 0.0,
            parent_name: "Parent Smith".to_string(),
            parent_email: parent_email.to_string(),
            parent_phone: "+1234567890".to_string(),
            risk_level: RiskLevel::Safe,
            flags: Vec::new(),
        }
    }

    #[test]
    fn demo_accounts_sign_in_with_shared_password() {
        let user = sign_in("mentor@edu.com", DEMO_PASSWORD, None, None).expect("sign in");
        assert_eq!(user.role, Role::Mentor);
        assert_eq!(user.id, Uuid::from_u128(2));

        let err = sign_in("mentor@edu.com", "wrong", None, None).unwrap_err();
        assert!(matches!(err, MonitorError::Auth(_)));
    }

    #[test]
    fn unknown_account_is_rejected() {
        let err = sign_in("ghost@edu.com", DEMO_PASSWORD, None, None).unwrap_err();
        assert!(matches!(err, MonitorError::Auth(_)));
    }

    #[test]
    fn stored_profile_checks_digest_and_wins_role() {
        let students = vec![student("STU001", "Alice Johnson", "parent@edu.com")];
        let profile = sign_up(
            &SignUp {
                email: "parent@edu.com",
                password: "s3cret",
                name: "Parent Smith",
                role: Role::Guardian,
            },
            &students,
        )
        .expect("sign up");

        let cached = User {
            role: Role::Admin,
            ..profile.user.clone()
        };
        let user = sign_in("parent@edu.com", "s3cret", Some(&profile), Some(&cached))
            .expect("sign in");
        assert_eq!(user.role, Role::Guardian);
        assert_eq!(user.roll_no.as_deref(), Some("STU001"));

        assert!(sign_in("parent@edu.com", DEMO_PASSWORD, Some(&profile), None).is_err());
    }

    #[test]
    fn role_resolution_falls_back_in_order() {
        let cached = User {
            id: Uuid::new_v4(),
            email: "student@edu.com".to_string(),
            name: "Alice".to_string(),
            role: Role::Mentor,
            roll_no: None,
        };
        assert_eq!(
            resolve_role(None, Some(&cached), "student@edu.com"),
            Some(Role::Mentor)
        );
        assert_eq!(
            resolve_role(None, Some(&cached), "admin@edu.com"),
            Some(Role::Admin)
        );
        assert_eq!(resolve_role(None, None, "student@edu.com"), Some(Role::Student));
        assert_eq!(resolve_role(None, None, "nobody@edu.com"), None);
    }

    #[test]
    fn student_sign_up_requires_a_matching_record() {
        let students = vec![student("STU001", "Alice Johnson", "parent@edu.com")];

        let by_name = sign_up(
            &SignUp {
                email: "alice@school.org",
                password: "pw",
                name: "Alice Johnson",
                role: Role::Student,
            },
            &students,
        )
        .expect("sign up");
        assert_eq!(by_name.user.roll_no.as_deref(), Some("STU001"));

        let by_roll = sign_up(
            &SignUp {
                email: "STU001",
                password: "pw",
                name: "A. J.",
                role: Role::Student,
            },
            &students,
        )
        .expect("sign up");
        assert_eq!(by_roll.user.roll_no.as_deref(), Some("STU001"));

        let missing = sign_up(
            &SignUp {
                email: "who@school.org",
                password: "pw",
                name: "Nobody",
                role: Role::Student,
            },
            &students,
        );
        assert!(missing.is_err());
    }

    #[test]
    fn sign_up_stores_emails_lowercased() {
        let students = vec![student("STU001", "Alice Johnson", "parent@edu.com")];
        let profile = sign_up(
            &SignUp {
                email: "  Parent@EDU.com ",
                password: "s3cret",
                name: "Parent Smith",
                role: Role::Guardian,
            },
            &students,
        )
        .expect("sign up");

        assert_eq!(profile.user.email, "parent@edu.com");
        assert_eq!(profile.user.roll_no.as_deref(), Some("STU001"));
        assert_eq!(normalize_email(" Admin@Edu.COM"), "admin@edu.com");
    }

    #[test]
    fn guardian_sign_up_matches_parent_email_only() {
        let students = vec![student("STU001", "Alice Johnson", "parent@edu.com")];
        let rejected = sign_up(
            &SignUp {
                email: "other@edu.com",
                password: "pw",
                name: "Alice Johnson",
                role: Role::Guardian,
            },
            &students,
        );
        assert!(rejected.is_err());
    }

    #[test]
    fn staff_sign_up_needs_name() {
        let err = sign_up(
            &SignUp {
                email: "new@edu.com",
                password: "pw",
                name: "  ",
                role: Role::Mentor,
            },
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, MonitorError::Auth(_)));

        let ok = sign_up(
            &SignUp {
                email: "new@edu.com",
                password: "pw",
                name: "New Mentor",
                role: Role::Mentor,
            },
            &[],
        )
        .expect("sign up");
        assert!(ok.user.roll_no.is_none());
        assert_eq!(ok.password_digest, digest_password(ok.user.id, "pw"));
    }
}
