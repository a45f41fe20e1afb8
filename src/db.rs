use std::future::Future;
use std::time::Duration;

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::access::{Role, User};
use crate::auth::{self, StoredProfile};
use crate::error::{MonitorError, Result};
use crate::models::{
    FeeStatus, Flag, ResultHistoryEntry, RiskLevel, ScoreTrend, StudentRecord,
};
use crate::psychometric::PsychometricResult;
use crate::risk::{Roster, ThresholdConfig};

/// Advisory lock key held for the duration of a student replace.
const UPLOAD_LOCK_KEY: i64 = 0x5249_534b_5550;

const STUDENT_COLUMNS: &str = "roll_no, name, classes_attended, total_classes, \
    attendance_percentage, test1, test2, test3, average_score, score_trend, fee_status, \
    due_amount, parent_name, parent_email, parent_phone, risk_level, flags";

pub struct Store {
    pool: PgPool,
    timeout: Duration,
}

async fn timed<T, F>(limit: Duration, request: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, request).await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::error!(seconds = limit.as_secs(), "store request timed out");
            Err(MonitorError::Timeout(limit.as_secs()))
        }
    }
}

fn student_from_row(row: &PgRow) -> Result<StudentRecord> {
    let flags: Vec<String> = row.try_get("flags")?;
    let risk_level: String = row.try_get("risk_level")?;
    let classes_attended: i64 = row.try_get("classes_attended")?;
    let total_classes: i64 = row.try_get("total_classes")?;
    let score_trend: String = row.try_get("score_trend")?;
    let fee_status: String = row.try_get("fee_status")?;

    Ok(StudentRecord {
        roll_no: row.try_get("roll_no")?,
        name: row.try_get("name")?,
        classes_attended: u32::try_from(classes_attended).unwrap_or(0),
        total_classes: u32::try_from(total_classes).unwrap_or(0),
        attendance_percentage: row.try_get("attendance_percentage")?,
        test1: row.try_get("test1")?,
        test2: row.try_get("test2")?,
        test3: row.try_get("test3")?,
        average_score: row.try_get("average_score")?,
        score_trend: ScoreTrend::parse_lenient(&score_trend),
        fee_status: FeeStatus::parse_lenient(&fee_status),
        due_amount: row.try_get("due_amount")?,
        parent_name: row.try_get("parent_name")?,
        parent_email: row.try_get("parent_email")?,
        parent_phone: row.try_get("parent_phone")?,
        risk_level: RiskLevel::parse(&risk_level).unwrap_or(RiskLevel::Safe),
        flags: flags.iter().filter_map(|f| Flag::from_label(f)).collect(),
    })
}

fn flag_labels(flags: &[Flag]) -> Vec<String> {
    flags.iter().map(|f| f.label().to_string()).collect()
}

fn profile_from_row(row: &PgRow) -> Result<StoredProfile> {
    let role: String = row.try_get("role")?;
    let role = Role::parse(&role)
        .ok_or_else(|| MonitorError::Auth(format!("stored profile has unknown role {role}")))?;

    Ok(StoredProfile {
        user: User {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            role,
            roll_no: row.try_get("roll_no")?,
        },
        password_digest: row.try_get("password_digest")?,
    })
}

async fn take_upload_lock(conn: &mut PgConnection) -> Result<()> {
    let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
        .bind(UPLOAD_LOCK_KEY)
        .fetch_one(conn)
        .await?;
    if locked {
        Ok(())
    } else {
        Err(MonitorError::UploadInProgress)
    }
}

async fn select_students(conn: &mut PgConnection) -> Result<Vec<StudentRecord>> {
    let query =
        format!("SELECT {STUDENT_COLUMNS} FROM risk_monitor.students ORDER BY position, roll_no");
    let rows = sqlx::query(&query).fetch_all(conn).await?;
    rows.iter().map(student_from_row).collect()
}

async fn select_thresholds(conn: &mut PgConnection) -> Result<Option<ThresholdConfig>> {
    let row = sqlx::query(
        "SELECT attendance_threshold, score_threshold, fee_threshold \
         FROM risk_monitor.settings WHERE id",
    )
    .fetch_optional(conn)
    .await?;

    row.map(|row| -> Result<ThresholdConfig> {
        Ok(ThresholdConfig {
            attendance_threshold: row.try_get("attendance_threshold")?,
            score_threshold: row.try_get("score_threshold")?,
            fee_threshold: row.try_get("fee_threshold")?,
        })
    })
    .transpose()
}

async fn write_thresholds(conn: &mut PgConnection, thresholds: &ThresholdConfig) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO risk_monitor.settings
        (id, attendance_threshold, score_threshold, fee_threshold, updated_at)
        VALUES (TRUE, $1, $2, $3, now())
        ON CONFLICT (id) DO UPDATE
        SET attendance_threshold = EXCLUDED.attendance_threshold,
            score_threshold = EXCLUDED.score_threshold,
            fee_threshold = EXCLUDED.fee_threshold,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(thresholds.attendance_threshold)
    .bind(thresholds.score_threshold)
    .bind(thresholds.fee_threshold)
    .execute(conn)
    .await?;
    Ok(())
}

impl Store {
    pub async fn connect(database_url: &str, timeout: Duration) -> Result<Self> {
        let pool = timed(timeout, async {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(timeout)
                .connect(database_url)
                .await?;
            Ok::<_, MonitorError>(pool)
        })
        .await?;
        Ok(Self { pool, timeout })
    }

    pub async fn init_db(&self) -> Result<()> {
        timed(self.timeout, async {
            sqlx::migrate!("./migrations")
                .run(&self.pool)
                .await
                .map_err(|err| MonitorError::Persistence(err.into()))
        })
        .await
    }

    /// Loads the fixture students and the demo accounts.
    pub async fn seed(&self, thresholds: ThresholdConfig) -> Result<usize> {
        let roster = Roster::classify(fixture_students(), thresholds);
        let count = self.replace_students(&roster).await?;

        for user in auth::demo_users() {
            let email = auth::normalize_email(&user.email);
            let digest = auth::digest_password(user.id, auth::DEMO_PASSWORD);
            timed(self.timeout, async {
                sqlx::query(
                    r#"
                    INSERT INTO risk_monitor.users (id, email, name, role, roll_no, password_digest)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT ((lower(email))) DO UPDATE
                    SET name = EXCLUDED.name, role = EXCLUDED.role, roll_no = EXCLUDED.roll_no
                    "#,
                )
                .bind(user.id)
                .bind(&email)
                .bind(&user.name)
                .bind(user.role.as_str())
                .bind(&user.roll_no)
                .bind(&digest)
                .execute(&self.pool)
                .await?;
                Ok::<_, MonitorError>(())
            })
            .await?;
        }

        Ok(count)
    }

    /// Replaces the whole student collection and the thresholds it was
    /// classified with, in one transaction.
    ///
    /// Fails with [`MonitorError::UploadInProgress`] when another writer holds
    /// the upload lock.
    pub async fn replace_students(&self, roster: &Roster) -> Result<usize> {
        let students = roster.students();
        timed(self.timeout, async {
            let mut tx = self.pool.begin().await?;
            take_upload_lock(&mut tx).await?;

            let removed = sqlx::query("DELETE FROM risk_monitor.students")
                .execute(&mut *tx)
                .await?
                .rows_affected();

            for (position, student) in students.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO risk_monitor.students
                    (roll_no, position, name, classes_attended, total_classes,
                     attendance_percentage, test1, test2, test3, average_score,
                     score_trend, fee_status, due_amount, parent_name, parent_email,
                     parent_phone, risk_level, flags)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                            $11, $12, $13, $14, $15, $16, $17, $18)
                    "#,
                )
                .bind(&student.roll_no)
                .bind(i32::try_from(position).unwrap_or(i32::MAX))
                .bind(&student.name)
                .bind(i64::from(student.classes_attended))
                .bind(i64::from(student.total_classes))
                .bind(student.attendance_percentage)
                .bind(student.test1)
                .bind(student.test2)
                .bind(student.test3)
                .bind(student.average_score)
                .bind(student.score_trend.as_str())
                .bind(student.fee_status.as_str())
                .bind(student.due_amount)
                .bind(&student.parent_name)
                .bind(&student.parent_email)
                .bind(&student.parent_phone)
                .bind(student.risk_level.label())
                .bind(flag_labels(&student.flags))
                .execute(&mut *tx)
                .await?;
            }
            write_thresholds(&mut tx, roster.thresholds()).await?;

            tx.commit().await?;
            tracing::info!(removed, inserted = students.len(), "student collection replaced");
            Ok::<_, MonitorError>(students.len())
        })
        .await
    }

    pub async fn fetch_students(&self) -> Result<Vec<StudentRecord>> {
        timed(self.timeout, async {
            let mut conn = self.pool.acquire().await?;
            select_students(&mut conn).await
        })
        .await
    }

    pub async fn fetch_thresholds(&self) -> Result<Option<ThresholdConfig>> {
        timed(self.timeout, async {
            let mut conn = self.pool.acquire().await?;
            select_thresholds(&mut conn).await
        })
        .await
    }

    /// Reads the students and the thresholds they were classified with from
    /// one snapshot. `fallback` applies only when no thresholds were ever
    /// stored.
    pub async fn fetch_roster(&self, fallback: ThresholdConfig) -> Result<Roster> {
        timed(self.timeout, async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
                .execute(&mut *tx)
                .await?;
            let thresholds = select_thresholds(&mut tx).await?.unwrap_or(fallback);
            let students = select_students(&mut tx).await?;
            tx.commit().await?;
            Ok::<_, MonitorError>(Roster::from_stored(students, thresholds))
        })
        .await
    }

    /// Reclassifies the stored students under new thresholds.
    ///
    /// Rows are re-read under the upload lock, so an overlapping upload either
    /// fails this call or is fully visible to it.
    pub async fn reclassify(&self, thresholds: ThresholdConfig) -> Result<Roster> {
        timed(self.timeout, async {
            let mut tx = self.pool.begin().await?;
            take_upload_lock(&mut tx).await?;

            let previous = select_thresholds(&mut tx).await?.unwrap_or(thresholds);
            let stored = select_students(&mut tx).await?;
            let mut roster = Roster::from_stored(stored, previous);
            roster.reclassify(thresholds);

            for student in roster.students() {
                sqlx::query(
                    r#"
                    UPDATE risk_monitor.students
                    SET risk_level = $2, flags = $3, updated_at = now()
                    WHERE roll_no = $1
                    "#,
                )
                .bind(&student.roll_no)
                .bind(student.risk_level.label())
                .bind(flag_labels(&student.flags))
                .execute(&mut *tx)
                .await?;
            }
            write_thresholds(&mut tx, roster.thresholds()).await?;

            tx.commit().await?;
            tracing::info!(
                students = roster.students().len(),
                ?previous,
                ?thresholds,
                "students reclassified"
            );
            Ok::<_, MonitorError>(roster)
        })
        .await
    }

    pub async fn fetch_profile(&self, email: &str) -> Result<Option<StoredProfile>> {
        timed(self.timeout, async {
            let row = sqlx::query(
                "SELECT id, email, name, role, roll_no, password_digest \
                 FROM risk_monitor.users WHERE lower(email) = lower($1)",
            )
            .bind(email.trim())
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(profile_from_row).transpose()
        })
        .await
    }

    pub async fn insert_profile(&self, profile: &StoredProfile) -> Result<()> {
        timed(self.timeout, async {
            let user = &profile.user;
            let inserted = sqlx::query(
                r#"
                INSERT INTO risk_monitor.users (id, email, name, role, roll_no, password_digest)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT ((lower(email))) DO NOTHING
                "#,
            )
            .bind(user.id)
            .bind(auth::normalize_email(&user.email))
            .bind(&user.name)
            .bind(user.role.as_str())
            .bind(&user.roll_no)
            .bind(&profile.password_digest)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if inserted == 0 {
                return Err(MonitorError::Auth(format!(
                    "an account for {} already exists",
                    user.email
                )));
            }
            Ok::<_, MonitorError>(())
        })
        .await
    }

    pub async fn insert_psychometric_result(
        &self,
        user: &User,
        result: &PsychometricResult,
    ) -> Result<()> {
        let scores = result.category_scores();
        timed(self.timeout, async {
            sqlx::query(
                r#"
                INSERT INTO risk_monitor.psychometric_results
                (id, user_id, roll_no, total_score, academic, family, social, emotional,
                 tier, recommendations, completed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(result.id())
            .bind(user.id)
            .bind(&user.roll_no)
            .bind(small_int(result.total_score()))
            .bind(small_int(scores.academic))
            .bind(small_int(scores.family))
            .bind(small_int(scores.social))
            .bind(small_int(scores.emotional))
            .bind(result.tier().as_str())
            .bind(result.recommendations().to_vec())
            .bind(result.completed_at())
            .execute(&self.pool)
            .await?;
            Ok::<_, MonitorError>(())
        })
        .await
    }

    pub async fn fetch_result_history(&self, user_id: Uuid) -> Result<Vec<ResultHistoryEntry>> {
        timed(self.timeout, async {
            let rows = sqlx::query(
                "SELECT completed_at, total_score, tier \
                 FROM risk_monitor.psychometric_results \
                 WHERE user_id = $1 ORDER BY completed_at DESC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

            rows.iter()
                .map(|row| -> Result<ResultHistoryEntry> {
                    Ok(ResultHistoryEntry {
                        completed_at: row.try_get("completed_at")?,
                        total_score: row.try_get("total_score")?,
                        tier: row.try_get("tier")?,
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .await
    }
}

fn small_int(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn fixture_student(
    roll_no: &str,
    name: &str,
    attendance: (u32, u32, f64),
    tests: [f64; 3],
    average: f64,
    trend: ScoreTrend,
    due_amount: f64,
    guardian: (&str, &str, &str),
) -> StudentRecord {
    StudentRecord {
        roll_no: roll_no.to_string(),
        name: name.to_string(),
        classes_attended: attendance.0,
        total_classes: attendance.1,
        attendance_percentage: attendance.2,
        test1: tests[0],
        test2: tests[1],
        test3: tests[2],
        average_score: average,
        score_trend: trend,
        fee_status: if due_amount > 0.0 {
            FeeStatus::Pending
        } else {
            FeeStatus::Paid
        },
        due_amount,
        parent_name: guardian.0.to_string(),
        parent_email: guardian.1.to_string(),
        parent_phone: guardian.2.to_string(),
        risk_level: RiskLevel::Safe,
        flags: Vec::new(),
    }
}

pub fn fixture_students() -> Vec<StudentRecord> {
    vec![
        fixture_student(
            "STU001",
            "Alice Johnson",
            (18, 20, 90.0),
            [85.0, 78.0, 82.0],
            81.7,
            ScoreTrend::Stable,
            0.0,
            ("Parent Smith", "parent@edu.com", "+1234567890"),
        ),
        fixture_student(
            "STU002",
            "Bob Wilson",
            (12, 20, 60.0),
            [45.0, 38.0, 42.0],
            41.7,
            ScoreTrend::Declining,
            1500.0,
            ("Mary Wilson", "mary@edu.com", "+1234567891"),
        ),
        fixture_student(
            "STU003",
            "Carol Davis",
            (15, 20, 75.0),
            [25.0, 30.0, 28.0],
            27.7,
            ScoreTrend::Improving,
            3000.0,
            ("John Davis", "john@edu.com", "+1234567892"),
        ),
        fixture_student(
            "STU004",
            "David Brown",
            (14, 20, 70.0),
            [65.0, 70.0, 68.0],
            67.7,
            ScoreTrend::Improving,
            0.0,
            ("Lisa Brown", "lisa@edu.com", "+1234567893"),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_students_classify_like_the_demo_data() {
        let roster = Roster::classify(fixture_students(), ThresholdConfig::default());
        let students = roster.students();

        let levels: Vec<RiskLevel> = students.iter().map(|s| s.risk_level).collect();
        assert_eq!(
            levels,
            vec![
                RiskLevel::Safe,
                RiskLevel::MediumRisk,
                RiskLevel::HighRisk,
                RiskLevel::MediumRisk,
            ]
        );
        assert_eq!(students[2].flags, vec![Flag::LowScores, Flag::HighFeeDue]);
    }

    #[test]
    fn flag_labels_round_trip_through_text() {
        let labels = flag_labels(&[Flag::LowAttendance, Flag::HighFeeDue]);
        let parsed: Vec<Flag> = labels.iter().filter_map(|l| Flag::from_label(l)).collect();
        assert_eq!(parsed, vec![Flag::LowAttendance, Flag::HighFeeDue]);
    }

    #[test]
    fn small_int_saturates() {
        assert_eq!(small_int(72), 72);
        assert_eq!(small_int(u32::MAX), i32::MAX);
    }

    #[tokio::test]
    async fn timed_reports_timeouts_distinctly() {
        let outcome: Result<()> = timed(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(outcome, Err(MonitorError::Timeout(_))));

        let ok: Result<u8> = timed(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(ok.expect("value"), 7);
    }
}
