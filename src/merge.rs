use std::collections::{HashMap, HashSet};

use crate::models::{
    AttendanceRow, FeeStatus, FeesRow, GuardianRow, RiskLevel, ScoreTrend, ScoresRow,
    StudentRecord, UploadBatch,
};

/// Indexes rows by roll number, keeping the first row seen for each key.
fn index_first<'a, T>(rows: &'a [T], key: impl Fn(&T) -> &str) -> HashMap<&'a str, &'a T> {
    let mut index = HashMap::with_capacity(rows.len());
    for row in rows {
        index.entry(key(row)).or_insert(row);
    }
    index
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn attendance_percentage(row: &AttendanceRow) -> f64 {
    match row.attendance_percentage {
        Some(value) => value,
        None if row.total_classes > 0 => {
            round1(row.classes_attended as f64 / row.total_classes as f64 * 100.0)
        }
        None => 0.0,
    }
}

pub fn average_score(row: &ScoresRow) -> f64 {
    row.average
        .unwrap_or_else(|| round1((row.test1 + row.test2 + row.test3) / 3.0))
}

/// Joins the four upload sources into one record per roll number.
///
/// Every roll number seen in any source produces a record, in order of first
/// appearance across attendance, scores, fees and guardians. Fields from a
/// missing source take their defaults. Flags and risk level come back empty;
/// run [`crate::risk::recompute`] on the result.
pub fn merge_batch(batch: &UploadBatch) -> Vec<StudentRecord> {
    let attendance = index_first(&batch.attendance, |r| r.roll_no.as_str());
    let scores = index_first(&batch.scores, |r| r.roll_no.as_str());
    let fees = index_first(&batch.fees, |r| r.roll_no.as_str());
    let guardians = index_first(&batch.guardians, |r| r.roll_no.as_str());

    let roll_numbers = batch
        .attendance
        .iter()
        .map(|r| r.roll_no.as_str())
        .chain(batch.scores.iter().map(|r| r.roll_no.as_str()))
        .chain(batch.fees.iter().map(|r| r.roll_no.as_str()))
        .chain(batch.guardians.iter().map(|r| r.roll_no.as_str()));

    let mut seen = HashSet::new();
    let mut students = Vec::new();

    for roll_no in roll_numbers {
        if !seen.insert(roll_no) {
            continue;
        }
        students.push(build_record(
            roll_no,
            attendance.get(roll_no).copied(),
            scores.get(roll_no).copied(),
            fees.get(roll_no).copied(),
            guardians.get(roll_no).copied(),
        ));
    }

    tracing::info!(students = students.len(), "upload sources merged");
    students
}

fn build_record(
    roll_no: &str,
    attendance: Option<&AttendanceRow>,
    scores: Option<&ScoresRow>,
    fees: Option<&FeesRow>,
    guardian: Option<&GuardianRow>,
) -> StudentRecord {
    let name = attendance
        .map(|a| a.name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Student {roll_no}"));

    StudentRecord {
        roll_no: roll_no.to_string(),
        name,
        classes_attended: attendance.map_or(0, |a| a.classes_attended),
        total_classes: attendance.map_or(0, |a| a.total_classes),
        attendance_percentage: attendance.map_or(0.0, attendance_percentage),
        test1: scores.map_or(0.0, |s| s.test1),
        test2: scores.map_or(0.0, |s| s.test2),
        test3: scores.map_or(0.0, |s| s.test3),
        average_score: scores.map_or(0.0, average_score),
        score_trend: scores.map_or(ScoreTrend::Stable, |s| s.trend),
        fee_status: fees.map_or(FeeStatus::Paid, |f| f.fee_status),
        due_amount: fees.map_or(0.0, |f| f.due_amount),
        parent_name: guardian.map(|g| g.parent_name.clone()).unwrap_or_default(),
        parent_email: guardian.map(|g| g.parent_email.clone()).unwrap_or_default(),
        parent_phone: guardian.map(|g| g.parent_phone.clone()).unwrap_or_default(),
        risk_level: RiskLevel::Safe,
        flags: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attendance(roll_no: &str, name: &str, attended: u32, total: u32, pct: Option<f64>) -> AttendanceRow {
        AttendanceRow {
            roll_no: roll_no.to_string(),
            name: name.to_string(),
            classes_attended: attended,
            total_classes: total,
            attendance_percentage: pct,
        }
    }

    fn scores(roll_no: &str, tests: [f64; 3], average: Option<f64>) -> ScoresRow {
        ScoresRow {
            roll_no: roll_no.to_string(),
            test1: tests[0],
            test2: tests[1],
            test3: tests[2],
            average,
            trend: ScoreTrend::Declining,
        }
    }

    fn fees(roll_no: &str, status: FeeStatus, due: f64) -> FeesRow {
        FeesRow {
            roll_no: roll_no.to_string(),
            fee_status: status,
            due_amount: due,
        }
    }

    fn guardian(roll_no: &str, name: &str) -> GuardianRow {
        GuardianRow {
            roll_no: roll_no.to_string(),
            parent_name: name.to_string(),
            parent_email: format!("{}@edu.com", name.to_lowercase()),
            parent_phone: "+1234567891".to_string(),
        }
    }

    fn sample_batch() -> UploadBatch {
        UploadBatch {
            attendance: vec![
                attendance("STU001", "Alice Johnson", 18, 20, Some(90.0)),
                attendance("STU002", "Bob Wilson", 12, 20, Some(60.0)),
            ],
            scores: vec![
                scores("STU002", [45.0, 38.0, 42.0], Some(41.7)),
                scores("STU003", [25.0, 30.0, 28.0], None),
            ],
            fees: vec![fees("STU002", FeeStatus::Pending, 1500.0)],
            guardians: vec![guardian("STU004", "Lisa")],
        }
    }

    #[test]
    fn union_of_roll_numbers_in_first_seen_order() {
        let students = merge_batch(&sample_batch());
        let rolls: Vec<&str> = students.iter().map(|s| s.roll_no.as_str()).collect();
        assert_eq!(rolls, vec!["STU001", "STU002", "STU003", "STU004"]);
    }

    #[test]
    fn missing_sources_fall_back_to_defaults() {
        let students = merge_batch(&sample_batch());

        let alice = &students[0];
        assert_eq!(alice.average_score, 0.0);
        assert_eq!(alice.score_trend, ScoreTrend::Stable);
        assert_eq!(alice.fee_status, FeeStatus::Paid);
        assert_eq!(alice.parent_name, "");

        let stu4 = &students[3];
        assert_eq!(stu4.name, "Student STU004");
        assert_eq!(stu4.attendance_percentage, 0.0);
        assert_eq!(stu4.parent_name, "Lisa");
    }

    #[test]
    fn all_sources_join_on_roll_number() {
        let students = merge_batch(&sample_batch());
        let bob = &students[1];
        assert_eq!(bob.name, "Bob Wilson");
        assert_eq!(bob.attendance_percentage, 60.0);
        assert_eq!(bob.average_score, 41.7);
        assert_eq!(bob.score_trend, ScoreTrend::Declining);
        assert_eq!(bob.fee_status, FeeStatus::Pending);
        assert_eq!(bob.due_amount, 1500.0);
        assert!(bob.flags.is_empty());
    }

    #[test]
    fn blank_derived_columns_are_computed() {
        let batch = UploadBatch {
            attendance: vec![attendance("STU005", "Eve", 14, 20, None)],
            scores: vec![scores("STU005", [25.0, 30.0, 28.0], None)],
            ..UploadBatch::default()
        };
        let students = merge_batch(&batch);
        assert_eq!(students[0].attendance_percentage, 70.0);
        assert_eq!(students[0].average_score, 27.7);
    }

    #[test]
    fn zero_total_classes_gives_zero_percentage() {
        let row = attendance("STU006", "Zed", 0, 0, None);
        assert_eq!(attendance_percentage(&row), 0.0);
    }

    #[test]
    fn first_row_wins_within_a_source() {
        let batch = UploadBatch {
            fees: vec![
                fees("STU002", FeeStatus::Pending, 1500.0),
                fees("STU002", FeeStatus::Paid, 0.0),
            ],
            ..UploadBatch::default()
        };
        let students = merge_batch(&batch);
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].due_amount, 1500.0);
    }

    #[test]
    fn source_order_does_not_change_resolved_students() {
        let batch = sample_batch();
        let mut baseline = merge_batch(&batch);
        baseline.sort_by(|a, b| a.roll_no.cmp(&b.roll_no));

        let reversed = UploadBatch {
            attendance: batch.attendance.iter().rev().cloned().collect(),
            scores: batch.scores.iter().rev().cloned().collect(),
            fees: batch.fees.iter().rev().cloned().collect(),
            guardians: batch.guardians.iter().rev().cloned().collect(),
        };
        let mut merged = merge_batch(&reversed);
        merged.sort_by(|a, b| a.roll_no.cmp(&b.roll_no));
        assert_eq!(baseline, merged);
    }

    #[test]
    fn guardian_only_roll_numbers_lead_when_they_appear_first() {
        let batch = UploadBatch {
            guardians: vec![guardian("STU009", "Nia")],
            ..UploadBatch::default()
        };
        let students = merge_batch(&batch);
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].name, "Student STU009");
        assert_eq!(students[0].parent_email, "nia@edu.com");
    }
}
