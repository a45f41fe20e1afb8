use serde::{Deserialize, Serialize};

use crate::models::{Flag, RiskLevel, StudentRecord};

pub const DEFAULT_ATTENDANCE_THRESHOLD: f64 = 75.0;
pub const DEFAULT_SCORE_THRESHOLD: f64 = 40.0;
pub const DEFAULT_FEE_THRESHOLD: f64 = 2000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdConfig {
    pub attendance_threshold: f64,
    pub score_threshold: f64,
    pub fee_threshold: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            attendance_threshold: DEFAULT_ATTENDANCE_THRESHOLD,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            fee_threshold: DEFAULT_FEE_THRESHOLD,
        }
    }
}

impl ThresholdConfig {
    /// Whether every cutoff sits inside the ranges the settings screen offers.
    /// Values outside are still honoured by the classifier.
    pub fn within_recommended_ranges(&self) -> bool {
        (50.0..=95.0).contains(&self.attendance_threshold)
            && (20.0..=70.0).contains(&self.score_threshold)
            && (1000.0..=10000.0).contains(&self.fee_threshold)
    }

    /// Replaces the cutoffs that were given and keeps the rest.
    pub fn with_overrides(
        self,
        attendance: Option<f64>,
        score: Option<f64>,
        fee: Option<f64>,
    ) -> Self {
        Self {
            attendance_threshold: attendance.unwrap_or(self.attendance_threshold),
            score_threshold: score.unwrap_or(self.score_threshold),
            fee_threshold: fee.unwrap_or(self.fee_threshold),
        }
    }
}

/// Students paired with the thresholds their flags were computed from.
///
/// The pair only changes together, so anything rendered from a roster
/// describes the same cutoffs its flags were derived with.
#[derive(Debug, Clone, PartialEq)]
pub struct Roster {
    thresholds: ThresholdConfig,
    students: Vec<StudentRecord>,
}

impl Roster {
    pub fn classify(mut students: Vec<StudentRecord>, thresholds: ThresholdConfig) -> Self {
        recompute(&mut students, &thresholds);
        Self {
            thresholds,
            students,
        }
    }

    /// Wraps rows read back from the store, trusting their stored flags.
    pub fn from_stored(students: Vec<StudentRecord>, thresholds: ThresholdConfig) -> Self {
        Self {
            thresholds,
            students,
        }
    }

    pub fn reclassify(&mut self, thresholds: ThresholdConfig) {
        self.thresholds = thresholds;
        recompute(&mut self.students, &self.thresholds);
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    pub fn students(&self) -> &[StudentRecord] {
        &self.students
    }
}

pub fn evaluate_flags(student: &StudentRecord, thresholds: &ThresholdConfig) -> Vec<Flag> {
    let mut flags = Vec::with_capacity(3);

    if student.attendance_percentage < thresholds.attendance_threshold {
        flags.push(Flag::LowAttendance);
    }
    if student.average_score < thresholds.score_threshold {
        flags.push(Flag::LowScores);
    }
    if student.due_amount > thresholds.fee_threshold {
        flags.push(Flag::HighFeeDue);
    }

    flags
}

pub fn classify(student: &StudentRecord, thresholds: &ThresholdConfig) -> (Vec<Flag>, RiskLevel) {
    let flags = evaluate_flags(student, thresholds);
    let level = RiskLevel::from_flag_count(flags.len());
    (flags, level)
}

/// Recomputes flags and risk level for every student from scratch.
///
/// This is the only place derived fields are written; call it after any
/// change to the student collection or to the thresholds.
pub fn recompute(students: &mut [StudentRecord], thresholds: &ThresholdConfig) {
    for student in students.iter_mut() {
        let (flags, level) = classify(student, thresholds);
        student.flags = flags;
        student.risk_level = level;
    }

    tracing::debug!(
        students = students.len(),
        attendance = thresholds.attendance_threshold,
        score = thresholds.score_threshold,
        fee = thresholds.fee_threshold,
        "risk levels recomputed"
    );
}

pub fn count_by_level(students: &[StudentRecord], level: RiskLevel) -> usize {
    students.iter().filter(|s| s.risk_level == level).count()
}

pub fn with_flag(students: &[StudentRecord], flag: Flag) -> Vec<&StudentRecord> {
    students.iter().filter(|s| s.flags.contains(&flag)).collect()
}
