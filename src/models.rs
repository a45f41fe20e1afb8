use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreTrend {
    Improving,
    Declining,
    Stable,
}

impl ScoreTrend {
    /// Unknown or blank tags fall back to `Stable`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "improving" => ScoreTrend::Improving,
            "declining" => ScoreTrend::Declining,
            _ => ScoreTrend::Stable,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScoreTrend::Improving => "improving",
            ScoreTrend::Declining => "declining",
            ScoreTrend::Stable => "stable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeStatus {
    Paid,
    Pending,
}

impl FeeStatus {
    /// Unknown or blank statuses fall back to `Paid`.
    pub fn parse_lenient(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("pending") {
            FeeStatus::Pending
        } else {
            FeeStatus::Paid
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FeeStatus::Paid => "Paid",
            FeeStatus::Pending => "Pending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Flag {
    LowAttendance,
    LowScores,
    HighFeeDue,
}

impl Flag {
    pub fn label(self) -> &'static str {
        match self {
            Flag::LowAttendance => "Low Attendance",
            Flag::LowScores => "Low Scores",
            Flag::HighFeeDue => "High Fee Due",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "Low Attendance" => Some(Flag::LowAttendance),
            "Low Scores" => Some(Flag::LowScores),
            "High Fee Due" => Some(Flag::HighFeeDue),
            _ => None,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Safe,
    MediumRisk,
    HighRisk,
}

impl RiskLevel {
    pub fn from_flag_count(count: usize) -> Self {
        match count {
            0 => RiskLevel::Safe,
            1 => RiskLevel::MediumRisk,
            _ => RiskLevel::HighRisk,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RiskLevel::Safe => "Safe",
            RiskLevel::MediumRisk => "Medium Risk",
            RiskLevel::HighRisk => "High Risk",
        }
    }

    /// Accepts the display label or a short form (`high`, `medium`, `safe`).
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "safe" => Some(RiskLevel::Safe),
            "medium" | "mediumrisk" => Some(RiskLevel::MediumRisk),
            "high" | "highrisk" => Some(RiskLevel::HighRisk),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub roll_no: String,
    pub name: String,
    pub classes_attended: u32,
    pub total_classes: u32,
    pub attendance_percentage: f64,
    pub test1: f64,
    pub test2: f64,
    pub test3: f64,
    pub average_score: f64,
    pub score_trend: ScoreTrend,
    pub fee_status: FeeStatus,
    pub due_amount: f64,
    pub parent_name: String,
    pub parent_email: String,
    pub parent_phone: String,
    pub risk_level: RiskLevel,
    pub flags: Vec<Flag>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRow {
    pub roll_no: String,
    pub name: String,
    pub classes_attended: u32,
    pub total_classes: u32,
    /// `None` when the column was absent or blank; merge derives it.
    pub attendance_percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoresRow {
    pub roll_no: String,
    pub test1: f64,
    pub test2: f64,
    pub test3: f64,
    pub average: Option<f64>,
    pub trend: ScoreTrend,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeesRow {
    pub roll_no: String,
    pub fee_status: FeeStatus,
    pub due_amount: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuardianRow {
    pub roll_no: String,
    pub parent_name: String,
    pub parent_email: String,
    pub parent_phone: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadBatch {
    pub attendance: Vec<AttendanceRow>,
    pub scores: Vec<ScoresRow>,
    pub fees: Vec<FeesRow>,
    pub guardians: Vec<GuardianRow>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardSummary {
    pub total_students: usize,
    pub high_risk: usize,
    pub medium_risk: usize,
    pub safe: usize,
    pub average_attendance: f64,
    pub average_score: f64,
    pub total_fees_due: f64,
    pub fee_collection_rate: f64,
}

impl DashboardSummary {
    pub fn high_risk_share(&self) -> f64 {
        if self.total_students == 0 {
            0.0
        } else {
            self.high_risk as f64 / self.total_students as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insight {
    pub title: String,
    pub content: String,
    pub priority: InsightPriority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsightPriority {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultHistoryEntry {
    pub completed_at: DateTime<Utc>,
    pub total_score: i32,
    pub tier: String,
}
