use std::fmt::Write as _;
use std::io;

use chrono::NaiveDate;

use crate::models::{
    DashboardSummary, Flag, Insight, InsightPriority, RiskLevel, ScoreTrend, StudentRecord,
};
use crate::risk::{self, Roster};

pub const EXPORT_HEADERS: [&str; 8] = [
    "RollNo",
    "Name",
    "Attendance%",
    "AverageScore",
    "FeeStatus",
    "DueAmount",
    "RiskLevel",
    "Flags",
];

pub fn summarize(students: &[StudentRecord]) -> DashboardSummary {
    let total = students.len();
    if total == 0 {
        return DashboardSummary::default();
    }

    let count = total as f64;
    let fully_paid = students.iter().filter(|s| s.due_amount <= 0.0).count();

    DashboardSummary {
        total_students: total,
        high_risk: risk::count_by_level(students, RiskLevel::HighRisk),
        medium_risk: risk::count_by_level(students, RiskLevel::MediumRisk),
        safe: risk::count_by_level(students, RiskLevel::Safe),
        average_attendance: students.iter().map(|s| s.attendance_percentage).sum::<f64>() / count,
        average_score: students.iter().map(|s| s.average_score).sum::<f64>() / count,
        total_fees_due: students.iter().map(|s| s.due_amount).sum(),
        fee_collection_rate: fully_paid as f64 / count * 100.0,
    }
}

/// Case-insensitive match on name or roll number, optionally narrowed to one tier.
pub fn filter_students<'a>(
    students: &[&'a StudentRecord],
    search: Option<&str>,
    level: Option<RiskLevel>,
) -> Vec<&'a StudentRecord> {
    let needle = search.map(|s| s.trim().to_lowercase()).unwrap_or_default();

    students
        .iter()
        .copied()
        .filter(|s| {
            needle.is_empty()
                || s.name.to_lowercase().contains(&needle)
                || s.roll_no.to_lowercase().contains(&needle)
        })
        .filter(|s| level.map_or(true, |level| s.risk_level == level))
        .collect()
}

pub fn join_flags(flags: &[Flag]) -> String {
    flags
        .iter()
        .map(|f| f.label())
        .collect::<Vec<_>>()
        .join(";")
}

pub fn export_csv<W: io::Write>(students: &[StudentRecord], out: W) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(EXPORT_HEADERS)?;

    for s in students {
        writer.write_record([
            s.roll_no.clone(),
            s.name.clone(),
            s.attendance_percentage.to_string(),
            s.average_score.to_string(),
            s.fee_status.as_str().to_string(),
            s.due_amount.to_string(),
            s.risk_level.label().to_string(),
            join_flags(&s.flags),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

pub fn student_card(student: &StudentRecord) -> String {
    let mut output = String::new();
    let flags = if student.flags.is_empty() {
        "none".to_string()
    } else {
        join_flags(&student.flags).replace(';', ", ")
    };

    let _ = writeln!(output, "{} ({})", student.name, student.roll_no);
    let _ = writeln!(output, "  Risk level: {} (flags: {})", student.risk_level, flags);
    let _ = writeln!(
        output,
        "  Attendance: {:.1}% ({}/{} classes)",
        student.attendance_percentage, student.classes_attended, student.total_classes
    );
    let _ = writeln!(
        output,
        "  Scores: {} / {} / {} (avg {:.1}, {})",
        student.test1,
        student.test2,
        student.test3,
        student.average_score,
        student.score_trend.as_str()
    );
    let _ = writeln!(
        output,
        "  Fees: {} (due {:.2})",
        student.fee_status.as_str(),
        student.due_amount
    );
    if !student.parent_name.is_empty() || !student.parent_email.is_empty() {
        let _ = writeln!(
            output,
            "  Guardian: {} <{}> {}",
            student.parent_name, student.parent_email, student.parent_phone
        );
    }
    output
}

/// Share of fully paid students the fee line is measured against.
pub const FEE_COLLECTION_TARGET: f64 = 90.0;

pub fn build_report(roster: &Roster, generated_on: NaiveDate) -> String {
    let students = roster.students();
    let thresholds = roster.thresholds();
    let summary = summarize(students);
    let mut output = String::new();

    let _ = writeln!(output, "# Student Risk Report");
    let _ = writeln!(
        output,
        "Generated on {} for {} students",
        generated_on, summary.total_students
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Distribution");

    if students.is_empty() {
        let _ = writeln!(output, "No students uploaded yet.");
        return output;
    }

    let _ = writeln!(
        output,
        "- High Risk: {} ({:.0}%)",
        summary.high_risk,
        summary.high_risk_share()
    );
    let _ = writeln!(output, "- Medium Risk: {}", summary.medium_risk);
    let _ = writeln!(output, "- Safe: {}", summary.safe);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Performance vs Thresholds");
    let _ = writeln!(
        output,
        "- Average attendance {:.1}% (threshold {}%) {}",
        summary.average_attendance,
        thresholds.attendance_threshold,
        status(summary.average_attendance >= thresholds.attendance_threshold)
    );
    let _ = writeln!(
        output,
        "- Average score {:.1} (threshold {}) {}",
        summary.average_score,
        thresholds.score_threshold,
        status(summary.average_score >= thresholds.score_threshold)
    );
    let _ = writeln!(
        output,
        "- Fee collection {:.0}% (target {}%) with {:.2} outstanding {}",
        summary.fee_collection_rate,
        FEE_COLLECTION_TARGET,
        summary.total_fees_due,
        status(summary.fee_collection_rate >= FEE_COLLECTION_TARGET)
    );

    for flag in [Flag::LowAttendance, Flag::LowScores, Flag::HighFeeDue] {
        let flagged = risk::with_flag(students, flag);
        let _ = writeln!(output);
        let _ = writeln!(output, "## {} ({})", flag, flagged.len());

        if flagged.is_empty() {
            let _ = writeln!(output, "No students flagged.");
            continue;
        }
        for s in flagged {
            let detail = match flag {
                Flag::LowAttendance => format!("{:.1}%", s.attendance_percentage),
                Flag::LowScores => format!("avg {:.1}", s.average_score),
                Flag::HighFeeDue => format!("due {:.2}", s.due_amount),
            };
            let _ = writeln!(output, "- {} ({}): {}", s.name, s.roll_no, detail);
        }
    }

    output
}

fn status(on_track: bool) -> &'static str {
    if on_track {
        "on track"
    } else {
        "below threshold"
    }
}

pub fn insights(roster: &Roster) -> Vec<Insight> {
    let students = roster.students();
    let thresholds = roster.thresholds();
    let summary = summarize(students);
    let low_attendance = risk::with_flag(students, Flag::LowAttendance).len();
    let improving = students
        .iter()
        .filter(|s| s.score_trend == ScoreTrend::Improving)
        .count();
    let declining = students
        .iter()
        .filter(|s| s.score_trend == ScoreTrend::Declining)
        .count();
    let crowded = summary.high_risk > 2;

    vec![
        Insight {
            title: "Risk Distribution Analysis".to_string(),
            content: format!(
                "Currently {} students ({:.0}%) are classified as high risk. This is {} the recommended threshold for immediate intervention.",
                summary.high_risk,
                summary.high_risk_share(),
                if crowded { "above" } else { "within" }
            ),
            priority: if crowded {
                InsightPriority::High
            } else {
                InsightPriority::Medium
            },
        },
        Insight {
            title: "Attendance Pattern Insight".to_string(),
            content: format!(
                "{} students have attendance below {}%. Consider attendance monitoring and reaching out to parents for these students.",
                low_attendance, thresholds.attendance_threshold
            ),
            priority: InsightPriority::High,
        },
        Insight {
            title: "Academic Performance Trend".to_string(),
            content: format!(
                "{improving} students show improving score trends while {declining} show declining performance. Focus intervention on declining students while recognizing improving ones."
            ),
            priority: InsightPriority::Medium,
        },
        Insight {
            title: "Early Intervention Opportunity".to_string(),
            content: format!(
                "{} medium-risk students can be kept from becoming high risk through targeted mentoring and regular check-ins.",
                summary.medium_risk
            ),
            priority: InsightPriority::Medium,
        },
    ]
}

/// Canned guidance for a free-text question, routed on keywords.
pub fn answer_query(query: &str) -> &'static str {
    let query = query.to_lowercase();
    if query.contains("attendance") {
        "Students with low attendance tend to show declining academic performance. Weekly check-ins are recommended for students below 70% attendance."
    } else if query.contains("score") || query.contains("grade") {
        "Students with declining scores usually have attendance issues as well. Intervene early when scores decline across two consecutive tests."
    } else if query.contains("risk") {
        "High-risk students typically carry multiple flags. Address the primary issue first, usually attendance, as it often correlates with the others."
    } else {
        "Focus on early intervention. Medium-risk students have the highest potential for improvement with proper support."
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest;
    use crate::merge;
    use crate::models::FeeStatus;
    use crate::risk::ThresholdConfig;

    fn fixture() -> Vec<StudentRecord> {
        let rows = [
            ("STU001", "Alice Johnson", 90.0, 81.7, ScoreTrend::Stable, 0.0),
            ("STU002", "Bob Wilson", 60.0, 41.7, ScoreTrend::Declining, 1500.0),
            ("STU003", "Carol Davis", 75.0, 27.7, ScoreTrend::Improving, 3000.0),
            ("STU004", "David Brown", 70.0, 67.7, ScoreTrend::Improving, 0.0),
        ];
        let mut students: Vec<StudentRecord> = rows
            .iter()
            .map(|(roll, name, att, avg, trend, due)| StudentRecord {
                roll_no: roll.to_string(),
                name: name.to_string(),
                classes_attended: 0,
                total_classes: 20,
                attendance_percentage: *att,
                test1: *avg,
                test2: *avg,
                test3: *avg,
                average_score: *avg,
                score_trend: *trend,
                fee_status: if *due > 0.0 {
                    FeeStatus::Pending
                } else {
                    FeeStatus::Paid
                },
                due_amount: *due,
                parent_name: String::new(),
                parent_email: String::new(),
                parent_phone: String::new(),
                risk_level: RiskLevel::Safe,
                flags: Vec::new(),
            })
            .collect();
        risk::recompute(&mut students, &ThresholdConfig::default());
        students
    }

    #[test]
    fn summary_counts_and_averages() {
        let summary = summarize(&fixture());
        assert_eq!(summary.total_students, 4);
        assert_eq!(summary.high_risk, 1);
        assert_eq!(summary.medium_risk, 2);
        assert_eq!(summary.safe, 1);
        assert!((summary.average_attendance - 73.75).abs() < 1e-9);
        assert!((summary.total_fees_due - 4500.0).abs() < 1e-9);
        assert!((summary.fee_collection_rate - 50.0).abs() < 1e-9);
        assert!((summary.high_risk_share() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn empty_summary_is_zeroed() {
        let summary = summarize(&[]);
        assert_eq!(summary, DashboardSummary::default());
        assert_eq!(summary.high_risk_share(), 0.0);
    }

    #[test]
    fn search_and_tier_filters_combine() {
        let students = fixture();
        let all: Vec<&StudentRecord> = students.iter().collect();

        assert_eq!(filter_students(&all, Some("stu00"), None).len(), 4);
        assert_eq!(filter_students(&all, Some("WILSON"), None).len(), 1);
        let medium = filter_students(&all, None, Some(RiskLevel::MediumRisk));
        assert_eq!(medium.len(), 2);
        let none = filter_students(&all, Some("carol"), Some(RiskLevel::Safe));
        assert!(none.is_empty());
    }

    #[test]
    fn export_has_fixed_columns_and_semicolon_flags() {
        let mut out = Vec::new();
        export_csv(&fixture(), &mut out).expect("export");
        let text = String::from_utf8(out).expect("utf8");
        let mut lines = text.lines();

        assert_eq!(
            lines.next(),
            Some("RollNo,Name,Attendance%,AverageScore,FeeStatus,DueAmount,RiskLevel,Flags")
        );
        assert!(text.contains("STU003,Carol Davis,75,27.7,Pending,3000,High Risk,Low Scores;High Fee Due"));
        assert!(text
            .lines()
            .any(|line| line == "STU001,Alice Johnson,90,81.7,Paid,0,Safe,"));
    }

    #[test]
    fn export_then_import_preserves_core_fields() {
        let original = fixture();
        let mut out = Vec::new();
        export_csv(&original, &mut out).expect("export");

        let batch = ingest::read_export(out.as_slice()).expect("import");
        let mut restored = merge::merge_batch(&batch);
        risk::recompute(&mut restored, &ThresholdConfig::default());

        assert_eq!(restored.len(), original.len());
        for (before, after) in original.iter().zip(restored.iter()) {
            assert_eq!(before.roll_no, after.roll_no);
            assert_eq!(before.attendance_percentage, after.attendance_percentage);
            assert_eq!(before.average_score, after.average_score);
            assert_eq!(before.fee_status, after.fee_status);
            assert_eq!(before.due_amount, after.due_amount);
            assert_eq!(before.flags, after.flags);
            assert_eq!(before.risk_level, after.risk_level);
        }
    }

    #[test]
    fn report_lists_flagged_students() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).expect("date");
        let roster = Roster::classify(fixture(), ThresholdConfig::default());
        let report = build_report(&roster, date);

        assert!(report.starts_with("# Student Risk Report"));
        assert!(report.contains("Generated on 2026-03-01 for 4 students"));
        assert!(report.contains("- High Risk: 1 (25%)"));
        assert!(report.contains("## Low Attendance (2)"));
        assert!(report.contains("- Carol Davis (STU003): due 3000.00"));
        assert!(report.contains(
            "- Fee collection 50% (target 90%) with 4500.00 outstanding below threshold"
        ));
    }

    #[test]
    fn report_and_insights_follow_the_roster_thresholds() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).expect("date");
        let mut roster = Roster::classify(fixture(), ThresholdConfig::default());
        roster.reclassify(ThresholdConfig::default().with_overrides(Some(80.0), None, None));

        let report = build_report(&roster, date);
        assert!(report.contains("(threshold 80%)"));
        assert!(report.contains("## Low Attendance (3)"));
        assert!(report.contains("- Carol Davis (STU003): 75.0%"));

        let list = insights(&roster);
        assert!(list[1].content.starts_with("3 students have attendance below 80%"));
    }

    #[test]
    fn empty_report_says_so() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).expect("date");
        let report = build_report(&Roster::classify(Vec::new(), ThresholdConfig::default()), date);
        assert!(report.contains("No students uploaded yet."));
    }

    #[test]
    fn insights_reflect_counts() {
        let list = insights(&Roster::classify(fixture(), ThresholdConfig::default()));
        assert_eq!(list.len(), 4);
        assert_eq!(list[0].priority, InsightPriority::Medium);
        assert!(list[1].content.starts_with("2 students have attendance below 75%"));
        assert!(list[2].content.starts_with("2 students show improving"));
    }

    #[test]
    fn queries_route_on_keywords() {
        assert!(answer_query("Why is ATTENDANCE low?").contains("attendance"));
        assert!(answer_query("grade trends").contains("declining scores"));
        assert!(answer_query("who is at risk").contains("multiple flags"));
        assert!(answer_query("hello").contains("early intervention"));
    }

    #[test]
    fn student_card_shows_flags() {
        let students = fixture();
        let card = student_card(&students[2]);
        assert!(card.contains("Carol Davis (STU003)"));
        assert!(card.contains("Risk level: High Risk (flags: Low Scores, High Fee Due)"));
    }
}
