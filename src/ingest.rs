//! Lenient CSV readers for the four upload files and for the export format.
//!
//! Headers are matched after lowercasing and dropping every character that is
//! not a letter or digit, so `rollNo`, `Roll No` and `roll_no` all resolve to
//! the same column. Rows without a roll number are discarded; rows the CSV
//! reader cannot decode are skipped with a warning. Numeric cells that are
//! blank or unparseable become 0.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use csv::{ReaderBuilder, StringRecord, Trim};

use crate::models::{
    AttendanceRow, FeeStatus, FeesRow, GuardianRow, ScoreTrend, ScoresRow, UploadBatch,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Attendance,
    Scores,
    Fees,
    Guardians,
}

impl UploadKind {
    pub fn label(self) -> &'static str {
        match self {
            UploadKind::Attendance => "attendance",
            UploadKind::Scores => "scores",
            UploadKind::Fees => "fees",
            UploadKind::Guardians => "guardians",
        }
    }
}

const ROLL_NO: &[&str] = &["rollno", "rollnumber"];
const NAME: &[&str] = &["name", "studentname"];
const CLASSES_ATTENDED: &[&str] = &["classesattended"];
const TOTAL_CLASSES: &[&str] = &["totalclasses"];
const ATTENDANCE_PCT: &[&str] = &["attendancepercentage", "attendance"];
const TEST1: &[&str] = &["test1"];
const TEST2: &[&str] = &["test2"];
const TEST3: &[&str] = &["test3"];
const AVERAGE: &[&str] = &["average", "averagescore"];
const TREND: &[&str] = &["trend", "scoretrend"];
const FEE_STATUS: &[&str] = &["feestatus", "status"];
const DUE_AMOUNT: &[&str] = &["dueamount", "due"];
const PARENT_NAME: &[&str] = &["parentname", "guardianname"];
const PARENT_EMAIL: &[&str] = &["parentemail", "guardianemail"];
const PARENT_PHONE: &[&str] = &["parentphone", "guardianphone"];

fn normalize_header(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Self {
        let mut index = HashMap::new();
        for (position, header) in headers.iter().enumerate() {
            index.entry(normalize_header(header)).or_insert(position);
        }
        Self { index }
    }

    fn get<'r>(&self, record: &'r StringRecord, aliases: &[&str]) -> Option<&'r str> {
        aliases
            .iter()
            .find_map(|alias| self.index.get(*alias))
            .and_then(|position| record.get(*position))
    }

    fn text(&self, record: &StringRecord, aliases: &[&str]) -> String {
        self.get(record, aliases).unwrap_or("").trim().to_string()
    }

    fn number(&self, record: &StringRecord, aliases: &[&str]) -> f64 {
        self.optional_number(record, aliases).unwrap_or(0.0)
    }

    /// `None` for an absent column or blank cell; unparseable text is `Some(0.0)`.
    fn optional_number(&self, record: &StringRecord, aliases: &[&str]) -> Option<f64> {
        let raw = self.get(record, aliases)?.trim();
        if raw.is_empty() {
            return None;
        }
        Some(coerce_number(raw))
    }

    fn count(&self, record: &StringRecord, aliases: &[&str]) -> u32 {
        let value = self.number(record, aliases);
        if value.is_finite() && value > 0.0 {
            value.trunc().min(u32::MAX as f64) as u32
        } else {
            0
        }
    }
}

fn coerce_number(raw: &str) -> f64 {
    let cleaned = raw.trim().trim_end_matches('%').replace(',', "");
    match cleaned.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => {
            tracing::warn!(value = raw, "unparseable numeric cell, using 0");
            0.0
        }
    }
}

fn for_each_row<R, F>(input: R, kind: UploadKind, mut handle: F) -> csv::Result<()>
where
    R: Read,
    F: FnMut(&Columns, &StringRecord, String),
{
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(input);
    let columns = Columns::from_headers(reader.headers()?);

    if !ROLL_NO.iter().any(|alias| columns.index.contains_key(*alias)) {
        tracing::warn!(upload = kind.label(), "no roll number column; every row will be dropped");
    }

    let mut dropped = 0usize;
    for (line, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(upload = kind.label(), row = line + 1, error = %err, "skipping malformed row");
                continue;
            }
        };
        let roll_no = columns.text(&record, ROLL_NO);
        if roll_no.is_empty() {
            dropped += 1;
            continue;
        }
        handle(&columns, &record, roll_no);
    }

    if dropped > 0 {
        tracing::debug!(upload = kind.label(), dropped, "rows without roll number discarded");
    }
    Ok(())
}

pub fn parse_attendance<R: Read>(input: R) -> csv::Result<Vec<AttendanceRow>> {
    let mut rows = Vec::new();
    for_each_row(input, UploadKind::Attendance, |columns, record, roll_no| {
        rows.push(AttendanceRow {
            roll_no,
            name: columns.text(record, NAME),
            classes_attended: columns.count(record, CLASSES_ATTENDED),
            total_classes: columns.count(record, TOTAL_CLASSES),
            attendance_percentage: columns.optional_number(record, ATTENDANCE_PCT),
        });
    })?;
    Ok(rows)
}

pub fn parse_scores<R: Read>(input: R) -> csv::Result<Vec<ScoresRow>> {
    let mut rows = Vec::new();
    for_each_row(input, UploadKind::Scores, |columns, record, roll_no| {
        rows.push(ScoresRow {
            roll_no,
            test1: columns.number(record, TEST1),
            test2: columns.number(record, TEST2),
            test3: columns.number(record, TEST3),
            average: columns.optional_number(record, AVERAGE),
            trend: ScoreTrend::parse_lenient(&columns.text(record, TREND)),
        });
    })?;
    Ok(rows)
}

pub fn parse_fees<R: Read>(input: R) -> csv::Result<Vec<FeesRow>> {
    let mut rows = Vec::new();
    for_each_row(input, UploadKind::Fees, |columns, record, roll_no| {
        rows.push(FeesRow {
            roll_no,
            fee_status: FeeStatus::parse_lenient(&columns.text(record, FEE_STATUS)),
            due_amount: columns.number(record, DUE_AMOUNT),
        });
    })?;
    Ok(rows)
}

pub fn parse_guardians<R: Read>(input: R) -> csv::Result<Vec<GuardianRow>> {
    let mut rows = Vec::new();
    for_each_row(input, UploadKind::Guardians, |columns, record, roll_no| {
        rows.push(GuardianRow {
            roll_no,
            parent_name: columns.text(record, PARENT_NAME),
            parent_email: columns.text(record, PARENT_EMAIL),
            parent_phone: columns.text(record, PARENT_PHONE),
        });
    })?;
    Ok(rows)
}

/// Splits an exported risk report back into upload sources.
///
/// Only the columns the export carries survive: roll number, name, attendance
/// percentage, average score, fee status and due amount. Flags and risk level
/// are ignored; they are recomputed after the merge.
pub fn read_export<R: Read>(mut input: R) -> csv::Result<UploadBatch> {
    let mut raw = String::new();
    input.read_to_string(&mut raw)?;

    Ok(UploadBatch {
        attendance: parse_attendance(raw.as_bytes())?,
        scores: parse_scores(raw.as_bytes())?,
        fees: parse_fees(raw.as_bytes())?,
        guardians: Vec::new(),
    })
}

#[derive(Debug, Clone, Default)]
pub struct UploadPaths<'a> {
    pub attendance: Option<&'a Path>,
    pub scores: Option<&'a Path>,
    pub fees: Option<&'a Path>,
    pub guardians: Option<&'a Path>,
}

impl UploadPaths<'_> {
    /// The first required upload that was not supplied.
    pub fn first_missing(&self) -> Option<UploadKind> {
        [
            (self.attendance.is_none(), UploadKind::Attendance),
            (self.scores.is_none(), UploadKind::Scores),
            (self.fees.is_none(), UploadKind::Fees),
            (self.guardians.is_none(), UploadKind::Guardians),
        ]
        .into_iter()
        .find_map(|(missing, kind)| missing.then_some(kind))
    }
}

pub fn load_batch(paths: &UploadPaths<'_>) -> anyhow::Result<UploadBatch> {
    fn open(path: Option<&Path>, kind: UploadKind) -> anyhow::Result<std::fs::File> {
        let path = path.with_context(|| format!("missing {} upload", kind.label()))?;
        std::fs::File::open(path)
            .with_context(|| format!("failed to open {} file {}", kind.label(), path.display()))
    }

    let batch = UploadBatch {
        attendance: parse_attendance(open(paths.attendance, UploadKind::Attendance)?)
            .context("failed to read attendance CSV")?,
        scores: parse_scores(open(paths.scores, UploadKind::Scores)?)
            .context("failed to read scores CSV")?,
        fees: parse_fees(open(paths.fees, UploadKind::Fees)?).context("failed to read fees CSV")?,
        guardians: parse_guardians(open(paths.guardians, UploadKind::Guardians)?)
            .context("failed to read guardians CSV")?,
    };

    tracing::info!(
        attendance = batch.attendance.len(),
        scores = batch.scores.len(),
        fees = batch.fees.len(),
        guardians = batch.guardians.len(),
        "upload files parsed"
    );
    Ok(batch)
}
