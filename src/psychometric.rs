use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{MonitorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Academic,
    Family,
    Social,
    Emotional,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Academic => "academic",
            Category::Family => "family",
            Category::Social => "social",
            Category::Emotional => "emotional",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Question {
    pub id: u8,
    pub category: Category,
    pub text: &'static str,
}

const fn question(id: u8, category: Category, text: &'static str) -> Question {
    Question { id, category, text }
}

pub const QUESTION_COUNT: usize = 18;

pub static QUESTIONS: [Question; QUESTION_COUNT] = [
    question(1, Category::Academic, "How often do you feel overwhelmed by your academic workload?"),
    question(2, Category::Academic, "How often do you have trouble concentrating during classes or while studying?"),
    question(3, Category::Academic, "How often do you feel like giving up on your studies?"),
    question(4, Category::Academic, "How often do you worry about disappointing your teachers or mentors?"),
    question(5, Category::Academic, "How often do you feel that your academic performance defines your worth?"),
    question(6, Category::Family, "How often do you feel pressure from your family regarding your academic performance?"),
    question(7, Category::Family, "How often do you worry about your family's financial situation affecting your education?"),
    question(8, Category::Family, "How often do you feel like you cannot discuss your problems with your family?"),
    question(9, Category::Family, "How often do you feel guilty about the money your family spends on your education?"),
    question(10, Category::Social, "How often do you feel isolated or alone among your peers?"),
    question(11, Category::Social, "How often do you avoid social activities because of academic stress?"),
    question(12, Category::Social, "How often do you feel like others are judging your academic performance?"),
    question(13, Category::Emotional, "How often do you feel sad or hopeless about your future?"),
    question(14, Category::Emotional, "How often do you have trouble sleeping due to worry or stress?"),
    question(15, Category::Emotional, "How often do you feel tired or lack energy even after resting?"),
    question(16, Category::Emotional, "How often do you lose interest in activities you used to enjoy?"),
    question(17, Category::Emotional, "How often do you have thoughts of not wanting to continue your education?"),
    question(18, Category::Emotional, "How often do you feel like you are not good enough despite your achievements?"),
];

pub const MAX_TOTAL: u32 = QUESTION_COUNT as u32 * Answer::MAX as u32;

/// A point on the 0..=4 frequency scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Answer(u8);

impl Answer {
    pub const MAX: u8 = 4;
    pub const LABELS: [&'static str; 5] = ["Never", "Rarely", "Sometimes", "Often", "Always"];

    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX).then_some(Answer(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn label(self) -> &'static str {
        Self::LABELS[self.0 as usize]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryScores {
    pub academic: u32,
    pub family: u32,
    pub social: u32,
    pub emotional: u32,
}

impl CategoryScores {
    fn add(&mut self, category: Category, value: u32) {
        match category {
            Category::Academic => self.academic += value,
            Category::Family => self.family += value,
            Category::Social => self.social += value,
            Category::Emotional => self.emotional += value,
        }
    }

    pub fn get(&self, category: Category) -> u32 {
        match category {
            Category::Academic => self.academic,
            Category::Family => self.family,
            Category::Social => self.social,
            Category::Emotional => self.emotional,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PsychometricTier {
    Low,
    Moderate,
    High,
    Severe,
}

impl PsychometricTier {
    pub fn from_total(total: u32) -> Self {
        match total {
            0..=18 => PsychometricTier::Low,
            19..=36 => PsychometricTier::Moderate,
            37..=54 => PsychometricTier::High,
            _ => PsychometricTier::Severe,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PsychometricTier::Low => "Low",
            PsychometricTier::Moderate => "Moderate",
            PsychometricTier::High => "High",
            PsychometricTier::Severe => "Severe",
        }
    }

    pub fn needs_escalation(self) -> bool {
        matches!(self, PsychometricTier::High | PsychometricTier::Severe)
    }
}

impl fmt::Display for PsychometricTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const CATEGORY_RULES: [(Category, u32, [&str; 2]); 4] = [
    (
        Category::Academic,
        12,
        [
            "Consider academic counseling and study skills workshops",
            "Explore time management and stress reduction techniques",
        ],
    ),
    (
        Category::Family,
        8,
        [
            "Family counseling sessions may be beneficial",
            "Consider financial aid counseling if applicable",
        ],
    ),
    (
        Category::Social,
        6,
        [
            "Participate in peer support groups or social activities",
            "Consider joining study groups or clubs",
        ],
    ),
    (
        Category::Emotional,
        12,
        [
            "Professional mental health counseling is recommended",
            "Consider mindfulness and stress management programs",
        ],
    ),
];

const ESCALATION: [&str; 2] = [
    "Immediate intervention and support is recommended",
    "Contact student counseling services",
];

pub fn recommendations(scores: &CategoryScores, tier: PsychometricTier) -> Vec<String> {
    let mut out = Vec::new();
    for (category, cutoff, messages) in CATEGORY_RULES.iter() {
        if scores.get(*category) >= *cutoff {
            out.extend(messages.iter().map(|m| m.to_string()));
        }
    }
    if tier.needs_escalation() {
        out.extend(ESCALATION.iter().map(|m| m.to_string()));
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PsychometricResult {
    id: Uuid,
    total_score: u32,
    category_scores: CategoryScores,
    tier: PsychometricTier,
    recommendations: Vec<String>,
    completed_at: DateTime<Utc>,
}

impl PsychometricResult {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn total_score(&self) -> u32 {
        self.total_score
    }

    pub fn category_scores(&self) -> &CategoryScores {
        &self.category_scores
    }

    pub fn tier(&self) -> PsychometricTier {
        self.tier
    }

    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }
}

/// Scores a full set of answers, one per question in [`QUESTIONS`] order.
pub fn score(answers: &[Answer], completed_at: DateTime<Utc>) -> Result<PsychometricResult> {
    if answers.len() != QUESTION_COUNT {
        return Err(MonitorError::Questionnaire(format!(
            "expected {} answers, got {}",
            QUESTION_COUNT,
            answers.len()
        )));
    }

    let mut category_scores = CategoryScores::default();
    let mut total_score = 0;
    for (question, answer) in QUESTIONS.iter().zip(answers) {
        let value = answer.value() as u32;
        category_scores.add(question.category, value);
        total_score += value;
    }

    let tier = PsychometricTier::from_total(total_score);
    Ok(PsychometricResult {
        id: Uuid::new_v4(),
        total_score,
        category_scores,
        tier,
        recommendations: recommendations(&category_scores, tier),
        completed_at,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Instructions,
    InProgress { index: usize },
    Completed,
}

#[derive(Debug, Clone)]
pub struct TestAttempt {
    stage: Stage,
    answers: [Option<Answer>; QUESTION_COUNT],
    result: Option<PsychometricResult>,
}

impl Default for TestAttempt {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAttempt {
    pub fn new() -> Self {
        Self {
            stage: Stage::Instructions,
            answers: [None; QUESTION_COUNT],
            result: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn begin(&mut self) -> Result<()> {
        match self.stage {
            Stage::Instructions => {
                self.stage = Stage::InProgress { index: 0 };
                Ok(())
            }
            other => Err(illegal("begin", other)),
        }
    }

    pub fn current_question(&self) -> Option<&'static Question> {
        match self.stage {
            Stage::InProgress { index } => QUESTIONS.get(index),
            _ => None,
        }
    }

    pub fn selected(&self) -> Option<Answer> {
        match self.stage {
            Stage::InProgress { index } => self.answers[index],
            _ => None,
        }
    }

    pub fn answer(&mut self, answer: Answer) -> Result<()> {
        match self.stage {
            Stage::InProgress { index } => {
                self.answers[index] = Some(answer);
                Ok(())
            }
            other => Err(illegal("answer", other)),
        }
    }

    /// Moves to the next question, or scores the attempt after the last one.
    pub fn advance(&mut self) -> Result<()> {
        let index = match self.stage {
            Stage::InProgress { index } => index,
            other => return Err(illegal("advance", other)),
        };
        if self.answers[index].is_none() {
            return Err(MonitorError::Questionnaire(format!(
                "question {} has no answer yet",
                QUESTIONS[index].id
            )));
        }

        if index + 1 < QUESTION_COUNT {
            self.stage = Stage::InProgress { index: index + 1 };
            return Ok(());
        }

        let answers: Vec<Answer> = self.answers.iter().flatten().copied().collect();
        let result = score(&answers, Utc::now())?;
        tracing::info!(
            total = result.total_score(),
            tier = %result.tier(),
            "psychometric attempt completed"
        );
        self.result = Some(result);
        self.stage = Stage::Completed;
        Ok(())
    }

    pub fn back(&mut self) -> Result<()> {
        match self.stage {
            Stage::InProgress { index } if index > 0 => {
                self.stage = Stage::InProgress { index: index - 1 };
                Ok(())
            }
            other => Err(illegal("go back", other)),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn answered(&self) -> usize {
        self.answers.iter().filter(|a| a.is_some()).count()
    }

    pub fn result(&self) -> Option<&PsychometricResult> {
        self.result.as_ref()
    }
}

fn illegal(action: &str, stage: Stage) -> MonitorError {
    MonitorError::Questionnaire(format!("cannot {action} while in {stage:?}"))
}
