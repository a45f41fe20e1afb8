use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod access;
mod auth;
mod config;
mod db;
mod error;
mod ingest;
mod merge;
mod models;
mod psychometric;
mod report;
mod risk;

use access::{Role, Session, View};
use config::MonitorConfig;
use db::Store;
use error::MonitorError;
use ingest::UploadPaths;
use models::RiskLevel;
use psychometric::{Answer, PsychometricResult, Stage, TestAttempt, QUESTION_COUNT};
use risk::{Roster, ThresholdConfig};

#[derive(Parser)]
#[command(name = "student-risk-monitor")]
#[command(about = "Role-scoped student risk monitoring over uploaded CSV records", long_about = None)]
struct Cli {
    /// Local config file holding thresholds and the signed-in user
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load the demo students and accounts
    Seed,
    /// Sign in and remember the session locally
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Forget the remembered session
    Logout,
    /// Create an account
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        name: String,
        #[arg(long, value_parser = parse_role)]
        role: Role,
    },
    /// Show the dashboard for the signed-in role
    Dashboard,
    /// Replace all students from the four CSV uploads
    Upload {
        #[arg(long)]
        attendance: Option<PathBuf>,
        #[arg(long)]
        scores: Option<PathBuf>,
        #[arg(long)]
        fees: Option<PathBuf>,
        #[arg(long)]
        guardians: Option<PathBuf>,
    },
    /// Replace all students from a previously exported report
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List students, optionally filtered
    Students {
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_parser = parse_risk_level)]
        risk: Option<RiskLevel>,
    },
    /// Show one student's profile
    Show {
        /// Roll number (staff only; guardians and students see their own)
        roll_no: Option<String>,
    },
    /// Show or change the risk thresholds
    #[command(group(
        ArgGroup::new("values")
            .args(["attendance", "score", "fee"])
            .multiple(true)
    ))]
    Thresholds {
        /// Restore the default thresholds
        #[arg(long, conflicts_with = "values")]
        reset: bool,
        #[arg(long)]
        attendance: Option<f64>,
        #[arg(long)]
        score: Option<f64>,
        #[arg(long)]
        fee: Option<f64>,
    },
    /// Export the student risk table as CSV
    Export {
        #[arg(long, default_value = "student_risk_report.csv")]
        out: PathBuf,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Show rule-based insights, or answer a question
    Insights {
        #[arg(long)]
        ask: Option<String>,
    },
    /// Take the psychometric questionnaire
    Assess,
    /// List past questionnaire results
    History,
}

fn parse_role(raw: &str) -> Result<Role, String> {
    Role::parse(raw).ok_or_else(|| format!("unknown role {raw}; use admin, mentor, guardian or student"))
}

fn parse_risk_level(raw: &str) -> Result<RiskLevel, String> {
    RiskLevel::parse(raw).ok_or_else(|| format!("unknown risk level {raw}; use high, medium or safe"))
}

async fn open_store(config: &MonitorConfig) -> anyhow::Result<Store> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;
    Store::connect(&database_url, config.request_timeout())
        .await
        .context("failed to connect to Postgres")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("student_risk_monitor=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = MonitorConfig::load(&cli.config)?;

    match cli.command {
        Commands::InitDb => {
            open_store(&config).await?.init_db().await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let store = open_store(&config).await?;
            let thresholds = store.fetch_thresholds().await?.unwrap_or(config.thresholds);
            let count = store.seed(thresholds).await?;
            println!("Seeded {count} students and the demo accounts.");
        }
        Commands::Login { email, password } => {
            let store = open_store(&config).await?;
            let profile = store.fetch_profile(&email).await?;
            let user = auth::sign_in(
                &email,
                &password,
                profile.as_ref(),
                config.cached_user.as_ref(),
            )?;
            println!("Signed in as {} ({}).", user.name, user.role);
            config.cached_user = Some(user);
            config.save(&cli.config)?;
        }
        Commands::Logout => {
            config.cached_user = None;
            config.save(&cli.config)?;
            println!("Signed out.");
        }
        Commands::Signup {
            email,
            password,
            name,
            role,
        } => {
            let store = open_store(&config).await?;
            let students = store.fetch_students().await?;
            let profile = auth::sign_up(
                &auth::SignUp {
                    email: &email,
                    password: &password,
                    name: &name,
                    role,
                },
                &students,
            )?;
            store.insert_profile(&profile).await?;
            println!("Account created for {} ({}).", profile.user.email, profile.user.role);
        }
        Commands::Dashboard => {
            let session = config.session()?;
            session.authorize(View::Dashboard)?;
            let roster = open_store(&config)
                .await?
                .fetch_roster(config.thresholds)
                .await?;
            print_dashboard(&session, &roster);
        }
        Commands::Upload {
            attendance,
            scores,
            fees,
            guardians,
        } => {
            let session = config.session()?;
            session.authorize(View::Upload)?;
            let paths = UploadPaths {
                attendance: attendance.as_deref(),
                scores: scores.as_deref(),
                fees: fees.as_deref(),
                guardians: guardians.as_deref(),
            };
            if let Some(missing) = paths.first_missing() {
                return Err(MonitorError::MissingUpload(missing.label()).into());
            }
            let batch = ingest::load_batch(&paths)?;
            let store = open_store(&config).await?;
            replace_and_classify(&store, &config, merge::merge_batch(&batch)).await?;
        }
        Commands::Import { csv } => {
            let session = config.session()?;
            session.authorize(View::Upload)?;
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let batch = ingest::read_export(file).context("failed to read exported CSV")?;
            let store = open_store(&config).await?;
            replace_and_classify(&store, &config, merge::merge_batch(&batch)).await?;
        }
        Commands::Students { search, risk } => {
            let session = config.session()?;
            session.authorize(View::Students)?;
            let students = open_store(&config).await?.fetch_students().await?;
            let visible = session.visible_students(&students);
            let matches = report::filter_students(&visible, search.as_deref(), risk);

            if matches.is_empty() {
                println!("No students match.");
                return Ok(());
            }
            for s in matches {
                println!(
                    "- {} {} | {:.1}% | avg {:.1} | due {:.2} | {} [{}]",
                    s.roll_no,
                    s.name,
                    s.attendance_percentage,
                    s.average_score,
                    s.due_amount,
                    s.risk_level,
                    report::join_flags(&s.flags)
                );
            }
        }
        Commands::Show { roll_no } => {
            let session = config.session()?;
            let students = open_store(&config).await?.fetch_students().await?;
            let student = match session.role() {
                Role::Admin | Role::Mentor => {
                    session.authorize(View::StudentDetails)?;
                    let roll_no = roll_no.context("a roll number is required")?;
                    students.iter().find(|s| s.roll_no == roll_no)
                }
                Role::Guardian => {
                    session.authorize(View::StudentProfile)?;
                    session.own_student(&students)
                }
                Role::Student => {
                    session.authorize(View::MyProfile)?;
                    session.own_student(&students)
                }
            };
            match student {
                Some(student) => print!("{}", report::student_card(student)),
                None => println!("Student not found."),
            }
        }
        Commands::Thresholds {
            reset,
            attendance,
            score,
            fee,
        } => {
            let session = config.session()?;
            session.authorize(View::Settings)?;

            let store = open_store(&config).await?;
            let current = store.fetch_thresholds().await?.unwrap_or(config.thresholds);

            if !reset && attendance.is_none() && score.is_none() && fee.is_none() {
                print_thresholds(&current);
                return Ok(());
            }

            let base = if reset {
                ThresholdConfig::default()
            } else {
                current
            };
            let thresholds = base.with_overrides(attendance, score, fee);
            if !thresholds.within_recommended_ranges() {
                tracing::warn!(?thresholds, "thresholds outside the recommended ranges");
            }

            let roster = store.reclassify(thresholds).await?;
            config.thresholds = *roster.thresholds();
            config.save(&cli.config)?;
            print_thresholds(roster.thresholds());
            println!("Reclassified {} students.", roster.students().len());
        }
        Commands::Export { out } => {
            let session = config.session()?;
            session.authorize(View::Reports)?;
            let students = open_store(&config).await?.fetch_students().await?;
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            report::export_csv(&students, file)?;
            println!("Exported {} students to {}.", students.len(), out.display());
        }
        Commands::Report { out } => {
            let session = config.session()?;
            session.authorize(View::Reports)?;
            let roster = open_store(&config)
                .await?
                .fetch_roster(config.thresholds)
                .await?;
            let body = report::build_report(&roster, chrono::Local::now().date_naive());
            std::fs::write(&out, body)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Insights { ask } => {
            let session = config.session()?;
            session.authorize(View::Insights)?;
            if let Some(question) = ask {
                println!("{}", report::answer_query(&question));
                return Ok(());
            }
            let roster = open_store(&config)
                .await?
                .fetch_roster(config.thresholds)
                .await?;
            for insight in report::insights(&roster) {
                println!("[{:?}] {}", insight.priority, insight.title);
                println!("  {}", insight.content);
            }
        }
        Commands::Assess => {
            let session = config.session()?;
            session.authorize(View::MentalHealthTest)?;
            let stdin = io::stdin();
            let stdout = io::stdout();
            let result = run_assessment(stdin.lock(), stdout.lock())?;

            if let Some(result) = result {
                let store = open_store(&config).await?;
                store
                    .insert_psychometric_result(session.user(), &result)
                    .await?;
                println!("Result saved.");
            }
        }
        Commands::History => {
            let session = config.session()?;
            session.authorize(View::MentalHealthTest)?;
            let entries = open_store(&config)
                .await?
                .fetch_result_history(session.user().id)
                .await?;
            if entries.is_empty() {
                println!("No completed questionnaires yet.");
            }
            for entry in entries {
                println!(
                    "- {} score {}/{} ({})",
                    entry.completed_at.format("%Y-%m-%d %H:%M"),
                    entry.total_score,
                    psychometric::MAX_TOTAL,
                    entry.tier
                );
            }
        }
    }

    Ok(())
}

/// Classifies a freshly merged collection under the stored thresholds and
/// stores it in place of the old one.
async fn replace_and_classify(
    store: &Store,
    config: &MonitorConfig,
    students: Vec<models::StudentRecord>,
) -> anyhow::Result<()> {
    let thresholds = store.fetch_thresholds().await?.unwrap_or(config.thresholds);
    let roster = Roster::classify(students, thresholds);
    let count = store.replace_students(&roster).await?;
    let summary = report::summarize(roster.students());
    println!(
        "Stored {count} students: {} high risk, {} medium risk, {} safe.",
        summary.high_risk, summary.medium_risk, summary.safe
    );
    Ok(())
}

fn print_thresholds(t: &ThresholdConfig) {
    println!("Attendance threshold: {}%", t.attendance_threshold);
    println!("Score threshold: {}", t.score_threshold);
    println!("Fee due threshold: {}", t.fee_threshold);
}

fn print_dashboard(session: &Session, roster: &Roster) {
    let students = roster.students();
    println!("{}", session.role().greeting());

    if session.role().is_pinned() {
        match session.own_student(students) {
            Some(student) => print!("{}", report::student_card(student)),
            None => println!("No student record is linked to this account."),
        }
        return;
    }

    let summary = report::summarize(students);
    println!(
        "{} students: {} high risk, {} medium risk, {} safe",
        summary.total_students, summary.high_risk, summary.medium_risk, summary.safe
    );
    println!(
        "Average attendance {:.1}%, average score {:.1}, {:.2} fees due",
        summary.average_attendance, summary.average_score, summary.total_fees_due
    );
    println!(
        "Fee collection {:.1}%, high risk share {:.1}%",
        summary.fee_collection_rate,
        summary.high_risk_share()
    );
    let t = roster.thresholds();
    println!(
        "Classified with attendance < {}%, score < {}, fees due > {}",
        t.attendance_threshold, t.score_threshold, t.fee_threshold
    );
}

/// Drives one questionnaire attempt over line-based input.
///
/// A digit 0-4 answers and moves on. `b` steps back, `r` restarts and `q`
/// abandons. Returns `None` unless every question was answered.
fn run_assessment<R: BufRead, W: Write>(
    input: R,
    mut out: W,
) -> anyhow::Result<Option<PsychometricResult>> {
    let mut attempt = TestAttempt::new();
    writeln!(
        out,
        "This questionnaire has {QUESTION_COUNT} questions. Answer each with 0-4:"
    )?;
    for (value, label) in Answer::LABELS.iter().enumerate() {
        writeln!(out, "  {value} = {label}")?;
    }
    writeln!(out, "Enter b to go back, r to start over or q to quit.")?;
    attempt.begin()?;

    let mut lines = input.lines();
    while let Stage::InProgress { index } = attempt.stage() {
        if let Some(question) = attempt.current_question() {
            writeln!(
                out,
                "[{}/{}] ({}) {}",
                index + 1,
                QUESTION_COUNT,
                question.category.as_str(),
                question.text
            )?;
        }
        if let Some(previous) = attempt.selected() {
            writeln!(out, "  (currently: {} = {})", previous.value(), previous.label())?;
        }

        let Some(line) = lines.next() else {
            writeln!(
                out,
                "Input ended with {} of {QUESTION_COUNT} questions answered.",
                attempt.answered()
            )?;
            return Ok(None);
        };
        let line = line?;
        match line.trim() {
            "q" => return Ok(None),
            "r" => {
                attempt.reset();
                attempt.begin()?;
            }
            "b" => {
                if let Err(err) = attempt.back() {
                    writeln!(out, "{err}")?;
                }
            }
            raw => match raw.parse::<u8>().ok().and_then(Answer::new) {
                Some(answer) => {
                    attempt.answer(answer)?;
                    attempt.advance()?;
                }
                None => writeln!(out, "Please answer with a number from 0 to 4.")?,
            },
        }
    }

    let Some(result) = attempt.result().cloned() else {
        return Ok(None);
    };
    print_result(&mut out, &result)?;
    Ok(Some(result))
}

fn print_result<W: Write>(out: &mut W, result: &PsychometricResult) -> io::Result<()> {
    let scores = result.category_scores();
    writeln!(
        out,
        "Total score {}/{}: {} risk",
        result.total_score(),
        psychometric::MAX_TOTAL,
        result.tier()
    )?;
    writeln!(
        out,
        "Academic {} | Family {} | Social {} | Emotional {}",
        scores.academic, scores.family, scores.social, scores.emotional
    )?;
    for recommendation in result.recommendations() {
        writeln!(out, "- {recommendation}")?;
    }
    writeln!(out, "Completed {}", result.completed_at().format("%Y-%m-%d %H:%M UTC"))?;
    Ok(())
}
