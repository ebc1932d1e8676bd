use std::process::ExitCode;

use anyhow::Context;
use attend_engine::{
    AttendanceEvent, AttendanceRequest, CallerIdentity, Direction, QrValidation, SessionPool,
    TransitionEngine, TransitionOutcome,
};
use attend_store::{SqliteStore, TokenStore, UserDirectory};
use attend_types::{
    AuditEntry, DailyAttendanceSummary, MonthlyStatistics, Origin, QrToken, Redeemability,
    TokenCode, UserId, UserRecord,
};
use chrono::{Datelike, Duration, Utc};
use colored::Colorize;
use rand::RngCore;
use serde::Serialize;

use crate::cli::*;
use crate::config::AppConfig;

/// Exit status for a transition the engine refused.
const EXIT_REJECTED: u8 = 2;
/// Exit status for a refusal that may succeed on retry.
const EXIT_TRANSIENT: u8 = 75;

type Engine = TransitionEngine<SqliteStore>;

pub async fn run_command(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let ctx = Globals {
        format: cli.format,
        caller: cli.caller,
        admin: cli.admin,
    };

    match cli.command {
        Command::Init => cmd_init(&config, &ctx),
        Command::AddUser(args) => cmd_add_user(&config, &ctx, args).await,
        Command::DeactivateUser(args) => cmd_deactivate_user(&config, &ctx, args).await,
        Command::IssueQr(args) => cmd_issue_qr(&config, &ctx, args).await,
        Command::CheckIn(args) => cmd_transition(&config, &ctx, Direction::CheckIn, args).await,
        Command::CheckOut(args) => cmd_transition(&config, &ctx, Direction::CheckOut, args).await,
        Command::History(args) => cmd_history(&config, &ctx, args).await,
        Command::Today(args) => cmd_today(&config, &ctx, args).await,
        Command::Stats(args) => cmd_stats(&config, &ctx, args).await,
        Command::ValidateQr(args) => cmd_validate_qr(&config, &ctx, args).await,
        Command::Audit(args) => cmd_audit(&config, &ctx, args).await,
    }
}

/// Global flags every subcommand needs.
struct Globals {
    format: OutputFormat,
    caller: Option<String>,
    admin: bool,
}

impl Globals {
    /// The caller named by `--as`, or the subject acting for themselves.
    fn caller_for(&self, subject: &str) -> CallerIdentity {
        let id = self.caller.as_deref().unwrap_or(subject);
        if self.admin {
            CallerIdentity::admin(id)
        } else {
            CallerIdentity::user(id)
        }
    }

    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_store(config: &AppConfig) -> anyhow::Result<SqliteStore> {
    SqliteStore::open(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path.display()))
}

fn open_engine(config: &AppConfig) -> anyhow::Result<Engine> {
    let store = open_store(config)?;
    let pool = SessionPool::new(store, config.pool.clone());
    Ok(TransitionEngine::new(pool, config.engine.clone())?)
}

fn cmd_init(config: &AppConfig, ctx: &Globals) -> anyhow::Result<ExitCode> {
    let store = open_store(config)?;
    if ctx.json() {
        print_json(&serde_json::json!({ "database": store.path() }))?;
    } else {
        println!(
            "{} Initialized attendance database at {}",
            "✓".green().bold(),
            store.path().display()
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_add_user(
    config: &AppConfig,
    ctx: &Globals,
    args: AddUserArgs,
) -> anyhow::Result<ExitCode> {
    let engine = open_engine(config)?;
    let user = UserRecord {
        id: UserId::new(args.user),
        display_name: args.name,
        active: !args.inactive,
    };
    anyhow::ensure!(!user.id.is_blank(), "user id must not be empty");

    let mut session = engine.pool().acquire().await?;
    session.upsert_user(&user)?;
    session.commit()?;
    tracing::info!(user = %user.id, active = user.active, "user saved");

    if ctx.json() {
        print_json(&user)?;
    } else {
        println!(
            "{} Saved user {} ({})",
            "✓".green().bold(),
            user.id.to_string().bold(),
            user.display_name
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_deactivate_user(
    config: &AppConfig,
    ctx: &Globals,
    args: UserArg,
) -> anyhow::Result<ExitCode> {
    let engine = open_engine(config)?;
    let id = UserId::new(args.user);

    let mut session = engine.pool().acquire().await?;
    let mut user = session
        .find_user(&id)?
        .with_context(|| format!("no such user: {id}"))?;
    user.active = false;
    session.upsert_user(&user)?;
    session.commit()?;
    tracing::info!(user = %id, "user deactivated");

    if ctx.json() {
        print_json(&user)?;
    } else {
        println!("{} Deactivated {}", "✓".green().bold(), id.to_string().bold());
    }
    Ok(ExitCode::SUCCESS)
}

/// `QR-` followed by 16 random bytes in upper-case hex.
fn generate_code() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("QR-{}", hex::encode_upper(bytes))
}

async fn cmd_issue_qr(
    config: &AppConfig,
    ctx: &Globals,
    args: IssueQrArgs,
) -> anyhow::Result<ExitCode> {
    anyhow::ensure!(args.valid_hours > 0, "--valid-hours must be positive");
    let engine = open_engine(config)?;
    let now = Utc::now();
    let token = QrToken::issue(
        args.code.unwrap_or_else(generate_code),
        args.user.map(UserId::new),
        now,
        now + Duration::hours(i64::from(args.valid_hours)),
    );
    anyhow::ensure!(!token.code.is_blank(), "qr code must not be empty");

    let mut session = engine.pool().acquire().await?;
    if let Some(user) = &token.bound_user_id {
        session
            .find_user(user)?
            .with_context(|| format!("no such user: {user}"))?;
    }
    session
        .issue_token(&token)
        .with_context(|| format!("issuing {}", token.code))?;
    session.commit()?;
    tracing::info!(code = %token.code.prefix(10), "qr token issued");

    if ctx.json() {
        print_json(&token)?;
    } else {
        println!("{} Issued {}", "✓".green().bold(), token.code.to_string().bold());
        println!("  valid from:  {}", token.valid_from.format("%Y-%m-%d %H:%M UTC"));
        println!("  valid until: {}", token.valid_until.format("%Y-%m-%d %H:%M UTC"));
        if let Some(user) = &token.bound_user_id {
            println!("  bound to:    {user}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_transition(
    config: &AppConfig,
    ctx: &Globals,
    direction: Direction,
    args: TransitionArgs,
) -> anyhow::Result<ExitCode> {
    let engine = open_engine(config)?;
    let caller = ctx.caller_for(&args.user);
    let mut request = match (args.confidence, args.qr) {
        (Some(confidence), _) => AttendanceRequest::face(caller, confidence),
        (None, Some(code)) => AttendanceRequest::qr(caller, code),
        (None, None) => anyhow::bail!("either --confidence or --qr is required"),
    }
    .on_behalf_of(args.user)
    .with_origin(Origin {
        ip_address: args.ip,
        device: args.device,
    });
    if let Some(at) = args.timestamp {
        request = request.with_timestamp(at);
    }
    if let Some(location) = args.location {
        request = request.with_location(location);
    }

    let outcome = match direction {
        Direction::CheckIn => engine.request_check_in(request).await?,
        Direction::CheckOut => engine.request_check_out(request).await?,
    };

    if ctx.json() {
        print_json(&outcome)?;
    } else {
        print_outcome(&outcome);
    }
    Ok(match outcome.reason() {
        None => ExitCode::SUCCESS,
        Some(reason) if reason.is_transient() => ExitCode::from(EXIT_TRANSIENT),
        Some(_) => ExitCode::from(EXIT_REJECTED),
    })
}

fn print_outcome(outcome: &TransitionOutcome) {
    match outcome {
        TransitionOutcome::Admitted { event, message } => {
            println!("{} {}", "✓".green().bold(), message);
            print_event(event);
        }
        TransitionOutcome::Rejected(rejection) => {
            let label = if rejection.reason.is_transient() {
                rejection.reason.code().yellow().bold()
            } else {
                rejection.reason.code().red().bold()
            };
            println!("{} {}: {}", "✗".red().bold(), label, rejection.message);
        }
    }
}

fn print_event(event: &AttendanceEvent) {
    let evidence = match (event.verification.face_confidence(), event.verification.qr_code()) {
        (Some(confidence), _) => format!("face {confidence:.2}"),
        (None, Some(code)) => format!("qr {}", code.prefix(10)),
        (None, None) => event.method.to_string(),
    };
    println!(
        "  {} {} {:<9} {} {} {}",
        event.id.short_id().yellow(),
        event.attendance_date,
        event.direction.as_str(),
        event.event_time.format("%H:%M:%S"),
        evidence.dimmed(),
        event.location
    );
}

async fn cmd_history(
    config: &AppConfig,
    ctx: &Globals,
    args: HistoryArgs,
) -> anyhow::Result<ExitCode> {
    let engine = open_engine(config)?;
    let user = UserId::new(&args.user);
    let events = engine
        .reports()
        .history(&ctx.caller_for(&args.user), &user, args.from, args.to, args.limit)
        .await?;

    if ctx.json() {
        print_json(&events)?;
    } else if events.is_empty() {
        println!("No attendance recorded for {user}");
    } else {
        println!("{} event(s) for {}", events.len(), user.to_string().bold());
        for event in &events {
            print_event(event);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_day(summary: &DailyAttendanceSummary) {
    let time = |t: Option<chrono::DateTime<Utc>>| {
        t.map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "--:--:--".to_string())
    };
    println!(
        "  {}  in {}  out {}  worked {}",
        summary.date,
        time(summary.check_in_time),
        time(summary.check_out_time),
        summary.duration_label().bold()
    );
}

async fn cmd_today(config: &AppConfig, ctx: &Globals, args: UserArg) -> anyhow::Result<ExitCode> {
    let engine = open_engine(config)?;
    let user = UserId::new(&args.user);
    let summary = engine
        .reports()
        .today(&ctx.caller_for(&args.user), &user)
        .await?;

    match (&summary, ctx.json()) {
        (_, true) => print_json(&summary)?,
        (Some(summary), false) => print_day(summary),
        (None, false) => println!("{user} has not checked in today"),
    }
    Ok(ExitCode::SUCCESS)
}

fn print_stats(stats: &MonthlyStatistics) {
    println!(
        "{} {}-{:02}",
        stats.user_id.to_string().bold(),
        stats.year,
        stats.month
    );
    println!("  check-ins:     {}", stats.total_check_ins);
    println!("  check-outs:    {}", stats.total_check_outs);
    println!(
        "  total worked:  {}",
        attend_types::format_duration(stats.total_work_seconds)
    );
    println!(
        "  daily average: {}",
        attend_types::format_duration(stats.average_daily_seconds)
    );
    for day in &stats.daily {
        print_day(day);
    }
}

async fn cmd_stats(config: &AppConfig, ctx: &Globals, args: StatsArgs) -> anyhow::Result<ExitCode> {
    let engine = open_engine(config)?;
    let today = engine.calendar().date_of(Utc::now());
    let user = UserId::new(&args.user);
    let stats = engine
        .reports()
        .monthly_statistics(
            &ctx.caller_for(&args.user),
            &user,
            args.year.unwrap_or(today.year()),
            args.month.unwrap_or(today.month()),
        )
        .await?;

    if ctx.json() {
        print_json(&stats)?;
    } else {
        print_stats(&stats);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_validation(validation: &QrValidation) {
    let status = match validation.status {
        Redeemability::Redeemable => "valid".green().bold(),
        Redeemability::AlreadyUsed => "already used".red().bold(),
        Redeemability::NotYetValid => "not yet valid".yellow().bold(),
        Redeemability::Expired => "expired".red().bold(),
    };
    println!("{}… {}", validation.code_prefix, status);
    println!("  valid for:   {}", validation.valid_for_date);
    println!(
        "  window:      {} .. {}",
        validation.valid_from.format("%Y-%m-%d %H:%M"),
        validation.valid_until.format("%Y-%m-%d %H:%M")
    );
    if let Some(user) = &validation.bound_user_id {
        println!("  bound to:    {user}");
    }
}

async fn cmd_validate_qr(
    config: &AppConfig,
    ctx: &Globals,
    args: ValidateQrArgs,
) -> anyhow::Result<ExitCode> {
    let engine = open_engine(config)?;
    let validation = engine
        .reports()
        .validate_qr(&TokenCode::new(args.code))
        .await?;

    if ctx.json() {
        print_json(&validation)?;
    } else {
        print_validation(&validation);
    }
    Ok(if validation.is_valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_REJECTED)
    })
}

fn print_audit(entry: &AuditEntry) {
    let outcome = if entry.is_success() {
        entry.outcome.as_str().green()
    } else {
        entry.outcome.as_str().red()
    };
    let user = entry
        .user_id
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {} {:<7} {:<12} {:<20} {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        outcome,
        user,
        entry.action.tag(),
        entry.description.dimmed()
    );
}

async fn cmd_audit(config: &AppConfig, ctx: &Globals, args: AuditArgs) -> anyhow::Result<ExitCode> {
    let engine = open_engine(config)?;
    let subject = args.user.as_deref().map(UserId::new);
    let caller = ctx.caller_for(args.user.as_deref().unwrap_or("operator"));
    let entries = engine
        .reports()
        .audit_entries(&caller, subject.as_ref(), args.limit)
        .await?;

    if ctx.json() {
        print_json(&entries)?;
    } else if entries.is_empty() {
        println!("No audit entries");
    } else {
        for entry in &entries {
            print_audit(entry);
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn generated_codes_are_prefixed_and_unique() {
        let a = generate_code();
        let b = generate_code();
        assert!(a.starts_with("QR-"));
        assert_eq!(a.len(), 3 + 32);
        assert_ne!(a, b);
    }

    #[test]
    fn caller_defaults_to_the_subject() {
        let ctx = Globals {
            format: OutputFormat::Text,
            caller: None,
            admin: false,
        };
        let caller = ctx.caller_for("emp-1");
        assert_eq!(caller.user_id.as_str(), "emp-1");
        assert!(!caller.elevated);
    }

    #[test]
    fn transition_requires_exactly_one_evidence() {
        assert!(Cli::try_parse_from(["attend", "check-in", "emp-1"]).is_err());
        assert!(Cli::try_parse_from([
            "attend", "check-in", "emp-1", "--confidence", "0.9", "--qr", "QR-1"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["attend", "check-out", "emp-1", "--qr", "QR-1"]).is_ok());
    }

    #[tokio::test]
    async fn check_in_then_duplicate_over_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            database_path: dir.path().join("attend.db"),
            ..AppConfig::default()
        };
        let ctx = Globals {
            format: OutputFormat::Json,
            caller: None,
            admin: false,
        };

        cmd_add_user(
            &config,
            &ctx,
            AddUserArgs {
                user: "emp-1".into(),
                name: "Ada".into(),
                inactive: false,
            },
        )
        .await
        .unwrap();

        let args = || TransitionArgs {
            user: "emp-1".into(),
            confidence: Some(0.95),
            qr: None,
            location: None,
            timestamp: None,
            ip: None,
            device: None,
        };
        let first = cmd_transition(&config, &ctx, Direction::CheckIn, args()).await.unwrap();
        let second = cmd_transition(&config, &ctx, Direction::CheckIn, args()).await.unwrap();
        assert_eq!(first, ExitCode::SUCCESS);
        assert_eq!(second, ExitCode::from(EXIT_REJECTED));
    }
}
