use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "attend",
    about = "Attendance recording with face and QR verification",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Configuration file (defaults to ./attend.toml when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Act as this user instead of the subject of the command.
    #[arg(long = "as", global = true, value_name = "USER")]
    pub caller: Option<String>,

    /// Treat the caller as an administrator.
    #[arg(long, global = true)]
    pub admin: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the database and apply the schema
    Init,
    /// Register or update a user
    AddUser(AddUserArgs),
    /// Revoke a user's ability to record attendance
    DeactivateUser(UserArg),
    /// Issue a single-use QR token
    IssueQr(IssueQrArgs),
    /// Record a check-in
    CheckIn(TransitionArgs),
    /// Record a check-out
    CheckOut(TransitionArgs),
    /// Show attendance history, newest first
    History(HistoryArgs),
    /// Show today's attendance summary
    Today(UserArg),
    /// Show monthly statistics
    Stats(StatsArgs),
    /// Inspect a QR code without consuming it
    ValidateQr(ValidateQrArgs),
    /// Show the audit trail
    Audit(AuditArgs),
}

#[derive(Args)]
pub struct UserArg {
    pub user: String,
}

#[derive(Args)]
pub struct AddUserArgs {
    pub user: String,
    pub name: String,
    #[arg(long)]
    pub inactive: bool,
}

#[derive(Args)]
pub struct IssueQrArgs {
    /// Bind the token to one user.
    #[arg(long)]
    pub user: Option<String>,
    /// Explicit code; a random one is generated otherwise.
    #[arg(long)]
    pub code: Option<String>,
    #[arg(long, default_value = "8")]
    pub valid_hours: u32,
}

#[derive(Args)]
pub struct TransitionArgs {
    pub user: String,
    /// Face-match confidence computed by the recognizer.
    #[arg(long, conflicts_with = "qr", required_unless_present = "qr")]
    pub confidence: Option<f64>,
    /// Presented QR code.
    #[arg(long)]
    pub qr: Option<String>,
    #[arg(long)]
    pub location: Option<String>,
    /// Client-side event time (RFC 3339).
    #[arg(long)]
    pub timestamp: Option<DateTime<Utc>>,
    #[arg(long)]
    pub ip: Option<String>,
    #[arg(long)]
    pub device: Option<String>,
}

#[derive(Args)]
pub struct HistoryArgs {
    pub user: String,
    #[arg(long)]
    pub from: Option<NaiveDate>,
    #[arg(long)]
    pub to: Option<NaiveDate>,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct StatsArgs {
    pub user: String,
    #[arg(long)]
    pub year: Option<i32>,
    #[arg(long)]
    pub month: Option<u32>,
}

#[derive(Args)]
pub struct ValidateQrArgs {
    pub code: String,
}

#[derive(Args)]
pub struct AuditArgs {
    #[arg(long)]
    pub user: Option<String>,
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}
