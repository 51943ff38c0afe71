pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::commands::turn::TurnTarget;

#[derive(Debug, Parser)]
#[command(
    name = "huddle",
    about = "Huddle operator CLI",
    long_about = "Operate the Huddle booking assistant: migrations, room fixtures, config inspection, readiness checks and conversational turns.",
    after_help = "Examples:\n  huddle doctor --json\n  huddle chat --session tab-1 --user-id 42 --user-name Lin --message \"book Vega at 3pm\"\n  huddle decide --session tab-1 --user-id 42 --user-name Lin --kind accept --token <token>"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[arg(long, help = "Session key shared by every turn of one conversation")]
    session: String,
    #[arg(long, help = "Acting user's id")]
    user_id: i64,
    #[arg(long, help = "Acting user's display name")]
    user_name: String,
}

impl From<SessionArgs> for TurnTarget {
    fn from(args: SessionArgs) -> Self {
        Self { session: args.session, user_id: args.user_id, user_name: args.user_name }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the meeting-room fixtures (idempotent)")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, model provider credentials, DB connectivity and room fixtures")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List registered actions and whether each needs confirmation")]
    Actions,
    #[command(about = "Send a user message and run the turn until a reply or a confirmation request")]
    Chat {
        #[command(flatten)]
        target: SessionArgs,
        #[arg(long)]
        message: String,
    },
    #[command(about = "Answer a pending confirmation: accept, edit, reject or feedback")]
    Decide {
        #[command(flatten)]
        target: SessionArgs,
        #[arg(long)]
        kind: String,
        #[arg(long, help = "Token from the confirmation request")]
        token: Option<String>,
        #[arg(long, help = "JSON payload; feedback also accepts plain text")]
        payload: Option<String>,
    },
    #[command(about = "Show the latest checkpoint of a session")]
    Show {
        #[arg(long)]
        session: String,
        #[arg(long, help = "List every committed version instead")]
        history: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Actions => commands::actions::run(),
        Command::Chat { target, message } => commands::turn::chat(target.into(), message),
        Command::Decide { target, kind, token, payload } => {
            commands::turn::decide(target.into(), kind, token, payload)
        }
        Command::Show { session, history } => commands::session::show(&session, history),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout stays a single JSON document.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
