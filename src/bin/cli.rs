#![cfg(not(tarpaulin_include))]

use clap::{Args, Parser, Subcommand};
use equipviz::client::{ApiClient, ClientError};
use serde::Serialize;
use std::path::PathBuf;

/// Command-line client for the equipment visualizer API
#[derive(Debug, Parser)]
#[command(name = "equipctl", version, about)]
struct Cli {
    /// Base URL of the server
    #[arg(long, global = true, env = "EQUIPVIZ_SERVER", default_value = "http://127.0.0.1:8000")]
    server: String,

    /// Token printed by `equipctl login`
    #[arg(long, global = true, env = "EQUIPVIZ_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and print the token
    Login(LoginArgs),
    /// Revoke the current token
    Logout,
    /// Upload a CSV file as a new session
    Upload { file: PathBuf },
    /// Print the records of a session
    Equipment(SessionArgs),
    /// Print the summary statistics of a session
    Summary(SessionArgs),
    /// Print the most recent sessions
    History,
    /// Save the PDF report of a session
    Report {
        output: PathBuf,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Save a PNG chart (types, flowrate or parameters)
    Chart {
        kind: String,
        output: PathBuf,
        #[command(flatten)]
        session: SessionArgs,
    },
}

#[derive(Debug, Args)]
struct LoginArgs {
    username: String,
    #[arg(long, env = "EQUIPVIZ_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Debug, Args)]
struct SessionArgs {
    /// Session id; defaults to the latest upload
    #[arg(long)]
    session: Option<u64>,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let mut client = ApiClient::new(cli.server);
    if let Some(token) = cli.token {
        client = client.with_token(token);
    }

    let result = run(&mut client, cli.command).await;
    if let Err(ClientError::Unauthorized(message)) = &result {
        eprintln!("{message}. Run `equipctl login` to get a new token.");
        std::process::exit(2);
    }
    result?;
    Ok(())
}

async fn run(client: &mut ApiClient, command: Command) -> Result<(), ClientError> {
    match command {
        Command::Login(args) => {
            let login = client.login(&args.username, &args.password).await?;
            eprintln!("Logged in as {}", login.user.username);
            println!("{}", login.token);
        }
        Command::Logout => {
            client.logout().await?;
            eprintln!("Logged out");
        }
        Command::Upload { file } => {
            let result = client.upload_csv(&file).await?;
            eprintln!(
                "Session {}: {} records, {} rows skipped",
                result.session_id, result.record_count, result.skipped_rows
            );
            print_or_warn(&result.summary);
        }
        Command::Equipment(args) => print_or_warn(&client.equipment(args.session).await?),
        Command::Summary(args) => print_or_warn(&client.summary(args.session).await?),
        Command::History => print_or_warn(&client.history().await?),
        Command::Report { output, session } => {
            let pdf = client.download_pdf(session.session).await?;
            tokio::fs::write(&output, pdf).await?;
            eprintln!("Saved report to {}", output.display());
        }
        Command::Chart {
            kind,
            output,
            session,
        } => {
            let png = client.chart(&kind, session.session).await?;
            tokio::fs::write(&output, png).await?;
            eprintln!("Saved chart to {}", output.display());
        }
    }
    Ok(())
}

fn print_or_warn<T: Serialize>(value: &T) {
    if let Err(e) = print_json(value) {
        eprintln!("could not print response: {e}");
    }
}
