//! qail-pq: run statements against PostgreSQL from the shell
//!
//! # Usage
//!
//! ```bash
//! # Fetch every row of a query through a cursor
//! qail-pq --conninfo "dbname=postgres" cursor
//!
//! # One query, printed as JSON
//! qail-pq -f json select "select name,id from race;"
//!
//! # Several statements, stopping at the first failure
//! qail-pq exec "create table t (x int)" "insert into t values (1)"
//! ```

use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use qail_pq::format::{render_table, to_json};
use qail_pq::session::{self, SequenceReport};
use qail_pq::{ExecutionOutcome, PgConnection, Profile};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qail-pq")]
#[command(version)]
#[command(about = "Blocking PostgreSQL client: connect, execute, print rows", long_about = None)]
#[command(after_help = "EXAMPLES:
    qail-pq cursor --query \"select * from pg_database\"
    qail-pq select \"select name,id from race;\"
    qail-pq exec \"BEGIN\" \"update race set id = id + 1\" \"END\"")]
struct Cli {
    /// libpq-style connection string or postgres:// URI
    #[arg(short, long, env = "QAIL_PQ_CONNINFO")]
    conninfo: Option<String>,

    /// Output format for result rows
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Verbose output (debug logging)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch all rows of a query through a server-side cursor
    Cursor {
        /// Query the cursor is declared for
        #[arg(short, long, default_value = "select * from pg_database")]
        query: String,
        /// Cursor name
        #[arg(long, default_value = "myportal")]
        cursor: String,
    },
    /// Run a single query and print its rows
    Select {
        #[arg(default_value = "select name,id from race;")]
        query: String,
    },
    /// Run statements in order, stopping at the first failure
    Exec {
        #[arg(required = true)]
        statements: Vec<String>,
    },
}

impl Commands {
    /// Only the catalog cursor runs with an empty `search_path`; user
    /// statements resolve unqualified names through the server default.
    fn pins_search_path(&self) -> bool {
        matches!(self, Commands::Cursor { .. })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "qail_pq=debug" } else { "qail_pq=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let conninfo = resolve_conninfo(cli)?;
    let mut conn = PgConnection::connect_str(&conninfo).context("Connection to database failed")?;

    if cli.verbose {
        println!(
            "{} {}",
            "Connected:".dimmed(),
            conn.server_version().unwrap_or("unknown server version").green()
        );
    }

    if cli.command.pins_search_path() {
        let secured = session::secure_search_path(&mut conn);
        check(secured, "SET search_path failed")?;
    }

    let result = match &cli.command {
        Commands::Cursor { query, cursor } => {
            let report = session::fetch_all_via_cursor(&mut conn, cursor, query);
            print_rows(check(report, "cursor fetch failed")?, cli.format)
        }
        Commands::Select { query } => {
            let report = session::select(&mut conn, query);
            print_rows(check(report, "Select failed")?, cli.format)
        }
        Commands::Exec { statements } => {
            let report = session::run_sequence(&mut conn, statements);
            let outcomes = report.outcomes.len();
            let last = check(report, "statement failed")?;
            if cli.verbose {
                println!("{} {} statement(s)", "Ran".dimmed(), outcomes);
            }
            print_rows(last, cli.format)
        }
    };

    conn.close();
    result
}

/// Flag / env first, then the profile file.
fn resolve_conninfo(cli: &Cli) -> Result<String> {
    if let Some(conninfo) = &cli.conninfo {
        return Ok(conninfo.clone());
    }
    let path = Profile::default_path()
        .ok_or_else(|| anyhow!("no --conninfo given and no config directory found"))?;
    let profile = Profile::load(&path)?;
    profile.conninfo.ok_or_else(|| {
        anyhow!(
            "no connection string: pass --conninfo, set QAIL_PQ_CONNINFO, or add conninfo to {}",
            path.display()
        )
    })
}

/// Last outcome of a successful report, or an error naming what failed.
fn check(report: SequenceReport, what: &str) -> Result<Option<ExecutionOutcome>> {
    if let Some((index, outcome)) = report.failed() {
        let err = outcome
            .error()
            .map(|e| e.to_string())
            .unwrap_or_default();
        return Err(anyhow!("{} (statement {}): {}", what, index + 1, err));
    }
    report.into_last().context(what.to_string())
}

fn print_rows(outcome: Option<ExecutionOutcome>, format: OutputFormat) -> Result<()> {
    match outcome {
        Some(ExecutionOutcome::RowsReturned(rows)) => match format {
            OutputFormat::Table => print!("{}", render_table(&rows)),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&to_json(&rows))?),
        },
        Some(ExecutionOutcome::CommandCompleted { tag, .. }) => {
            println!("{}", tag.green());
        }
        Some(ExecutionOutcome::Failed(err)) => return Err(anyhow!("{}", err)),
        None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("qail-pq").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_select_keeps_default_search_path() {
        let cli = parse(&["select"]);
        match &cli.command {
            Commands::Select { query } => assert_eq!(query, "select name,id from race;"),
            _ => panic!("expected select"),
        }
        assert!(!cli.command.pins_search_path());
    }

    #[test]
    fn test_exec_keeps_default_search_path() {
        let cli = parse(&["exec", "create table t (x int)", "insert into t values (1)"]);
        match &cli.command {
            Commands::Exec { statements } => assert_eq!(statements.len(), 2),
            _ => panic!("expected exec"),
        }
        assert!(!cli.command.pins_search_path());
    }

    #[test]
    fn test_cursor_pins_search_path() {
        let cli = parse(&["-f", "json", "cursor", "--cursor", "c1"]);
        match &cli.command {
            Commands::Cursor { query, cursor } => {
                assert_eq!(query, "select * from pg_database");
                assert_eq!(cursor, "c1");
            }
            _ => panic!("expected cursor"),
        }
        assert!(cli.command.pins_search_path());
        assert!(matches!(cli.format, OutputFormat::Json));
    }

    #[test]
    fn test_exec_requires_a_statement() {
        assert!(Cli::try_parse_from(["qail-pq", "exec"]).is_err());
    }
}
