//! Binary entry point for sqlbridge.
//!
//! A small CLI over the driver: run statements and queries against any connection
//! string the library accepts.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value as JsonValue};
use sqlbridge::config::DriverConfig;
use sqlbridge::observability::{self, LoggingConfig};
use sqlbridge::{DriverConnection, ParameterList, RowTable, SqlValue};

/// sqlbridge - libSQL/SQLite over the embedded engine or the HTTP pipeline.
#[derive(Parser)]
#[command(name = "sqlbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "SQLBRIDGE_CONFIG_PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Execute a statement and print the number of rows changed.
    Exec {
        /// Connection string.
        connection: String,

        /// SQL text.
        sql: String,

        /// Parameter as JSON (`42`, `"text"`, `null`), or `@name=JSON` for a named one.
        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Run a query and print its rows.
    Query {
        /// Connection string.
        connection: String,

        /// SQL text.
        sql: String,

        /// Parameter as JSON (`42`, `"text"`, `null`), or `@name=JSON` for a named one.
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Output format.
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Report whether the database has any user tables.
    HasTables {
        /// Connection string.
        connection: String,
    },

    /// Print the engine version.
    Version {
        /// Connection string.
        connection: String,
    },
}

/// Query output format.
#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// One JSON object per row.
    Json,
    /// Aligned columns.
    Table,
}

/// Main entry point.
fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    let logging = LoggingConfig::from_settings(Some(&config.logging), cli.verbose);
    if let Err(e) = observability::init_logging(&logging) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(command: Commands, config: DriverConfig) -> Result<()> {
    match command {
        Commands::Exec {
            connection,
            sql,
            params,
        } => cmd_exec(&connection, &sql, &params, config),
        Commands::Query {
            connection,
            sql,
            params,
            format,
        } => cmd_query(&connection, &sql, &params, format, config),
        Commands::HasTables { connection } => {
            let conn = open(&connection, config)?;
            println!("{}", conn.has_tables()?);
            Ok(())
        },
        Commands::Version { connection } => {
            let conn = open(&connection, config)?;
            println!("{}", conn.server_version()?);
            Ok(())
        },
    }
}

/// Loads configuration: an explicit file, else the default location, then the environment.
fn load_config(path: Option<&str>) -> Result<DriverConfig> {
    let config = match path.filter(|p| !p.trim().is_empty()) {
        Some(config_path) => DriverConfig::load_from_file(Path::new(config_path))
            .with_context(|| format!("reading {config_path}"))?,
        None => DriverConfig::load_default(),
    };
    Ok(config.with_env_overrides())
}

fn open(connection: &str, config: DriverConfig) -> Result<DriverConnection> {
    let mut conn = DriverConnection::with_config(connection, config)?;
    conn.open()
        .with_context(|| format!("opening {}", conn.database_name()))?;
    Ok(conn)
}

/// Parses `--param` values.
fn parse_params(raw: &[String]) -> Result<ParameterList> {
    let mut params = ParameterList::new();
    for arg in raw {
        let (name, json) = match arg.split_once('=') {
            Some((name, json)) if name.starts_with(['@', ':', '$']) => (Some(name), json),
            _ => (None, arg.as_str()),
        };
        let value: JsonValue = serde_json::from_str(json)
            .with_context(|| format!("parameter '{arg}' is not valid JSON"))?;
        params.add_json(name, &value)?;
    }
    Ok(params)
}

fn cmd_exec(connection: &str, sql: &str, params: &[String], config: DriverConfig) -> Result<()> {
    let params = parse_params(params)?;
    let conn = open(connection, config)?;
    let mut cmd = conn.create_command(sql);
    *cmd.parameters_mut() = params;
    let outcome = cmd.execute_with_outcome()?;
    match outcome.last_insert_rowid {
        Some(rowid) => println!("{} row(s) affected, last rowid {rowid}", outcome.rows_affected),
        None => println!("{} row(s) affected", outcome.rows_affected),
    }
    Ok(())
}

fn cmd_query(
    connection: &str,
    sql: &str,
    params: &[String],
    format: OutputFormat,
    config: DriverConfig,
) -> Result<()> {
    let params = parse_params(params)?;
    let conn = open(connection, config)?;
    let mut cmd = conn.create_command(sql);
    *cmd.parameters_mut() = params;
    let table = cmd.execute_reader()?.collect_rows()?;
    match format {
        OutputFormat::Json => print_json(&table)?,
        OutputFormat::Table => print_table(&table),
    }
    Ok(())
}

fn to_json(value: &SqlValue) -> JsonValue {
    match value {
        SqlValue::Null => JsonValue::Null,
        SqlValue::Integer(i) => JsonValue::from(*i),
        SqlValue::Real(f) => serde_json::Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
        SqlValue::Text(s) => JsonValue::String(s.clone()),
        SqlValue::Blob(b) => JsonValue::String(STANDARD.encode(b)),
    }
}

fn print_json(table: &RowTable) -> Result<()> {
    for row in table.rows() {
        let object: Map<String, JsonValue> = table
            .columns()
            .iter()
            .cloned()
            .zip(row.iter().map(to_json))
            .collect();
        println!("{}", serde_json::to_string(&object)?);
    }
    Ok(())
}

fn print_table(table: &RowTable) {
    if table.columns().is_empty() {
        println!("{} row(s) affected", table.rows_affected());
        return;
    }
    let cells: Vec<Vec<String>> = table
        .rows()
        .iter()
        .map(|row| row.iter().map(ToString::to_string).collect())
        .collect();
    let widths: Vec<usize> = table
        .columns()
        .iter()
        .enumerate()
        .map(|(i, name)| {
            cells
                .iter()
                .filter_map(|row| row.get(i).map(String::len))
                .chain(std::iter::once(name.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |values: &[String]| {
        values
            .iter()
            .zip(&widths)
            .map(|(value, &width)| format!("{value:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
    };
    println!("{}", line(table.columns()));
    println!(
        "{}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  ")
    );
    for row in &cells {
        println!("{}", line(row));
    }
    if table.len() == 1 {
        println!("(1 row)");
    } else {
        println!("({} rows)", table.len());
    }
}
