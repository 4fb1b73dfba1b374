//! `sealkit`: developer CLI for sealkit encrypted databases.
//!
//! ```text
//! sealkit --db app.db --key-hex 00ff.. exec "CREATE TABLE t (x)"
//! sealkit --db app.db query --json "SELECT * FROM t"
//! sealkit --db app.db check
//! sealkit --db app.db rekey --new-key "fresh passphrase"
//! ```

mod output;

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use eyre::{bail, Result, WrapErr};
use sealkit_db::{Database, OpenOptions, Value};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "sealkit", version, about = "Inspect and maintain sealkit encrypted databases")]
struct Cli {
    /// Path to the database file.
    #[arg(long, default_value = "sealkit.db")]
    db: PathBuf,

    #[command(flatten)]
    key: KeyArgs,

    /// JSON file with open options (`read_only`, `busy_timeout_ms`,
    /// `journal_wal`, `foreign_keys`, `secure_delete`).
    #[arg(long)]
    options: Option<PathBuf>,

    /// Log library activity at debug level (overridden by `RUST_LOG`).
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct KeyArgs {
    /// Cipher key as UTF-8 text.
    #[arg(long, env = "SEALKIT_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Cipher key as hex. Takes precedence over `--key`.
    #[arg(long)]
    key_hex: Option<String>,
}

impl KeyArgs {
    fn resolve(&self) -> Result<Option<Zeroizing<Vec<u8>>>> {
        decode_key(self.key.as_deref(), self.key_hex.as_deref())
    }
}

#[derive(Args)]
struct NewKeyArgs {
    /// New cipher key as UTF-8 text.
    #[arg(long, required_unless_present = "new_key_hex")]
    new_key: Option<String>,

    /// New cipher key as hex.
    #[arg(long, conflicts_with = "new_key")]
    new_key_hex: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a SQL script (`-` reads it from stdin).
    Exec {
        /// SQL text.
        sql: String,
    },
    /// Print every row of a query.
    Query {
        /// One JSON array per row instead of a tab-separated table.
        #[arg(long)]
        json: bool,
        /// SQL text.
        sql: String,
    },
    /// Report whether the database opens and passes an integrity check.
    Check,
    /// Re-encrypt the database under a new key.
    Rekey(NewKeyArgs),
}

fn decode_key(text: Option<&str>, hex_text: Option<&str>) -> Result<Option<Zeroizing<Vec<u8>>>> {
    if let Some(hex_text) = hex_text {
        let bytes = hex::decode(hex_text.trim()).wrap_err("key is not valid hex")?;
        return Ok(Some(Zeroizing::new(bytes)));
    }
    Ok(text.map(|text| Zeroizing::new(text.as_bytes().to_vec())))
}

fn load_options(path: Option<&Path>) -> Result<OpenOptions> {
    let Some(path) = path else {
        return Ok(OpenOptions::default());
    };
    let raw = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read options file {}", path.display()))?;
    serde_json::from_str(&raw).wrap_err("invalid options JSON")
}

fn read_sql(sql: String) -> Result<String> {
    if sql != "-" {
        return Ok(sql);
    }
    let mut script = String::new();
    io::stdin()
        .read_to_string(&mut script)
        .wrap_err("failed to read SQL from stdin")?;
    Ok(script)
}

fn query(db: &Database, sql: &str) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
    let result = db.with_connection(|conn| {
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = (0..stmt.column_count())
            .map(|i| stmt.column_name(i).unwrap_or_default())
            .collect();
        let rows = stmt.rows()?;
        Ok((names, rows))
    })?;
    Ok(result)
}

fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let options = load_options(cli.options.as_deref())?;
    tracing::debug!(db = %cli.db.display(), ?options, "opening database");
    let db = Database::with_options(&cli.db, options);
    if let Some(key) = cli.key.resolve()? {
        db.set_cipher(Some(key.to_vec()));
    }

    match cli.command {
        Command::Exec { sql } => {
            db.execute_batch(&read_sql(sql)?)
                .wrap_err("script failed")?;
        }
        Command::Query { json, sql } => {
            let (names, rows) = query(&db, &sql)?;
            if json {
                output::write_json(out, &rows)?;
            } else {
                output::write_table(out, &names, &rows)?;
            }
        }
        Command::Check => {
            if let Err(err) = db.ensure_open() {
                bail!("database cannot be opened: {err}");
            }
            if !db.integrity_check().wrap_err("integrity check failed to run")? {
                bail!("integrity check reported problems");
            }
            writeln!(out, "ok")?;
        }
        Command::Rekey(new) => {
            let Some(key) = decode_key(new.new_key.as_deref(), new.new_key_hex.as_deref())? else {
                bail!("a new key is required");
            };
            db.rekey(key.to_vec()).wrap_err("rekey failed")?;
            writeln!(out, "rekeyed {}", cli.db.display())?;
        }
    }

    db.close();
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "warn,sealkit_db=debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli, &mut io::stdout().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(db: &Path, args: &[&str]) -> Result<String> {
        let db = db.to_str().expect("utf8 path");
        let cli = Cli::try_parse_from(["sealkit", "--db", db].iter().chain(args))?;
        let mut out = Vec::new();
        run(cli, &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn test_hex_key_takes_precedence() {
        let key = decode_key(Some("text"), Some("00ff")).expect("decode");
        assert_eq!(key.as_deref().map(Vec::as_slice), Some([0x00, 0xFF].as_slice()));
        assert!(decode_key(None, Some("zz")).is_err());
        assert!(decode_key(None, None).expect("decode").is_none());
    }

    #[test]
    fn test_exec_query_rekey_flow() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db = dir.path().join("cli.db");

        run_args(
            &db,
            &["--key", "first", "exec", "CREATE TABLE t (x); INSERT INTO t VALUES (1), (x'ab');"],
        )
        .expect("exec");
        let table = run_args(&db, &["--key", "first", "query", "SELECT x FROM t"]).expect("query");
        assert_eq!(table, "x\n1\nx'ab'\n");

        run_args(&db, &["--key", "first", "rekey", "--new-key-hex", "0102"]).expect("rekey");
        assert!(run_args(&db, &["--key", "first", "query", "SELECT x FROM t"]).is_err());
        let json = run_args(&db, &["--key-hex", "0102", "query", "--json", "SELECT x FROM t"])
            .expect("query json");
        assert_eq!(json, "[1]\n[\"ab\"]\n");
        assert_eq!(
            run_args(&db, &["--key-hex", "0102", "check"]).expect("check"),
            "ok\n"
        );
    }

    #[test]
    fn test_options_file_is_applied() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db = dir.path().join("cli.db");
        let options = dir.path().join("options.json");
        std::fs::write(&options, r#"{"journal_wal": true}"#).expect("write options");
        let out = run_args(
            &db,
            &["--options", options.to_str().expect("utf8"), "query", "PRAGMA journal_mode"],
        )
        .expect("query");
        assert_eq!(out, "journal_mode\nwal\n");
    }
}
