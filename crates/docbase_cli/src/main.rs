//! `docbase` entry point.
//!
//! # Responsibility
//! - Start logging, open the configured database and run one subcommand.
//! - Print results as JSON on stdout; errors go to stderr.
//!
//! Exit codes: `0` success, `1` command failure, `2` usage or logging
//! setup failure, `4` database initialization failure.

mod args;
mod commands;

use args::Cli;
use clap::Parser;
use docbase_core::{
    default_log_level, init_logging, install_global, Base, DocumentStoreHandle, LogTarget,
    ProcessEnv, RecordRepository,
};
use log::{error, info};
use std::process::exit;

const EXIT_COMMAND_FAILED: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_DB_INIT_FAILED: i32 = 4;

fn main() {
    let cli = Cli::parse();

    let level = cli.log_level.as_deref().unwrap_or(default_log_level());
    let logging = LogTarget::from_dir(cli.log_dir.as_deref())
        .and_then(|target| init_logging(level, target));
    if let Err(err) = logging {
        eprintln!("{err}");
        exit(EXIT_USAGE);
    }
    info!(
        "event=cli_start module=cli status=ok version={} database={}",
        docbase_core::core_version(),
        cli.database
    );

    let handle = match DocumentStoreHandle::init_db(&cli.database, &ProcessEnv) {
        Ok(handle) => handle,
        Err(err) => {
            error!("event=cli_start module=cli status=error error_code=db_init_failed error={err}");
            eprintln!("{err}");
            exit(EXIT_DB_INIT_FAILED);
        }
    };
    let handle = match install_global(handle) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("{err}");
            exit(EXIT_DB_INIT_FAILED);
        }
    };

    let repo: RecordRepository<Base> = RecordRepository::new(handle);
    match commands::execute(&repo, cli.command) {
        Ok(output) => println!("{output:#}"),
        Err(err) => {
            error!("event=cli_command module=cli status=error error={err}");
            eprintln!("{err}");
            exit(EXIT_COMMAND_FAILED);
        }
    }
}
