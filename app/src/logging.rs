//! Tracing subscriber setup.
//!
//! Filter directives come from `SQLPANEL_LOG`, then `RUST_LOG`, then `warn`.
//! Headless mode logs to stderr because stdout carries the host protocol;
//! terminal mode logs to a file so the UI is not overdrawn.

use std::error::Error;
use std::fs::{self, OpenOptions};
use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "SQLPANEL_LOG";
const DEFAULT_DIRECTIVES: &str = "warn";

fn filter_directives(lookup: impl Fn(&str) -> Option<String>) -> String {
    [LOG_ENV, "RUST_LOG"]
        .into_iter()
        .find_map(|key| lookup(key).filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_DIRECTIVES.to_string())
}

fn build_env_filter() -> EnvFilter {
    let directives = filter_directives(|key| std::env::var(key).ok());
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

pub fn init_stderr() -> Result<(), Box<dyn Error>> {
    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(true);

    tracing_subscriber::registry()
        .with(build_env_filter())
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

pub fn init_file(path: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent_dir) = path.parent() {
        fs::create_dir_all(parent_dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    let fmt_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(build_env_filter())
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}
