mod logging;

use std::error::Error;
use std::path::PathBuf;

use sqlpanel_adapters::driver::{drive_panel, DEFAULT_TICK};
use sqlpanel_adapters::json_lines::{bridge_json_lines, spawn_json_lines};
use sqlpanel_adapters::slot::FileSlot;
use sqlpanel_core::config::{default_config_dir, ConfigError, PanelConfig};
use sqlpanel_core::panel::Panel;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::runtime::Builder;
use tracing::info;

const LOG_FILE: &str = "sqlpanel.log";

type AppResult = Result<(), Box<dyn Error>>;

fn state_slot(config: &PanelConfig) -> Result<FileSlot, ConfigError> {
    config
        .state_path
        .clone()
        .map(FileSlot::from_path)
        .ok_or(ConfigError::Invalid {
            field: "state_path",
            reason: "must be set",
        })
}

fn run_app(
    config: &PanelConfig,
    headless: impl FnOnce(&PanelConfig, FileSlot) -> AppResult,
    terminal: impl FnOnce(&PanelConfig, FileSlot, &str) -> AppResult,
) -> AppResult {
    config.validate()?;
    let slot = state_slot(config)?;
    match config.host_address.as_deref() {
        Some(address) => terminal(config, slot, address),
        None => headless(config, slot),
    }
}

/// Serves the host over stdin/stdout until stdin closes.
fn run_headless(config: &PanelConfig, slot: FileSlot) -> AppResult {
    logging::init_stderr()?;
    info!(state_path = %slot.path().display(), "starting headless panel");

    let runtime = Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(async {
        let (transport, writer) =
            bridge_json_lines(BufReader::new(tokio::io::stdin()), tokio::io::stdout());
        let mut subscription = transport.subscribe()?;
        let mut panel = Panel::new(transport.sender(), slot, config);
        drive_panel(&mut panel, &mut subscription, DEFAULT_TICK).await;

        drop(panel);
        drop(subscription);
        drop(transport);
        writer.await?;
        info!("host input closed; panel stopped");
        Ok::<(), Box<dyn Error>>(())
    })
}

/// Connects to a host speaking JSON lines over TCP and shows the terminal UI.
fn run_terminal(config: &PanelConfig, slot: FileSlot, address: &str) -> AppResult {
    let log_path = log_path(config)?;
    logging::init_file(&log_path)?;
    info!(address, "connecting to host");

    let runtime = Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()?;
    let stream = runtime.block_on(TcpStream::connect(address))?;
    let (reader, writer) = stream.into_split();
    let transport = {
        let _guard = runtime.enter();
        spawn_json_lines(BufReader::new(reader), writer)
    };

    sqlpanel_tui::run(&transport, slot, config)?;
    info!("terminal panel closed");
    Ok(())
}

fn log_path(config: &PanelConfig) -> Result<PathBuf, ConfigError> {
    match config.state_path.as_deref().and_then(|path| path.parent()) {
        Some(dir) => Ok(dir.join(LOG_FILE)),
        None => Ok(default_config_dir()?.join(LOG_FILE)),
    }
}

fn main() -> AppResult {
    let config = PanelConfig::load_default()?;
    run_app(&config, run_headless, run_terminal)
}
