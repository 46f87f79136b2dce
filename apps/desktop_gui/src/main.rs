use std::path::{Path, PathBuf};

mod backend_bridge;
mod controller;
mod ui;

use clap::Parser;
use client_core::{
    config::{load_settings_from, SETTINGS_FILE},
    Settings, StorageMode,
};
use crossbeam_channel::bounded;
use eframe::egui;
use tracing_subscriber::EnvFilter;

use crate::backend_bridge::{commands::BackendCommand, runtime};
use crate::controller::events::UiEvent;
use crate::ui::QuotesApp;

#[derive(Parser, Debug)]
struct StartupArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory for the saved quotes database; defaults to the per-user data dir.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    mode: Option<StorageMode>,
}

fn resolve_settings(args: &StartupArgs) -> anyhow::Result<Settings> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE));
    let mut settings = load_settings_from(&config_path, |key| std::env::var(key).ok())?;

    if let Some(mode) = args.mode {
        settings.storage_mode = mode;
    }
    if settings.database_url == Settings::default().database_url {
        let data_root = match &args.data_dir {
            Some(dir) => Some(dir.clone()),
            None => dirs::data_local_dir().map(|base| base.join("quotes")),
        };
        if let Some(root) = data_root {
            settings.database_url = database_url_in(&root);
        }
    }
    Ok(settings)
}

fn database_url_in(root: &Path) -> String {
    client_core::config::normalize_database_url(&root.join("quotes.db").to_string_lossy())
}

fn main() -> eframe::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = StartupArgs::parse();
    let settings = match resolve_settings(&args) {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!("failed to load settings: {err:#}");
            std::process::exit(2);
        }
    };

    let (cmd_tx, cmd_rx) = bounded::<BackendCommand>(256);
    let (ui_tx, ui_rx) = bounded::<UiEvent>(2048);
    runtime::launch(settings, cmd_rx, ui_tx);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Quotes")
            .with_inner_size([960.0, 600.0])
            .with_min_inner_size([640.0, 420.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Quotes",
        options,
        Box::new(|_cc| Ok(Box::new(QuotesApp::new(cmd_tx, ui_rx)))),
    )
}
