pub mod config;
pub mod controller;
pub mod error;
pub mod form;
pub mod navigation;
pub mod persist;
pub mod render;
pub mod snapshot;
pub mod store;
pub mod terminal;
pub mod validation;

use std::path::Path;
use std::sync::Arc;

use config::{AppConfig, APP_DIR};
use controller::MultiStepFormController;
use error::AppError;
use persist::FileStorage;
use render::{text_renderers, StepRenderer};
use terminal::StdoutSubmitter;
use tracing_appender::non_blocking::WorkerGuard;

/// Application entry point used by the thin `main.rs` wrapper.
///
/// Loads settings, starts logging, restores any saved progress and runs an
/// interactive session on stdin/stdout until `:quit` or end of input.
pub fn run() -> Result<(), AppError> {
    let cfg = config::load()?;

    // The guard must outlive the session or buffered log lines are lost.
    let log_dir = dirs::data_local_dir().unwrap_or_default().join(APP_DIR);
    let _tracing_guard = init_tracing(&log_dir, &cfg);

    tracing::info!(
        storage_key = %cfg.form.storage_key,
        storage_dir = %cfg.storage_dir().display(),
        "sustain-form starting"
    );

    let registry = Arc::new(cfg.registry()?);
    let renderer = StepRenderer::new(&registry, text_renderers())?;
    let storage = Arc::new(FileStorage::new(cfg.storage_dir()));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let mut controller = MultiStepFormController::open(
            registry,
            storage,
            Arc::new(StdoutSubmitter),
            cfg.controller_options(),
        )
        .await;

        let input = tokio::io::BufReader::new(tokio::io::stdin());
        let mut output = std::io::stdout();
        let result = terminal::run_session(&mut controller, &renderer, input, &mut output).await;

        controller.close().await;
        tracing::info!("sustain-form exiting");
        result
    })
}

// ── Tracing setup ─────────────────────────────────────────────────────────────
//
// Logs go to a single file in the OS data dir, since stdout carries the form:
//   Linux    ~/.local/share/sustain-form/sustain-form.log
//   macOS    ~/Library/Application Support/sustain-form/sustain-form.log
//   Windows  %LOCALAPPDATA%\sustain-form\sustain-form.log
//
// RUST_LOG wins over `[logging] level`.
fn init_tracing(log_dir: &Path, cfg: &AppConfig) -> WorkerGuard {
    // rolling::never panics if it cannot open the file, so create the dir first.
    let _ = std::fs::create_dir_all(log_dir);

    let file_appender = tracing_appender::rolling::never(log_dir, "sustain-form.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level)),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    guard
}
