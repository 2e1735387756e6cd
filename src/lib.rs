pub mod cli;
pub mod client;
pub mod compare;
pub mod config;
pub mod controller;
#[cfg(feature = "desktop")]
pub mod desktop;
pub mod history;
pub mod ledger;
pub mod operations;
pub mod session;

pub use client::{HttpRestoreClient, RestoreError, RestoreRequest, RestoreService, UploadImage};
pub use compare::{CompareBounds, CompareController, DragState};
pub use config::{load_config, save_config, ClientConfig, Preset, PresetValues};
pub use controller::{Intent, Outcome, SessionController};
pub use history::{Artifact, EditHistory};
pub use ledger::{DisplayHandle, ResourceLedger};
pub use operations::{OperationId, OperationPanel, OperationRequest};
pub use session::{Completion, DisplayTarget, PendingRequest, Session, SessionError, SessionView};

/// Installs the process-wide logger.
///
/// Lines look like `[12:04:51 INFO client.rs 88] message`. The level defaults
/// to `info` and can be overridden through `RUST_LOG`.
pub fn init_logger() {
    use std::io::Write;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("hyper_util", log::LevelFilter::Warn)
        .filter_module("reqwest", log::LevelFilter::Warn)
        .format(|buf, record| {
            let style = buf.default_level_style(record.level());
            let ts = chrono::Local::now().format("%H:%M:%S");

            writeln!(
                buf,
                "[{} {style}{}{style:#} {} {}] {}",
                ts,
                record.level(),
                record
                    .file()
                    .unwrap_or("None")
                    .split('/')
                    .next_back()
                    .unwrap_or("None"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .try_init()
        .ok();
}
