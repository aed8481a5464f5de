//! Data-consistency and query layer of the ZenList task tracker.
//!
//! [`TrackerService`] is the caller-facing surface: it validates inputs,
//! resolves the single owner, runs storage work on the [`Database`] worker and
//! reports failures as [`ServiceError`]s.

pub mod config;
pub mod db;
pub mod error;
pub mod service;

pub use config::ServiceConfig;
pub use db::{Database, QueryTimeout};
pub use error::{classify, ClientError, ErrorCode, ServiceError};
pub use service::{
    inputs::*,
    pagination::{Connection, Edge, Page, PageInfo},
    TrackerService,
};

use log::info;

/// Installs `env_logger`, honouring `RUST_LOG` and defaulting to `info`.
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Opens the configured database, resolves the default owner and prints it.
pub async fn run() -> anyhow::Result<()> {
    init_logging();
    info!("ZenList core starting up...");

    let config = ServiceConfig::from_env();
    config.validate()?;

    let database = Database::new(config.database_path.clone(), config.query_timeout())?;
    let service = TrackerService::new(database, config.default_owner());

    service.bootstrap().await?;
    let owner = service.me().await?;
    println!("{}", serde_json::to_string_pretty(&owner)?);

    Ok(())
}
