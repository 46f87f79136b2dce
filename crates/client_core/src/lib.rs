pub mod config;
pub mod controller;
pub mod error;
pub mod rate_limit;
pub mod source;
pub mod store;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

pub use config::{load_settings, Settings, SettingsError};
pub use controller::{ControllerState, QuoteController, RequestOutcome};
pub use error::{AuthError, FetchError, StoreError};
pub use rate_limit::{RateLimitConfig, RateLimitStatus, RateLimiter};
pub use source::{HttpQuoteSource, QuoteSource, DEFAULT_QUOTE_URL};
pub use store::{QuoteStore, SqliteQuoteStore, StorageMode};

/// Opens the configured store and quote source and wires them into a controller.
/// Sign-in is left to the caller.
pub async fn connect(settings: &Settings) -> Result<Arc<QuoteController>> {
    let source = HttpQuoteSource::with_timeout(&settings.api_url, settings.request_timeout())
        .context("failed to build quote HTTP client")?;
    let store = SqliteQuoteStore::open(&settings.database_url, settings.storage_mode).await?;
    info!(
        api_url = %settings.api_url,
        database_url = %settings.database_url,
        mode = ?settings.storage_mode,
        "quote controller ready"
    );
    Ok(QuoteController::new(
        Arc::new(source),
        Arc::new(store),
        settings.rate_limit,
    ))
}
