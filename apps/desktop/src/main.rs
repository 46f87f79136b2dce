use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use arboard::Clipboard;
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings_from, SETTINGS_FILE},
    HttpQuoteSource, QuoteController, QuoteStore, RequestOutcome, Settings, SqliteQuoteStore,
    StorageMode,
};
use futures::StreamExt;
use shared::domain::{group_by_author, Credentials, Quote, SavedQuote};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quotes", about = "Fetch random quotes and keep the ones worth saving")]
struct Args {
    /// Settings file; defaults to ./quotes.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    /// `local` or `account`.
    #[arg(long)]
    mode: Option<StorageMode>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch one random quote.
    Random {
        #[arg(long)]
        save: bool,
    },
    /// Print saved quotes grouped by author.
    List,
    /// Save a quote by hand.
    Save {
        text: String,
        #[arg(long)]
        author: Option<String>,
    },
    /// Remove every saved quote with this text.
    Remove { text: String },
    /// Copy a saved quote to the clipboard; the latest one when no text is given.
    Copy { text: Option<String> },
    /// Create an account for account storage mode.
    Register,
}

impl Args {
    fn apply_to(&self, settings: &mut Settings) {
        if let Some(api_url) = &self.api_url {
            settings.api_url = api_url.clone();
        }
        if let Some(database_url) = &self.database_url {
            settings.database_url = client_core::config::normalize_database_url(database_url);
        }
        if let Some(mode) = self.mode {
            settings.storage_mode = mode;
        }
        if let Some(email) = &self.email {
            settings.email = Some(email.clone());
        }
        if let Some(password) = &self.password {
            settings.password = Some(password.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE));
    let mut settings = load_settings_from(&config_path, |key| std::env::var(key).ok())?;
    args.apply_to(&mut settings);

    let store = Arc::new(SqliteQuoteStore::open(&settings.database_url, settings.storage_mode).await?);

    match args.command {
        Command::Random { save } => {
            let quote = fetch_one(&settings, Arc::clone(&store)).await?;
            println!("{}", quote.share_text());
            if save {
                ensure_signed_in(store.as_ref(), &settings).await?;
                store.add(store.saved_entry(&quote)).await?;
                println!("saved");
            }
        }
        Command::List => {
            ensure_signed_in(store.as_ref(), &settings).await?;
            let saved = saved_quotes(store.as_ref()).await?;
            if saved.is_empty() {
                println!("no saved quotes");
            }
            for (author, quotes) in group_by_author(&saved) {
                let author = if author.is_empty() { "Unknown" } else { author.as_str() };
                println!("{author}");
                for quote in quotes {
                    println!("  \"{}\"", quote.text);
                }
            }
        }
        Command::Save { text, author } => {
            ensure_signed_in(store.as_ref(), &settings).await?;
            let quote = Quote::new(text, author.unwrap_or_default());
            store.add(store.saved_entry(&quote)).await?;
            println!("saved");
        }
        Command::Remove { text } => {
            ensure_signed_in(store.as_ref(), &settings).await?;
            let removed = store
                .remove(&|quote: &SavedQuote| quote.text == text)
                .await?;
            if removed == 0 {
                warn!(%text, "no saved quote matched");
            }
            println!("removed {removed}");
        }
        Command::Copy { text } => {
            ensure_signed_in(store.as_ref(), &settings).await?;
            let saved = saved_quotes(store.as_ref()).await?;
            let chosen = match &text {
                Some(text) => saved.iter().find(|quote| &quote.text == text),
                None => saved.last(),
            };
            let Some(chosen) = chosen else {
                bail!("no saved quote to copy");
            };
            let share = chosen.share_text();
            Clipboard::new()
                .and_then(|mut clipboard| clipboard.set_text(share.clone()))
                .context("failed to copy quote to the clipboard")?;
            println!("{share}");
        }
        Command::Register => {
            let credentials = settings
                .credentials()
                .context("registration needs --email and --password")?;
            store.register(&credentials).await?;
            println!("registered {}", credentials.email);
        }
    }

    Ok(())
}

async fn fetch_one(settings: &Settings, store: Arc<SqliteQuoteStore>) -> Result<Quote> {
    let source = HttpQuoteSource::with_timeout(&settings.api_url, settings.request_timeout())?;
    let controller = QuoteController::new(Arc::new(source), store, settings.rate_limit);
    match controller.request_new_quote().await {
        RequestOutcome::Completed => controller
            .snapshot()
            .current_quote
            .context("quote endpoint returned nothing to show"),
        outcome => bail!("failed to fetch a quote from {} ({outcome:?})", settings.api_url),
    }
}

async fn ensure_signed_in(store: &dyn QuoteStore, settings: &Settings) -> Result<()> {
    if store.is_authenticated() {
        return Ok(());
    }
    let credentials: Credentials = settings
        .credentials()
        .context("account mode needs --email and --password")?;
    let session = store.authenticate(&credentials).await?;
    info!(identity = %session.identity, "signed in");
    Ok(())
}

/// First snapshot of the signed-in list.
async fn saved_quotes(store: &dyn QuoteStore) -> Result<Vec<SavedQuote>> {
    store
        .observe()
        .next()
        .await
        .context("saved quotes stream closed before the first snapshot")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands_and_global_flags() {
        let args = Args::try_parse_from([
            "quotes",
            "--mode",
            "account",
            "--email",
            "a@b.c",
            "save",
            "Know thyself",
            "--author",
            "Socrates",
        ])
        .expect("args");
        assert_eq!(args.mode, Some(StorageMode::Account));
        assert!(matches!(
            args.command,
            Command::Save { ref text, author: Some(ref author) } if text == "Know thyself" && author == "Socrates"
        ));
    }

    #[test]
    fn flags_override_loaded_settings() {
        let args = Args::try_parse_from([
            "quotes",
            "--api-url",
            "http://127.0.0.1:1/api",
            "--database-url",
            "./elsewhere.db",
            "--password",
            "pw",
            "list",
        ])
        .expect("args");
        let mut settings = Settings {
            email: Some("file@example.test".into()),
            ..Settings::default()
        };
        args.apply_to(&mut settings);

        assert_eq!(settings.api_url, "http://127.0.0.1:1/api");
        assert_eq!(settings.database_url, "sqlite://./elsewhere.db");
        assert_eq!(
            settings.credentials().map(|c| c.email),
            Some("file@example.test".to_string())
        );
    }

    #[test]
    fn rejects_unknown_storage_mode() {
        assert!(Args::try_parse_from(["quotes", "--mode", "cloud", "list"]).is_err());
    }
}
