use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(AccountId);

/// Identity of the list used when no account is involved.
pub const LOCAL_LIST_ID: &str = "local";

/// A quote as handed out by the quote API. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub text: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub length: Option<u32>,
    pub html_formatted: Option<String>,
}

impl Quote {
    pub fn new(text: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            author: Some(author.into()),
            ..Self::default()
        }
    }

    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    pub fn author_or_empty(&self) -> &str {
        self.author.as_deref().unwrap_or_default()
    }

    /// Text handed to share targets such as the clipboard.
    pub fn share_text(&self) -> String {
        share_text(self.text_or_empty(), self.author_or_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedQuote {
    pub id: String,
    pub text: String,
    pub author: String,
    pub image_url: Option<String>,
    pub length: u32,
    pub html_formatted: String,
}

impl SavedQuote {
    /// Keys the saved entry by its text, which keeps synced lists free of duplicates.
    pub fn keyed_by_text(quote: &Quote) -> Self {
        let mut saved = Self::with_id(String::new(), quote);
        saved.id = saved.text.clone();
        saved
    }

    pub fn with_generated_id(quote: &Quote) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), quote)
    }

    fn with_id(id: String, quote: &Quote) -> Self {
        Self {
            id,
            text: quote.text.clone().unwrap_or_default(),
            author: quote.author.clone().unwrap_or_default(),
            image_url: quote.image_url.clone(),
            length: quote.length.unwrap_or_default(),
            html_formatted: quote.html_formatted.clone().unwrap_or_default(),
        }
    }

    pub fn to_quote(&self) -> Quote {
        Quote {
            text: Some(self.text.clone()),
            author: Some(self.author.clone()),
            image_url: self.image_url.clone(),
            length: Some(self.length),
            html_formatted: Some(self.html_formatted.clone()),
        }
    }

    pub fn share_text(&self) -> String {
        share_text(&self.text, &self.author)
    }
}

pub fn share_text(text: &str, author: &str) -> String {
    if author.trim().is_empty() {
        format!("\"{text}\"")
    } else {
        format!("\"{text}\"\n- {author}")
    }
}

/// Saved quotes sorted and grouped by author, in author order.
pub fn group_by_author(quotes: &[SavedQuote]) -> BTreeMap<String, Vec<SavedQuote>> {
    let mut grouped: BTreeMap<String, Vec<SavedQuote>> = BTreeMap::new();
    for quote in quotes {
        grouped
            .entry(quote.author.clone())
            .or_default()
            .push(quote.clone());
    }
    grouped
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    Loading,
    #[default]
    Ready,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub identity: String,
    pub email: Option<String>,
}

impl Session {
    pub fn local() -> Self {
        Self {
            identity: LOCAL_LIST_ID.to_string(),
            email: None,
        }
    }

    pub fn for_account(account_id: AccountId, email: impl Into<String>) -> Self {
        Self {
            identity: format!("account:{}", account_id.0),
            email: Some(email.into()),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}
