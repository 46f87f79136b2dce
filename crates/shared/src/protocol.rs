//! Wire format of the random-quote endpoint.
//!
//! The endpoint answers with a JSON array of objects using single-letter keys:
//! `q` text, `a` author, `i` image url, `c` character count, `h` HTML rendering.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::domain::Quote;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotePayload {
    #[serde(rename = "q")]
    pub text: Option<String>,
    #[serde(rename = "a")]
    pub author: Option<String>,
    #[serde(rename = "i")]
    pub image_url: Option<String>,
    #[serde(rename = "c", deserialize_with = "lenient_count")]
    pub character_count: Option<u32>,
    #[serde(rename = "h")]
    pub html: Option<String>,
}

impl From<QuotePayload> for Quote {
    fn from(value: QuotePayload) -> Self {
        Self {
            text: value.text,
            author: value.author,
            image_url: value.image_url,
            length: value.character_count,
            html_formatted: value.html,
        }
    }
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("quote response was not a JSON array of quotes: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("quote response contained no quotes")]
    Empty,
}

/// Decodes a response body and keeps only its first quote.
pub fn decode_first_quote(body: &[u8]) -> Result<QuotePayload, PayloadError> {
    let quotes: Vec<QuotePayload> = serde_json::from_slice(body)?;
    quotes.into_iter().next().ok_or(PayloadError::Empty)
}

/// Character counts arrive as numbers or numeric strings; anything else is dropped.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(number)) => {
            number.as_u64().and_then(|n| u32::try_from(n).ok())
        }
        Some(serde_json::Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    })
}
