//! Backend commands queued from UI to backend worker.

use shared::domain::{Credentials, Quote, SavedQuote};

pub enum BackendCommand {
    SignIn { credentials: Option<Credentials> },
    Register { credentials: Credentials },
    NewQuote,
    SelectSaved { quote: SavedQuote },
    ToggleSaved { quote: Quote },
    RemoveSaved { quote: SavedQuote },
}

impl BackendCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SignIn { .. } => "sign_in",
            Self::Register { .. } => "register",
            Self::NewQuote => "new_quote",
            Self::SelectSaved { .. } => "select_saved",
            Self::ToggleSaved { .. } => "toggle_saved",
            Self::RemoveSaved { .. } => "remove_saved",
        }
    }
}
