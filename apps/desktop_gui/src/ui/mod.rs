//! UI layer for the quotes window.

pub mod app;

pub use app::QuotesApp;
