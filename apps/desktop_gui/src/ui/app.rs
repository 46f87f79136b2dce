use arboard::Clipboard;
use chrono::{DateTime, Local, Utc};
use client_core::ControllerState;
use crossbeam_channel::{Receiver, Sender};
use eframe::egui;
use shared::domain::{Credentials, NetworkStatus, Quote, SavedQuote};

use crate::backend_bridge::commands::BackendCommand;
use crate::controller::{
    events::{UiError, UiErrorCategory, UiEvent},
    orchestration::dispatch_backend_command,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppViewState {
    Starting,
    SignIn,
    Main,
}

#[derive(Debug, Default)]
struct LoginUiState {
    email: String,
    password: String,
}

impl LoginUiState {
    fn credentials(&self) -> Option<Credentials> {
        let email = self.email.trim();
        if email.is_empty() || self.password.is_empty() {
            return None;
        }
        Some(Credentials::new(email, self.password.clone()))
    }
}

pub struct QuotesApp {
    cmd_tx: Sender<BackendCommand>,
    ui_rx: Receiver<UiEvent>,
    view_state: AppViewState,
    login_ui: LoginUiState,
    state: ControllerState,
    status: String,
    status_banner: Option<UiError>,
}

impl QuotesApp {
    pub fn new(cmd_tx: Sender<BackendCommand>, ui_rx: Receiver<UiEvent>) -> Self {
        Self {
            cmd_tx,
            ui_rx,
            view_state: AppViewState::Starting,
            login_ui: LoginUiState::default(),
            state: ControllerState {
                network_status: NetworkStatus::Ready,
                current_quote: None,
                saved_quotes: Vec::new(),
                requests_remaining: 0,
                next_quote_allowed_at: None,
                new_quote_available: false,
                session: None,
            },
            status: "Starting...".to_string(),
            status_banner: None,
        }
    }

    fn process_ui_events(&mut self) {
        while let Ok(event) = self.ui_rx.try_recv() {
            match event {
                UiEvent::Info(message) => self.status = message,
                UiEvent::SignInRequired => {
                    self.view_state = AppViewState::SignIn;
                    self.status = "Sign in to load your saved quotes".to_string();
                }
                UiEvent::SignedIn(session) => {
                    self.view_state = AppViewState::Main;
                    self.status_banner = None;
                    self.login_ui.password.clear();
                    self.status = match session.email {
                        Some(email) => format!("Signed in as {email}"),
                        None => "Using saved quotes on this device".to_string(),
                    };
                }
                UiEvent::Registered { email } => {
                    self.status = format!("Account created for {email}; sign in to continue");
                }
                UiEvent::State(state) => self.state = *state,
                UiEvent::Error(err) => {
                    if err.requires_reauth() && self.view_state != AppViewState::Main {
                        self.view_state = AppViewState::SignIn;
                    }
                    self.status = err.message().to_string();
                    self.status_banner = Some(err);
                }
            }
        }
    }

    fn send(&mut self, cmd: BackendCommand) {
        dispatch_backend_command(&self.cmd_tx, cmd, &mut self.status);
    }

    fn show_status_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if let Some(banner) = &self.status_banner {
                    ui.colored_label(
                        egui::Color32::from_rgb(220, 80, 80),
                        format!("{} error:", err_label(banner.category())),
                    );
                }
                ui.label(self.status.as_str());
            });
        });
    }

    fn show_sign_in_screen(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(80.0);
                ui.heading("Quotes");
                ui.add_space(16.0);
                ui.label("Email");
                ui.text_edit_singleline(&mut self.login_ui.email);
                ui.label("Password");
                ui.add(egui::TextEdit::singleline(&mut self.login_ui.password).password(true));
                ui.add_space(8.0);

                let credentials = self.login_ui.credentials();
                ui.horizontal(|ui| {
                    if ui
                        .add_enabled(credentials.is_some(), egui::Button::new("Sign in"))
                        .clicked()
                    {
                        self.status = "Signing in...".to_string();
                        self.send(BackendCommand::SignIn {
                            credentials: credentials.clone(),
                        });
                    }
                    if ui
                        .add_enabled(credentials.is_some(), egui::Button::new("Register"))
                        .clicked()
                    {
                        if let Some(credentials) = credentials.clone() {
                            self.send(BackendCommand::Register { credentials });
                        }
                    }
                });
            });
        });
    }

    fn show_saved_panel(&mut self, ctx: &egui::Context) {
        let mut selected: Option<SavedQuote> = None;
        let mut removed: Option<SavedQuote> = None;

        egui::SidePanel::right("saved_quotes")
            .default_width(300.0)
            .show(ctx, |ui| {
                ui.heading("Saved quotes");
                ui.separator();
                if self.state.saved_quotes.is_empty() {
                    ui.weak("Nothing saved yet");
                }
                egui::ScrollArea::vertical().show(ui, |ui| {
                    for (author, quotes) in self.state.grouped_saved_quotes() {
                        let heading = if author.is_empty() { "Unknown" } else { author.as_str() };
                        ui.collapsing(heading, |ui| {
                            for quote in quotes {
                                ui.horizontal(|ui| {
                                    if ui.small_button("x").on_hover_text("Remove").clicked() {
                                        removed = Some(quote.clone());
                                    }
                                    let label = egui::Label::new(preview(&quote.text, 60))
                                        .sense(egui::Sense::click());
                                    if ui.add(label).on_hover_text(quote.text.as_str()).clicked() {
                                        selected = Some(quote.clone());
                                    }
                                });
                            }
                        });
                    }
                });
            });

        if let Some(quote) = selected {
            self.send(BackendCommand::SelectSaved { quote });
        }
        if let Some(quote) = removed {
            self.send(BackendCommand::RemoveSaved { quote });
        }
    }

    fn show_quote_screen(&mut self, ctx: &egui::Context) {
        self.show_saved_panel(ctx);

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_space(24.0);
            match (&self.state.current_quote, self.state.network_status) {
                (None, NetworkStatus::Loading) => {
                    ui.spinner();
                }
                (None, _) => {
                    ui.weak("No quote yet");
                }
                (Some(quote), _) => {
                    ui.label(
                        egui::RichText::new(format!("\"{}\"", quote.text_or_empty()))
                            .size(24.0)
                            .italics(),
                    );
                    ui.add_space(8.0);
                    ui.label(egui::RichText::new(format!("- {}", quote.author_or_empty())).size(16.0));
                }
            }
            if self.state.network_status == NetworkStatus::Error {
                ui.colored_label(
                    egui::Color32::from_rgb(220, 80, 80),
                    "Could not load a new quote. Try again.",
                );
            }

            ui.add_space(24.0);
            let current = self.state.current_quote.clone();
            let can_request = self.state.new_quote_available
                && self.state.network_status != NetworkStatus::Loading;
            ui.horizontal(|ui| {
                if ui
                    .add_enabled(can_request, egui::Button::new("New quote"))
                    .clicked()
                {
                    self.send(BackendCommand::NewQuote);
                }
                if let Some(quote) = &current {
                    if ui
                        .button(save_button_label(self.state.is_current_quote_saved()))
                        .clicked()
                    {
                        self.send(BackendCommand::ToggleSaved {
                            quote: quote.clone(),
                        });
                    }
                    if ui.button("Copy").clicked() {
                        self.copy_to_clipboard(quote);
                    }
                }
            });
            ui.weak(rate_limit_label(&self.state, Utc::now()));
        });
    }

    fn copy_to_clipboard(&mut self, quote: &Quote) {
        match Clipboard::new().and_then(|mut clipboard| clipboard.set_text(quote.share_text())) {
            Ok(()) => self.status = "Quote copied to clipboard".to_string(),
            Err(err) => {
                tracing::warn!("failed to copy quote: {err}");
                self.status = format!("Could not copy quote: {err}");
            }
        }
    }
}

fn err_label(category: UiErrorCategory) -> &'static str {
    match category {
        UiErrorCategory::Auth => "Authentication",
        UiErrorCategory::Transport => "Network",
        UiErrorCategory::Validation => "Validation",
        UiErrorCategory::Unknown => "Unexpected",
    }
}

fn save_button_label(is_saved: bool) -> &'static str {
    if is_saved {
        "Unsave"
    } else {
        "Save"
    }
}

fn rate_limit_label(state: &ControllerState, now: DateTime<Utc>) -> String {
    if state.new_quote_available {
        return format!("{} new quotes left before a pause", state.requests_remaining);
    }
    match state.next_quote_allowed_at {
        Some(at) if at > now => {
            let wait = (at - now).num_seconds().max(1);
            format!(
                "New quotes paused until {} ({wait}s)",
                at.with_timezone(&Local).format("%H:%M:%S")
            )
        }
        _ => "New quotes paused for a moment".to_string(),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}

impl eframe::App for QuotesApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.process_ui_events();
        self.show_status_bar(ctx);

        match self.view_state {
            AppViewState::Starting => {
                egui::CentralPanel::default().show(ctx, |ui| {
                    ui.centered_and_justified(|ui| {
                        ui.spinner();
                    });
                });
            }
            AppViewState::SignIn => self.show_sign_in_screen(ctx),
            AppViewState::Main => self.show_quote_screen(ctx),
        }

        if self.state.network_status == NetworkStatus::Loading || !self.state.new_quote_available {
            ctx.request_repaint_after(std::time::Duration::from_millis(250));
        } else {
            ctx.request_repaint_after(std::time::Duration::from_millis(500));
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn state() -> ControllerState {
        ControllerState {
            network_status: NetworkStatus::Ready,
            current_quote: None,
            saved_quotes: Vec::new(),
            requests_remaining: 3,
            next_quote_allowed_at: None,
            new_quote_available: true,
            session: None,
        }
    }

    #[test]
    fn rate_limit_label_counts_remaining_requests() {
        assert_eq!(
            rate_limit_label(&state(), Utc::now()),
            "3 new quotes left before a pause"
        );
    }

    #[test]
    fn rate_limit_label_shows_wait_while_paused() {
        let now = Utc::now();
        let paused = ControllerState {
            new_quote_available: false,
            requests_remaining: 0,
            next_quote_allowed_at: Some(now + Duration::seconds(12)),
            ..state()
        };
        assert!(rate_limit_label(&paused, now).ends_with("(12s)"));

        let overdue = ControllerState {
            next_quote_allowed_at: Some(now - Duration::seconds(1)),
            ..paused
        };
        assert_eq!(rate_limit_label(&overdue, now), "New quotes paused for a moment");
    }

    #[test]
    fn previews_long_quotes_on_char_boundaries() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("ééééééééééé", 6), "ééé...");
    }

    #[test]
    fn login_requires_both_fields() {
        let mut login = LoginUiState {
            email: "  ".into(),
            password: "pw".into(),
        };
        assert!(login.credentials().is_none());
        login.email = " reader@example.test ".into();
        let credentials = login.credentials().expect("credentials");
        assert_eq!(credentials.email, "reader@example.test");
        assert_eq!(save_button_label(true), "Unsave");
    }
}
