//! Backend worker thread: owns the tokio runtime and the quote controller.

use std::{sync::Arc, thread, time::Duration};

use client_core::{ControllerState, QuoteController, Settings};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::backend_bridge::commands::BackendCommand;
use crate::controller::events::{UiError, UiErrorContext, UiEvent};

const UI_QUEUE_RETRY: Duration = Duration::from_millis(16);

pub fn launch(settings: Settings, cmd_rx: Receiver<BackendCommand>, ui_tx: Sender<UiEvent>) {
    thread::spawn(move || {
        let _ = ui_tx.try_send(UiEvent::Info("Backend worker starting...".to_string()));
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                let _ = ui_tx.try_send(UiEvent::Error(UiError::from_message(
                    UiErrorContext::BackendStartup,
                    format!("backend worker startup failure: failed to build runtime: {err}"),
                )));
                error!("failed to build backend runtime: {err}");
                return;
            }
        };

        runtime.block_on(async move {
            let controller = match client_core::connect(&settings).await {
                Ok(controller) => controller,
                Err(err) => {
                    let _ = ui_tx.try_send(UiEvent::Error(UiError::from_message(
                        UiErrorContext::BackendStartup,
                        format!("backend worker startup failure: {err:#}"),
                    )));
                    error!("failed to start quote controller: {err:#}");
                    return;
                }
            };

            let forward_task = tokio::spawn(forward_state(controller.subscribe(), ui_tx.clone()));
            let _ = ui_tx.try_send(UiEvent::Info("Backend worker ready".to_string()));

            if controller.is_signed_in() || settings.credentials().is_some() {
                sign_in(&controller, settings.credentials(), &ui_tx).await;
            } else {
                let _ = ui_tx.try_send(UiEvent::SignInRequired);
            }

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    BackendCommand::SignIn { credentials } => {
                        sign_in(&controller, credentials, &ui_tx).await;
                    }
                    BackendCommand::Register { credentials } => {
                        match controller.register(&credentials).await {
                            Ok(()) => {
                                let _ = ui_tx.try_send(UiEvent::Registered {
                                    email: credentials.email.clone(),
                                });
                            }
                            Err(err) => {
                                let _ = ui_tx.try_send(UiEvent::Error(UiError::from_error(
                                    UiErrorContext::Register,
                                    &err,
                                )));
                            }
                        }
                    }
                    BackendCommand::NewQuote => {
                        let controller = Arc::clone(&controller);
                        tokio::spawn(async move {
                            let outcome = controller.request_new_quote().await;
                            info!(?outcome, "new quote request finished");
                        });
                    }
                    BackendCommand::SelectSaved { quote } => controller.select_saved_quote(&quote),
                    BackendCommand::ToggleSaved { quote } => {
                        controller.toggle_saved(&quote);
                    }
                    BackendCommand::RemoveSaved { quote } => {
                        controller.remove_saved(&quote);
                    }
                }
            }

            info!("ui command channel closed; stopping backend worker");
            forward_task.abort();
            controller.shutdown();
        });
    });
}

async fn sign_in(
    controller: &Arc<QuoteController>,
    credentials: Option<shared::domain::Credentials>,
    ui_tx: &Sender<UiEvent>,
) {
    match controller.sign_in(credentials).await {
        Ok(session) => {
            let _ = ui_tx.try_send(UiEvent::SignedIn(session));
        }
        Err(err) => {
            let _ = ui_tx.try_send(UiEvent::Error(UiError::from_error(
                UiErrorContext::SignIn,
                &err,
            )));
        }
    }
}

/// Pushes every controller snapshot to the UI. When the queue is full the
/// latest snapshot is retried shortly, so the window never keeps a stale one.
async fn forward_state(mut updates: watch::Receiver<ControllerState>, ui_tx: Sender<UiEvent>) {
    loop {
        let snapshot = updates.borrow_and_update().clone();
        match ui_tx.try_send(UiEvent::State(Box::new(snapshot))) {
            Ok(()) => {}
            Err(TrySendError::Disconnected(_)) => break,
            Err(TrySendError::Full(_)) => {
                debug!("ui event queue full; retrying state snapshot");
                tokio::time::sleep(UI_QUEUE_RETRY).await;
                continue;
            }
        }
        if updates.changed().await.is_err() {
            break;
        }
    }
}
