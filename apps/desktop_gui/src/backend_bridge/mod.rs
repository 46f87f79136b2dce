//! Bridge between the egui thread and the backend worker that owns the quote controller.

pub mod commands;
pub mod runtime;
