//! Update routing.
//!
//! Every update passes the operator gate first. Messages are then tried as
//! bot commands, file uploads and finally shell text; callback queries go to
//! the inline-button handler.

mod buttons;
mod commands;
mod shell;
mod upload;

use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use vpsphere_core::{OperatorGate, ShellSessionController};

use crate::telegram::TelegramSink;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

/// Messages removed by `/clear` and the clear button.
pub const CLEAR_DEPTH: i32 = 30;

/// Shared state injected into every handler.
pub struct BotState {
    pub controller: Arc<ShellSessionController>,
    pub sink: Arc<TelegramSink>,
    pub upload_dir_name: String,
}

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Commands:")]
pub enum Command {
    #[command(description = "welcome message")]
    Start,
    #[command(description = "show help and quick actions")]
    Help,
    #[command(description = "how to upload a file")]
    Upload,
    #[command(description = "fetch a file from the working directory")]
    Download(String),
    #[command(description = "delete recent messages")]
    Clear,
}

/// The full handler tree.
pub fn schema() -> UpdateHandler<HandlerError> {
    let messages = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(commands::handle),
        )
        .branch(dptree::filter(|msg: Message| msg.document().is_some()).endpoint(upload::document))
        .branch(
            dptree::filter(|msg: Message| {
                msg.photo().is_some() || msg.video().is_some() || msg.audio().is_some()
            })
            .endpoint(upload::media),
        )
        .branch(
            dptree::filter(|msg: Message| msg.text().is_some_and(|t| !t.starts_with('/')))
                .endpoint(shell::text),
        );

    let callbacks = Update::filter_callback_query().endpoint(buttons::handle);

    dptree::filter(|update: Update, gate: Arc<OperatorGate>| {
        gate.permits(update.from().map(|user| user.id.0))
    })
    .branch(messages)
    .branch(callbacks)
}
