//! Conversation loop around the dispatcher.
//!
//! A [`Session`] keeps the message history, asks the chat collaborator for a
//! reply on every turn, and hands that reply to the dispatcher. Replies that
//! carry a plan are executed; anything else is returned as conversation.

use std::time::Instant;

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::types::PlanReport;
use crate::dispatch::{ActionDispatcher, DispatchOutcome};
use crate::io::chat::{ChatMessage, ChatModel};
use crate::io::prompt::{load_instructions, render_system_prompt};

/// Ledger name for chat round-trips.
pub const CHAT_METRIC: &str = "llm_chat";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Executed(PlanReport),
    Reply(String),
}

pub struct Session<C: ChatModel> {
    chat: C,
    dispatcher: ActionDispatcher,
    history: Vec<ChatMessage>,
}

impl<C: ChatModel> Session<C> {
    /// Start a session whose system prompt includes the workspace's
    /// `AGENT.md`, if any.
    pub fn new(chat: C, dispatcher: ActionDispatcher) -> Result<Self> {
        let instructions = load_instructions(dispatcher.root());
        let prompt = render_system_prompt(instructions.as_deref())?;
        Ok(Self::with_system_prompt(chat, dispatcher, prompt))
    }

    pub fn with_system_prompt(chat: C, dispatcher: ActionDispatcher, prompt: String) -> Self {
        Self {
            chat,
            dispatcher,
            history: vec![ChatMessage::system(prompt)],
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    pub fn into_dispatcher(self) -> ActionDispatcher {
        self.dispatcher
    }

    /// One user message in, one outcome out. Never panics on chat failure.
    pub fn turn(&mut self, user: &str) -> TurnOutcome {
        self.history.push(ChatMessage::user(user));

        let started = Instant::now();
        let reply = self.chat.chat(&self.history);
        self.dispatcher
            .ledger_mut()
            .record(CHAT_METRIC, started.elapsed(), reply.is_ok());

        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "chat request failed");
                let text = format!("Error: the model request failed: {err:#}");
                self.history.push(ChatMessage::assistant(text.clone()));
                return TurnOutcome::Reply(text);
            }
        };

        match self.dispatcher.handle_reply(&reply) {
            DispatchOutcome::Executed(report) => {
                debug!(actions = report.results.len(), "turn executed a plan");
                self.history.push(ChatMessage::assistant(report.render()));
                TurnOutcome::Executed(report)
            }
            DispatchOutcome::NotAPlan(_) => {
                self.history.push(ChatMessage::assistant(reply.clone()));
                TurnOutcome::Reply(reply)
            }
        }
    }
}
