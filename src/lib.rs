//! Relay between a shopping-assistant browser client and a live conversational
//! AI runtime.
//!
//! Browser audio, text and images flow upstream through a [`relay`]; runtime
//! events flow back, with every `update_ui` intent the [`extractor`] finds
//! forwarded ahead of the event as a normalized `toolCalls` message.

pub mod config;
pub mod error;
pub mod extractor;
pub mod prompts;
pub mod protocol;
pub mod pyexpr;
pub mod relay;
pub mod session;
pub mod tools;
pub mod upstream;

pub use error::{RelayError, Result};
pub use extractor::{CommandExtractor, Extraction, UiCommand};
