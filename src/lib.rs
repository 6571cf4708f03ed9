pub mod config;
pub mod dead_letter;
pub mod dispatch;
pub mod error;
pub mod retry;

pub mod kafka;

pub use crate::config::Config;
pub use dead_letter::{DeadLetterStore, FailedMessage, NewFailedMessage};
pub use dispatch::{Dispatcher, PublishJob};
pub use error::{Error, Result};
pub use kafka::{PublishOptions, Publisher};
pub use retry::{retry_failed, RetryOutcome, RetryReport};
