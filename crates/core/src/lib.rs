pub mod config;
pub mod configuration;
pub mod error;
pub mod message;
pub mod paths;
pub mod secret;

pub use config::Config;
pub use configuration::Configuration;
pub use error::{Error, Result};
pub use message::{local_time_parts, MsgType, QuotedMessage, ReceivedMessage};
pub use paths::Paths;
pub use secret::SecretCipher;
