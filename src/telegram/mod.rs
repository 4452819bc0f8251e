//! Telegram client wrapper module.
//!
//! Connects as a bot, turns raw updates into [`InboundEvent`]s and carries
//! out chat actions through the [`ChatGateway`] trait.

mod bounded;
mod client;
mod events;
mod gateway;
mod rate_limiter;

pub use bounded::BoundedMap;
pub use client::{TelegramBot, TelegramError};
pub use events::{ChatInfo, ChatKind, InboundEvent, IncomingMessage, Member, MessageKind};
pub use gateway::ChatGateway;
pub use rate_limiter::RateLimiter;
