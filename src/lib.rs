//! Crush Bot Library
//!
//! A Telegram group bot that keeps chats tidy and friendly.
//!
//! This crate provides the core functionality for:
//! - Moderating groups (spam, flood, bad words, links, warnings, mutes, bans)
//! - Answering messages from configurable auto-reply rules
//! - Greeting members who join and leave
//! - Tracking activity statistics, XP ranks and achievement badges
//! - Personal reminders and scheduled announcements
//! - Handling admin and user commands via chat messages
//! - Backing up bot data and cleaning old cache files

pub mod autoreply;
pub mod backup;
pub mod badges;
pub mod bot;
pub mod commands;
pub mod config;
pub mod greeting;
pub mod logging;
pub mod moderation;
pub mod ranks;
pub mod reminders;
pub mod scheduler;
pub mod stats;
pub mod storage;
pub mod telegram;
