//! TinyClaw channels — chat transport adapters and their manager.
//!
//! - **base**: the `Channel` trait, shared inbound path, message chunking
//! - **manager**: lifecycle + the outbound dispatch worker
//! - adapters: telegram (long poll), discord (gateway ws), whatsapp
//!   (bridge ws), feishu / dingtalk / qq (webhook push), camera (TCP
//!   device socket)
//! - **webhook**: the axum receiver feeding the push adapters

pub mod base;
pub mod camera;
pub mod dingtalk;
pub mod discord;
pub mod feishu;
pub mod manager;
pub mod qq;
pub mod telegram;
pub mod webhook;
pub mod whatsapp;

pub use base::{forward_inbound, sender_allowed, split_message, Channel};
pub use manager::ChannelManager;
pub use webhook::WebhookReceiver;
