//! Supabase Realtime change feed
//!
//! Subscribes to row changes on Postgres tables over the Realtime
//! WebSocket. Callbacks receive a [`ChangeNotice`] naming the table and the
//! kind of change, never the row itself. The connection reconnects on its
//! own with exponential backoff and rejoins every channel, firing a
//! [`ChangeCause::Resync`] notice so receivers can re-read what they missed.

mod channel;
mod client;
mod error;
mod message;

pub use channel::{ChannelBuilder, DatabaseChanges, Subscription};
pub use client::{ConnectionState, RealtimeClient, RealtimeClientOptions};
pub use error::RealtimeError;
pub use message::{ChangeCause, ChangeKind, ChangeNotice, ChannelEvent, EventMask, RealtimeMessage};
