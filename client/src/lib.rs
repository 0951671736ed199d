//! Presence client for the Wanderlight relay.
//!
//! Owns one WebSocket connection per player: announces the player, keeps a
//! local mirror of the other connected players, relays flag pins, and
//! reconnects with bounded exponential backoff when the link drops.

pub mod flags;
pub mod presence;
pub mod reconnect;
