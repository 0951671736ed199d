//! Domain services used by websocket and HTTP routes.
//!
//! Service modules own the roster, investigation, and game-state logic so the
//! websocket handler can stay focused on protocol translation.

pub mod game_state;
pub mod presence;
