//! Client-side flag pin ledger.
//!
//! Flags are never stored server-side; every client keeps the pins it has
//! seen, keyed by a composite id derived from the pin itself. When a peer
//! asks for flags, the ledger rebuilds one `flag_update` per pin.

use std::collections::HashMap;

use messages::{FlagData, Message};

/// Composite pin id: coordinates to six decimals plus placement timestamp.
#[must_use]
pub fn pin_id(lat: f64, lng: f64, timestamp: i64) -> String {
    format!("{lat:.6}_{lng:.6}_{timestamp}")
}

#[derive(Debug, Default)]
pub struct FlagLedger {
    pins: HashMap<String, FlagData>,
}

impl FlagLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an inbound flag update. Last write wins on id collision.
    pub fn apply(&mut self, flag_id: &str, flag: FlagData) {
        self.pins.insert(flag_id.to_owned(), flag);
    }

    /// Record a locally placed pin and return its derived id.
    pub fn place(&mut self, flag: FlagData) -> String {
        let id = pin_id(flag.lat, flag.lng, flag.timestamp);
        self.pins.insert(id.clone(), flag);
        id
    }

    /// Answer a `request_flags` broadcast: one `flag_update` per known pin.
    /// Pins without an owner are stamped with `fallback_owner`.
    #[must_use]
    pub fn rebroadcast(&self, fallback_owner: &str) -> Vec<Message> {
        self.pins
            .iter()
            .map(|(flag_id, pin)| {
                let mut flag_data = pin.clone();
                if flag_data.owner_id.is_empty() {
                    flag_data.owner_id = fallback_owner.to_owned();
                }
                Message::FlagUpdate { flag_id: flag_id.clone(), flag_data }
            })
            .collect()
    }

    #[must_use]
    pub fn get(&self, flag_id: &str) -> Option<&FlagData> {
        self.pins.get(flag_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

#[cfg(test)]
#[path = "flags_test.rs"]
mod tests;
