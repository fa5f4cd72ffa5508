use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

pub const SETTINGS_KEY: &str = "metering_settings";
pub const LICENSE_KEY: &str = "metering_license";

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// key: ttl-cache -> process-local key/value store with per-entry expiry
#[derive(Default)]
pub struct TtlCache {
    entries: DashMap<String, Entry>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = {
            let entry = self.entries.get(key)?;
            (entry.expires_at > Instant::now()).then(|| entry.value.clone())
        };

        match value {
            Some(value) => serde_json::from_value(value).ok(),
            None => {
                // Re-checked under the shard lock so a concurrent `set` survives.
                self.entries
                    .remove_if(key, |_, entry| entry.expires_at <= Instant::now());
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let Ok(value) = serde_json::to_value(value) else {
            tracing::warn!(%key, "skipping cache write for unserializable value");
            return;
        };
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }
}
