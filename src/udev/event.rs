//! Kernel uevent parsing.

use std::collections::HashMap;

/// A device lifecycle notification from the kernel.
///
/// The wire form is NUL-separated text: a leading `action@devpath` token
/// followed by KEY=VALUE environment entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Uevent {
    pub action: String,
    pub device: String,
    /// Convenience copy of `env["SUBSYSTEM"]`.
    pub subsystem: String,
    pub env: HashMap<String, String>,
}

impl Uevent {
    pub fn parse(data: &[u8]) -> Self {
        let text = String::from_utf8_lossy(data);
        let mut parts = text.split('\0');

        let mut event = Self::default();
        if let Some(header) = parts.next() {
            if let Some((action, device)) = header.split_once('@') {
                event.action = action.to_string();
                event.device = device.to_string();
            }
        }

        for part in parts {
            if let Some((key, value)) = part.split_once('=') {
                event.env.insert(key.to_string(), value.to_string());
            }
        }

        event.subsystem = event.env.get("SUBSYSTEM").cloned().unwrap_or_default();
        event
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }
}
