//! Detection of the sudo password prompt in streamed command output.
//!
//! The watcher is fed every chunk the channel delivers and reports the
//! first sighting of the marker exactly once. Only the new bytes plus a
//! short carry-over from the previous chunk are scanned, so a marker split
//! across two reads is still found.

/// Printed by sudo when it wants a password
pub const SUDO_PROMPT_MARKER: &str = "[sudo] password for ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchState {
    Armed,
    Fired,
    Disarmed,
}

#[derive(Debug)]
pub struct PromptWatcher {
    marker: Vec<u8>,
    carry: Vec<u8>,
    state: WatchState,
}

impl PromptWatcher {
    pub fn new(marker: &str) -> Self {
        let state = if marker.is_empty() {
            WatchState::Disarmed
        } else {
            WatchState::Armed
        };
        Self {
            marker: marker.as_bytes().to_vec(),
            carry: Vec::new(),
            state,
        }
    }

    /// A watcher that never fires (no credential to offer)
    pub fn disarmed() -> Self {
        Self {
            marker: Vec::new(),
            carry: Vec::new(),
            state: WatchState::Disarmed,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.state == WatchState::Armed
    }

    /// Feed newly received bytes. Returns `true` only on the first sighting.
    pub fn observe(&mut self, chunk: &[u8]) -> bool {
        if self.state != WatchState::Armed || chunk.is_empty() {
            return false;
        }

        let mut window = std::mem::take(&mut self.carry);
        window.extend_from_slice(chunk);

        if contains(&window, &self.marker) {
            self.state = WatchState::Fired;
            return true;
        }

        let keep = self.marker.len().saturating_sub(1).min(window.len());
        self.carry = window.split_off(window.len() - keep);
        false
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack.windows(needle.len()).any(|w| w == needle)
}
