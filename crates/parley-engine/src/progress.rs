use sha2::{Digest, Sha256};

use parley_core::turn::TurnProgress;

/// Suppresses progress updates whose content has not changed.
///
/// Compares a SHA-256 fingerprint of the serialized progress rather than
/// keeping a copy of the last payload.
#[derive(Debug, Default)]
pub struct ProgressGate {
    last: Option<[u8; 32]>,
    force_next: bool,
}

impl ProgressGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `admit` passes regardless of content (start of a round).
    pub fn force_next(&mut self) {
        self.force_next = true;
    }

    /// Whether `progress` should be delivered. Records it when it is.
    pub fn admit(&mut self, progress: &TurnProgress) -> bool {
        let fingerprint = fingerprint(progress);
        let force = std::mem::take(&mut self.force_next);
        if !force && fingerprint.is_some() && fingerprint == self.last {
            return false;
        }
        self.last = fingerprint;
        true
    }
}

fn fingerprint(progress: &TurnProgress) -> Option<[u8; 32]> {
    let bytes = serde_json::to_vec(progress).ok()?;
    Some(Sha256::digest(&bytes).into())
}
