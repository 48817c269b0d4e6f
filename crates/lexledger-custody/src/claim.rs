// In-flight seal claims.
//
// SAFETY INVARIANTS:
// 1. At most one claim per evidence item exists at any time
// 2. A claim is released when its guard drops, on every exit path
// 3. The phase of a claim only moves forward

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lexledger_core::EvidenceId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Phase of a running seal operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealPhase {
    Confirming,
    AwaitingSigner,
    Broadcasting,
    Committing,
}

impl fmt::Display for SealPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SealPhase::Confirming => "confirming",
            SealPhase::AwaitingSigner => "awaiting_signer",
            SealPhase::Broadcasting => "broadcasting",
            SealPhase::Committing => "committing",
        };
        f.write_str(name)
    }
}

#[derive(Default, Clone)]
pub(crate) struct SealClaims {
    inner: Arc<DashMap<EvidenceId, SealPhase>>,
}

impl SealClaims {
    /// Claim `id` for sealing. `None` if another seal holds it.
    pub(crate) fn try_claim(&self, id: &EvidenceId) -> Option<ClaimGuard> {
        match self.inner.entry(id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                entry.insert(SealPhase::Confirming);
                Some(ClaimGuard {
                    claims: self.inner.clone(),
                    id: id.clone(),
                })
            }
        }
    }

    pub(crate) fn phase_of(&self, id: &EvidenceId) -> Option<SealPhase> {
        self.inner.get(id).map(|phase| *phase)
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.inner.len()
    }
}

pub(crate) struct ClaimGuard {
    claims: Arc<DashMap<EvidenceId, SealPhase>>,
    id: EvidenceId,
}

impl ClaimGuard {
    pub(crate) fn advance(&self, phase: SealPhase) {
        if let Some(mut current) = self.claims.get_mut(&self.id) {
            if phase > *current {
                *current = phase;
            }
        }
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.claims.remove(&self.id);
    }
}
