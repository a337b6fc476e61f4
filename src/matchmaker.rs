//! Blind pairing: the single waiting slot and the symmetric pair registry
//!
//! Both structures sit behind one lock so a pair is always inserted and
//! removed on both sides within the same critical section. Callers never
//! hold the lock across an await.

use crate::database::BlindProfile;
use crate::transport::UserId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// The other side of a pair, as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partner {
    pub user_id: UserId,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// A compatible waiter was found; both sides are now paired
    Paired { partner: Partner },
    /// Placed in the waiting slot, possibly displacing its previous occupant
    Waiting { displaced: Option<UserId> },
    AlreadyPaired { partner: Partner },
    AlreadyWaiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    Ended { partner: UserId },
    NotInChat,
}

struct Waiting {
    profile: BlindProfile,
    since: Instant,
}

#[derive(Default)]
struct PairingState {
    waiting: Option<Waiting>,
    pairs: HashMap<UserId, Partner>,
}

/// Mutual compatibility, checked in both directions
pub fn compatible(p1: &BlindProfile, p2: &BlindProfile) -> bool {
    p1.gender != p2.gender && accepts(p1, p2) && accepts(p2, p1)
}

/// Whether `seeker`'s preferences admit `other`
fn accepts(seeker: &BlindProfile, other: &BlindProfile) -> bool {
    seeker.pref_gender.accepts(other.gender)
        && (seeker.pref_age_min..=seeker.pref_age_max).contains(&other.age)
}

#[derive(Default)]
pub struct Matchmaker {
    inner: Mutex<PairingState>,
}

impl Matchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair with the current waiter when compatible, otherwise take the slot
    pub fn request_match(&self, profile: &BlindProfile) -> MatchOutcome {
        let user_id = profile.user_id;
        let mut state = self.inner.lock();

        if let Some(partner) = state.pairs.get(&user_id) {
            return MatchOutcome::AlreadyPaired {
                partner: partner.clone(),
            };
        }

        match state.waiting.take() {
            Some(waiter) if waiter.profile.user_id == user_id => {
                state.waiting = Some(waiter);
                MatchOutcome::AlreadyWaiting
            }
            Some(waiter) if compatible(&waiter.profile, profile) => {
                let waiter_id = waiter.profile.user_id;
                state.pairs.insert(
                    waiter_id,
                    Partner {
                        user_id,
                        alias: profile.alias(),
                    },
                );
                let partner = Partner {
                    user_id: waiter_id,
                    alias: waiter.profile.alias(),
                };
                state.pairs.insert(user_id, partner.clone());
                info!(user_id, partner_id = waiter_id, "Blind pair formed");
                MatchOutcome::Paired { partner }
            }
            previous => {
                let displaced = previous.map(|w| w.profile.user_id);
                if let Some(displaced) = displaced {
                    info!(user_id, displaced, "Waiting slot taken over by incompatible requester");
                }
                state.waiting = Some(Waiting {
                    profile: profile.clone(),
                    since: Instant::now(),
                });
                MatchOutcome::Waiting { displaced }
            }
        }
    }

    /// Remove both sides of the user's pair
    pub fn end_chat(&self, user_id: UserId) -> EndOutcome {
        let mut state = self.inner.lock();
        match state.pairs.remove(&user_id) {
            Some(partner) => {
                state.pairs.remove(&partner.user_id);
                debug!(user_id, partner_id = partner.user_id, "Blind pair removed");
                EndOutcome::Ended {
                    partner: partner.user_id,
                }
            }
            None => EndOutcome::NotInChat,
        }
    }

    /// Leave the waiting slot; false when the user was not waiting
    pub fn cancel_search(&self, user_id: UserId) -> bool {
        let mut state = self.inner.lock();
        if state
            .waiting
            .as_ref()
            .is_some_and(|w| w.profile.user_id == user_id)
        {
            state.waiting = None;
            return true;
        }
        false
    }

    pub fn partner_of(&self, user_id: UserId) -> Option<Partner> {
        self.inner.lock().pairs.get(&user_id).cloned()
    }

    pub fn are_paired(&self, a: UserId, b: UserId) -> bool {
        self.inner
            .lock()
            .pairs
            .get(&a)
            .is_some_and(|p| p.user_id == b)
    }

    pub fn is_waiting(&self, user_id: UserId) -> bool {
        self.inner
            .lock()
            .waiting
            .as_ref()
            .is_some_and(|w| w.profile.user_id == user_id)
    }

    /// Clear the waiting slot when its occupant has waited at least `ttl`
    pub fn evict_stale_waiter(&self, ttl: Duration) -> Option<UserId> {
        let mut state = self.inner.lock();
        if state.waiting.as_ref()?.since.elapsed() < ttl {
            return None;
        }
        state.waiting.take().map(|w| w.profile.user_id)
    }

    pub fn pair_count(&self) -> usize {
        self.inner.lock().pairs.len() / 2
    }
}
