//! Delayed withdrawal requests.
//!
//! ```text
//! Requested --(now >= request_time + delay)--> Claimable --claim--> Claimed
//! ```
//!
//! `Claimable` is never stored; it is derived from the clock whenever a
//! request is read. Requests are append-only and ids are their index, so a
//! request is never deleted and never renumbered.

use std::collections::HashMap;

use alloy_primitives::Address;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::VaultError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub id: u64,
    /// Account whose shares were locked.
    pub owner: Address,
    pub receiver: Address,
    pub shares: u128,
    /// Quote at request time. Informational only.
    pub assets_at_request_time: u128,
    pub request_time: DateTime<Utc>,
    pub claimed: bool,
}

impl WithdrawRequest {
    pub fn claimable_at(&self, delay: Duration) -> DateTime<Utc> {
        self.request_time + delay
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Requested,
    Claimable,
    Claimed,
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Requested => write!(f, "Requested"),
            RequestStatus::Claimable => write!(f, "Claimable"),
            RequestStatus::Claimed => write!(f, "Claimed"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WithdrawalQueue {
    requests: Vec<WithdrawRequest>,
    by_owner: HashMap<Address, Vec<u64>>,
}

impl WithdrawalQueue {
    /// Appends a request and returns its id.
    pub fn enqueue(
        &mut self,
        owner: Address,
        receiver: Address,
        shares: u128,
        assets_at_request_time: u128,
        now: DateTime<Utc>,
    ) -> u64 {
        let id = self.requests.len() as u64;
        self.requests.push(WithdrawRequest {
            id,
            owner,
            receiver,
            shares,
            assets_at_request_time,
            request_time: now,
            claimed: false,
        });
        self.by_owner.entry(owner).or_default().push(id);
        id
    }

    pub fn get(&self, id: u64) -> Option<&WithdrawRequest> {
        usize::try_from(id).ok().and_then(|i| self.requests.get(i))
    }

    pub fn status(&self, id: u64, now: DateTime<Utc>, delay: Duration) -> Option<RequestStatus> {
        self.get(id).map(|r| {
            if r.claimed {
                RequestStatus::Claimed
            } else if now >= r.claimable_at(delay) {
                RequestStatus::Claimable
            } else {
                RequestStatus::Requested
            }
        })
    }

    /// Checks every claim guard for `caller` without mutating anything.
    pub fn check_claim(
        &self,
        id: u64,
        caller: &Address,
        now: DateTime<Utc>,
        delay: Duration,
    ) -> Result<&WithdrawRequest, VaultError> {
        let request = self.get(id).ok_or(VaultError::RequestNotFound(id))?;
        if request.claimed {
            return Err(VaultError::AlreadyClaimed(id));
        }
        if *caller != request.owner && *caller != request.receiver {
            return Err(VaultError::NotRequestParty {
                request_id: id,
                caller: *caller,
            });
        }
        let claimable_at = request.claimable_at(delay);
        if now < claimable_at {
            return Err(VaultError::ClaimTooEarly {
                request_id: id,
                claimable_at,
            });
        }
        Ok(request)
    }

    pub fn mark_claimed(&mut self, id: u64) -> Result<(), VaultError> {
        let request = usize::try_from(id)
            .ok()
            .and_then(|i| self.requests.get_mut(i))
            .ok_or(VaultError::RequestNotFound(id))?;
        if request.claimed {
            return Err(VaultError::AlreadyClaimed(id));
        }
        request.claimed = true;
        Ok(())
    }

    /// Unclaimed requests made by `owner`, oldest first.
    pub fn pending_for(&self, owner: &Address) -> Vec<&WithdrawRequest> {
        self.by_owner
            .get(owner)
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(*id))
            .filter(|r| !r.claimed)
            .collect()
    }

    /// Shares `owner` has in custody.
    pub fn locked_shares_of(&self, owner: &Address) -> u128 {
        self.pending_for(owner).iter().map(|r| r.shares).sum()
    }

    /// Shares in custody across all owners.
    pub fn total_pending_shares(&self) -> u128 {
        self.requests.iter().filter(|r| !r.claimed).map(|r| r.shares).sum()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn alice() -> Address {
        Address::repeat_byte(0xA1)
    }

    fn bob() -> Address {
        Address::repeat_byte(0xB0)
    }

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().unwrap()
    }

    fn day() -> Duration {
        Duration::days(1)
    }

    #[test]
    fn status_follows_the_clock() {
        let mut queue = WithdrawalQueue::default();
        let id = queue.enqueue(alice(), bob(), 10, 10, t0());
        assert_eq!(queue.status(id, t0(), day()), Some(RequestStatus::Requested));
        assert_eq!(
            queue.status(id, t0() + day(), day()),
            Some(RequestStatus::Claimable)
        );
        queue.mark_claimed(id).unwrap();
        assert_eq!(queue.status(id, t0(), day()), Some(RequestStatus::Claimed));
        assert_eq!(queue.status(99, t0(), day()), None);
    }

    #[test]
    fn claim_guards_are_distinct() {
        let mut queue = WithdrawalQueue::default();
        let id = queue.enqueue(alice(), bob(), 10, 10, t0());

        assert_eq!(
            queue.check_claim(7, &alice(), t0() + day(), day()).unwrap_err(),
            VaultError::RequestNotFound(7)
        );
        assert!(matches!(
            queue.check_claim(id, &alice(), t0(), day()),
            Err(VaultError::ClaimTooEarly { .. })
        ));
        let stranger = Address::repeat_byte(0x55);
        assert!(matches!(
            queue.check_claim(id, &stranger, t0() + day(), day()),
            Err(VaultError::NotRequestParty { .. })
        ));
        // receiver may claim as well as owner
        assert!(queue.check_claim(id, &bob(), t0() + day(), day()).is_ok());

        queue.mark_claimed(id).unwrap();
        assert_eq!(
            queue.check_claim(id, &alice(), t0() + day(), day()).unwrap_err(),
            VaultError::AlreadyClaimed(id)
        );
        assert_eq!(queue.mark_claimed(id), Err(VaultError::AlreadyClaimed(id)));
    }

    #[test]
    fn pending_requests_are_tracked_per_owner() {
        let mut queue = WithdrawalQueue::default();
        let a = queue.enqueue(alice(), alice(), 10, 10, t0());
        queue.enqueue(alice(), bob(), 5, 5, t0());
        queue.enqueue(bob(), bob(), 7, 7, t0());

        assert_eq!(queue.locked_shares_of(&alice()), 15);
        queue.mark_claimed(a).unwrap();
        assert_eq!(queue.locked_shares_of(&alice()), 5);
        assert_eq!(queue.pending_for(&alice()).len(), 1);
        assert_eq!(queue.total_pending_shares(), 12);
        assert_eq!(queue.len(), 3);
    }
}
