//! Friendship State Machine (spec.md §4.G): deterministic transitions over
//! `(myState, theirState) -> ourState`, an auxiliary data model consumed by
//! the Message Dispatcher's control-message path.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FriendState {
    Pending,
    Requested,
    Accepted,
    Rejected,
    Blocked,
    Unblock,
}

/// `FriendshipMetadata` (spec.md §3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FriendshipMetadata {
    pub my_state: FriendState,
    pub their_state: FriendState,
    pub our_state: FriendState,
}

impl FriendshipMetadata {
    pub fn new() -> Self {
        Self {
            my_state: FriendState::Pending,
            their_state: FriendState::Pending,
            our_state: FriendState::Pending,
        }
    }

    pub fn send_friend_request(&mut self) {
        self.my_state = FriendState::Requested;
        self.update_our_state();
    }

    pub fn accept_friend_request(&mut self) {
        self.my_state = FriendState::Accepted;
        self.update_our_state();
    }

    pub fn reject_friend_request(&mut self) {
        self.my_state = FriendState::Rejected;
        self.update_our_state();
    }

    pub fn revoke_friend_request(&mut self) {
        self.my_state = FriendState::Pending;
        self.update_our_state();
    }

    /// Models "I blocked them": blocking is recorded on `theirState`.
    pub fn block_friend(&mut self) {
        self.their_state = FriendState::Blocked;
        self.update_our_state();
    }

    pub fn un_block_friend(&mut self) {
        self.their_state = FriendState::Pending;
        self.update_our_state();
    }

    /// Recompute `ourState` from `(myState, theirState)`, priority order
    /// per spec.md §4.G. Idempotent: applying twice in a row is a no-op
    /// on the second call (§8 "Friendship fixpoint").
    pub fn update_our_state(&mut self) {
        use FriendState::*;
        self.our_state = if self.my_state == Blocked {
            self.our_state
        } else if self.my_state == Accepted && self.their_state == Accepted {
            Accepted
        } else if self.my_state == Requested && self.their_state == Pending {
            Requested
        } else if self.my_state == Rejected || self.their_state == Rejected {
            Rejected
        } else if self.my_state == Pending && self.their_state == Pending {
            Pending
        } else {
            Pending
        };
    }

    /// Swap `myState`/`theirState`, flipping perspective from sender to
    /// receiver on an inbound control message.
    pub fn switch_states(&mut self) {
        std::mem::swap(&mut self.my_state, &mut self.their_state);
    }
}

impl Default for FriendshipMetadata {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_our_state_is_idempotent() {
        let mut state = FriendshipMetadata {
            my_state: FriendState::Requested,
            their_state: FriendState::Pending,
            our_state: FriendState::Pending,
        };
        state.update_our_state();
        let first = state.our_state;
        state.update_our_state();
        assert_eq!(state.our_state, first);
    }

    #[test]
    fn mutual_accept_scenario_from_spec() {
        // Device A sends a friend request.
        let mut a = FriendshipMetadata::new();
        a.send_friend_request();
        assert_eq!(a.my_state, FriendState::Requested);
        assert_eq!(a.our_state, FriendState::Requested);

        // Device B receives it, switches perspective, then accepts.
        let mut b = FriendshipMetadata::new();
        b.their_state = FriendState::Requested;
        b.update_our_state();
        b.switch_states();
        assert_eq!(b.my_state, FriendState::Requested);
        assert_eq!(b.their_state, FriendState::Pending);

        let mut b = FriendshipMetadata {
            my_state: FriendState::Pending,
            their_state: FriendState::Requested,
            our_state: FriendState::Pending,
        };
        b.accept_friend_request();
        assert_eq!(b.my_state, FriendState::Accepted);
        assert_eq!(b.our_state, FriendState::Pending);

        // A receives B's accept; both now land on accepted/accepted.
        a.their_state = FriendState::Accepted;
        a.my_state = FriendState::Accepted;
        a.update_our_state();
        assert_eq!(a.our_state, FriendState::Accepted);
    }

    #[test]
    fn block_friend_records_on_their_state_and_falls_back_to_pending() {
        let mut state = FriendshipMetadata {
            my_state: FriendState::Accepted,
            their_state: FriendState::Accepted,
            our_state: FriendState::Accepted,
        };
        state.block_friend();
        assert_eq!(state.their_state, FriendState::Blocked);
        // None of the named rules match (myState isn't blocked, so rule 1
        // doesn't freeze it either); falls through to the default.
        assert_eq!(state.our_state, FriendState::Pending);
    }

    #[test]
    fn my_state_blocked_freezes_our_state() {
        let mut state = FriendshipMetadata {
            my_state: FriendState::Blocked,
            their_state: FriendState::Pending,
            our_state: FriendState::Accepted,
        };
        state.update_our_state();
        assert_eq!(state.our_state, FriendState::Accepted);
    }
}
