//! Lock types that enforce a well-ranked acquisition order.
//!
//! Every mutex guarding session state is assigned a [`LockRank`]: a node in
//! the DAG declared by [`define_lock_ranks!`] below. A rank's `followers`
//! set names the locks a thread may acquire next while still holding it.
//! Because the graph has no cycles, any interleaving of threads that
//! respects it is deadlock-free.
//!
//! The run-time check is compiled in with `--cfg vigil_validate_locks`
//! (for example through `RUSTFLAGS`); otherwise [`Mutex`] is a zero-cost
//! wrapper around [`parking_lot::Mutex`].

use std::ops::{Deref, DerefMut};

/// The rank of a lock: its own bit, plus the bitmask of locks that may be
/// acquired while it is the most recently acquired lock still held.
#[derive(Debug, Copy, Clone)]
pub struct LockRank {
    bit: LockRankSet,
    followers: LockRankSet,
}

/// Define a set of lock ranks, and each rank's permitted successors.
macro_rules! define_lock_ranks {
    {
        $(
            $( #[ $attr:meta ] )*
            rank $name:ident $member:literal followed by { $( $follower:ident ),* $(,)? }
        )*
    } => {
        #[allow(non_camel_case_types)]
        enum LockRankNumber { $( $name, )* }

        bitflags::bitflags! {
            /// A set of lock ranks.
            #[derive(Debug, Copy, Clone, Eq, PartialEq)]
            pub struct LockRankSet: u32 {
                $(
                    const $name = 1 << (LockRankNumber:: $name as u32);
                )*
            }
        }

        impl LockRankSet {
            #[cfg_attr(not(vigil_validate_locks), allow(dead_code))]
            pub fn member_name(self) -> &'static str {
                match self {
                    $(
                        LockRankSet:: $name => $member,
                    )*
                    _ => "<unrecognized LockRankSet bit>",
                }
            }
        }

        $(
            // If there is any cycle in the ranking, the initializers for
            // `followers` become cyclic and rustc reports the cycle.
            $( #[ $attr ] )*
            pub const $name: LockRank = LockRank {
                bit: LockRankSet:: $name,
                followers: LockRankSet::empty() $( .union($follower.bit) )*,
            };
        )*
    }
}

define_lock_ranks! {
    rank COMMAND_BUFFER_TABLE "Session::command_buffers" followed by {
        RESOURCE_TABLE,
        MEMORY_TABLE,
        LAYOUT_TABLE,
    }
    rank RESOURCE_TABLE "Ledger::resources" followed by {
        MEMORY_TABLE,
        LAYOUT_TABLE,
    }
    rank MEMORY_TABLE "Ledger::memories" followed by { LAYOUT_TABLE }
    rank LAYOUT_TABLE "LayoutTracker::images" followed by { }
}

#[cfg(vigil_validate_locks)]
mod observed {
    use super::LockRank;
    use std::{cell::Cell, panic::Location};

    /// Per-thread record of the most recently acquired lock still held.
    #[derive(Copy, Clone)]
    struct LockState {
        last_acquired: Option<(LockRank, &'static Location<'static>)>,
    }

    std::thread_local! {
        static LOCK_STATE: Cell<LockState> = const {
            Cell::new(LockState { last_acquired: None })
        };
    }

    /// The state to restore when the corresponding guard drops.
    pub(super) struct Saved(LockState);

    #[track_caller]
    pub(super) fn acquire(rank: LockRank) -> Saved {
        let location = Location::caller();
        let state = LOCK_STATE.with(Cell::get);
        if let Some((held, held_at)) = state.last_acquired {
            assert!(
                held.followers.contains(rank.bit),
                "lock rank violation: attempting to acquire {} at {} \
                 while holding {} acquired at {}",
                rank.bit.member_name(),
                location,
                held.bit.member_name(),
                held_at,
            );
        }
        LOCK_STATE.with(|cell| {
            cell.set(LockState {
                last_acquired: Some((rank, location)),
            })
        });
        Saved(state)
    }

    pub(super) fn release(saved: Saved) {
        LOCK_STATE.with(|cell| cell.set(saved.0));
    }
}

/// A mutex carrying its rank in the session lock ordering.
pub struct Mutex<T> {
    inner: parking_lot::Mutex<T>,
    rank: LockRank,
}

pub struct MutexGuard<'a, T> {
    inner: parking_lot::MutexGuard<'a, T>,
    #[cfg(vigil_validate_locks)]
    saved: Option<observed::Saved>,
}

impl<T> Mutex<T> {
    pub fn new(rank: LockRank, value: T) -> Self {
        Self {
            inner: parking_lot::Mutex::new(value),
            rank,
        }
    }

    #[cfg_attr(not(vigil_validate_locks), allow(unused_variables))]
    #[track_caller]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        #[cfg(vigil_validate_locks)]
        let saved = Some(observed::acquire(self.rank));
        let _ = self.rank;
        MutexGuard {
            inner: self.inner.lock(),
            #[cfg(vigil_validate_locks)]
            saved,
        }
    }
}

#[cfg(vigil_validate_locks)]
impl<'a, T> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            observed::release(saved);
        }
    }
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}
