//! Typed handles for the objects the engine tracks.
//!
//! A handle packs a table index in its low half and a generation counter
//! (epoch) in its high half. Reusing an index bumps the epoch, so a stale
//! handle held by the application after destruction never matches a live
//! table entry; lookups report the mismatch instead of touching freed state.

use crate::{Epoch, Index};
use std::{cmp::Ordering, fmt, marker::PhantomData};

#[repr(transparent)]
pub struct Id<T>(u64, PhantomData<T>);

impl<T> Id<T> {
    pub fn index(self) -> Index {
        self.0 as Index
    }

    pub fn epoch(self) -> Epoch {
        (self.0 >> 32) as Epoch
    }
}

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        self.unzip().fmt(formatter)
    }
}

impl<T> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

pub trait TypedId: Copy + fmt::Debug {
    fn zip(index: Index, epoch: Epoch) -> Self;
    fn unzip(self) -> (Index, Epoch);
}

impl<T> TypedId for Id<T> {
    fn zip(index: Index, epoch: Epoch) -> Self {
        Id((index as u64) | ((epoch as u64) << 32), PhantomData)
    }

    fn unzip(self) -> (Index, Epoch) {
        (self.index(), self.epoch())
    }
}

pub type ResourceId = Id<crate::resource::Resource>;
pub type MemoryId = Id<crate::resource::MemoryAllocation>;
pub type CommandBufferId = Id<crate::command::CommandBuffer>;

/// The object class a [`RawId`] refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Resource,
    Memory,
    CommandBuffer,
}

/// A type-erased handle, as carried in defect records.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RawId {
    pub kind: HandleKind,
    pub index: Index,
    pub epoch: Epoch,
}

/// Implemented by the object types handles can refer to, so typed ids can
/// be erased into [`RawId`]s for defect subjects.
pub trait HandleMarker {
    const KIND: HandleKind;
}

impl<T: HandleMarker> From<Id<T>> for RawId {
    fn from(id: Id<T>) -> Self {
        let (index, epoch) = id.unzip();
        RawId {
            kind: T::KIND,
            index,
            epoch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_round_trip() {
        let id: Id<()> = Id::zip(173, 29);
        assert_eq!(id.unzip(), (173, 29));
    }
}
