//! Handle tables with generation counters.
//!
//! Each object class the engine tracks lives in one [`Table`]: a dense
//! vector indexed by the id's index half, with the id's epoch half checked
//! on every access. A lookup through a stale or foreign id yields
//! [`InvalidHandle`]; it never panics and never dereferences freed state,
//! which is what lets the engine diagnose use-after-destroy gracefully.

use crate::{id::TypedId, Epoch, Index};
use std::{marker::PhantomData, mem};

/// An entry in a `Storage::map` table.
#[derive(Debug)]
enum Element<T> {
    /// There are no live ids with this index.
    Vacant,

    /// There is one live id with this index, allocated at the given epoch.
    Occupied(T, Epoch),
}

/// Lookup failure: the id's index is unused, or its epoch no longer
/// matches the entry's.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidHandle;

/// Per-table occupancy counts, for session teardown checks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageReport {
    pub num_occupied: usize,
    pub num_vacant: usize,
    pub element_size: usize,
}

#[derive(Debug)]
pub(crate) struct Storage<T, I: TypedId> {
    map: Vec<Element<T>>,
    kind: &'static str,
    _phantom: PhantomData<I>,
}

impl<T, I: TypedId> Storage<T, I> {
    fn new(kind: &'static str) -> Self {
        Self {
            map: Vec::new(),
            kind,
            _phantom: PhantomData,
        }
    }

    pub(crate) fn contains(&self, id: I) -> bool {
        let (index, epoch) = id.unzip();
        match self.map.get(index as usize) {
            Some(&Element::Occupied(_, storage_epoch)) => storage_epoch == epoch,
            Some(&Element::Vacant) | None => false,
        }
    }

    pub(crate) fn get(&self, id: I) -> Result<&T, InvalidHandle> {
        let (index, epoch) = id.unzip();
        match self.map.get(index as usize) {
            Some(&Element::Occupied(ref value, storage_epoch)) if storage_epoch == epoch => {
                Ok(value)
            }
            _ => Err(InvalidHandle),
        }
    }

    pub(crate) fn get_mut(&mut self, id: I) -> Result<&mut T, InvalidHandle> {
        let (index, epoch) = id.unzip();
        match self.map.get_mut(index as usize) {
            Some(&mut Element::Occupied(ref mut value, storage_epoch))
                if storage_epoch == epoch =>
            {
                Ok(value)
            }
            _ => Err(InvalidHandle),
        }
    }

    fn insert(&mut self, id: I, value: T) {
        let (index, epoch) = id.unzip();
        let index = index as usize;
        if index >= self.map.len() {
            self.map.resize_with(index + 1, || Element::Vacant);
        }
        match mem::replace(&mut self.map[index], Element::Occupied(value, epoch)) {
            Element::Vacant => {}
            Element::Occupied(..) => {
                unreachable!("{}[{}] is already occupied", self.kind, index)
            }
        }
    }

    fn remove(&mut self, id: I) -> Result<T, InvalidHandle> {
        let (index, epoch) = id.unzip();
        let slot = match self.map.get_mut(index as usize) {
            Some(slot) => slot,
            None => return Err(InvalidHandle),
        };
        match *slot {
            Element::Occupied(_, storage_epoch) if storage_epoch == epoch => {
                match mem::replace(slot, Element::Vacant) {
                    Element::Occupied(value, _) => Ok(value),
                    Element::Vacant => unreachable!(),
                }
            }
            _ => Err(InvalidHandle),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.map
            .iter()
            .enumerate()
            .filter_map(|(index, element)| match *element {
                Element::Occupied(ref value, storage_epoch) => {
                    Some((I::zip(index as Index, storage_epoch), value))
                }
                Element::Vacant => None,
            })
    }

    fn generate_report(&self) -> StorageReport {
        let mut report = StorageReport {
            element_size: mem::size_of::<T>(),
            ..Default::default()
        };
        for element in self.map.iter() {
            match *element {
                Element::Occupied(..) => report.num_occupied += 1,
                Element::Vacant => report.num_vacant += 1,
            }
        }
        report
    }
}

/// Allocates ids with dense index values and monotonically increasing
/// epochs per index.
#[derive(Debug, Default)]
struct IdentityManager {
    /// Available index values. If empty, then `epochs.len()` is the next
    /// index to allocate.
    free: Vec<Index>,

    /// The next or currently-live epoch value associated with each index.
    epochs: Vec<Epoch>,
}

impl IdentityManager {
    fn alloc<I: TypedId>(&mut self) -> I {
        match self.free.pop() {
            Some(index) => I::zip(index, self.epochs[index as usize]),
            None => {
                let epoch = 1;
                let id = I::zip(self.epochs.len() as Index, epoch);
                self.epochs.push(epoch);
                id
            }
        }
    }

    fn free<I: TypedId>(&mut self, id: I) {
        let (index, epoch) = id.unzip();
        let pe = &mut self.epochs[index as usize];
        debug_assert_eq!(*pe, epoch);
        // If the epoch reaches EOL, the index doesn't go into the free
        // list and will never be reused again.
        if let Some(next) = epoch.checked_add(1) {
            *pe = next;
            self.free.push(index);
        }
    }
}

/// A [`Storage`] paired with the [`IdentityManager`] that mints its ids.
#[derive(Debug)]
pub(crate) struct Table<T, I: TypedId> {
    storage: Storage<T, I>,
    ids: IdentityManager,
}

impl<T, I: TypedId> Table<T, I> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            storage: Storage::new(kind),
            ids: IdentityManager::default(),
        }
    }

    pub(crate) fn insert(&mut self, value: T) -> I {
        let id = self.ids.alloc();
        self.storage.insert(id, value);
        id
    }

    pub(crate) fn remove(&mut self, id: I) -> Result<T, InvalidHandle> {
        let value = self.storage.remove(id)?;
        self.ids.free(id);
        Ok(value)
    }

    pub(crate) fn contains(&self, id: I) -> bool {
        self.storage.contains(id)
    }

    pub(crate) fn get(&self, id: I) -> Result<&T, InvalidHandle> {
        self.storage.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: I) -> Result<&mut T, InvalidHandle> {
        self.storage.get_mut(id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.storage.iter()
    }

    pub(crate) fn generate_report(&self) -> StorageReport {
        self.storage.generate_report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Id;

    type TestId = Id<u32>;

    #[test]
    fn insert_get_remove() {
        let mut table: Table<u32, TestId> = Table::new("test");
        let a = table.insert(10);
        let b = table.insert(20);
        assert_eq!(table.get(a), Ok(&10));
        assert_eq!(table.get(b), Ok(&20));
        assert_eq!(table.remove(a), Ok(10));
        assert_eq!(table.get(a), Err(InvalidHandle));
        assert_eq!(table.get(b), Ok(&20));
    }

    #[test]
    fn stale_epoch_is_detected() {
        let mut table: Table<u32, TestId> = Table::new("test");
        let a = table.insert(10);
        table.remove(a).unwrap();
        // The index is reused with a bumped epoch.
        let b = table.insert(30);
        assert_eq!(a.index(), b.index());
        assert_ne!(a.epoch(), b.epoch());
        assert_eq!(table.get(a), Err(InvalidHandle));
        assert_eq!(table.get(b), Ok(&30));
        // Double free through the stale id is rejected, not a panic.
        assert_eq!(table.remove(a), Err(InvalidHandle));
    }

    #[test]
    fn report_counts_occupancy() {
        let mut table: Table<u32, TestId> = Table::new("test");
        let a = table.insert(1);
        let _b = table.insert(2);
        table.remove(a).unwrap();
        let report = table.generate_report();
        assert_eq!(report.num_occupied, 1);
        assert_eq!(report.num_vacant, 1);
    }
}
