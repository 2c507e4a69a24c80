//! Free list and user list
//!
//! Both lists are persisted as the content of a chunk chain: one width byte
//! followed by fixed-width entries. Free-list slots may be empty
//! (tombstones), written as the zero pointer.

use crate::chunk::{width_for_extent, ChunkPointer};
use crate::codec::{EnumUniverse, NumberSize};
use crate::error::{Error, Result};
use std::io::Cursor;

/// Most tombstones kept after reconciliation
pub const MAX_TOMBSTONES: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeList {
    slots: Vec<Option<ChunkPointer>>,
}

impl FreeList {
    /// Create an empty free list
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a list from persisted slots
    pub fn from_slots(slots: Vec<Option<ChunkPointer>>) -> Self {
        Self { slots }
    }

    /// All slots, tombstones included
    pub fn slots(&self) -> &[Option<ChunkPointer>] {
        &self.slots
    }

    /// Live entries
    pub fn pointers(&self) -> impl Iterator<Item = ChunkPointer> + '_ {
        self.slots.iter().flatten().copied()
    }

    /// Live entries with their slot index
    pub fn entries(&self) -> Vec<(usize, ChunkPointer)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.map(|p| (slot, p)))
            .collect()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.pointers().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of empty slots
    pub fn tombstones(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    /// Check whether `pointer` is listed
    pub fn contains(&self, pointer: ChunkPointer) -> bool {
        self.slot_of(pointer).is_some()
    }

    /// Slot holding `pointer`
    pub fn slot_of(&self, pointer: ChunkPointer) -> Option<usize> {
        self.slots.iter().position(|s| *s == Some(pointer))
    }

    /// Record `pointer`, filling the first tombstone if there is one
    pub fn add(&mut self, pointer: ChunkPointer) {
        match self.slots.iter_mut().find(|s| s.is_none()) {
            Some(slot) => *slot = Some(pointer),
            None => self.slots.push(Some(pointer)),
        }
    }

    /// Empty a slot, leaving a tombstone
    pub fn take_slot(&mut self, slot: usize) -> Option<ChunkPointer> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Point an existing slot at another chunk
    pub fn replace_slot(&mut self, slot: usize, pointer: ChunkPointer) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = Some(pointer);
        }
    }

    /// Tombstone the slot holding `pointer`
    pub fn remove(&mut self, pointer: ChunkPointer) -> bool {
        match self.slot_of(pointer) {
            Some(slot) => {
                self.slots[slot] = None;
                true
            }
            None => false,
        }
    }

    /// Keep between one and `MAX_TOMBSTONES` empty slots.
    ///
    /// Returns whether the slots changed.
    pub fn reconcile(&mut self) -> bool {
        let tombstones = self.tombstones();
        if tombstones == 0 {
            self.slots.push(None);
            true
        } else if tombstones > MAX_TOMBSTONES {
            let mut kept = 0;
            self.slots.retain(|slot| match slot {
                Some(_) => true,
                None => {
                    kept += 1;
                    kept <= MAX_TOMBSTONES
                }
            });
            true
        } else {
            false
        }
    }

    /// Serialize for the free-list chain
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_slots(&self.slots)
    }

    /// Parse the content of the free-list chain
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(Self::from_slots(decode_slots(bytes)?))
    }
}

/// Serialize user-list entries
pub fn encode_pointers(pointers: &[ChunkPointer]) -> Result<Vec<u8>> {
    let slots: Vec<Option<ChunkPointer>> = pointers.iter().copied().map(Some).collect();
    encode_slots(&slots)
}

/// User lists never hold tombstones
pub fn decode_pointers(bytes: &[u8]) -> Result<Vec<ChunkPointer>> {
    decode_slots(bytes)?
        .into_iter()
        .map(|slot| slot.ok_or_else(|| Error::MalformedHeader("null entry in user list".into())))
        .collect()
}

fn encode_slots(slots: &[Option<ChunkPointer>]) -> Result<Vec<u8>> {
    let widest = slots.iter().flatten().map(|p| p.get()).max().unwrap_or(0);
    let width = width_for_extent(widest);
    let mut out = Vec::with_capacity(1 + slots.len() * width.bytes());
    EnumUniverse::<NumberSize>::new().write_single(&mut out, Some(width))?;
    for slot in slots {
        width.write(&mut out, slot.map_or(0, ChunkPointer::get))?;
    }
    Ok(out)
}

fn decode_slots(bytes: &[u8]) -> Result<Vec<Option<ChunkPointer>>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let mut input = Cursor::new(bytes);
    let width = EnumUniverse::<NumberSize>::new()
        .read_single(&mut input)
        .map_err(|e| Error::MalformedHeader(format!("list width: {}", e)))?
        .filter(|w| *w != NumberSize::Void)
        .ok_or_else(|| Error::MalformedHeader("void list width".into()))?;
    let body = bytes.len() - 1;
    if body % width.bytes() != 0 {
        return Err(Error::MalformedHeader(format!(
            "list body of {} bytes is not a multiple of {}",
            body,
            width.bytes()
        )));
    }
    (0..body / width.bytes())
        .map(|_| -> Result<Option<ChunkPointer>> {
            Ok(ChunkPointer::new(width.read(&mut input)?).non_null())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(offset: u64) -> ChunkPointer {
        ChunkPointer::new(offset)
    }

    #[test]
    fn test_add_reuses_tombstones() {
        let mut list = FreeList::from_slots(vec![Some(p(30)), None, Some(p(90))]);
        list.add(p(60));
        assert_eq!(list.slots(), &[Some(p(30)), Some(p(60)), Some(p(90))]);
        list.add(p(120));
        assert_eq!(list.slots().len(), 4);
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn test_take_and_replace() {
        let mut list = FreeList::from_slots(vec![Some(p(30)), Some(p(60))]);
        assert_eq!(list.take_slot(0), Some(p(30)));
        assert_eq!(list.take_slot(0), None);
        assert_eq!(list.tombstones(), 1);
        list.replace_slot(1, p(40));
        assert_eq!(list.entries(), vec![(1, p(40))]);
        assert!(list.remove(p(40)));
        assert!(!list.remove(p(40)));
        assert!(list.is_empty());
    }

    #[test]
    fn test_reconcile_adds_one_tombstone() {
        let mut list = FreeList::from_slots(vec![Some(p(30))]);
        assert!(list.reconcile());
        assert_eq!(list.tombstones(), 1);
        assert!(!list.reconcile());
    }

    #[test]
    fn test_reconcile_drops_extra_tombstones() {
        let mut list = FreeList::from_slots(vec![None, Some(p(30)), None, None, Some(p(60)), None]);
        assert!(list.reconcile());
        assert_eq!(list.tombstones(), MAX_TOMBSTONES);
        assert_eq!(list.pointers().collect::<Vec<_>>(), vec![p(30), p(60)]);
        assert!(!list.reconcile());
    }

    #[test]
    fn test_free_list_encoding() -> Result<()> {
        let list = FreeList::from_slots(vec![Some(p(300)), None, Some(p(26))]);
        let bytes = list.encode()?;
        assert_eq!(bytes.len(), 1 + 3 * 2);
        assert_eq!(FreeList::decode(&bytes)?, list);
        assert_eq!(FreeList::decode(&[])?, FreeList::new());
        Ok(())
    }

    #[test]
    fn test_user_list_encoding() -> Result<()> {
        let bytes = encode_pointers(&[p(26), p(40)])?;
        assert_eq!(bytes.len(), 3);
        assert_eq!(decode_pointers(&bytes)?, vec![p(26), p(40)]);

        let with_null = encode_slots(&[Some(p(26)), None])?;
        assert!(matches!(
            decode_pointers(&with_null),
            Err(Error::MalformedHeader(_))
        ));
        Ok(())
    }

    #[test]
    fn test_ragged_list_rejected() -> Result<()> {
        let mut bytes = encode_pointers(&[p(300)])?;
        bytes.push(0);
        assert!(decode_slots(&bytes).is_err());
        Ok(())
    }
}
