//! Fixed-capacity slab that hands out stable, reusable integer handles.
//!
//! Backed by an occupancy [`Bitmap`] the same way the original slab keeps a
//! `space_map` alongside its slot array: `insert` grabs the first clear bit,
//! `remove` clears it, and indices stay stable across everything in between.

use crate::bitmap::Bitmap;

pub struct Storage<T> {
	slots: Vec<Option<T>>,
	occupied: Bitmap,
}

impl<T> Storage<T> {
	pub fn new(capacity: usize) -> Self {
		Storage {
			slots: (0..capacity).map(|_| None).collect(),
			occupied: Bitmap::new(capacity),
		}
	}

	pub fn capacity(&self) -> usize {
		self.slots.len()
	}

	pub fn len(&self) -> usize {
		self.occupied.popcount()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Inserts `elem` into the first free slot, returning its index, or
	/// `None` if every slot is occupied.
	pub fn insert(&mut self, elem: T) -> Option<u32> {
		let index = self.occupied.find_first_of(false)?;
		self.occupied.set(index, true);
		self.slots[index] = Some(elem);
		Some(index as u32)
	}

	pub fn get(&self, index: u32) -> Option<&T> {
		if !self.occupied.get(index as usize) {
			return None;
		}
		self.slots[index as usize].as_ref()
	}

	pub fn get_mut(&mut self, index: u32) -> Option<&mut T> {
		if !self.occupied.get(index as usize) {
			return None;
		}
		self.slots[index as usize].as_mut()
	}

	/// Frees slot `index`, returning the element that was in it, or `None`
	/// if the slot was not occupied. Callers map `None` to their own
	/// handle-specific error (`InvalidFid`/`InvalidDid`).
	pub fn remove(&mut self, index: u32) -> Option<T> {
		if !self.occupied.get(index as usize) {
			return None;
		}
		self.occupied.set(index as usize, false);
		self.slots[index as usize].take()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn insert_get_remove() {
		let mut s: Storage<u32> = Storage::new(4);
		let id = s.insert(42).unwrap();
		assert_eq!(s.get(id), Some(&42));
		assert_eq!(s.remove(id), Some(42));
		assert!(s.get(id).is_none());
	}

	#[test]
	fn reuses_freed_slots() {
		let mut s: Storage<u32> = Storage::new(2);
		let a = s.insert(1).unwrap();
		let _b = s.insert(2).unwrap();
		assert!(s.insert(3).is_none());
		s.remove(a).unwrap();
		let c = s.insert(3).unwrap();
		assert_eq!(c, a);
	}

	#[test]
	fn remove_unknown_slot_is_none() {
		let mut s: Storage<u32> = Storage::new(2);
		assert!(s.remove(0).is_none());
	}
}
