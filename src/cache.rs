//! Fixed-capacity write-through LRU block cache.
//!
//! Entries are linked by slot index rather than hashed, matching the
//! indexed doubly-linked list this is grounded on: lookups are a linear
//! scan over occupied slots, and eviction reuses the least-recently-used
//! slot in place.

const INVALID: usize = usize::MAX;

struct Node {
	key: u32,
	buf: Vec<u8>,
	prev: usize,
	next: usize,
	occupied: bool,
}

pub struct BlockCache {
	capacity: usize,
	nodes: Vec<Node>,
	head: usize,
	tail: usize,
	len: usize,
}

impl BlockCache {
	pub fn new(capacity: usize) -> Self {
		let nodes = (0..capacity)
			.map(|_| Node {
				key: 0,
				buf: Vec::new(),
				prev: INVALID,
				next: INVALID,
				occupied: false,
			})
			.collect();
		BlockCache {
			capacity,
			nodes,
			head: INVALID,
			tail: INVALID,
			len: 0,
		}
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	fn find_slot(&self, key: u32) -> Option<usize> {
		self.nodes
			.iter()
			.position(|n| n.occupied && n.key == key)
	}

	pub fn contains(&self, key: u32) -> bool {
		self.find_slot(key).is_some()
	}

	/// Returns the cached block, promoting it to most-recently-used.
	pub fn get(&mut self, key: u32) -> Option<&[u8]> {
		let slot = self.find_slot(key)?;
		self.move_to_front(slot);
		Some(&self.nodes[slot].buf)
	}

	/// Inserts or overwrites `key`, evicting the least-recently-used entry
	/// if the cache is full. A capacity-zero cache silently drops inserts.
	pub fn insert(&mut self, key: u32, buf: Vec<u8>) {
		if self.capacity == 0 {
			return;
		}
		if let Some(slot) = self.find_slot(key) {
			self.nodes[slot].buf = buf;
			self.move_to_front(slot);
			return;
		}
		if self.len < self.capacity {
			let slot = self.len;
			self.nodes[slot].key = key;
			self.nodes[slot].buf = buf;
			self.nodes[slot].occupied = true;
			self.len += 1;
			self.link_front(slot);
		} else {
			let slot = self.tail;
			self.unlink(slot);
			self.nodes[slot].key = key;
			self.nodes[slot].buf = buf;
			self.link_front(slot);
		}
	}

	pub fn clear(&mut self) {
		for node in &mut self.nodes {
			node.occupied = false;
			node.buf.clear();
			node.prev = INVALID;
			node.next = INVALID;
		}
		self.head = INVALID;
		self.tail = INVALID;
		self.len = 0;
	}

	fn unlink(&mut self, slot: usize) {
		let prev = self.nodes[slot].prev;
		let next = self.nodes[slot].next;
		if prev != INVALID {
			self.nodes[prev].next = next;
		} else {
			self.head = next;
		}
		if next != INVALID {
			self.nodes[next].prev = prev;
		} else {
			self.tail = prev;
		}
		self.nodes[slot].prev = INVALID;
		self.nodes[slot].next = INVALID;
	}

	fn link_front(&mut self, slot: usize) {
		self.nodes[slot].prev = INVALID;
		self.nodes[slot].next = self.head;
		if self.head != INVALID {
			self.nodes[self.head].prev = slot;
		}
		self.head = slot;
		if self.tail == INVALID {
			self.tail = slot;
		}
	}

	fn move_to_front(&mut self, slot: usize) {
		if self.head == slot {
			return;
		}
		self.unlink(slot);
		self.link_front(slot);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn insert_and_get() {
		let mut c = BlockCache::new(2);
		c.insert(1, vec![1]);
		c.insert(2, vec![2]);
		assert_eq!(c.get(1), Some(&[1u8][..]));
		assert_eq!(c.get(2), Some(&[2u8][..]));
	}

	#[test]
	fn eviction_drops_least_recently_used() {
		let mut c = BlockCache::new(2);
		c.insert(1, vec![1]);
		c.insert(2, vec![2]);
		c.get(1); // 1 is now MRU, 2 is LRU
		c.insert(3, vec![3]);
		assert!(c.contains(1));
		assert!(!c.contains(2));
		assert!(c.contains(3));
	}

	#[test]
	fn zero_capacity_disables_cache() {
		let mut c = BlockCache::new(0);
		c.insert(1, vec![1]);
		assert!(!c.contains(1));
		assert_eq!(c.get(1), None);
	}

	#[test]
	fn reinsert_overwrites_and_promotes() {
		let mut c = BlockCache::new(2);
		c.insert(1, vec![1]);
		c.insert(2, vec![2]);
		c.insert(1, vec![9]);
		c.insert(3, vec![3]);
		assert_eq!(c.get(1), Some(&[9u8][..]));
		assert!(!c.contains(2));
	}

	#[test]
	fn clear_empties_cache() {
		let mut c = BlockCache::new(2);
		c.insert(1, vec![1]);
		c.clear();
		assert!(!c.contains(1));
	}
}
