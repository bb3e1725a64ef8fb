//! The filesystem's sector-0 metadata record and the layout math used to
//! size every region that follows it.

use std::fmt;

use crate::error::{Error, Result};
use crate::sector::SECTOR_SIZE;

pub const MAGIC: u16 = 0xBEEF;
// file_type(1) + perms(2) + 3 timestamps(4 each) + links(4) + 8 direct(4 each) + indirect(4) + dindirect(4)
pub const INODE_RECORD_SIZE: u32 = 59;
pub const SUPERBLOCK_WIRE_SIZE: usize = 58;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
	pub inodes_count: u32,
	pub inodes_free: u32,
	pub inode_size: u32,
	pub blocks_count: u32,
	pub blocks_free: u32,
	pub block_size: u32, // sectors per block
	pub block_offset: u32,
	pub inodemap_first_block: u32,
	pub inode_first_block: u32,
	pub spacemap_first_block: u32,
	pub data_first_block: u32,
	pub inodemap_size: u32,
	pub inodes_size: u32,
	pub spacemap_size: u32,
	pub magic: u16,
}

impl Superblock {
	/// Works out the on-disk layout for a fresh image from the requested
	/// geometry, mirroring the block-group sizing arithmetic this crate's
	/// ext2 image builder used (inode table / bitmap block counts rounded
	/// up from a byte count to whole blocks).
	pub fn layout(inodes_count: u32, image_sectors: u64, block_size: u32) -> Result<Superblock> {
		if block_size == 0 {
			return Err(Error::InvalidPath {
				path: "block_size must be nonzero".into(),
			});
		}
		let block_bytes = block_size as u64 * SECTOR_SIZE;
		let inodes_bytes = inodes_count as u64 * INODE_RECORD_SIZE as u64;
		let inode_table_blocks = inodes_bytes.div_ceil(block_bytes) as u32;
		let inodemap_blocks = (inodes_count as u64).div_ceil(8).div_ceil(block_bytes) as u32;

		let reserved_sectors = 1 + (inode_table_blocks + inodemap_blocks) as u64 * block_size as u64;
		if reserved_sectors >= image_sectors {
			return Err(Error::InvalidPath {
				path: "image too small for requested inode count".into(),
			});
		}
		let remaining_sectors = image_sectors - reserved_sectors;
		// The space-map's own bit-space covers the full remaining region,
		// including the sectors the space-map bitmap itself occupies; those
		// leading bits are pre-set by `Filesystem::init` so they are never
		// handed out as free data blocks.
		let data_blocks = remaining_sectors / block_size as u64;
		let spacemap_blocks = data_blocks.div_ceil(8).div_ceil(block_bytes).max(1) as u32;
		if spacemap_blocks as u64 >= data_blocks {
			return Err(Error::InvalidPath {
				path: "image too small for requested geometry".into(),
			});
		}
		let data_blocks = data_blocks as u32;

		let inodemap_first_block = 0;
		let inode_first_block = inodemap_first_block + inodemap_blocks;
		let spacemap_first_block = inode_first_block + inode_table_blocks;
		// The space-map's coordinate space (and therefore `data_first_block`)
		// starts at the same physical location the bitmap itself is stored;
		// its own storage footprint is simply the first reserved bits.
		let data_first_block = spacemap_first_block;

		Ok(Superblock {
			inodes_count,
			inodes_free: inodes_count,
			inode_size: INODE_RECORD_SIZE,
			blocks_count: data_blocks,
			blocks_free: data_blocks - spacemap_blocks,
			block_size,
			block_offset: 1,
			inodemap_first_block,
			inode_first_block,
			spacemap_first_block,
			data_first_block,
			inodemap_size: inodemap_blocks,
			inodes_size: inode_table_blocks,
			spacemap_size: spacemap_blocks,
			magic: MAGIC,
		})
	}

	pub fn to_bytes(&self) -> [u8; SECTOR_SIZE as usize] {
		let mut buf = [0u8; SECTOR_SIZE as usize];
		let mut w = 0;
		for field in [
			self.inodes_count,
			self.inodes_free,
			self.inode_size,
			self.blocks_count,
			self.blocks_free,
			self.block_size,
			self.block_offset,
			self.inodemap_first_block,
			self.inode_first_block,
			self.spacemap_first_block,
			self.data_first_block,
			self.inodemap_size,
			self.inodes_size,
			self.spacemap_size,
		] {
			buf[w..w + 4].copy_from_slice(&field.to_le_bytes());
			w += 4;
		}
		buf[w..w + 2].copy_from_slice(&self.magic.to_le_bytes());
		buf
	}

	pub fn from_bytes(buf: &[u8]) -> Result<Superblock> {
		let mut r = 0;
		let mut next_u32 = || {
			let v = u32::from_le_bytes(buf[r..r + 4].try_into().unwrap());
			r += 4;
			v
		};
		let sb = Superblock {
			inodes_count: next_u32(),
			inodes_free: next_u32(),
			inode_size: next_u32(),
			blocks_count: next_u32(),
			blocks_free: next_u32(),
			block_size: next_u32(),
			block_offset: next_u32(),
			inodemap_first_block: next_u32(),
			inode_first_block: next_u32(),
			spacemap_first_block: next_u32(),
			data_first_block: next_u32(),
			inodemap_size: next_u32(),
			inodes_size: next_u32(),
			spacemap_size: next_u32(),
			magic: u16::from_le_bytes(buf[r..r + 2].try_into().unwrap()),
		};
		if sb.magic != MAGIC {
			return Err(Error::BadMagic { found: sb.magic });
		}
		Ok(sb)
	}
}

impl fmt::Display for Superblock {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"superblock(inodes={}/{} free, blocks={}/{} free, block_size={} sectors, magic={:#06x})",
			self.inodes_free, self.inodes_count, self.blocks_free, self.blocks_count, self.block_size, self.magic
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn layout_round_trips_through_bytes() {
		let sb = Superblock::layout(32, 2048, 2).unwrap();
		assert_eq!(sb.magic, MAGIC);
		let bytes = sb.to_bytes();
		let sb2 = Superblock::from_bytes(&bytes).unwrap();
		assert_eq!(sb, sb2);
	}

	#[test]
	fn layout_regions_are_ordered_and_disjoint() {
		let sb = Superblock::layout(32, 2048, 2).unwrap();
		assert!(sb.inode_first_block >= sb.inodemap_first_block + sb.inodemap_size);
		assert!(sb.spacemap_first_block >= sb.inode_first_block + sb.inodes_size);
		// the space-map's coordinate space starts at its own storage block;
		// its footprint is reserved via pre-set bits, not a block offset.
		assert_eq!(sb.data_first_block, sb.spacemap_first_block);
		assert!(sb.blocks_free < sb.blocks_count);
	}

	#[test]
	fn bad_magic_is_rejected() {
		let sb = Superblock::layout(32, 2048, 2).unwrap();
		let mut bytes = sb.to_bytes();
		bytes[55] = 0;
		bytes[56] = 0;
		assert!(Superblock::from_bytes(&bytes).is_err());
	}

	#[test]
	fn rejects_image_too_small() {
		assert!(Superblock::layout(1000, 10, 1).is_err());
	}
}
