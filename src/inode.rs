//! Inode record and the direct/indirect/double-indirect block addressing
//! scheme built on top of it.

use crate::bitmap::Bitmap;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::superblock::INODE_RECORD_SIZE;

pub const DIRECT_POINTERS: usize = 8;
pub const POINTER_SIZE: u64 = 4;
pub const INVALID_BLOCK: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
	Regular,
	Directory,
	Other,
}

impl FileType {
	pub fn to_byte(self) -> u8 {
		match self {
			FileType::Regular => 0,
			FileType::Directory => 1,
			FileType::Other => 2,
		}
	}

	pub fn from_byte(b: u8) -> FileType {
		match b {
			0 => FileType::Regular,
			1 => FileType::Directory,
			_ => FileType::Other,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
	pub file_type: FileType,
	pub permissions: u16,
	pub access_time: u32,
	pub change_time: u32,
	pub modify_time: u32,
	pub links_count: u32,
	pub blocks: [u32; DIRECT_POINTERS],
	pub indirect_block: u32,
	pub double_indirect_block: u32,
}

impl Inode {
	pub fn new(file_type: FileType, permissions: u16, now: u32) -> Inode {
		Inode {
			file_type,
			permissions,
			access_time: now,
			change_time: now,
			modify_time: now,
			links_count: 1,
			blocks: [INVALID_BLOCK; DIRECT_POINTERS],
			indirect_block: INVALID_BLOCK,
			double_indirect_block: INVALID_BLOCK,
		}
	}

	pub fn to_bytes(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(INODE_RECORD_SIZE as usize);
		buf.push(self.file_type.to_byte());
		buf.extend_from_slice(&self.permissions.to_le_bytes());
		buf.extend_from_slice(&self.access_time.to_le_bytes());
		buf.extend_from_slice(&self.change_time.to_le_bytes());
		buf.extend_from_slice(&self.modify_time.to_le_bytes());
		buf.extend_from_slice(&self.links_count.to_le_bytes());
		for b in &self.blocks {
			buf.extend_from_slice(&b.to_le_bytes());
		}
		buf.extend_from_slice(&self.indirect_block.to_le_bytes());
		buf.extend_from_slice(&self.double_indirect_block.to_le_bytes());
		buf
	}

	pub fn from_bytes(buf: &[u8]) -> Inode {
		let mut r = 1usize;
		let mut next_u32 = |buf: &[u8], r: &mut usize| {
			let v = u32::from_le_bytes(buf[*r..*r + 4].try_into().unwrap());
			*r += 4;
			v
		};
		let file_type = FileType::from_byte(buf[0]);
		let permissions = u16::from_le_bytes(buf[r..r + 2].try_into().unwrap());
		r += 2;
		let access_time = next_u32(buf, &mut r);
		let change_time = next_u32(buf, &mut r);
		let modify_time = next_u32(buf, &mut r);
		let links_count = next_u32(buf, &mut r);
		let mut blocks = [0u32; DIRECT_POINTERS];
		for b in blocks.iter_mut() {
			*b = next_u32(buf, &mut r);
		}
		let indirect_block = next_u32(buf, &mut r);
		let double_indirect_block = next_u32(buf, &mut r);
		Inode {
			file_type,
			permissions,
			access_time,
			change_time,
			modify_time,
			links_count,
			blocks,
			indirect_block,
			double_indirect_block,
		}
	}

	fn pointers_per_block(device: &BlockDevice) -> u64 {
		device.block_bytes() as u64 / POINTER_SIZE
	}

	fn capacity(device: &BlockDevice) -> u64 {
		let p = Self::pointers_per_block(device);
		DIRECT_POINTERS as u64 + p + p * p
	}

	/// Resolves file-relative block index `i` to a data-region block
	/// number without allocating. Returns `Ok(None)` for a hole.
	pub fn resolve(&self, device: &mut BlockDevice, index: u64) -> Result<Option<u32>> {
		let p = Self::pointers_per_block(device);
		if index < DIRECT_POINTERS as u64 {
			let ptr = self.blocks[index as usize];
			return Ok(if ptr == INVALID_BLOCK { None } else { Some(ptr) });
		}
		if index < DIRECT_POINTERS as u64 + p {
			if self.indirect_block == INVALID_BLOCK {
				return Ok(None);
			}
			let off = index - DIRECT_POINTERS as u64;
			let ptr = Self::read_pointer(device, self.indirect_block, off)?;
			return Ok(if ptr == INVALID_BLOCK { None } else { Some(ptr) });
		}
		if index < Self::capacity(device) {
			if self.double_indirect_block == INVALID_BLOCK {
				return Ok(None);
			}
			let j = index - DIRECT_POINTERS as u64 - p;
			let l1 = Self::read_pointer(device, self.double_indirect_block, j / p)?;
			if l1 == INVALID_BLOCK {
				return Ok(None);
			}
			let l2 = Self::read_pointer(device, l1, j % p)?;
			return Ok(if l2 == INVALID_BLOCK { None } else { Some(l2) });
		}
		Err(Error::TooBig { index })
	}

	/// Resolves file-relative block index `i`, allocating any missing
	/// pointer levels from `ctx.space_map` along the way.
	pub fn allocate(&mut self, ctx: &mut AllocCtx, index: u64) -> Result<u32> {
		let p = Self::pointers_per_block(ctx.device);
		if index >= Self::capacity(ctx.device) {
			return Err(Error::TooBig { index });
		}
		if index < DIRECT_POINTERS as u64 {
			if self.blocks[index as usize] == INVALID_BLOCK {
				let b = Self::alloc_block(ctx)?;
				self.blocks[index as usize] = b;
			}
			return Ok(self.blocks[index as usize]);
		}
		if index < DIRECT_POINTERS as u64 + p {
			if self.indirect_block == INVALID_BLOCK {
				self.indirect_block = Self::alloc_block(ctx)?;
			}
			let off = index - DIRECT_POINTERS as u64;
			let ptr = Self::read_pointer(ctx.device, self.indirect_block, off)?;
			if ptr != INVALID_BLOCK {
				return Ok(ptr);
			}
			let b = Self::alloc_block(ctx)?;
			Self::write_pointer(ctx.device, self.indirect_block, off, b)?;
			return Ok(b);
		}
		let j = index - DIRECT_POINTERS as u64 - p;
		if self.double_indirect_block == INVALID_BLOCK {
			self.double_indirect_block = Self::alloc_block(ctx)?;
		}
		let mut l1 = Self::read_pointer(ctx.device, self.double_indirect_block, j / p)?;
		if l1 == INVALID_BLOCK {
			l1 = Self::alloc_block(ctx)?;
			Self::write_pointer(ctx.device, self.double_indirect_block, j / p, l1)?;
		}
		let ptr = Self::read_pointer(ctx.device, l1, j % p)?;
		if ptr != INVALID_BLOCK {
			return Ok(ptr);
		}
		let b = Self::alloc_block(ctx)?;
		Self::write_pointer(ctx.device, l1, j % p, b)?;
		Ok(b)
	}

	/// Frees every block at or beyond the block index covering `new_size`,
	/// matching the spec's truncation algorithm: direct slots first, then
	/// whole indirect/double-indirect subtrees if they fall entirely
	/// beyond the new size, otherwise just their tails.
	pub fn truncate(&mut self, ctx: &mut AllocCtx, new_size: u64) -> Result<()> {
		let block_bytes = ctx.device.block_bytes() as u64;
		let k = new_size.div_ceil(block_bytes);
		let p = Self::pointers_per_block(ctx.device);

		for i in 0..DIRECT_POINTERS as u64 {
			if i >= k && self.blocks[i as usize] != INVALID_BLOCK {
				Self::free_block(ctx, self.blocks[i as usize]);
				self.blocks[i as usize] = INVALID_BLOCK;
			}
		}

		if k <= DIRECT_POINTERS as u64 {
			if self.indirect_block != INVALID_BLOCK {
				Self::free_indirect_subtree(ctx, self.indirect_block)?;
				self.indirect_block = INVALID_BLOCK;
			}
		} else if self.indirect_block != INVALID_BLOCK {
			let keep = k - DIRECT_POINTERS as u64;
			Self::free_indirect_tail(ctx, self.indirect_block, keep, p)?;
		}

		if k <= DIRECT_POINTERS as u64 + p {
			if self.double_indirect_block != INVALID_BLOCK {
				Self::free_double_indirect_subtree(ctx, self.double_indirect_block, p)?;
				self.double_indirect_block = INVALID_BLOCK;
			}
		} else if self.double_indirect_block != INVALID_BLOCK {
			let j_keep = k - DIRECT_POINTERS as u64 - p;
			Self::free_double_indirect_tail(ctx, self.double_indirect_block, j_keep, p)?;
		}

		Ok(())
	}

	fn alloc_block(ctx: &mut AllocCtx) -> Result<u32> {
		let index = ctx.space_map.find_first_of(false).ok_or(Error::OutOfBlocks)?;
		ctx.space_map.set(index, true);
		*ctx.blocks_free -= 1;
		let block = ctx.data_first_block + index as u32;
		ctx.device.zero_block(block)?;
		Ok(block)
	}

	fn free_block(ctx: &mut AllocCtx, block: u32) {
		let index = (block - ctx.data_first_block) as usize;
		if ctx.space_map.get(index) {
			ctx.space_map.set(index, false);
			*ctx.blocks_free += 1;
		}
	}

	fn read_pointer(device: &mut BlockDevice, block: u32, offset: u64) -> Result<u32> {
		let mut buf = [0u8; 4];
		device.read_object(block, offset * POINTER_SIZE, POINTER_SIZE, &mut buf)?;
		Ok(u32::from_le_bytes(buf))
	}

	fn write_pointer(device: &mut BlockDevice, block: u32, offset: u64, value: u32) -> Result<()> {
		device.write_object(block, offset * POINTER_SIZE, POINTER_SIZE, &value.to_le_bytes())
	}

	fn free_indirect_subtree(ctx: &mut AllocCtx, block: u32) -> Result<()> {
		let p = Self::pointers_per_block(ctx.device);
		for i in 0..p {
			let ptr = Self::read_pointer(ctx.device, block, i)?;
			if ptr != INVALID_BLOCK {
				Self::free_block(ctx, ptr);
			}
		}
		Self::free_block(ctx, block);
		Ok(())
	}

	fn free_indirect_tail(ctx: &mut AllocCtx, block: u32, keep: u64, p: u64) -> Result<()> {
		for i in keep..p {
			let ptr = Self::read_pointer(ctx.device, block, i)?;
			if ptr != INVALID_BLOCK {
				Self::free_block(ctx, ptr);
				Self::write_pointer(ctx.device, block, i, INVALID_BLOCK)?;
			}
		}
		Ok(())
	}

	fn free_double_indirect_subtree(ctx: &mut AllocCtx, block: u32, p: u64) -> Result<()> {
		for i in 0..p {
			let l1 = Self::read_pointer(ctx.device, block, i)?;
			if l1 != INVALID_BLOCK {
				Self::free_indirect_subtree(ctx, l1)?;
			}
		}
		Self::free_block(ctx, block);
		Ok(())
	}

	fn free_double_indirect_tail(ctx: &mut AllocCtx, block: u32, j_keep: u64, p: u64) -> Result<()> {
		let l1_keep = j_keep / p;
		let within = j_keep % p;
		for i in (l1_keep + 1)..p {
			let l1 = Self::read_pointer(ctx.device, block, i)?;
			if l1 != INVALID_BLOCK {
				Self::free_indirect_subtree(ctx, l1)?;
				Self::write_pointer(ctx.device, block, i, INVALID_BLOCK)?;
			}
		}
		if within > 0 {
			let l1 = Self::read_pointer(ctx.device, block, l1_keep)?;
			if l1 != INVALID_BLOCK {
				Self::free_indirect_tail(ctx, l1, within, p)?;
			}
		} else {
			let l1 = Self::read_pointer(ctx.device, block, l1_keep)?;
			if l1 != INVALID_BLOCK {
				Self::free_indirect_subtree(ctx, l1)?;
				Self::write_pointer(ctx.device, block, l1_keep, INVALID_BLOCK)?;
			}
		}
		Ok(())
	}
}

/// Everything block allocation needs: the device, the data-block bitmap
/// (indexed from 0 within the data region), and the global block number
/// the data region starts at, since pointers stored in the inode and its
/// indirect blocks are global block numbers.
pub struct AllocCtx<'a> {
	pub device: &'a mut BlockDevice,
	pub space_map: &'a mut Bitmap,
	pub blocks_free: &'a mut u32,
	pub data_first_block: u32,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sector::SectorIo;
	use tempfile::NamedTempFile;

	fn setup(n_blocks: u64) -> (BlockDevice, Bitmap, u32) {
		let tmp = NamedTempFile::new().unwrap();
		let block_size = 1u32;
		let io = SectorIo::create(tmp.path(), 1 + n_blocks * block_size as u64).unwrap();
		let device = BlockDevice::new(io, block_size, 8);
		let space_map = Bitmap::new(n_blocks as usize);
		(device, space_map, n_blocks as u32)
	}

	#[test]
	fn direct_block_allocate_and_resolve() {
		let (mut device, mut space_map, n) = setup(16);
		let mut free = n;
		let mut inode = Inode::new(FileType::Regular, 0o644, 0);
		let mut ctx = AllocCtx { device: &mut device, space_map: &mut space_map, blocks_free: &mut free, data_first_block: 0 };
		let b = inode.allocate(&mut ctx, 0).unwrap();
		assert_ne!(b, INVALID_BLOCK);
		assert_eq!(inode.resolve(&mut device, 0).unwrap(), Some(b));
		assert_eq!(inode.resolve(&mut device, 1).unwrap(), None);
	}

	#[test]
	fn indirect_block_allocation() {
		let (mut device, mut space_map, n) = setup(64);
		let mut free = n;
		let mut inode = Inode::new(FileType::Regular, 0o644, 0);
		let idx = DIRECT_POINTERS as u64; // first indirect-addressed block
		let mut ctx = AllocCtx { device: &mut device, space_map: &mut space_map, blocks_free: &mut free, data_first_block: 0 };
		let b = inode.allocate(&mut ctx, idx).unwrap();
		assert_ne!(inode.indirect_block, INVALID_BLOCK);
		assert_eq!(inode.resolve(&mut device, idx).unwrap(), Some(b));
	}

	#[test]
	fn truncate_frees_blocks() {
		let (mut device, mut space_map, n) = setup(32);
		let mut free = n;
		let mut inode = Inode::new(FileType::Regular, 0o644, 0);
		{
			let mut ctx = AllocCtx { device: &mut device, space_map: &mut space_map, blocks_free: &mut free, data_first_block: 0 };
			for i in 0..4 {
				inode.allocate(&mut ctx, i).unwrap();
			}
		}
		let before = free;
		let mut ctx = AllocCtx { device: &mut device, space_map: &mut space_map, blocks_free: &mut free, data_first_block: 0 };
		inode.truncate(&mut ctx, 0).unwrap();
		assert!(free > before);
		for i in 0..4 {
			assert_eq!(inode.blocks[i as usize], INVALID_BLOCK);
		}
	}

	#[test]
	fn too_big_index_errors() {
		let (mut device, mut space_map, n) = setup(8);
		let mut free = n;
		let mut inode = Inode::new(FileType::Regular, 0o644, 0);
		let huge = Inode::capacity(&device);
		let mut ctx = AllocCtx { device: &mut device, space_map: &mut space_map, blocks_free: &mut free, data_first_block: 0 };
		assert!(inode.allocate(&mut ctx, huge).is_err());
	}
}
