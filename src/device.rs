//! Cache-backed block addressing over the raw sector I/O layer.
//!
//! Every region of the image (inode map, inode table, space map, data) is
//! addressed here as an absolute block number, where block 0 is the first
//! block after the single-sector superblock. This differs from the
//! original split between a data-only cache and separate uncached region
//! I/O: here one write-through cache backs every block-granular access, so
//! the inode table and bitmaps benefit from the cache too — see `DESIGN.md`
//! for the rationale.

use crate::cache::BlockCache;
use crate::error::Result;
use crate::sector::{SectorIo, SECTOR_SIZE};

pub struct BlockDevice {
	io: SectorIo,
	cache: BlockCache,
	block_size: u32, // sectors per block
}

impl BlockDevice {
	pub fn new(io: SectorIo, block_size: u32, cache_capacity: usize) -> Self {
		BlockDevice {
			io,
			cache: BlockCache::new(cache_capacity),
			block_size,
		}
	}

	pub fn block_bytes(&self) -> usize {
		self.block_size as usize * SECTOR_SIZE as usize
	}

	fn block_to_sector(&self, block: u32) -> u64 {
		1 + block as u64 * self.block_size as u64
	}

	/// Writes the superblock, which lives in sector 0 ahead of every
	/// block-addressed region and so bypasses the block cache entirely.
	pub fn write_sector_zero(&mut self, buf: &[u8]) -> Result<()> {
		self.io.write_sectors(0, 1, buf)
	}

	/// Reads a single block, consulting (and populating) the cache.
	pub fn read_block(&mut self, block: u32) -> Result<Vec<u8>> {
		if let Some(buf) = self.cache.get(block) {
			return Ok(buf.to_vec());
		}
		let mut buf = vec![0u8; self.block_bytes()];
		self.io.read_sectors(self.block_to_sector(block), self.block_size as u64, &mut buf)?;
		self.cache.insert(block, buf.clone());
		Ok(buf)
	}

	/// Writes a single block; write-through, so the cache and image always
	/// agree once this returns.
	pub fn write_block(&mut self, block: u32, buf: &[u8]) -> Result<()> {
		debug_assert_eq!(buf.len(), self.block_bytes());
		self.io.write_sectors(self.block_to_sector(block), self.block_size as u64, buf)?;
		self.cache.insert(block, buf.to_vec());
		Ok(())
	}

	/// Reads `n` contiguous blocks starting at `first`, coalescing cache
	/// misses into as few underlying reads as possible.
	pub fn read_blocks(&mut self, first: u32, n: u32) -> Result<Vec<u8>> {
		let block_bytes = self.block_bytes();
		let mut out = vec![0u8; block_bytes * n as usize];
		let mut i = 0u32;
		while i < n {
			let block = first + i;
			if let Some(buf) = self.cache.get(block) {
				out[(i as usize) * block_bytes..(i as usize + 1) * block_bytes].copy_from_slice(buf);
				i += 1;
				continue;
			}
			let run_start = i;
			while i < n && !self.cache.contains(first + i) {
				i += 1;
			}
			let run_len = i - run_start;
			let mut raw = vec![0u8; block_bytes * run_len as usize];
			self.io
				.read_sectors(self.block_to_sector(first + run_start), self.block_size as u64 * run_len as u64, &mut raw)?;
			for j in 0..run_len {
				let blk = first + run_start + j;
				let slice = &raw[(j as usize) * block_bytes..(j as usize + 1) * block_bytes];
				self.cache.insert(blk, slice.to_vec());
				out[((run_start + j) as usize) * block_bytes..((run_start + j) as usize + 1) * block_bytes]
					.copy_from_slice(slice);
			}
		}
		Ok(out)
	}

	/// Write-through write of `n` contiguous blocks starting at `first`.
	pub fn write_blocks(&mut self, first: u32, n: u32, buf: &[u8]) -> Result<()> {
		let block_bytes = self.block_bytes();
		debug_assert_eq!(buf.len(), block_bytes * n as usize);
		self.io
			.write_sectors(self.block_to_sector(first), self.block_size as u64 * n as u64, buf)?;
		for j in 0..n {
			let slice = &buf[(j as usize) * block_bytes..(j as usize + 1) * block_bytes];
			self.cache.insert(first + j, slice.to_vec());
		}
		Ok(())
	}

	/// Reads a byte range that may span multiple blocks, starting
	/// `offset` bytes into block `first_block`.
	pub fn read_object(&mut self, first_block: u32, offset: u64, size: u64, dst: &mut [u8]) -> Result<()> {
		let block_bytes = self.block_bytes() as u64;
		let mut remaining = size;
		let mut pos = offset;
		let mut written = 0usize;
		while remaining > 0 {
			let block = first_block + (pos / block_bytes) as u32;
			let off_in_block = (pos % block_bytes) as usize;
			let take = remaining.min(block_bytes - off_in_block as u64) as usize;
			let block_buf = self.read_block(block)?;
			dst[written..written + take].copy_from_slice(&block_buf[off_in_block..off_in_block + take]);
			written += take;
			pos += take as u64;
			remaining -= take as u64;
		}
		Ok(())
	}

	/// Writes a byte range that may span multiple blocks. Fully-aligned
	/// middle blocks skip the read-modify-write step.
	pub fn write_object(&mut self, first_block: u32, offset: u64, size: u64, src: &[u8]) -> Result<()> {
		let block_bytes = self.block_bytes() as u64;
		let mut remaining = size;
		let mut pos = offset;
		let mut read = 0usize;
		while remaining > 0 {
			let block = first_block + (pos / block_bytes) as u32;
			let off_in_block = (pos % block_bytes) as usize;
			let take = remaining.min(block_bytes - off_in_block as u64) as usize;
			if off_in_block == 0 && take as u64 == block_bytes {
				self.write_block(block, &src[read..read + take])?;
			} else {
				let mut block_buf = self.read_block(block)?;
				block_buf[off_in_block..off_in_block + take].copy_from_slice(&src[read..read + take]);
				self.write_block(block, &block_buf)?;
			}
			read += take;
			pos += take as u64;
			remaining -= take as u64;
		}
		Ok(())
	}

	/// Allocates a zeroed block and writes it out immediately.
	pub fn zero_block(&mut self, block: u32) -> Result<()> {
		let zeros = vec![0u8; self.block_bytes()];
		self.write_block(block, &zeros)
	}

	pub fn sync(&mut self) -> Result<()> {
		self.io.sync()
	}

	pub fn clear_cache(&mut self) {
		self.cache.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sector::SectorIo;
	use tempfile::NamedTempFile;

	fn dev(block_size: u32, n_blocks: u64, cache: usize) -> BlockDevice {
		let tmp = NamedTempFile::new().unwrap();
		let io = SectorIo::create(tmp.path(), 1 + n_blocks * block_size as u64).unwrap();
		BlockDevice::new(io, block_size, cache)
	}

	#[test]
	fn write_then_read_block() {
		let mut d = dev(2, 8, 4);
		let data = vec![7u8; d.block_bytes()];
		d.write_block(3, &data).unwrap();
		assert_eq!(d.read_block(3).unwrap(), data);
	}

	#[test]
	fn read_blocks_spans_cache_hits_and_misses() {
		let mut d = dev(1, 8, 4);
		let a = vec![1u8; d.block_bytes()];
		let b = vec![2u8; d.block_bytes()];
		d.write_block(0, &a).unwrap();
		d.write_block(2, &b).unwrap();
		let all = d.read_blocks(0, 3).unwrap();
		let bs = d.block_bytes();
		assert_eq!(&all[0..bs], &a[..]);
		assert_eq!(&all[2 * bs..3 * bs], &b[..]);
	}

	#[test]
	fn object_write_partial_and_aligned() {
		let mut d = dev(1, 4, 4);
		let payload = vec![9u8; d.block_bytes() + 10];
		d.write_object(0, 5, payload.len() as u64, &payload).unwrap();
		let mut out = vec![0u8; payload.len()];
		d.read_object(0, 5, payload.len() as u64, &mut out).unwrap();
		assert_eq!(out, payload);
	}
}
