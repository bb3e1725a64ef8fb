//! Directory entries stored as a dense, sentinel-terminated sequence of
//! fixed-width records inside an ordinary file handle.

use crate::device::BlockDevice;
use crate::directory_entry::{DirEntry, ENTRY_SIZE};
use crate::error::{Error, Result};
use crate::handle::{FileHandle, WriteCtx};

pub struct Directory {
	pub file: FileHandle,
}

impl Directory {
	pub fn new(file: FileHandle) -> Directory {
		Directory { file }
	}

	fn read_entry_at(&mut self, device: &mut BlockDevice, pos: u64) -> Result<DirEntry> {
		self.file.seek(pos)?;
		let mut buf = [0u8; ENTRY_SIZE];
		let n = self.file.read(device, &mut buf)?;
		if n < ENTRY_SIZE {
			return Ok(DirEntry::sentinel());
		}
		Ok(DirEntry::from_bytes(&buf))
	}

	/// Scans from the start for `name`, restoring the caller's cursor.
	/// Returns the sentinel if no entry matches.
	pub fn find(&mut self, device: &mut BlockDevice, name: &str) -> Result<DirEntry> {
		let saved = self.file.pos;
		let mut pos = 0u64;
		let result = loop {
			let entry = self.read_entry_at(device, pos)?;
			if entry.is_sentinel() {
				break entry;
			}
			if entry.name() == name {
				break entry;
			}
			pos += ENTRY_SIZE as u64;
		};
		self.file.pos = saved;
		Ok(result)
	}

	/// Reads the entry at the cursor and advances past it, except the
	/// sentinel, onto which the cursor stays parked.
	pub fn read(&mut self, device: &mut BlockDevice) -> Result<DirEntry> {
		let pos = self.file.pos;
		let entry = self.read_entry_at(device, pos)?;
		if !entry.is_sentinel() {
			self.file.pos = pos + ENTRY_SIZE as u64;
		} else {
			self.file.pos = pos;
		}
		Ok(entry)
	}

	pub fn rewind(&mut self) {
		self.file.pos = 0;
	}

	/// Appends `(inode_n, name)`, failing if `name` already exists.
	pub fn add_entry(&mut self, ctx: &mut WriteCtx, now: u32, inode_n: u32, file_type: u8, name: &str) -> Result<()> {
		let saved = self.file.pos;
		if !self.find(ctx.device, name)?.is_sentinel() {
			return Err(Error::FileExists { name: name.to_string() });
		}
		let mut pos = 0u64;
		loop {
			let entry = self.read_entry_at(ctx.device, pos)?;
			if entry.is_sentinel() {
				break;
			}
			pos += ENTRY_SIZE as u64;
		}
		let entry = DirEntry::new(inode_n, file_type, name);
		self.file.seek(pos)?;
		self.file.write(ctx, now, &entry.to_bytes())?;
		let sentinel = DirEntry::sentinel();
		self.file.write(ctx, now, &sentinel.to_bytes())?;
		self.file.pos = saved;
		Ok(())
	}

	/// Removes the entry named `name`, shifting every later entry left by
	/// one slot and shrinking the directory by `ENTRY_SIZE` bytes.
	pub fn remove_entry(&mut self, ctx: &mut WriteCtx, now: u32, name: &str) -> Result<u32> {
		let saved = self.file.pos;
		let mut d = None;
		let mut pos = 0u64;
		loop {
			let entry = self.read_entry_at(ctx.device, pos)?;
			if entry.is_sentinel() {
				break;
			}
			if entry.name() == name {
				d = Some((pos, entry.inode_n));
			}
			pos += ENTRY_SIZE as u64;
		}
		let (d_pos, inode_n) = d.ok_or_else(|| Error::FileNotFound { name: name.to_string() })?;
		let sentinel_pos = pos;

		let mut src = d_pos + ENTRY_SIZE as u64;
		let mut dst = d_pos;
		while src < sentinel_pos {
			let entry = self.read_entry_at(ctx.device, src)?;
			self.file.seek(dst)?;
			self.file.write(ctx, now, &entry.to_bytes())?;
			src += ENTRY_SIZE as u64;
			dst += ENTRY_SIZE as u64;
		}
		self.file.trunc(ctx, now, sentinel_pos)?;
		self.file.pos = saved.min(sentinel_pos);
		Ok(inode_n)
	}

	/// True if the directory holds nothing beyond "." and "..".
	pub fn is_empty_of_children(&mut self, device: &mut BlockDevice) -> Result<bool> {
		let saved = self.file.pos;
		let mut pos = 0u64;
		let mut count = 0;
		loop {
			let entry = self.read_entry_at(device, pos)?;
			if entry.is_sentinel() {
				break;
			}
			if entry.name() != "." && entry.name() != ".." {
				count += 1;
			}
			pos += ENTRY_SIZE as u64;
		}
		self.file.pos = saved;
		Ok(count == 0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bitmap::Bitmap;
	use crate::inode::{FileType, Inode};
	use crate::sector::SectorIo;
	use tempfile::NamedTempFile;

	fn setup() -> (BlockDevice, Bitmap, u32) {
		let tmp = NamedTempFile::new().unwrap();
		let io = SectorIo::create(tmp.path(), 1 + 32).unwrap();
		let device = BlockDevice::new(io, 1, 8);
		let space_map = Bitmap::new(32);
		(device, space_map, 32)
	}

	fn dir() -> Directory {
		Directory::new(FileHandle::new(1, Inode::new(FileType::Directory, 0o755, 0)))
	}

	#[test]
	fn add_find_remove_round_trip() {
		let (mut device, mut space_map, n) = setup();
		let mut free = n;
		let mut dirty = false;
		let mut d = dir();
		{
			let mut ctx = WriteCtx {
				device: &mut device,
				space_map: &mut space_map,
				blocks_free: &mut free,
				sm_dirty: &mut dirty,
				inode_first_block: 10,
				data_first_block: 0,
			};
			d.add_entry(&mut ctx, 0, 2, 0, ".").unwrap();
			d.add_entry(&mut ctx, 0, 1, 1, "..").unwrap();
			d.add_entry(&mut ctx, 0, 5, 0, "file.txt").unwrap();
		}
		let found = d.find(&mut device, "file.txt").unwrap();
		assert_eq!(found.inode_n, 5);
		assert!(d.find(&mut device, "missing").unwrap().is_sentinel());

		{
			let mut ctx = WriteCtx {
				device: &mut device,
				space_map: &mut space_map,
				blocks_free: &mut free,
				sm_dirty: &mut dirty,
				inode_first_block: 10,
				data_first_block: 0,
			};
			let removed_inode = d.remove_entry(&mut ctx, 0, "file.txt").unwrap();
			assert_eq!(removed_inode, 5);
		}
		assert!(d.find(&mut device, "file.txt").unwrap().is_sentinel());
		assert!(d.is_empty_of_children(&mut device).unwrap());
	}

	#[test]
	fn add_duplicate_name_fails() {
		let (mut device, mut space_map, n) = setup();
		let mut free = n;
		let mut dirty = false;
		let mut d = dir();
		let mut ctx = WriteCtx {
			device: &mut device,
			space_map: &mut space_map,
			blocks_free: &mut free,
			sm_dirty: &mut dirty,
			inode_first_block: 10,
			data_first_block: 0,
		};
		d.add_entry(&mut ctx, 0, 2, 0, "a").unwrap();
		assert!(d.add_entry(&mut ctx, 0, 3, 0, "a").is_err());
	}

	#[test]
	fn remove_missing_entry_fails() {
		let (mut device, mut space_map, n) = setup();
		let mut free = n;
		let mut dirty = false;
		let mut d = dir();
		let mut ctx = WriteCtx {
			device: &mut device,
			space_map: &mut space_map,
			blocks_free: &mut free,
			sm_dirty: &mut dirty,
			inode_first_block: 10,
			data_first_block: 0,
		};
		assert!(d.remove_entry(&mut ctx, 0, "nope").is_err());
	}
}
