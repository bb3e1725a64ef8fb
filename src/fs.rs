//! The filesystem facade: path resolution, the current-working-directory,
//! and every POSIX-style operation layered on top of the lower modules.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::bitmap::Bitmap;
use crate::device::BlockDevice;
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::handle::{FileHandle, WriteCtx};
use crate::inode::{FileType, Inode};
use crate::sector::SectorIo;
use crate::storage::Storage;
use crate::superblock::Superblock;

/// Default capacity of the open-file and open-directory handle tables.
pub const STORAGE_SIZE: usize = 128;
/// Default block cache capacity.
pub const CACHE_SIZE_DEF: usize = 6;

pub const ROOT_INODE: u32 = 0;

pub struct Filesystem {
	image_path: PathBuf,
	device: BlockDevice,
	superblock: Superblock,
	inode_map: Bitmap,
	space_map: Bitmap,
	sb_dirty: bool,
	im_dirty: bool,
	sm_dirty: bool,
	open_files: Storage<FileHandle>,
	open_dirs: Storage<Directory>,
	cwd: u32,
}

impl Filesystem {
	fn now() -> u32 {
		SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|d| d.as_secs() as u32)
			.unwrap_or(0)
	}

	/// Creates a fresh image at `path` sized `image_sectors` sectors, with
	/// room for `inodes_count` inodes and a block made of `block_sectors`
	/// sectors, and formats it: superblock, empty bitmaps, and a root
	/// directory inode with "." and ".." both pointing at itself.
	pub fn init(path: &Path, inodes_count: u32, image_sectors: u64, block_sectors: u32) -> Result<Filesystem> {
		let superblock = Superblock::layout(inodes_count, image_sectors, block_sectors)?;
		let io = SectorIo::create(path, image_sectors)?;
		let device = BlockDevice::new(io, block_sectors, CACHE_SIZE_DEF);

		let mut inode_map = Bitmap::new(superblock.inodes_count as usize);
		let mut space_map = Bitmap::new(superblock.blocks_count as usize);
		for i in 0..superblock.spacemap_size as usize {
			space_map.set(i, true);
		}
		inode_map.set(ROOT_INODE as usize, true);

		let mut fs = Filesystem {
			image_path: path.to_path_buf(),
			device,
			superblock,
			inode_map,
			space_map,
			sb_dirty: true,
			im_dirty: true,
			sm_dirty: true,
			open_files: Storage::new(STORAGE_SIZE),
			open_dirs: Storage::new(STORAGE_SIZE),
			cwd: ROOT_INODE,
		};

		let now = Self::now();
		let root_inode = Inode::new(FileType::Directory, 0o755, now);
		{
			let mut ctx = fs.write_ctx();
			ctx.write_inode(ROOT_INODE, &root_inode)?;
		}
		fs.superblock.inodes_free -= 1;

		let mut root_dir = Directory::new(FileHandle::new(ROOT_INODE, root_inode));
		{
			let mut ctx = fs.write_ctx();
			root_dir.add_entry(&mut ctx, now, ROOT_INODE, FileType::Directory.to_byte(), ".")?;
			root_dir.add_entry(&mut ctx, now, ROOT_INODE, FileType::Directory.to_byte(), "..")?;
		}

		fs.sync()?;
		log::info!("initialized image {:?} ({} inodes, {} data blocks)", path, fs.superblock.inodes_count, fs.superblock.blocks_count);
		Ok(fs)
	}

	/// Opens an existing image, reading the superblock and both bitmaps
	/// back into memory.
	pub fn load(path: &Path) -> Result<Filesystem> {
		let mut io = SectorIo::load(path)?;
		let mut sb_buf = vec![0u8; crate::sector::SECTOR_SIZE as usize];
		io.read_sectors(0, 1, &mut sb_buf)?;
		let superblock = Superblock::from_bytes(&sb_buf)?;

		let mut device = BlockDevice::new(io, superblock.block_size, CACHE_SIZE_DEF);
		let inode_map_bytes = device.read_blocks(superblock.inodemap_first_block, superblock.inodemap_size)?;
		let space_map_bytes = device.read_blocks(superblock.spacemap_first_block, superblock.spacemap_size)?;
		let inode_map = Bitmap::from_bytes(inode_map_bytes, superblock.inodes_count as usize);
		let space_map = Bitmap::from_bytes(space_map_bytes, superblock.blocks_count as usize);

		log::info!("loaded image {:?}: {}", path, superblock);
		Ok(Filesystem {
			image_path: path.to_path_buf(),
			device,
			superblock,
			inode_map,
			space_map,
			sb_dirty: false,
			im_dirty: false,
			sm_dirty: false,
			open_files: Storage::new(STORAGE_SIZE),
			open_dirs: Storage::new(STORAGE_SIZE),
			cwd: ROOT_INODE,
		})
	}

	/// Flushes any dirty whole-region state (superblock, inode map,
	/// space map) back to the image.
	pub fn sync(&mut self) -> Result<()> {
		if self.sb_dirty {
			let bytes = self.superblock.to_bytes();
			self.device.write_sector_zero(&bytes)?;
			self.sb_dirty = false;
		}
		if self.im_dirty {
			let total = self.superblock.inodemap_size as usize * self.device.block_bytes();
			let bytes = Self::pad_region(self.inode_map.as_bytes(), total);
			self.device
				.write_blocks(self.superblock.inodemap_first_block, self.superblock.inodemap_size, &bytes)?;
			self.im_dirty = false;
		}
		if self.sm_dirty {
			let total = self.superblock.spacemap_size as usize * self.device.block_bytes();
			let bytes = Self::pad_region(self.space_map.as_bytes(), total);
			self.device
				.write_blocks(self.superblock.spacemap_first_block, self.superblock.spacemap_size, &bytes)?;
			self.sm_dirty = false;
		}
		self.device.sync()?;
		Ok(())
	}

	/// Syncs and releases the cache and open-handle tables.
	pub fn unload(mut self) -> Result<()> {
		self.sync()?;
		self.device.clear_cache();
		log::info!("unloaded image {:?}", self.image_path);
		Ok(())
	}

	fn pad_region(bytes: &[u8], total_len: usize) -> Vec<u8> {
		let mut v = bytes.to_vec();
		v.resize(total_len, 0);
		v
	}

	fn write_ctx(&mut self) -> WriteCtx<'_> {
		WriteCtx {
			device: &mut self.device,
			space_map: &mut self.space_map,
			blocks_free: &mut self.superblock.blocks_free,
			sm_dirty: &mut self.sm_dirty,
			inode_first_block: self.superblock.inode_first_block,
			data_first_block: self.superblock.data_first_block,
		}
	}

	fn dir_handle_for(&mut self, inode_n: u32) -> Result<Directory> {
		if !self.inode_map.get(inode_n as usize) {
			return Err(Error::InvalidInode { inode: inode_n });
		}
		let mut ctx = self.write_ctx();
		let inode = ctx.read_inode(inode_n)?;
		Ok(Directory::new(FileHandle::new(inode_n, inode)))
	}

	fn alloc_inode(&mut self, file_type: FileType, perms: u16) -> Result<u32> {
		let index = self.inode_map.find_first_of(false).ok_or(Error::OutOfInodes)?;
		self.inode_map.set(index, true);
		self.superblock.inodes_free -= 1;
		self.im_dirty = true;
		let now = Self::now();
		let inode = Inode::new(file_type, perms, now);
		let mut ctx = self.write_ctx();
		ctx.write_inode(index as u32, &inode)?;
		Ok(index as u32)
	}

	/// Resolves an absolute (leading `/`) or cwd-relative path to an inode
	/// number. A path ending in `/` resolves to the directory itself.
	pub fn resolve_path(&mut self, path: &str) -> Result<u32> {
		if path.is_empty() {
			return Err(Error::InvalidPath { path: path.to_string() });
		}
		let mut current = if path.starts_with('/') { ROOT_INODE } else { self.cwd };
		let trimmed = path.trim_start_matches('/');
		if trimmed.is_empty() {
			return Ok(current);
		}
		let parts: Vec<&str> = trimmed.split('/').filter(|p| !p.is_empty()).collect();
		let (last, intermediates) = parts.split_last().expect("checked non-empty above");
		for part in intermediates {
			let mut dh = self.dir_handle_for(current)?;
			if dh.file.inode.file_type != FileType::Directory {
				return Err(Error::NotADir { name: part.to_string() });
			}
			let entry = dh.find(&mut self.device, part)?;
			if entry.is_sentinel() {
				return Err(Error::InvalidPath { path: path.to_string() });
			}
			current = entry.inode_n;
		}
		let mut dh = self.dir_handle_for(current)?;
		if dh.file.inode.file_type != FileType::Directory {
			return Err(Error::NotADir { name: last.to_string() });
		}
		let entry = dh.find(&mut self.device, last)?;
		if entry.is_sentinel() {
			return Err(Error::FileNotFound { name: last.to_string() });
		}
		Ok(entry.inode_n)
	}

	fn split_parent_leaf(&mut self, path: &str) -> Result<(u32, String)> {
		if path.is_empty() || path == "/" {
			return Err(Error::InvalidPath { path: path.to_string() });
		}
		match path.rfind('/') {
			Some(idx) => {
				let parent_path = if idx == 0 { "/" } else { &path[..idx] };
				let leaf = &path[idx + 1..];
				if leaf.is_empty() {
					return Err(Error::InvalidPath { path: path.to_string() });
				}
				let parent_inode = self.resolve_path(parent_path)?;
				Ok((parent_inode, leaf.to_string()))
			}
			None => Ok((self.cwd, path.to_string())),
		}
	}

	fn do_create(&mut self, path: &str, file_type: FileType) -> Result<u32> {
		let (parent_inode, leaf) = self.split_parent_leaf(path)?;
		let mut parent_dir = self.dir_handle_for(parent_inode)?;
		if parent_dir.file.inode.file_type != FileType::Directory {
			return Err(Error::NotADir { name: leaf });
		}
		if !parent_dir.find(&mut self.device, &leaf)?.is_sentinel() {
			return Err(Error::FileExists { name: leaf });
		}
		let perms = if file_type == FileType::Directory { 0o755 } else { 0o644 };
		let inode_n = self.alloc_inode(file_type, perms)?;
		let now = Self::now();
		let mut ctx = self.write_ctx();
		parent_dir.add_entry(&mut ctx, now, inode_n, file_type.to_byte(), &leaf)?;
		Ok(inode_n)
	}

	pub fn create(&mut self, path: &str) -> Result<()> {
		self.do_create(path, FileType::Regular)?;
		Ok(())
	}

	pub fn mkdir(&mut self, path: &str) -> Result<()> {
		let (parent_inode, _leaf) = self.split_parent_leaf(path)?;
		let inode_n = self.do_create(path, FileType::Directory)?;
		let now = Self::now();
		let mut new_dir = self.dir_handle_for(inode_n)?;
		let mut ctx = self.write_ctx();
		new_dir.add_entry(&mut ctx, now, inode_n, FileType::Directory.to_byte(), ".")?;
		new_dir.add_entry(&mut ctx, now, parent_inode, FileType::Directory.to_byte(), "..")?;
		Ok(())
	}

	fn unlink_impl(&mut self, path: &str, as_dir: bool) -> Result<()> {
		if path == "/" {
			return Err(Error::InvalidPath { path: path.to_string() });
		}
		let (parent_inode, leaf) = self.split_parent_leaf(path)?;
		let mut parent_dir = self.dir_handle_for(parent_inode)?;
		let entry = parent_dir.find(&mut self.device, &leaf)?;
		if entry.is_sentinel() {
			return Err(Error::FileNotFound { name: leaf });
		}
		let target_n = entry.inode_n;
		if target_n == ROOT_INODE {
			return Err(Error::InvalidPath { path: path.to_string() });
		}
		let mut target = self.dir_handle_for(target_n)?;
		let is_dir = target.file.inode.file_type == FileType::Directory;
		if as_dir && !is_dir {
			return Err(Error::NotADir { name: leaf });
		}
		if !as_dir && is_dir {
			return Err(Error::WrongType { name: leaf });
		}
		if is_dir && !target.is_empty_of_children(&mut self.device)? {
			return Err(Error::NotEmpty { name: leaf });
		}

		let now = Self::now();
		{
			let mut ctx = self.write_ctx();
			parent_dir.remove_entry(&mut ctx, now, &leaf)?;
		}

		target.file.inode.links_count = target.file.inode.links_count.saturating_sub(1);
		if target.file.inode.links_count == 0 {
			{
				let mut ctx = self.write_ctx();
				target.file.trunc(&mut ctx, now, 0)?;
			}
			self.inode_map.set(target_n as usize, false);
			self.superblock.inodes_free += 1;
			self.im_dirty = true;
		} else {
			let mut ctx = self.write_ctx();
			ctx.write_inode(target_n, &target.file.inode)?;
		}
		Ok(())
	}

	pub fn unlink(&mut self, path: &str) -> Result<()> {
		self.unlink_impl(path, false)
	}

	pub fn rmdir(&mut self, path: &str) -> Result<()> {
		self.unlink_impl(path, true)
	}

	pub fn link(&mut self, orig: &str, new: &str) -> Result<()> {
		let orig_n = self.resolve_path(orig)?;
		let mut orig_dir = self.dir_handle_for(orig_n)?;
		if orig_dir.file.inode.file_type == FileType::Directory {
			return Err(Error::WrongType { name: orig.to_string() });
		}
		let (parent_inode, leaf) = self.split_parent_leaf(new)?;
		let mut parent_dir = self.dir_handle_for(parent_inode)?;
		if !parent_dir.find(&mut self.device, &leaf)?.is_sentinel() {
			return Err(Error::FileExists { name: leaf });
		}
		orig_dir.file.inode.links_count += 1;
		let now = Self::now();
		let mut ctx = self.write_ctx();
		ctx.write_inode(orig_n, &orig_dir.file.inode)?;
		parent_dir.add_entry(&mut ctx, now, orig_n, FileType::Regular.to_byte(), &leaf)?;
		Ok(())
	}

	pub fn open(&mut self, path: &str) -> Result<u32> {
		let inode_n = self.resolve_path(path)?;
		let dh = self.dir_handle_for(inode_n)?;
		if dh.file.inode.file_type == FileType::Directory {
			return Err(Error::WrongType { name: path.to_string() });
		}
		self.open_files.insert(dh.file).ok_or(Error::NoMem)
	}

	pub fn close(&mut self, fid: u32) -> Result<()> {
		self.open_files.remove(fid).map(|_| ()).ok_or(Error::InvalidFid { fid })
	}

	pub fn read(&mut self, fid: u32, buf: &mut [u8]) -> Result<usize> {
		let device = &mut self.device;
		let handle = self.open_files.get_mut(fid).ok_or(Error::InvalidFid { fid })?;
		handle.read(device, buf)
	}

	pub fn write(&mut self, fid: u32, buf: &[u8]) -> Result<usize> {
		let now = Self::now();
		let mut ctx = WriteCtx {
			device: &mut self.device,
			space_map: &mut self.space_map,
			blocks_free: &mut self.superblock.blocks_free,
			sm_dirty: &mut self.sm_dirty,
			inode_first_block: self.superblock.inode_first_block,
			data_first_block: self.superblock.data_first_block,
		};
		let handle = self.open_files.get_mut(fid).ok_or(Error::InvalidFid { fid })?;
		handle.write(&mut ctx, now, buf)
	}

	pub fn seek(&mut self, fid: u32, pos: u64) -> Result<()> {
		let handle = self.open_files.get_mut(fid).ok_or(Error::InvalidFid { fid })?;
		handle.seek(pos)
	}

	pub fn trunc(&mut self, fid: u32, new_size: u64) -> Result<()> {
		let now = Self::now();
		let mut ctx = WriteCtx {
			device: &mut self.device,
			space_map: &mut self.space_map,
			blocks_free: &mut self.superblock.blocks_free,
			sm_dirty: &mut self.sm_dirty,
			inode_first_block: self.superblock.inode_first_block,
			data_first_block: self.superblock.data_first_block,
		};
		let handle = self.open_files.get_mut(fid).ok_or(Error::InvalidFid { fid })?;
		handle.trunc(&mut ctx, now, new_size)
	}

	pub fn opendir(&mut self, path: &str) -> Result<u32> {
		let inode_n = self.resolve_path(path)?;
		let dh = self.dir_handle_for(inode_n)?;
		if dh.file.inode.file_type != FileType::Directory {
			return Err(Error::NotADir { name: path.to_string() });
		}
		self.open_dirs.insert(dh).ok_or(Error::NoMem)
	}

	pub fn closedir(&mut self, did: u32) -> Result<()> {
		self.open_dirs.remove(did).map(|_| ()).ok_or(Error::InvalidDid { did })
	}

	pub fn readdir(&mut self, did: u32) -> Result<Option<(u32, u8, String)>> {
		let device = &mut self.device;
		let dir = self.open_dirs.get_mut(did).ok_or(Error::InvalidDid { did })?;
		let entry = dir.read(device)?;
		if entry.is_sentinel() {
			Ok(None)
		} else {
			Ok(Some((entry.inode_n, entry.file_type, entry.name().to_string())))
		}
	}

	pub fn rewinddir(&mut self, did: u32) -> Result<()> {
		let dir = self.open_dirs.get_mut(did).ok_or(Error::InvalidDid { did })?;
		dir.rewind();
		Ok(())
	}

	pub fn cd(&mut self, path: &str) -> Result<()> {
		let inode_n = self.resolve_path(path)?;
		let dh = self.dir_handle_for(inode_n)?;
		if dh.file.inode.file_type != FileType::Directory {
			return Err(Error::NotADir { name: path.to_string() });
		}
		self.cwd = inode_n;
		Ok(())
	}

	/// Returns a snapshot of the inode at `path` without opening it.
	pub fn stat(&mut self, path: &str) -> Result<Inode> {
		let inode_n = self.resolve_path(path)?;
		Ok(self.dir_handle_for(inode_n)?.file.inode)
	}

	/// Joins a parent path and a child component, matching the original's
	/// `concat_paths` helper.
	pub fn concat_paths(parent: &str, child: &str) -> String {
		if parent.ends_with('/') {
			format!("{parent}{child}")
		} else {
			format!("{parent}/{child}")
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::NamedTempFile;

	fn fresh() -> Filesystem {
		let tmp = NamedTempFile::new().unwrap();
		Filesystem::init(tmp.path(), 32, 2048, 2).unwrap()
	}

	#[test]
	fn init_creates_root_with_dot_entries() {
		let mut fs = fresh();
		let did = fs.opendir("/").unwrap();
		let mut names = vec![];
		while let Some((_, _, name)) = fs.readdir(did).unwrap() {
			names.push(name);
		}
		assert_eq!(names, vec![".".to_string(), "..".to_string()]);
		fs.closedir(did).unwrap();
	}

	#[test]
	fn create_write_read_round_trip() {
		let mut fs = fresh();
		fs.create("/hello.txt").unwrap();
		let fid = fs.open("/hello.txt").unwrap();
		fs.write(fid, b"hi there").unwrap();
		fs.seek(fid, 0).unwrap();
		let mut buf = [0u8; 8];
		let n = fs.read(fid, &mut buf).unwrap();
		assert_eq!(n, 8);
		assert_eq!(&buf, b"hi there");
		fs.close(fid).unwrap();
	}

	#[test]
	fn mkdir_and_rmdir_nonempty() {
		let mut fs = fresh();
		fs.mkdir("/a").unwrap();
		fs.mkdir("/a/b").unwrap();
		assert!(fs.rmdir("/a").is_err());
		fs.rmdir("/a/b").unwrap();
		fs.rmdir("/a").unwrap();
		assert!(fs.resolve_path("/a").is_err());
	}

	#[test]
	fn link_and_unlink_share_data() {
		let mut fs = fresh();
		fs.create("/x").unwrap();
		let fid = fs.open("/x").unwrap();
		fs.write(fid, b"shared").unwrap();
		fs.close(fid).unwrap();
		fs.link("/x", "/y").unwrap();
		fs.unlink("/x").unwrap();
		let fid2 = fs.open("/y").unwrap();
		let mut buf = [0u8; 6];
		fs.read(fid2, &mut buf).unwrap();
		assert_eq!(&buf, b"shared");
		fs.close(fid2).unwrap();
	}

	#[test]
	fn unlink_rejects_directory() {
		let mut fs = fresh();
		fs.mkdir("/d").unwrap();
		assert!(fs.unlink("/d").is_err());
	}

	#[test]
	fn invalid_fid_errors() {
		let mut fs = fresh();
		assert!(fs.read(99, &mut [0u8; 4]).is_err());
		assert!(fs.close(99).is_err());
	}

	#[test]
	fn reload_preserves_tree() {
		let tmp = NamedTempFile::new().unwrap();
		{
			let mut fs = Filesystem::init(tmp.path(), 32, 2048, 2).unwrap();
			fs.mkdir("/a").unwrap();
			fs.create("/a/f").unwrap();
			let fid = fs.open("/a/f").unwrap();
			fs.write(fid, b"data").unwrap();
			fs.close(fid).unwrap();
			fs.unload().unwrap();
		}
		let mut fs = Filesystem::load(tmp.path()).unwrap();
		let fid = fs.open("/a/f").unwrap();
		let mut buf = [0u8; 4];
		fs.read(fid, &mut buf).unwrap();
		assert_eq!(&buf, b"data");
	}
}
