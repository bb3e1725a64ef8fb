//! Fixed-size sector I/O against the host image file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Bytes per sector. The unit every other layer of this crate addresses
/// blocks in terms of.
pub const SECTOR_SIZE: u64 = 512;

/// Raw sector-granular reader/writer over a single host file.
pub struct SectorIo {
	file: File,
}

impl SectorIo {
	/// Creates a fresh image file of exactly `n_sectors` sectors, zeroed.
	pub fn create(path: &Path, n_sectors: u64) -> Result<Self> {
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.truncate(true)
			.open(path)
			.map_err(|source| Error::OpenFile {
				path: path.to_path_buf(),
				source,
			})?;
		file.set_len(n_sectors * SECTOR_SIZE)
			.map_err(|source| Error::WriteFile { source })?;
		log::debug!("created image {:?} ({} sectors)", path, n_sectors);
		Ok(SectorIo { file })
	}

	/// Opens an existing image file for read/write.
	pub fn load(path: &Path) -> Result<Self> {
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.open(path)
			.map_err(|source| Error::OpenFile {
				path: path.to_path_buf(),
				source,
			})?;
		Ok(SectorIo { file })
	}

	fn seek_to(&mut self, sector: u64) -> Result<()> {
		self.file
			.seek(SeekFrom::Start(sector * SECTOR_SIZE))
			.map_err(|source| Error::ReadFile { source })?;
		Ok(())
	}

	/// Reads `n_sectors` contiguous sectors starting at `start_sector` into
	/// `buf`, which must be at least `n_sectors * SECTOR_SIZE` bytes.
	pub fn read_sectors(&mut self, start_sector: u64, n_sectors: u64, buf: &mut [u8]) -> Result<()> {
		let len = (n_sectors * SECTOR_SIZE) as usize;
		self.seek_to(start_sector)?;
		self.file
			.read_exact(&mut buf[..len])
			.map_err(|source| Error::ReadFile { source })
	}

	/// Writes `n_sectors` contiguous sectors starting at `start_sector`.
	pub fn write_sectors(&mut self, start_sector: u64, n_sectors: u64, buf: &[u8]) -> Result<()> {
		let len = (n_sectors * SECTOR_SIZE) as usize;
		self.seek_to(start_sector)?;
		self.file
			.write_all(&buf[..len])
			.map_err(|source| Error::WriteFile { source })
	}

	/// Flushes buffered writes to the host filesystem.
	pub fn sync(&mut self) -> Result<()> {
		self.file.sync_all().map_err(|source| Error::WriteFile { source })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::NamedTempFile;

	#[test]
	fn create_zeroes_the_image() {
		let tmp = NamedTempFile::new().unwrap();
		let mut io = SectorIo::create(tmp.path(), 4).unwrap();
		let mut buf = vec![0xAA; SECTOR_SIZE as usize];
		io.read_sectors(0, 1, &mut buf).unwrap();
		assert!(buf.iter().all(|&b| b == 0));
	}

	#[test]
	fn write_then_read_round_trips() {
		let tmp = NamedTempFile::new().unwrap();
		let mut io = SectorIo::create(tmp.path(), 4).unwrap();
		let data = vec![0x5A; (SECTOR_SIZE * 2) as usize];
		io.write_sectors(1, 2, &data).unwrap();
		let mut out = vec![0u8; (SECTOR_SIZE * 2) as usize];
		io.read_sectors(1, 2, &mut out).unwrap();
		assert_eq!(out, data);
	}

	#[test]
	fn load_rejects_missing_file() {
		let path = Path::new("/nonexistent/path/to/image.img");
		assert!(SectorIo::load(path).is_err());
	}
}
