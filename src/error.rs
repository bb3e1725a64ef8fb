//! Closed error domain for the block filesystem, mirroring the legacy
//! negative-integer return convention while giving callers a typed `Result`.

use std::path::PathBuf;

/// Every way a filesystem operation can fail.
///
/// Each variant maps to exactly one row of the original error table via
/// [`Error::code`]; the numeric values match the legacy implementation this
/// crate was ported from so a caller relying on the old integer protocol
/// still gets the same codes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("out of memory")]
	NoMem,

	#[error("failed to open image file {path:?}: {source}")]
	OpenFile {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to read image file: {source}")]
	ReadFile {
		#[source]
		source: std::io::Error,
	},

	#[error("failed to write image file: {source}")]
	WriteFile {
		#[source]
		source: std::io::Error,
	},

	#[error("no disk image loaded")]
	NoDisk,

	#[error("data block allocator exhausted")]
	OutOfBlocks,

	#[error("inode allocator exhausted")]
	OutOfInodes,

	#[error("'{name}' not found")]
	FileNotFound { name: String },

	#[error("'{name}' already exists")]
	FileExists { name: String },

	#[error("invalid path {path:?}")]
	InvalidPath { path: String },

	#[error("{name} is not a directory")]
	NotADir { name: String },

	#[error("directory {name} is not empty")]
	NotEmpty { name: String },

	#[error("invalid position {pos} (size {size})")]
	InvalidPos { pos: u64, size: u64 },

	#[error("read through unallocated block at file offset {offset}")]
	InvalidSector { offset: u64 },

	#[error("wrong file type for operation on {name}")]
	WrongType { name: String },

	#[error("file too big: block index {index} exceeds addressing capacity")]
	TooBig { index: u64 },

	#[error("invalid directory handle {did}")]
	InvalidDid { did: u32 },

	#[error("invalid file handle {fid}")]
	InvalidFid { fid: u32 },

	#[error("inode {inode} is marked free in the inode map")]
	InvalidInode { inode: u32 },

	#[error("superblock magic mismatch: expected 0xBEEF, found {found:#06x}")]
	BadMagic { found: u16 },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
	/// The legacy negative error code for this variant, matching the
	/// `errors.h` table the on-disk protocol in `SPEC_FULL.md` §7 documents.
	pub fn code(&self) -> i32 {
		match self {
			Error::NoMem => -1,
			Error::OpenFile { .. } => -2,
			Error::WriteFile { .. } => -3,
			Error::ReadFile { .. } => -4,
			Error::NoDisk => -5,
			Error::FileNotFound { .. } => -6,
			Error::FileExists { .. } => -7,
			Error::InvalidPath { .. } => -8,
			Error::NotADir { .. } => -9,
			Error::NotEmpty { .. } => -10,
			Error::InvalidPos { .. } => -11,
			Error::InvalidSector { .. } => -12,
			Error::InvalidDid { .. } => -13,
			Error::InvalidFid { .. } => -14,
			Error::InvalidInode { .. } => -15,
			Error::OutOfInodes => -16,
			Error::WrongType { .. } => -17,
			Error::OutOfBlocks => -18,
			Error::TooBig { .. } => -19,
			Error::BadMagic { .. } => -20,
		}
	}
}
