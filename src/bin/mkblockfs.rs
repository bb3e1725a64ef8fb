//! One-shot image-creation front end: formats a fresh filesystem image
//! at a given path and exits. Not a long-running service, so it parses
//! its own handful of flags rather than pulling in an argument-parsing
//! crate.

use std::env;
use std::path::PathBuf;
use std::process::exit;

use blockfs::Filesystem;

const DEFAULT_INODES: u32 = 1024;
const DEFAULT_BLOCK_SECTORS: u32 = 2;
const SECTOR_SIZE: u64 = 512;

struct Args {
	image_path: Option<PathBuf>,
	size_bytes: Option<u64>,
	inodes: u32,
	block_sectors: u32,
	help: bool,
}

impl Default for Args {
	fn default() -> Self {
		Args {
			image_path: None,
			size_bytes: None,
			inodes: DEFAULT_INODES,
			block_sectors: DEFAULT_BLOCK_SECTORS,
			help: false,
		}
	}
}

fn parse_args(args: env::ArgsOs) -> Args {
	let mut res = Args::default();
	let mut it = args.skip(1);
	while let Some(arg) = it.next() {
		match arg.to_str() {
			Some("-h" | "--help") => res.help = true,
			Some("--inodes") => {
				if let Some(v) = it.next().and_then(|s| s.to_str().map(str::to_string)) {
					if let Ok(n) = v.parse() {
						res.inodes = n;
					}
				}
			}
			Some("--block-sectors") => {
				if let Some(v) = it.next().and_then(|s| s.to_str().map(str::to_string)) {
					if let Ok(n) = v.parse() {
						res.block_sectors = n;
					}
				}
			}
			Some("--size") => {
				if let Some(v) = it.next().and_then(|s| s.to_str().map(str::to_string)) {
					res.size_bytes = parse_size(&v);
				}
			}
			_ => res.image_path = Some(PathBuf::from(arg)),
		}
	}
	res
}

/// Accepts a plain byte count or a `K`/`M`/`G` suffix (e.g. `64M`).
fn parse_size(s: &str) -> Option<u64> {
	let s = s.trim();
	let (digits, mult) = match s.chars().last() {
		Some('K') | Some('k') => (&s[..s.len() - 1], 1024),
		Some('M') | Some('m') => (&s[..s.len() - 1], 1024 * 1024),
		Some('G') | Some('g') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
		_ => (s, 1),
	};
	digits.parse::<u64>().ok().map(|n| n * mult)
}

fn usage() -> ! {
	eprintln!(
		"usage: mkblockfs [--inodes N] [--block-sectors N] --size SIZE PATH\n\n\
		 Formats a fresh block filesystem image at PATH.\n\
		 SIZE accepts a plain byte count or a K/M/G suffix, e.g. 64M."
	);
	exit(1);
}

fn main() {
	env_logger::init();
	let args = parse_args(env::args_os());
	if args.help {
		usage();
	}
	let image_path = args.image_path.unwrap_or_else(|| usage());
	let size_bytes = args.size_bytes.unwrap_or_else(|| usage());
	let image_sectors = size_bytes.div_ceil(SECTOR_SIZE);

	log::info!(
		"creating image at {} ({} sectors, {} inodes, {} sectors/block)",
		image_path.display(),
		image_sectors,
		args.inodes,
		args.block_sectors
	);

	match Filesystem::init(&image_path, args.inodes, image_sectors, args.block_sectors) {
		Ok(fs) => {
			if let Err(e) = fs.unload() {
				eprintln!("mkblockfs: {}: {e}", image_path.display());
				exit(1);
			}
			println!("created {}", image_path.display());
		}
		Err(e) => {
			eprintln!("mkblockfs: {}: {e}", image_path.display());
			exit(1);
		}
	}
}
