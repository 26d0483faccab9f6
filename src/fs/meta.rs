//! Legacy metadata bridged onto a Unix filesystem.
//!
//! Three concerns live here: the access byte and its mapping to Unix
//! mode bits, the packed two-byte date and the centisecond timestamp,
//! and the per-file load/execute addresses kept in `.Acorn/` sidecar
//! symlinks.

use std::fs;
use std::fs::Metadata;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::os::unix::fs::symlink;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use bitflags::bitflags;
use chrono::DateTime;
use chrono::Datelike;
use chrono::Local;

use crate::fs::typemap::TypeMap;

/// Object types reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjType {
    /// No such object.
    None = 0,
    /// A file.
    File = 1,
    /// A directory.
    Dir = 2,
}

bitflags! {
    /// The access byte.  `LOCKED` prevents deletion and has no Unix
    /// source of its own; it is represented by the owner-execute bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u8 {
        /// Public read.
        const PUB_READ = 0x01;
        /// Public write.
        const PUB_WRITE = 0x02;
        /// Owner read.
        const OWNER_READ = 0x04;
        /// Owner write.
        const OWNER_WRITE = 0x08;
        /// Locked against deletion.
        const LOCKED = 0x10;
        /// Object is a directory.
        const DIR = 0x20;
    }
}

/// Object type from a Unix mode.
pub fn mode_to_type(mode: u32) -> ObjType {
    if mode & libc::S_IFMT == libc::S_IFDIR {
        ObjType::Dir
    } else {
        ObjType::File
    }
}

/// Access byte from a Unix mode.
pub fn mode_to_access(mode: u32) -> Access {
    let mut access = Access::empty();
    if mode & libc::S_IRUSR != 0 {
        access |= Access::OWNER_READ;
    }
    if mode & libc::S_IWUSR != 0 {
        access |= Access::OWNER_WRITE;
    }
    if mode & libc::S_IROTH != 0 {
        access |= Access::PUB_READ;
    }
    if mode & libc::S_IWOTH != 0 {
        access |= Access::PUB_WRITE;
    }
    if mode & libc::S_IFMT == libc::S_IFDIR {
        access |= Access::DIR;
    }
    access
}

/// Unix mode from an access byte.  `usergroup` decides whether group
/// permissions follow the owner or the public bits.
pub fn access_to_mode(access: Access, usergroup: bool) -> u32 {
    let mut mode = 0;
    if access.contains(Access::OWNER_READ) {
        mode |= libc::S_IRUSR | if usergroup { libc::S_IRGRP } else { 0 };
    }
    if access.contains(Access::OWNER_WRITE) {
        mode |= libc::S_IWUSR | if usergroup { libc::S_IWGRP } else { 0 };
    }
    if access.contains(Access::PUB_READ) {
        mode |= libc::S_IROTH | if usergroup { 0 } else { libc::S_IRGRP };
    }
    if access.contains(Access::PUB_WRITE) {
        mode |= libc::S_IWOTH | if usergroup { 0 } else { libc::S_IWGRP };
    }
    mode
}

/// Render an access byte the way catalogue listings show it: owner half,
/// a slash, then the public half.
pub fn access_to_string(access: Access) -> String {
    let mut s = String::new();
    if access.contains(Access::DIR) {
        s.push('D');
    }
    if access.contains(Access::LOCKED) {
        s.push('L');
    }
    if access.contains(Access::OWNER_WRITE) {
        s.push('W');
    }
    if access.contains(Access::OWNER_READ) {
        s.push('R');
    }
    s.push('/');
    if access.contains(Access::PUB_WRITE) {
        s.push('w');
    }
    if access.contains(Access::PUB_READ) {
        s.push('r');
    }
    s
}

/// Load and execute addresses of a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileMeta {
    /// Load address.
    pub load: u32,
    /// Execute address.
    pub exec: u32,
}

/// Seconds between 1900-01-01 and the Unix epoch.
const RISCOS_EPOCH_OFFSET: u64 = 31_536_000 * 70 + 86_400 * 17;

/// Centiseconds since 1900-01-01 for a Unix timestamp.
pub fn riscos_stamp(time: SystemTime) -> u64 {
    let since = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    (since.as_secs() + RISCOS_EPOCH_OFFSET) * 100 + u64::from(since.subsec_millis() / 10)
}

/// Pack a timestamp into the two-byte fileserver date.  The year is an
/// offset from 1981, split between the two bytes; anything earlier
/// clamps to the lowest representable date.
pub fn pack_date(time: SystemTime) -> [u8; 2] {
    let dt: DateTime<Local> = time.into();
    let year81 = dt.year() - 1981;
    if year81 < 0 {
        return [1, 1];
    }
    let day = dt.day() | (((year81 as u32) & 0xf0) << 1);
    let year_month = dt.month() | ((year81 as u32) << 4);
    [day as u8, year_month as u8]
}

/// Path of the sidecar symlink for a file.
fn metapath(path: &Path) -> PathBuf {
    let leaf = path.file_name().unwrap_or_default();
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.join(".Acorn").join(leaf)
        }
        _ => Path::new(".Acorn").join(leaf),
    }
}

fn parse_hex32(s: &str) -> Option<u32> {
    u32::from_str_radix(s, 16).ok()
}

/// Read the sidecar metadata of `path`, synthesizing defaults when no
/// sidecar exists.
///
/// Two historic encodings are accepted: the 17-byte
/// `"LLLLLLLL EEEEEEEE"` form and the 23-byte space-separated per-byte
/// form (bytes in little-endian order).  The synthesized default encodes
/// the guessed file type and the file's timestamp into the load address
/// and the low timestamp word into the execute address.
pub fn get_meta(path: &Path, st: Option<&Metadata>, typemap: &TypeMap) -> FileMeta {
    if let Ok(target) = fs::read_link(metapath(path)) {
        let raw = target.to_string_lossy();
        if raw.len() == 23 {
            let byte_at = |i: usize| parse_hex32(&raw[i * 3..i * 3 + 2]);
            let assemble = |base: usize| -> Option<u32> {
                let mut v: u32 = 0;
                for i in (0..4).rev() {
                    v = (v << 8) | byte_at(base + i)?;
                }
                Some(v)
            };
            if let (Some(load), Some(exec)) = (assemble(0), assemble(4)) {
                return FileMeta { load, exec };
            }
        } else if raw.len() == 17 {
            if let (Some(load), Some(exec)) = (parse_hex32(&raw[0..8]), parse_hex32(&raw[9..17]))
            {
                return FileMeta { load, exec };
            }
        }
    }
    match st {
        Some(st) => {
            let stamp = riscos_stamp(st.modified().unwrap_or(UNIX_EPOCH));
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            let filetype = typemap.guess(&name, st.mode());
            FileMeta {
                load: 0xfff0_0000 | (u32::from(filetype) << 8) | ((stamp >> 32) as u32 & 0xff),
                exec: stamp as u32,
            }
        }
        None => FileMeta {
            load: 0xdead_dead,
            exec: 0xdead_dead,
        },
    }
}

/// Write the sidecar metadata of `path`.
///
/// The `.Acorn` directory is removed if empty and recreated, so a stale
/// non-directory of that name cannot wedge the store; then the symlink
/// is replaced with the short encoding.
pub fn set_meta(path: &Path, meta: &FileMeta) -> io::Result<()> {
    let link = metapath(path);
    let Some(dir) = link.parent() else {
        return Err(io::Error::from_raw_os_error(libc::ENOENT));
    };
    match fs::remove_dir(dir) {
        Ok(()) => fs::create_dir(dir)?,
        Err(e) if e.raw_os_error() == Some(libc::ENOENT) => fs::create_dir(dir)?,
        Err(e) if e.raw_os_error() == Some(libc::ENOTEMPTY) => {}
        Err(e) => return Err(e),
    }
    let encoded = format!("{:08X} {:08X}", meta.load, meta.exec);
    match fs::remove_file(&link) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    symlink(encoded, &link)
}

/// Remove the sidecar metadata of `path`, and its `.Acorn` directory if
/// that leaves it empty.
pub fn del_meta(path: &Path) {
    let link = metapath(path);
    let _ = fs::remove_file(&link);
    if let Some(dir) = link.parent() {
        let _ = fs::remove_dir(dir);
    }
}

/// System Internal Name: a 24-bit identifier expected to be unique
/// across the disc.  Faked from the low bits of the inode number.
pub fn get_sin(st: &Metadata) -> u32 {
    (st.ino() & 0xff_ffff) as u32
}

/// Creation time of a file, or the closest approximation the host
/// offers.
pub fn get_birthtime(st: &Metadata) -> SystemTime {
    st.created()
        .or_else(|_| st.modified())
        .unwrap_or(UNIX_EPOCH)
}

/// Mostly like `stat(2)`, but if called on a broken symlink, returns
/// information on the symlink itself.
pub fn fs_stat(path: &Path) -> io::Result<Metadata> {
    match fs::metadata(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::symlink_metadata(path),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn access_mode_round_trip() {
        let access = mode_to_access(0o644);
        assert_eq!(access, Access::OWNER_READ | Access::OWNER_WRITE | Access::PUB_READ);
        let mode = access_to_mode(access, false);
        assert_eq!(mode, libc::S_IRUSR | libc::S_IWUSR | libc::S_IROTH | libc::S_IRGRP);
    }

    #[test]
    fn directory_access() {
        let access = mode_to_access(libc::S_IFDIR | 0o755);
        assert!(access.contains(Access::DIR));
        assert_eq!(mode_to_type(libc::S_IFDIR | 0o755), ObjType::Dir);
        assert_eq!(mode_to_type(libc::S_IFREG | 0o644), ObjType::File);
    }

    #[test]
    fn access_string_order() {
        let s = access_to_string(
            Access::DIR | Access::LOCKED | Access::OWNER_WRITE | Access::OWNER_READ
                | Access::PUB_READ,
        );
        assert_eq!(s, "DLWR/r");
        assert_eq!(access_to_string(Access::empty()), "/");
    }

    #[test]
    fn date_packing() {
        let t = Local.with_ymd_and_hms(1997, 3, 14, 12, 0, 0).unwrap();
        let packed = pack_date(SystemTime::from(t));
        // Year offset 16: high nibble bit in the day byte, low nibble in
        // the month byte.
        assert_eq!(packed[0] & 0x1f, 14);
        assert_eq!(packed[1] & 0x0f, 3);
        let year81 = u32::from(packed[1] >> 4) | (u32::from(packed[0] & 0xe0) >> 1);
        assert_eq!(year81, 16);
    }

    #[test]
    fn date_clamps_before_1981() {
        let t = Local.with_ymd_and_hms(1975, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(pack_date(SystemTime::from(t)), [1, 1]);
    }

    #[test]
    fn sidecar_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("prog");
        std::fs::write(&file, b"x").unwrap();
        let meta = FileMeta { load: 0xffff_1234, exec: 0x0000_8023 };
        set_meta(&file, &meta).unwrap();
        let tm = TypeMap::default();
        let st = fs_stat(&file).unwrap();
        assert_eq!(get_meta(&file, Some(&st), &tm), meta);
        // Rewriting goes through the unlink-and-recreate path.
        let meta2 = FileMeta { load: 1, exec: 2 };
        set_meta(&file, &meta2).unwrap();
        assert_eq!(get_meta(&file, Some(&st), &tm), meta2);
        del_meta(&file);
        assert!(!dir.path().join(".Acorn").exists());
    }

    #[test]
    fn long_form_sidecar_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data");
        std::fs::write(&file, b"x").unwrap();
        let sidecar_dir = dir.path().join(".Acorn");
        std::fs::create_dir(&sidecar_dir).unwrap();
        // 23-byte form: eight space-separated hex bytes, little-endian.
        symlink("34 12 F0 FF 23 80 00 00", sidecar_dir.join("data")).unwrap();
        let tm = TypeMap::default();
        let st = fs_stat(&file).unwrap();
        let meta = get_meta(&file, Some(&st), &tm);
        assert_eq!(meta.load, 0xfff0_1234);
        assert_eq!(meta.exec, 0x0000_8023);
    }

    #[test]
    fn synthesized_meta_encodes_type() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note");
        std::fs::write(&file, b"x").unwrap();
        let tm = TypeMap::default();
        let st = fs_stat(&file).unwrap();
        let meta = get_meta(&file, Some(&st), &tm);
        assert_eq!(meta.load >> 20, 0xfff);
        assert_eq!((meta.load >> 8) & 0xfff, 0xffd);
    }
}
