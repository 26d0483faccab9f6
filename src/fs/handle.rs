//! Per-session numbered handles.
//!
//! Handle allocation is slightly tricksy owing to strange behaviour on
//! the part of early eight-bit clients.  These require that any handle
//! they might do I/O on be a power of two, because they keep all their
//! sequence flags in a single byte and mask out the right one using the
//! handle number.  Handles opened for directory context are never used
//! for I/O, so those prefer non-powers-of-two to preserve the precious
//! stock of power-of-two values.  Handle 255 is what the same clients
//! send when asked for a handle they know cannot exist, so it is
//! allocated only as a last resort, and never while `safehandles` is on.

use std::ffi::OsString;
use std::fs::File;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::ffi::OsStringExt;
use std::path::PathBuf;

use nix::fcntl::Flock;

/// Table capacity; handle 0 is the reserved null handle.
pub const MAX_HANDLES: usize = 256;

/// Sequence sentinel: no request seen yet, accept either bit first.
pub const SEQUENCE_UNKNOWN: u8 = 0xff;

/// State carried only by file handles.
#[derive(Debug)]
pub struct FileState {
    /// The open descriptor, held under an advisory lock.
    pub file: Flock<File>,
    /// Last sequence bit seen from the client, or [`SEQUENCE_UNKNOWN`].
    pub sequence: u8,
    /// Stream position saved for retransmission recovery.
    pub old_offset: u64,
    /// Opened read-only.
    pub read_only: bool,
    /// Caller owns the file's directory subtree.
    pub is_owner: bool,
    /// Mode bits permit reading.
    pub can_read: bool,
    /// Mode bits permit writing.
    pub can_write: bool,
    /// The owner-execute bit marks the file locked.
    pub is_locked: bool,
    /// The open created the file.
    pub did_create: bool,
}

/// What a handle refers to.
#[derive(Debug)]
pub enum HandleKind {
    /// An open file.
    File(FileState),
    /// A directory reference.
    Dir,
}

/// One numbered handle.
#[derive(Debug)]
pub struct Handle {
    /// Unix path the handle was opened on, without a trailing slash.
    pub path: PathBuf,
    /// File or directory state.
    pub kind: HandleKind,
}

impl Handle {
    /// The file state, if this is a file handle.
    pub fn file(&self) -> Option<&FileState> {
        match &self.kind {
            HandleKind::File(f) => Some(f),
            HandleKind::Dir => None,
        }
    }

    /// Mutable file state, if this is a file handle.
    pub fn file_mut(&mut self) -> Option<&mut FileState> {
        match &mut self.kind {
            HandleKind::File(f) => Some(f),
            HandleKind::Dir => None,
        }
    }

    /// True for directory handles.
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, HandleKind::Dir)
    }
}

/// The dense handle table of one session.
#[derive(Debug, Default)]
pub struct HandleTable {
    slots: Vec<Option<Handle>>,
}

fn is_power_of_two(h: usize) -> bool {
    h & (h - 1) == 0
}

impl HandleTable {
    /// A fresh table with the null handle and room for the login triple.
    pub fn new() -> HandleTable {
        let mut slots = Vec::with_capacity(8);
        slots.resize_with(4, || None);
        HandleTable { slots }
    }

    fn free_at(&self, h: usize) -> bool {
        h >= self.slots.len() || self.slots[h].is_none()
    }

    fn alloc_p2(&self) -> Option<usize> {
        let mut h = 1;
        while h < MAX_HANDLES {
            if self.free_at(h) {
                return Some(h);
            }
            h <<= 1;
        }
        None
    }

    fn alloc_np2(&self) -> Option<usize> {
        (1..MAX_HANDLES - 1).find(|&h| !is_power_of_two(h) && self.free_at(h))
    }

    fn alloc_255(&self) -> Option<usize> {
        self.free_at(255).then_some(255)
    }

    fn alloc(&mut self, for_open: bool, safehandles: bool) -> Option<u8> {
        let h = if for_open {
            self.alloc_p2().or_else(|| {
                if safehandles {
                    None
                } else {
                    self.alloc_np2().or_else(|| self.alloc_255())
                }
            })
        } else {
            self.alloc_np2()
                .or_else(|| self.alloc_p2())
                .or_else(|| if safehandles { None } else { self.alloc_255() })
        }?;
        if h >= self.slots.len() {
            self.slots.resize_with(h + 1, || None);
        }
        Some(h as u8)
    }

    /// Allocate a slot and store `handle` in it.  `for_open` selects the
    /// power-of-two policy.  Returns 0 when the table is exhausted.
    pub fn insert(&mut self, for_open: bool, safehandles: bool, mut handle: Handle) -> u8 {
        let Some(h) = self.alloc(for_open, safehandles) else {
            return 0;
        };
        // Strip a trailing slash so leafname extraction behaves.
        let bytes = handle.path.as_os_str().as_bytes();
        if bytes.len() > 1 && bytes.ends_with(b"/") {
            let trimmed = bytes[..bytes.len() - 1].to_vec();
            handle.path = PathBuf::from(OsString::from_vec(trimmed));
        }
        self.slots[h as usize] = Some(handle);
        h
    }

    /// The handle if it is valid, 0 if it is not.
    pub fn check(&self, h: u8) -> u8 {
        if self.get(h).is_some() { h } else { 0 }
    }

    /// Look up a handle; handle 0 is never valid.
    pub fn get(&self, h: u8) -> Option<&Handle> {
        if h == 0 {
            return None;
        }
        self.slots.get(h as usize)?.as_ref()
    }

    /// Mutable lookup.
    pub fn get_mut(&mut self, h: u8) -> Option<&mut Handle> {
        if h == 0 {
            return None;
        }
        self.slots.get_mut(h as usize)?.as_mut()
    }

    /// Free a slot, closing the descriptor it owns.
    pub fn release(&mut self, h: u8) -> Option<Handle> {
        if h == 0 {
            return None;
        }
        self.slots.get_mut(h as usize)?.take()
    }

    /// Numbers of all live handles.
    pub fn live(&self) -> Vec<u8> {
        (1..self.slots.len())
            .filter(|&h| self.slots[h].is_some())
            .map(|h| h as u8)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::FlockArg;

    fn dir_handle() -> Handle {
        Handle {
            path: PathBuf::from("."),
            kind: HandleKind::Dir,
        }
    }

    fn file_handle() -> Handle {
        let file = tempfile::tempfile().unwrap();
        let file = Flock::lock(file, FlockArg::LockSharedNonblock)
            .map_err(|(_, e)| e)
            .unwrap();
        Handle {
            path: PathBuf::from("x"),
            kind: HandleKind::File(FileState {
                file,
                sequence: SEQUENCE_UNKNOWN,
                old_offset: 0,
                read_only: false,
                is_owner: true,
                can_read: true,
                can_write: true,
                is_locked: false,
                did_create: false,
            }),
        }
    }

    #[test]
    fn file_opens_get_powers_of_two() {
        let mut t = HandleTable::new();
        let got: Vec<u8> = (0..8).map(|_| t.insert(true, true, file_handle())).collect();
        assert_eq!(got, vec![1, 2, 4, 8, 16, 32, 64, 128]);
        // Safe handles: the pool is dry now.
        assert_eq!(t.insert(true, true, file_handle()), 0);
        // Without safe handles the non-powers are fair game.
        assert_eq!(t.insert(true, false, file_handle()), 3);
    }

    #[test]
    fn directory_handles_avoid_powers_of_two() {
        let mut t = HandleTable::new();
        assert_eq!(t.insert(false, true, dir_handle()), 3);
        assert_eq!(t.insert(false, true, dir_handle()), 5);
        assert_eq!(t.insert(false, true, dir_handle()), 6);
    }

    #[test]
    fn handle_255_is_last_resort() {
        let mut t = HandleTable::new();
        for h in 1..255 {
            let kind = dir_handle();
            t.slots.resize_with((h + 1).max(t.slots.len()), || None);
            t.slots[h] = Some(kind);
        }
        assert_eq!(t.insert(false, true, dir_handle()), 0);
        assert_eq!(t.insert(false, false, dir_handle()), 255);
    }

    #[test]
    fn check_and_release() {
        let mut t = HandleTable::new();
        let h = t.insert(false, true, dir_handle());
        assert_eq!(t.check(h), h);
        assert_eq!(t.check(0), 0);
        assert_eq!(t.check(200), 0);
        assert!(t.release(h).is_some());
        assert_eq!(t.check(h), 0);
        assert!(t.release(h).is_none());
    }
}
