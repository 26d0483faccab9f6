//! Per-client session state.
//!
//! A session exists from a successful login until logoff; at most one
//! per transport address.  It owns the handle table, the directory
//! listing cache, and the session-scoped options a client can change
//! with `*FSOPT`.

use std::path::PathBuf;

use crate::InfoFormat;
use crate::fs::handle::HandleTable;
use crate::proto::frame::SrcAddr;
use crate::users::Privilege;

/// Cached position of an in-progress directory listing.
///
/// The cache is created on the first examine of a path, continues a
/// listing without rescanning, and is dropped when the listing runs off
/// the end of the directory.
#[derive(Debug)]
pub struct DirCache {
    /// Unix path the listing walks.
    pub path: PathBuf,
    /// Leaf names, sorted case-insensitively.
    pub names: Vec<String>,
    /// Index into `names` of the next entry to emit.
    pub pos: usize,
    /// Count of visible entries already emitted, matching the client's
    /// next expected start offset.
    pub start: usize,
}

/// One logged-on client.
#[derive(Debug)]
pub struct Session {
    /// Transport address the session is keyed by.
    pub host: SrcAddr,
    /// Login name.
    pub login: String,
    /// Privilege level from the user provider.
    pub privilege: Privilege,
    /// The numbered handles of this session.
    pub handles: HandleTable,
    /// In-progress directory listing, if any.
    pub dir_cache: Option<DirCache>,
    /// Which `*INFO` text format the client wants.
    pub infofmt: InfoFormat,
    /// Restrict file handles to powers of two.
    pub safehandles: bool,
}

impl Session {
    /// A fresh session for a client at `host`.
    pub fn new(host: SrcAddr, login: String, infofmt: InfoFormat, safehandles: bool) -> Session {
        Session {
            host,
            login,
            privilege: Privilege::None,
            handles: HandleTable::new(),
            dir_cache: None,
            infofmt,
            safehandles,
        }
    }
}
