//! A fileserver for legacy packet-oriented network clients, serving a
//! Unix directory tree as a single virtual disc.
//!
//! Clients open, read, write, delete, rename and catalogue files with
//! the semantics their OSes expect: short leaf names, per-file load and
//! execute addresses, owner/public access bits, open-time locking, boot
//! options and user accounts.  The datagram transport is pluggable
//! ([`transport`]), the request engine single-threaded ([`fs`]), and
//! the user database swappable ([`users`]).

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use crate::config::Config;
pub use crate::config::ConfigError;
pub use crate::fs::FileServer;
pub use crate::fs::ServerOptions;
pub use crate::proto::errors::ErrorCode;
pub use crate::proto::errors::FsError;
pub use crate::proto::frame::SrcAddr;
pub use crate::transport::Transport;
pub use crate::users::Privilege;
pub use crate::users::UserProvider;

pub mod config;
pub mod fs;
pub mod proto;
pub mod transport;
pub mod users;

/// Which shape of catalogue text `*INFO` and long listings produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoFormat {
    /// The format in the RISC OS PRM (plus the CR everything expects).
    RiscOs,
    /// The formats from the SJ Research file server manual.
    Sj,
}
