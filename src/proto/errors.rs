//! Protocol error codes and the server-side error type.
//!
//! Errors surface to clients as a reply whose return code is non-zero,
//! followed by a CR-terminated human-readable message.  Host I/O errors
//! map onto protocol codes through a fixed table; anything unmapped goes
//! out as code `0xff` with the operating system's own text.

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::io;

/// Protocol error codes, as understood by the historic clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// Invalid sub-argument to the directory-listing call.
    BadExamine = 0x4f,
    /// Invalid sub-argument to the object-info call.
    BadInfo = 0x8e,
    /// Invalid sub-argument to the random-access-info call.
    BadArgs = 0x8f,
    /// Server out of memory.
    NoMem = 0x90,
    /// Named user has no live session.
    UserNotOn = 0xae,
    /// Rename would cross discs.
    RenXDev = 0xb0,
    /// User id already exists.
    UserExist = 0xb1,
    /// Password file full.
    PwfFull = 0xb2,
    /// Maximum directory size reached.
    DirFull = 0xb3,
    /// Directory not empty.
    DirNotEmpty = 0xb4,
    /// Object is a directory.
    IsDir = 0xb5,
    /// Disc error on map read/write.
    MapDiscErr = 0xb6,
    /// Attempt to point outside a file.
    OutsideFile = 0xb7,
    /// Too many users.
    ManyUsers = 0xb8,
    /// Bad password.
    BadPw = 0xb9,
    /// Insufficient privilege.
    NoPriv = 0xba,
    /// Incorrect password.
    WrongPw = 0xbb,
    /// User not known.
    BadUser = 0xbc,
    /// Insufficient access.
    NoAccess = 0xbd,
    /// Object not a directory.
    NotDir = 0xbe,
    /// Request needs a session but the source address has none.
    WhoAreYou = 0xbf,
    /// Too many open files.
    ManyOpen = 0xc0,
    /// File not open for update.
    RdOnly = 0xc1,
    /// Already open elsewhere.
    Open = 0xc2,
    /// Entry locked.
    Locked = 0xc3,
    /// Disc full.
    DiscFull = 0xc6,
    /// Unrecoverable disc error.
    DiscErr = 0xc7,
    /// Disc number not found.
    BadDisc = 0xc8,
    /// Disc protected.
    DiscProt = 0xc9,
    /// Bad file name.
    BadName = 0xcc,
    /// Invalid access string.
    BadAccess = 0xcf,
    /// Object not found.
    NotFound = 0xd6,
    /// Channel (invalid or absent handle).
    Channel = 0xde,
    /// End of file.
    Eof = 0xdf,
    /// Bad string.
    BadStr = 0xfd,
    /// Bad command.
    BadCmd = 0xfe,
}

impl ErrorCode {
    /// The canonical message text for this code.
    pub fn message(self) -> &'static str {
        use ErrorCode::*;
        match self {
            BadExamine => "Bad EXAMINE argument",
            BadInfo => "Bad INFO argument",
            BadArgs => "Bad RDARGS argument",
            NoMem => "Server out of memory",
            UserNotOn => "User not logged on",
            RenXDev => "Renaming across two discs",
            UserExist => "User id. already exists",
            PwfFull => "Password file full",
            DirFull => "Maximum directory size reached",
            DirNotEmpty => "Directory not empty",
            IsDir => "Is a directory",
            MapDiscErr => "Disc error on map read/write",
            OutsideFile => "Attempt to point outside a file",
            ManyUsers => "Too many users",
            BadPw => "Bad password",
            NoPriv => "Insufficient privilege",
            WrongPw => "Incorrect password",
            BadUser => "User not known",
            NoAccess => "Insufficient access",
            NotDir => "Object not a directory",
            WhoAreYou => "Who are you?",
            ManyOpen => "Too many open files",
            RdOnly => "File not open for update",
            Open => "Already open",
            Locked => "Entry locked",
            DiscFull => "Disc full",
            DiscErr => "Unrecoverable disc error",
            BadDisc => "Disc number not found",
            DiscProt => "Disc protected",
            BadName => "Bad file name",
            BadAccess => "Invalid access string",
            NotFound => "Not found",
            Channel => "Channel",
            Eof => "End of file",
            BadStr => "Bad string",
            BadCmd => "Bad command",
        }
    }
}

/// Map a raw OS error number onto a protocol code, if the table knows it.
fn errno_to_code(errno: i32) -> Option<ErrorCode> {
    let code = match errno {
        libc::EPERM => ErrorCode::NoPriv,
        libc::ENOENT => ErrorCode::NotFound,
        libc::EIO => ErrorCode::DiscErr,
        libc::ENOMEM => ErrorCode::NoMem,
        libc::EACCES => ErrorCode::NoAccess,
        libc::EXDEV => ErrorCode::RenXDev,
        libc::ENOTDIR => ErrorCode::NotDir,
        libc::EISDIR => ErrorCode::IsDir,
        libc::ENFILE | libc::EMFILE => ErrorCode::ManyOpen,
        libc::ENOSPC => ErrorCode::DiscFull,
        libc::EROFS => ErrorCode::DiscProt,
        libc::ENAMETOOLONG => ErrorCode::BadName,
        libc::ENOTEMPTY => ErrorCode::DirNotEmpty,
        libc::EUSERS => ErrorCode::ManyUsers,
        libc::EDQUOT => ErrorCode::DiscFull,
        _ => return None,
    };
    Some(code)
}

/// An error to be reported to the requesting client.
///
/// Handlers return this; the dispatcher serialises it into an error
/// reply.  No handler failure terminates the server.
#[derive(Debug)]
pub enum FsError {
    /// A protocol error with its canonical message.
    Code(ErrorCode),
    /// Code `0xff` with fixed explanatory text.
    Custom(&'static str),
    /// An unmapped host error, reported as code `0xff` with the OS text.
    Os(String),
}

impl FsError {
    /// The return code to put on the wire.
    pub fn code(&self) -> u8 {
        match self {
            FsError::Code(c) => *c as u8,
            FsError::Custom(_) | FsError::Os(_) => 0xff,
        }
    }

    /// The message to put on the wire.
    pub fn message(&self) -> Cow<'_, str> {
        match self {
            FsError::Code(c) => Cow::Borrowed(c.message()),
            FsError::Custom(s) => Cow::Borrowed(s),
            FsError::Os(s) => Cow::Borrowed(s),
        }
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x} {}", self.code(), self.message())
    }
}

impl error::Error for FsError {}

impl From<ErrorCode> for FsError {
    fn from(code: ErrorCode) -> Self {
        FsError::Code(code)
    }
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error().and_then(errno_to_code) {
            Some(code) => FsError::Code(code),
            None => FsError::Os(err.to_string()),
        }
    }
}

impl From<nix::errno::Errno> for FsError {
    fn from(errno: nix::errno::Errno) -> Self {
        FsError::from(io::Error::from(errno))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        let err = io::Error::from_raw_os_error(libc::ENOENT);
        assert!(matches!(FsError::from(err), FsError::Code(ErrorCode::NotFound)));
        let err = io::Error::from_raw_os_error(libc::EMFILE);
        assert!(matches!(FsError::from(err), FsError::Code(ErrorCode::ManyOpen)));
    }

    #[test]
    fn unmapped_errno_is_ff() {
        let err = io::Error::from_raw_os_error(libc::ETIMEDOUT);
        let fse = FsError::from(err);
        assert_eq!(fse.code(), 0xff);
        assert!(!fse.message().is_empty());
    }

    #[test]
    fn canonical_messages() {
        assert_eq!(ErrorCode::Channel.message(), "Channel");
        assert_eq!(FsError::Code(ErrorCode::WhoAreYou).code(), 0xbf);
    }
}
