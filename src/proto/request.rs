//! Request framing.
//!
//! A request payload starts with a reply port and a function code.  Most
//! functions follow those with the context triple — the client's user
//! root, current directory and library handles — but the single-byte I/O
//! calls omit the triple entirely, and the bulk-data calls repurpose the
//! user-root byte as a data or acknowledge port.

use std::error;
use std::fmt;

use num_enum::TryFromPrimitive;

/// Function codes of the file-server protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Function {
    /// `*`-command line, interpreted server-side.
    Cli = 0,
    /// Save a file (bulk receive).
    Save = 1,
    /// Load a file (bulk send).
    Load = 2,
    /// Directory listing.
    Examine = 3,
    /// Directory catalogue header.
    CatHeader = 4,
    /// Load as command (search the library on failure).
    LoadCommand = 5,
    /// Open a file or directory handle.
    Open = 6,
    /// Close a handle (0 = all file handles).
    Close = 7,
    /// Read one byte.
    GetByte = 8,
    /// Write one byte.
    PutByte = 9,
    /// Streamed read.
    GetBytes = 10,
    /// Streamed write.
    PutBytes = 11,
    /// Read stream pointer / extent / allocation.
    GetArgs = 12,
    /// Set stream pointer / extent / allocation.
    SetArgs = 13,
    /// Enumerate discs.
    GetDiscs = 14,
    /// Enumerate logged-on users.
    GetUsersOn = 15,
    /// Read date and time.
    GetTime = 16,
    /// Read end-of-file status of a handle.
    GetEof = 17,
    /// Read object info.
    GetInfo = 18,
    /// Set object info.
    SetInfo = 19,
    /// Delete an object.
    Delete = 20,
    /// Read user environment.
    GetUEnv = 21,
    /// Set boot option.
    SetOpt4 = 22,
    /// Log off.
    Logoff = 23,
    /// Read info on a named user.
    GetUser = 24,
    /// Read file server version.
    GetVersion = 25,
    /// Read disc free space.
    GetDiscFree = 26,
    /// Create a directory.
    CdirN = 27,
    /// Set fileserver date and time (recognised, never served).
    SetTime = 28,
    /// Create a file without data transfer.
    Create = 29,
    /// Read user free space.
    GetUserFree = 30,
}

/// How a function interprets the three context bytes after the function
/// code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextClass {
    /// User root, current directory and library handles.
    Full,
    /// A data/acknowledge port where the user root handle would be,
    /// then current directory and library handles.
    Port,
    /// No context bytes at all; arguments follow the function code.
    None,
}

impl Function {
    /// The context class of this function.
    pub fn context_class(self) -> ContextClass {
        match self {
            Function::Load
            | Function::LoadCommand
            | Function::Save
            | Function::GetBytes
            | Function::PutBytes => ContextClass::Port,
            Function::GetByte | Function::PutByte => ContextClass::None,
            _ => ContextClass::Full,
        }
    }
}

/// Error that may occur while framing a request from a client.
#[derive(Debug)]
pub enum RequestError {
    /// Not enough data for the two-byte payload prefix.
    ShortRead(usize),
    /// Not enough data for the function's context bytes.
    ShortContext(usize),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::ShortRead(len) => {
                write!(f, "Short read of request payload ({len} < 2)")
            }
            RequestError::ShortContext(len) => {
                write!(f, "Short read of request context ({len} < 3)")
            }
        }
    }
}

impl error::Error for RequestError {}

/// A framed request: reply port, raw function code and everything after.
#[derive(Debug)]
pub struct Request<'a> {
    /// Port the client expects the reply on.
    pub reply_port: u8,
    /// Raw function code; may not name a known [`Function`].
    pub function: u8,
    /// Flag byte from the frame header; bit 0 is the sequence marker.
    pub flag: u8,
    /// Payload after the function code, context bytes included.
    pub data: &'a [u8],
}

impl<'a> Request<'a> {
    /// Frame a request from a received payload and its header flag.
    pub fn parse(payload: &'a [u8], flag: u8) -> Result<Request<'a>, RequestError> {
        if payload.len() < 2 {
            return Err(RequestError::ShortRead(payload.len()));
        }
        Ok(Request {
            reply_port: payload[0],
            function: payload[1],
            flag,
            data: &payload[2..],
        })
    }
}

/// The validated context of a request, with invalid handles zeroed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReqContext {
    /// User root directory handle (0 if unset or repurposed).
    pub urd: u8,
    /// Currently selected directory handle.
    pub csd: u8,
    /// Library directory handle.
    pub lib: u8,
    /// Data or acknowledge port carried by the bulk-data functions.
    pub port: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_codes_are_dense() {
        for code in 0u8..=30 {
            assert!(Function::try_from(code).is_ok(), "code {code}");
        }
        assert!(Function::try_from(31u8).is_err());
    }

    #[test]
    fn context_classes() {
        assert_eq!(Function::Open.context_class(), ContextClass::Full);
        assert_eq!(Function::Save.context_class(), ContextClass::Port);
        assert_eq!(Function::GetByte.context_class(), ContextClass::None);
    }

    #[test]
    fn parse_request() {
        let req = Request::parse(&[0x90, 6, 1, 2, 3, 0xff], 0x81).unwrap();
        assert_eq!(req.reply_port, 0x90);
        assert_eq!(req.function, 6);
        assert_eq!(req.flag, 0x81);
        assert_eq!(req.data, &[1, 2, 3, 0xff]);
        assert!(Request::parse(&[0x90], 0).is_err());
    }
}
