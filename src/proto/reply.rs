//! Reply construction.
//!
//! A reply body starts with a command code — what the client is expected
//! to do next — and a return code (0 for success).  Variable parts
//! follow: little-endian integers of odd widths, fixed-width padded
//! string slots, CR-terminated strings and packed dates.  Buffers are
//! byte-exact: no terminators or padding beyond what the protocol asks
//! for.

use smallvec::SmallVec;

use crate::proto::errors::FsError;

/// Command codes: the follow-up action expected of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    /// No further action.
    Done = 0,
    /// Perform a save with the returned arguments.
    Save = 1,
    /// Perform a load with the returned arguments.
    Load = 2,
    /// Perform a catalogue with the returned path.
    Cat = 3,
    /// Display the returned object information.
    Info = 4,
    /// Store the returned handle triple and boot option.
    Logon = 5,
    /// Store the returned handle triple.
    Sdisc = 6,
    /// Store the returned current-directory handle.
    Dir = 7,
    /// The command was not recognised; the client may interpret it.
    Unrec = 8,
    /// Store the returned library handle.
    Lib = 9,
    /// Disc enumeration records follow.
    Discs = 10,
}

/// Return code for success.
pub const RC_OK: u8 = 0;

const INLINE_REPLY_THRESHOLD: usize = 64;

/// A reply body under construction.
#[derive(Debug)]
pub struct Reply {
    buf: SmallVec<[u8; INLINE_REPLY_THRESHOLD]>,
}

impl Reply {
    /// Start a successful reply with the given command code.
    pub fn new(cc: CommandCode) -> Reply {
        let mut buf = SmallVec::new();
        buf.push(cc as u8);
        buf.push(RC_OK);
        Reply { buf }
    }

    /// Build an error reply: command code Done, the error's return code,
    /// and its CR-terminated message.
    pub fn error(err: &FsError) -> Reply {
        let mut buf = SmallVec::new();
        buf.push(CommandCode::Done as u8);
        buf.push(err.code());
        buf.extend_from_slice(err.message().as_bytes());
        buf.push(b'\r');
        Reply { buf }
    }

    /// Overwrite the return code.
    pub fn set_return_code(&mut self, rc: u8) {
        self.buf[1] = rc;
    }

    /// Append one byte.
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    /// Append a little-endian unsigned value of `len` bytes, clamping to
    /// the largest value the field can carry.
    pub fn val(&mut self, value: u64, len: usize) -> &mut Self {
        let max = if len >= 8 { u64::MAX } else { (1u64 << (len * 8)) - 1 };
        let v = value.min(max);
        for i in 0..len {
            self.buf.push((v >> (8 * i)) as u8);
        }
        self
    }

    /// Append raw bytes.
    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    /// Append a string into a fixed-width slot, truncated or padded with
    /// `pad` as needed.
    pub fn padded(&mut self, s: &str, width: usize, pad: u8) -> &mut Self {
        let bytes = s.as_bytes();
        let take = bytes.len().min(width);
        self.buf.extend_from_slice(&bytes[..take]);
        for _ in take..width {
            self.buf.push(pad);
        }
        self
    }

    /// Append a CR-terminated string.
    pub fn cr_str(&mut self, s: &str) -> &mut Self {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(b'\r');
        self
    }

    /// The assembled body.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::errors::ErrorCode;

    #[test]
    fn success_reply() {
        let mut r = Reply::new(CommandCode::Done);
        r.u8(4).val(0x123456, 3).padded("hi", 4, b' ');
        assert_eq!(r.as_bytes(), &[0, 0, 4, 0x56, 0x34, 0x12, b'h', b'i', b' ', b' ']);
    }

    #[test]
    fn value_clamping() {
        let mut r = Reply::new(CommandCode::Done);
        r.val(0x1_0000_0000, 3);
        assert_eq!(&r.as_bytes()[2..], &[0xff, 0xff, 0xff]);
    }

    #[test]
    fn error_reply() {
        let r = Reply::error(&FsError::Code(ErrorCode::Channel));
        assert_eq!(&r.as_bytes()[..2], &[0, 0xde]);
        assert!(r.as_bytes().ends_with(b"Channel\r"));
    }
}
