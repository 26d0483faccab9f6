//! Argument decomposition for file-server requests.
//!
//! Helper to decompose a slice of binary data (an incoming request
//! payload) into multiple data structures (request arguments).  Integer
//! fields are little-endian and come in odd widths (two- and three-byte
//! values are common); in-band strings are CR-terminated.

use memchr::memchr;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::KnownLayout;
use zerocopy::error::ConvertError;

/// An iterator that can be used to fetch typed arguments from a byte slice.
pub(crate) struct ArgumentIterator<'a> {
    data: &'a [u8],
}

impl<'a> ArgumentIterator<'a> {
    /// Create a new argument iterator for the given byte slice.
    pub(crate) fn new(data: &'a [u8]) -> ArgumentIterator<'a> {
        ArgumentIterator { data }
    }

    /// Returns the size of the remaining data.
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    /// Fetch a slice of all remaining bytes.
    pub(crate) fn fetch_all(&mut self) -> &'a [u8] {
        let bytes = self.data;
        self.data = &[];
        bytes
    }

    /// Fetch a typed argument. Returns `None` if there's not enough data left.
    pub(crate) fn fetch<T: FromBytes + KnownLayout + Immutable>(&mut self) -> Option<&'a T> {
        match zerocopy::Ref::<_, T>::from_prefix(self.data) {
            Err(ConvertError::Alignment(_)) => {
                // All wire structs are byte-aligned, so this is under the
                // control of the programmer rather than the client.
                panic!("Data unaligned");
            }
            Err(ConvertError::Size(_)) => None,
            Err(ConvertError::Validity(infallible)) => match infallible {},
            Ok((x, rest)) => {
                self.data = rest;
                Some(zerocopy::Ref::<&[u8], T>::into_ref(x))
            }
        }
    }

    /// Fetch a single byte.
    pub(crate) fn fetch_u8(&mut self) -> Option<u8> {
        let (&b, rest) = self.data.split_first()?;
        self.data = rest;
        Some(b)
    }

    /// Fetch a little-endian unsigned value of `len` bytes (`len` ≤ 8).
    pub(crate) fn fetch_val(&mut self, len: usize) -> Option<u64> {
        if self.data.len() < len {
            return None;
        }
        let (field, rest) = self.data.split_at(len);
        self.data = rest;
        let mut value = 0u64;
        for &b in field.iter().rev() {
            value = (value << 8) | u64::from(b);
        }
        Some(value)
    }

    /// Fetch a CR-terminated string (can be non-utf8).  If no terminator
    /// is present the remainder of the data is taken, since clients are
    /// not reliable about terminating the final field.
    pub(crate) fn fetch_cr_str(&mut self) -> &'a [u8] {
        match memchr(b'\r', self.data) {
            Some(len) => {
                let (out, rest) = self.data.split_at(len);
                self.data = &rest[1..];
                out
            }
            None => self.fetch_all(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DATA: [u8; 10] = [0x66, 0x6f, 0x6f, 0x0d, 0x62, 0x61, 0x72, 0x0d, 0x62, 0x61];

    #[repr(C)]
    #[derive(FromBytes, KnownLayout, Immutable)]
    struct TestArgument {
        p1: u8,
        p2: u8,
        p3: [u8; 2],
    }

    #[test]
    fn all_data() {
        let mut it = ArgumentIterator::new(&TEST_DATA);
        it.fetch_cr_str();
        let arg = it.fetch_all();
        assert_eq!(arg, [0x62, 0x61, 0x72, 0x0d, 0x62, 0x61]);
    }

    #[test]
    fn generic_argument() {
        let mut it = ArgumentIterator::new(&TEST_DATA);
        let arg: &TestArgument = it.fetch().unwrap();
        assert_eq!(arg.p1, 0x66);
        assert_eq!(arg.p2, 0x6f);
        assert_eq!(arg.p3, [0x6f, 0x0d]);
        let arg: &TestArgument = it.fetch().unwrap();
        assert_eq!(arg.p1, 0x62);
        assert_eq!(arg.p2, 0x61);
        assert_eq!(arg.p3, [0x72, 0x0d]);
        assert_eq!(it.len(), 2);
    }

    #[test]
    fn string_argument() {
        let mut it = ArgumentIterator::new(&TEST_DATA);
        assert_eq!(it.fetch_cr_str(), b"foo");
        assert_eq!(it.fetch_cr_str(), b"bar");
        // No terminator on the final fragment.
        assert_eq!(it.fetch_cr_str(), b"ba");
        assert_eq!(it.len(), 0);
    }

    #[test]
    fn little_endian_values() {
        let mut it = ArgumentIterator::new(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(it.fetch_val(3), Some(0x030201));
        assert_eq!(it.fetch_val(1), Some(0x04));
        assert_eq!(it.fetch_val(1), None);
    }

    #[test]
    fn out_of_data() {
        let mut it = ArgumentIterator::new(&TEST_DATA);
        it.fetch::<[u8; 9]>().unwrap();
        let arg: Option<&TestArgument> = it.fetch();
        assert!(arg.is_none());
        assert_eq!(it.len(), 1);
    }
}
