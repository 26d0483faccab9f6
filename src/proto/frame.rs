//! Transport frame header.
//!
//! Every datagram on the wire begins with the same eight-byte header,
//! whichever encapsulation is in use: a frame type, the destination port,
//! a flag byte (whose low bit carries the random-access sequence marker),
//! a retransmission marker and a 32-bit little-endian sequence number.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

/// Frame types used by the direct UDP encapsulation.
pub mod frame_type {
    /// Broadcast data frame.
    pub const BROADCAST: u8 = 1;
    /// Unicast data frame; must be acknowledged.
    pub const UNICAST: u8 = 2;
    /// Positive acknowledgement of a unicast frame.
    pub const ACK: u8 = 3;
    /// Negative acknowledgement (port not listening or filtered out).
    pub const REJECT: u8 = 4;
    /// Immediate operation (machine peek); answered inline.
    pub const IMMEDIATE: u8 = 5;
    /// Reply to an immediate operation.
    pub const IMM_REPLY: u8 = 6;
}

/// Well-known ports.
pub mod port {
    /// The file server listens here.
    pub const FILE_SERVER: u8 = 0x99;
    /// Port we tell clients to send bulk data to.
    pub const OUR_DATA: u8 = 0x97;
}

/// UDP port of the direct encapsulation.
pub const UDP_PORT: u16 = 32768;

/// Flag value of an immediate frame that requests a machine peek.
pub const IMMEDIATE_PEEK: u8 = 8;

/// Machine-peek identification bytes, low then high.  The values are
/// arbitrary but stable, so monitoring tools can recognise the server.
pub const MACHINE_PEEK_LO: u8 = 0x68;
/// High half of the machine-peek identity.
pub const MACHINE_PEEK_HI: u8 = 0x40;

/// Server version, BCD-coded for machine peek and "read version".
pub const VERSION_MAJOR: u8 = 0x01;
/// Minor version, BCD.  Even values are releases.
pub const VERSION_MINOR: u8 = 0x00;

/// Description returned by "read file server version".  Max 9 chars.
pub const FS_DESCRIPTION: &str = "ecofs";

/// The eight-byte header at the start of every frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct FrameHeader {
    /// One of [`frame_type`]'s values.
    pub frame_type: u8,
    /// Destination port of the frame.
    pub dest_port: u8,
    /// Flag byte; bit 0 is the sequence marker for random-access I/O.
    pub flag: u8,
    /// Non-zero on retransmission.
    pub retrans: u8,
    /// Little-endian 32-bit sequence number.
    pub seq: [u8; 4],
}

impl FrameHeader {
    /// Size of the header on the wire.
    pub const SIZE: usize = 8;

    /// Header for an outgoing unicast data frame.  The transport fills in
    /// the sequence number at transmission time.
    pub fn unicast(dest_port: u8, flag: u8) -> Self {
        FrameHeader {
            frame_type: frame_type::UNICAST,
            dest_port,
            flag,
            retrans: 0,
            seq: [0; 4],
        }
    }

    /// Sequence number as a host integer.
    pub fn sequence(&self) -> u32 {
        u32::from_le_bytes(self.seq)
    }

    /// Store a host integer as the little-endian sequence number.
    pub fn set_sequence(&mut self, seq: u32) {
        self.seq = seq.to_le_bytes();
    }
}

/// An opaque transport-level source address, compared byte-wise.
///
/// The direct encapsulation stores an IPv4 address here; the emulated one
/// stores a two-byte station address.  The all-zero value acts as an
/// "any source" wildcard when passed to
/// [`Transport::recv`](crate::transport::Transport::recv).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SrcAddr(pub [u8; 4]);

impl SrcAddr {
    /// The wildcard address.
    pub const ANY: SrcAddr = SrcAddr([0; 4]);

    /// True if this is the wildcard address.
    pub fn is_any(&self) -> bool {
        self.0 == [0; 4]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let mut hdr = FrameHeader::unicast(port::FILE_SERVER, 1);
        hdr.set_sequence(0x12345678);
        assert_eq!(hdr.seq, [0x78, 0x56, 0x34, 0x12]);
        assert_eq!(hdr.sequence(), 0x12345678);
        assert_eq!(size_of::<FrameHeader>(), FrameHeader::SIZE);
    }
}
