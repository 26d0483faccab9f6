//! Datagram transports.
//!
//! Two interchangeable encapsulations deliver the same contract: a
//! reliable, ordered, unicast request/reply channel over unreliable
//! datagrams.  [`aun::AunTransport`] speaks the direct UDP encapsulation;
//! [`beebem::BeebemTransport`] emulates the wire-level four-way handshake
//! of a shared bus.  Exactly one is chosen at startup.
//!
//! Binding happens in the constructors; the trait carries the five
//! runtime operations.

use std::io;

use crate::proto::frame::SrcAddr;

pub mod aun;
pub mod beebem;

/// A received frame, stripped of encapsulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxFrame {
    /// Destination port the client addressed.
    pub dest_port: u8,
    /// Flag/control byte from the frame header.
    pub flag: u8,
    /// The payload after the frame header.
    pub payload: Vec<u8>,
}

/// The transport contract.
///
/// `recv` blocks until a data frame arrives that matches `want_port`
/// (any if 0) and the source `filter` (any if [`SrcAddr::ANY`]); it
/// answers machine-peek probes internally and acknowledges unicast
/// frames.  `xmit` transmits one unicast frame and retries until it is
/// acknowledged or the retry budget (about fifty attempts at 100 ms) is
/// spent, failing with [`io::ErrorKind::TimedOut`].
pub trait Transport {
    /// Largest payload one datagram can carry.
    fn max_block(&self) -> usize;

    /// Receive the next matching data frame.  On return `filter` holds
    /// the actual source address.
    fn recv(&mut self, want_port: u8, filter: &mut SrcAddr) -> io::Result<RxFrame>;

    /// Transmit one unicast frame and wait for its acknowledgement.
    /// Returns the number of bytes sent.
    fn xmit(&mut self, dest_port: u8, flag: u8, payload: &[u8], to: &SrcAddr)
    -> io::Result<usize>;

    /// Render an address for log messages.
    fn ntoa(&self, addr: &SrcAddr) -> String;

    /// The two-byte station id (station, network) of an address.
    fn get_stn(&self, addr: &SrcAddr) -> [u8; 2];
}
