//! Emulated shared-bus encapsulation.
//!
//! BeebEm's Econet emulation exchanges raw four-byte-headed frames over
//! UDP between a fixed table of stations, and reproduces the real wire's
//! four-way handshake: scout, ack, payload, ack.  Sends go to every
//! other configured station, emulating a broadcast medium; receives are
//! ingress-filtered against the station table.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::net::SocketAddrV4;
use std::net::UdpSocket;
use std::path::Path;
use std::time::Duration;

use log::debug;
use log::info;

use crate::proto::frame;
use crate::proto::frame::FrameHeader;
use crate::proto::frame::SrcAddr;
use crate::transport::RxFrame;
use crate::transport::Transport;

/// The emulated medium carries small frames.
const MAX_BLOCK: usize = 512;

/// Poll interval of the nonblocking socket.
const POLL: Duration = Duration::from_millis(100);

/// Handshake retry budget.
const RETRIES: u32 = 50;

/// Control byte of an immediate machine-peek operation.
const PEEK_CTL: u8 = 0x88;

fn station_of(addr: &SrcAddr) -> u16 {
    u16::from(addr.0[1]) << 8 | u16::from(addr.0[0])
}

fn addr_of(station: u16) -> SrcAddr {
    SrcAddr([station as u8, (station >> 8) as u8, 0, 0])
}

/// The emulated transport.
#[derive(Debug)]
pub struct BeebemTransport {
    socket: UdpSocket,
    /// network*256+station → endpoint.
    stations: HashMap<u16, SocketAddrV4>,
    /// Stations in configuration order.
    station_list: Vec<u16>,
    our_station: u16,
    /// Require the source UDP port to match the table as well.
    ingress_port_check: bool,
    buf: Vec<u8>,
}

impl BeebemTransport {
    /// Read the station table and bind to our own entry.
    ///
    /// Each non-comment line of the table reads
    /// `network station ip-address udp-port`.
    pub fn new(
        cfg: &Path,
        our_station: u16,
        ingress_port_check: bool,
    ) -> io::Result<BeebemTransport> {
        let text = fs::read_to_string(cfg)?;
        let mut stations = HashMap::new();
        let mut station_list = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let parsed = (|| {
                let network: u16 = fields.next()?.parse().ok()?;
                let station: u16 = fields.next()?.parse().ok()?;
                let ip: Ipv4Addr = fields.next()?.parse().ok()?;
                let port: u16 = fields.next()?.parse().ok()?;
                if port == 0 {
                    return None;
                }
                Some((network * 256 + station, SocketAddrV4::new(ip, port)))
            })();
            let Some((ecaddr, endpoint)) = parsed else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}:{}: malformed station line", cfg.display(), lineno + 1),
                ));
            };
            if stations.insert(ecaddr, endpoint).is_some() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "{}:{}: station {}.{} listed twice",
                        cfg.display(),
                        lineno + 1,
                        ecaddr >> 8,
                        ecaddr & 0xff
                    ),
                ));
            }
            station_list.push(ecaddr);
        }
        let Some(&ours) = stations.get(&our_station) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "fileserver address {}.{} not listed in {}",
                    our_station >> 8,
                    our_station & 0xff,
                    cfg.display()
                ),
            ));
        };
        let socket = UdpSocket::bind(ours)?;
        info!("emulated station {}.{} on {}", our_station >> 8, our_station & 0xff, ours);
        Ok(BeebemTransport {
            socket,
            stations,
            station_list,
            our_station,
            ingress_port_check,
            buf: vec![0; 65536],
        })
    }

    /// Send one raw frame to every other configured station, emulating a
    /// shared bus.
    fn send_all(&self, data: &[u8]) -> io::Result<()> {
        for &ecaddr in &self.station_list {
            if ecaddr == self.our_station {
                continue;
            }
            if let Err(e) = self.socket.send_to(data, self.stations[&ecaddr]) {
                // A station being down must not stop the bus.
                debug!("send to station {}.{}: {e}", ecaddr >> 8, ecaddr & 0xff);
            }
        }
        Ok(())
    }

    /// Wait for one raw frame addressed to us, passing the ingress
    /// filter.  Returns `None` on a poll timeout unless `forever`.
    fn listen(&mut self, forever: bool) -> io::Result<Option<(u16, usize)>> {
        self.socket
            .set_read_timeout(if forever { None } else { Some(POLL) })?;
        loop {
            let (size, from) = match self.socket.recv_from(&mut self.buf) {
                Ok(r) => r,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            if size < 4 {
                continue;
            }
            let dest = u16::from(self.buf[1]) * 256 + u16::from(self.buf[0]);
            if dest != self.our_station {
                continue;
            }
            let theirs = u16::from(self.buf[3]) * 256 + u16::from(self.buf[2]);
            let SocketAddr::V4(from) = from else { continue };
            let listed = self.stations.get(&theirs);
            let passes = match listed {
                Some(endpoint) => {
                    from.ip() == endpoint.ip()
                        && (!self.ingress_port_check || from.port() == endpoint.port())
                }
                None => false,
            };
            if !passes {
                debug!(
                    "failed ingress filter from {from} (claimed to be {}.{})",
                    self.buf[3], self.buf[2]
                );
                continue;
            }
            return Ok(Some((theirs, size)));
        }
    }

    fn econet_header(&self, to: u16) -> [u8; 4] {
        [
            to as u8,
            (to >> 8) as u8,
            self.our_station as u8,
            (self.our_station >> 8) as u8,
        ]
    }

    /// Repeatedly send `data` and wait for a four-byte ack from `peer`.
    fn send_awaiting_ack(&mut self, data: &[u8], peer: u16, what: &str) -> io::Result<()> {
        let mut count = RETRIES;
        while count > 0 {
            self.send_all(data)?;
            if let Some((from, size)) = self.listen(false)? {
                if from != peer {
                    debug!("ignoring frame from {}.{} during other transaction", from >> 8, from & 0xff);
                } else if size != 4 {
                    debug!("received wrong-size {what} ack ({size}) from {}.{}", peer >> 8, peer & 0xff);
                    return Err(io::ErrorKind::InvalidData.into());
                } else {
                    return Ok(());
                }
            }
            count -= 1;
        }
        debug!("{what} ack never arrived from {}.{}", peer >> 8, peer & 0xff);
        Err(io::ErrorKind::TimedOut.into())
    }
}

impl Transport for BeebemTransport {
    fn max_block(&self) -> usize {
        MAX_BLOCK
    }

    fn recv(&mut self, want_port: u8, filter: &mut SrcAddr) -> io::Result<RxFrame> {
        // When listening for one particular station, bound the wait so a
        // client that goes away mid-transfer cannot lock everyone out.
        let forever = filter.is_any();
        let wanted = if forever { None } else { Some(station_of(filter)) };
        let mut count = RETRIES;
        while count > 0 {
            let Some((scout_addr, scout_size)) = self.listen(forever)? else {
                count -= 1;
                continue;
            };

            let mut ack = [0u8; 8];
            ack[..4].copy_from_slice(&self.econet_header(scout_addr));

            let ctl = self.buf[4];
            let dest_port = self.buf[5];
            if dest_port == 0 {
                // Immediate operation; we only serve machine peek.
                if ctl == PEEK_CTL {
                    ack[4] = frame::MACHINE_PEEK_LO;
                    ack[5] = frame::MACHINE_PEEK_HI;
                    ack[6] = frame::VERSION_MINOR;
                    ack[7] = frame::VERSION_MAJOR;
                }
                self.send_all(&ack)?;
                continue;
            }

            if wanted.is_some_and(|w| w != scout_addr)
                || (want_port != 0 && want_port != dest_port)
            {
                debug!(
                    "ignoring frame from {}.{} for port {dest_port} during other transaction",
                    scout_addr >> 8,
                    scout_addr & 0xff
                );
                if !forever {
                    count -= 1;
                }
                continue;
            }

            if scout_size != 6 {
                debug!(
                    "received wrong-size scout ({scout_size}) from {}.{}",
                    scout_addr >> 8,
                    scout_addr & 0xff
                );
                if !forever {
                    count -= 1;
                }
                continue;
            }

            // Ack the scout, repeatedly if necessary, and wait for the
            // payload frame from the same station.  This ties up the
            // server exactly as a real four-way handshake tied up the
            // bus.
            count = RETRIES;
            let mut payload_size = 0usize;
            while count > 0 && payload_size == 0 {
                self.send_all(&ack[..4])?;
                if let Some((main_addr, size)) = self.listen(false)? {
                    if main_addr == scout_addr {
                        payload_size = size;
                    } else {
                        debug!(
                            "ignoring frame from {}.{} during other transaction",
                            main_addr >> 8,
                            main_addr & 0xff
                        );
                    }
                }
                count -= 1;
            }
            if payload_size == 0 {
                debug!(
                    "scout from {}.{} but payload never arrived",
                    scout_addr >> 8,
                    scout_addr & 0xff
                );
                continue;
            }

            // Ack the payload too.
            self.send_all(&ack[..4])?;

            *filter = addr_of(scout_addr);
            return Ok(RxFrame {
                dest_port,
                flag: ctl,
                payload: self.buf[4..payload_size].to_vec(),
            });
        }
        Err(io::ErrorKind::TimedOut.into())
    }

    fn xmit(
        &mut self,
        dest_port: u8,
        flag: u8,
        payload: &[u8],
        to: &SrcAddr,
    ) -> io::Result<usize> {
        let peer = station_of(to);

        let mut scout = [0u8; 6];
        scout[..4].copy_from_slice(&self.econet_header(peer));
        scout[4] = 0x80 | flag;
        scout[5] = dest_port;
        self.send_awaiting_ack(&scout, peer, "scout")?;

        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&self.econet_header(peer));
        frame.extend_from_slice(payload);
        self.send_awaiting_ack(&frame, peer, "payload")?;

        Ok(FrameHeader::SIZE + payload.len())
    }

    fn ntoa(&self, addr: &SrcAddr) -> String {
        format!("station {}.{}", addr.0[1], addr.0[0])
    }

    fn get_stn(&self, addr: &SrcAddr) -> [u8; 2] {
        [addr.0[0], addr.0[1]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn station_table_parses() {
        let mut cfg = tempfile::NamedTempFile::new().unwrap();
        writeln!(cfg, "# stations").unwrap();
        writeln!(cfg, "0 254 127.0.0.1 0").unwrap();
        // Port 0 is malformed.
        assert!(BeebemTransport::new(cfg.path(), 254, false).is_err());

        let mut cfg = tempfile::NamedTempFile::new().unwrap();
        writeln!(cfg, "0 254 127.0.0.1 34567").unwrap();
        writeln!(cfg, "0 101 127.0.0.1 34568").unwrap();
        let t = BeebemTransport::new(cfg.path(), 254, true).unwrap();
        assert_eq!(t.station_list, vec![254, 101]);
        assert_eq!(t.max_block(), 512);
        assert_eq!(t.get_stn(&addr_of(0x0165)), [0x65, 0x01]);
    }

    #[test]
    fn unlisted_station_is_fatal() {
        let mut cfg = tempfile::NamedTempFile::new().unwrap();
        writeln!(cfg, "0 101 127.0.0.1 34569").unwrap();
        assert!(BeebemTransport::new(cfg.path(), 254, false).is_err());
    }
}
