//! End-to-end request/reply scenarios over an in-memory transport.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::rc::Rc;

use ecofs::FileServer;
use ecofs::InfoFormat;
use ecofs::ServerOptions;
use ecofs::SrcAddr;
use ecofs::Transport;
use ecofs::fs::typemap::TypeMap;
use ecofs::transport::RxFrame;
use ecofs::users::null::NullUsers;

const REPLY_PORT: u8 = 0x90;
const DATA_PORT: u8 = 0x97;

#[derive(Clone, Debug)]
struct Sent {
    port: u8,
    #[allow(dead_code)]
    flag: u8,
    payload: Vec<u8>,
    to: SrcAddr,
}

#[derive(Default)]
struct Shared {
    sent: Vec<Sent>,
    inbound: VecDeque<(u8, u8, Vec<u8>, SrcAddr)>,
}

/// A loopback transport: transmissions are recorded, receives are
/// served from a queue primed by the test.
struct TestTransport(Rc<RefCell<Shared>>);

impl Transport for TestTransport {
    fn max_block(&self) -> usize {
        1024
    }

    fn recv(&mut self, want_port: u8, filter: &mut SrcAddr) -> io::Result<RxFrame> {
        let mut shared = self.0.borrow_mut();
        while let Some((port, flag, payload, from)) = shared.inbound.pop_front() {
            if (want_port == 0 || port == want_port) && (filter.is_any() || from == *filter) {
                *filter = from;
                return Ok(RxFrame {
                    dest_port: port,
                    flag,
                    payload,
                });
            }
        }
        Err(io::ErrorKind::TimedOut.into())
    }

    fn xmit(&mut self, port: u8, flag: u8, payload: &[u8], to: &SrcAddr) -> io::Result<usize> {
        self.0.borrow_mut().sent.push(Sent {
            port,
            flag,
            payload: payload.to_vec(),
            to: *to,
        });
        Ok(payload.len() + 8)
    }

    fn ntoa(&self, addr: &SrcAddr) -> String {
        format!("{}.{}", addr.0[1], addr.0[0])
    }

    fn get_stn(&self, addr: &SrcAddr) -> [u8; 2] {
        [addr.0[0], addr.0[1]]
    }
}

struct Harness {
    server: FileServer,
    shared: Rc<RefCell<Shared>>,
    root: tempfile::TempDir,
    client: SrcAddr,
}

impl Harness {
    fn new() -> Harness {
        let root = tempfile::tempdir().unwrap();
        let root_str = root.path().to_str().unwrap().to_string();
        let shared = Rc::new(RefCell::new(Shared::default()));
        let transport = TestTransport(Rc::clone(&shared));
        let users = NullUsers::new(root_str.clone(), 0);
        let opts = ServerOptions {
            discname: "testdisc".to_string(),
            lib: root_str,
            infofmt: InfoFormat::RiscOs,
            safehandles: true,
            typemap: TypeMap::default(),
        };
        Harness {
            server: FileServer::new(Box::new(transport), Box::new(users), opts),
            shared,
            root,
            client: SrcAddr([1, 0, 0, 101]),
        }
    }

    /// Issue one request and collect everything the server transmitted
    /// while handling it.
    fn request(&mut self, flag: u8, body: &[u8]) -> Vec<Sent> {
        let frame = RxFrame {
            dest_port: 0x99,
            flag,
            payload: body.to_vec(),
        };
        self.server.handle_frame(&frame, self.client);
        std::mem::take(&mut self.shared.borrow_mut().sent)
    }

    /// Queue a frame for the server's next bulk receive.
    fn push_data(&mut self, port: u8, payload: &[u8]) {
        self.shared
            .borrow_mut()
            .inbound
            .push_back((port, 0, payload.to_vec(), self.client));
    }

    /// Log on and return the (urd, csd, lib) handle triple.
    fn login(&mut self) -> (u8, u8, u8) {
        let sent = self.request(0, &[REPLY_PORT, 0, 0, 0, 0, b'I', b' ', b'A', b'M', b' ', b'G', b'U', b'E', b'S', b'T', b'\r']);
        let reply = &sent[0].payload;
        assert_eq!(reply[0], 5, "logon command code");
        assert_eq!(reply[1], 0, "logon return code");
        (reply[2], reply[3], reply[4])
    }

    fn open(&mut self, ctx: (u8, u8, u8), must_exist: bool, read_only: bool, path: &str) -> Vec<Sent> {
        let mut body = vec![
            REPLY_PORT,
            6,
            ctx.0,
            ctx.1,
            ctx.2,
            u8::from(must_exist),
            u8::from(read_only),
        ];
        body.extend_from_slice(path.as_bytes());
        body.push(b'\r');
        self.request(0, &body)
    }
}

#[test]
fn anonymous_login_hands_out_environment() {
    let mut h = Harness::new();
    let (urd, csd, lib) = h.login();
    for handle in [urd, csd, lib] {
        assert_ne!(handle, 0);
        assert!(handle <= 8);
    }
    assert_ne!(urd, csd);
    assert_ne!(csd, lib);
}

#[test]
fn first_eight_file_opens_get_power_of_two_handles() {
    let mut h = Harness::new();
    let ctx = h.login();
    let mut got = Vec::new();
    for i in 0..8 {
        let name = format!("f{i}");
        std::fs::write(h.root.path().join(&name), b"x").unwrap();
        let sent = h.open(ctx, true, false, &name);
        let reply = &sent[0].payload;
        assert_eq!(reply[1], 0, "open {name}: {reply:?}");
        got.push(reply[2]);
    }
    assert_eq!(got, vec![1, 2, 4, 8, 16, 32, 64, 128]);
}

#[test]
fn case_insensitive_wildcard_info() {
    let mut h = Harness::new();
    let ctx = h.login();
    let target = h.root.path().join("HELLO");
    std::fs::write(&target, b"x").unwrap();
    std::fs::set_permissions(&target, PermissionsExt::from_mode(0o644)).unwrap();
    let mut body = vec![REPLY_PORT, 18, ctx.0, ctx.1, ctx.2, 4];
    body.extend_from_slice(b"hello\r");
    let sent = h.request(0, &body);
    let reply = &sent[0].payload;
    assert_eq!(&reply[..2], &[0, 0]);
    assert_eq!(reply[2], 1, "object type file");
    // Owner read/write plus public read.
    assert_eq!(reply[3], 0x0d);
}

#[test]
fn dot_stuffing_hides_the_sidecar_directory() {
    let mut h = Harness::new();
    let ctx = h.login();
    std::fs::create_dir(h.root.path().join(".Acorn")).unwrap();
    let sent = h.open(ctx, true, false, ".Acorn");
    let reply = &sent[0].payload;
    // Not found; never "entry locked", never success.
    assert_eq!(reply[1], 0xd6, "{reply:?}");
}

#[test]
fn repeated_getbyte_replays_the_same_byte() {
    let mut h = Harness::new();
    let ctx = h.login();
    std::fs::write(h.root.path().join("seq"), b"AB").unwrap();
    let sent = h.open(ctx, true, true, "seq");
    let handle = sent[0].payload[2];

    let first = h.request(0, &[REPLY_PORT, 8, handle]);
    assert_eq!(&first[0].payload[..3], &[0, 0, b'A']);
    // Same sequence bit: a retransmission, so the same byte again.
    let second = h.request(0, &[REPLY_PORT, 8, handle]);
    assert_eq!(&second[0].payload[..3], &[0, 0, b'A']);
    // Flipped bit: the next byte.
    let third = h.request(1, &[REPLY_PORT, 8, handle]);
    assert_eq!(&third[0].payload[..3], &[0, 0, b'B']);
    assert_eq!(third[0].payload[3], 0x80, "last byte of the file");
}

#[test]
fn save_then_delete_then_open_is_channel() {
    let mut h = Harness::new();
    let ctx = h.login();

    // Save: meta, 3-byte size, then the path; the payload arrives on
    // the data port.
    let mut body = vec![REPLY_PORT, 1, 0x92, ctx.1, ctx.2];
    body.extend_from_slice(&0x0000_8000u32.to_le_bytes());
    body.extend_from_slice(&0x0000_8023u32.to_le_bytes());
    body.extend_from_slice(&[5, 0, 0]);
    body.extend_from_slice(b"X\r");
    h.push_data(DATA_PORT, b"HELLO");
    let sent = h.request(0, &body);
    assert_eq!(sent[0].payload[1], 0, "save accepted: {:?}", sent[0].payload);
    assert_eq!(sent[0].payload[2], DATA_PORT);
    let last = sent.last().unwrap();
    assert_eq!(last.payload[1], 0, "save completed");
    assert_eq!(std::fs::read(h.root.path().join("X")).unwrap(), b"HELLO");

    // Delete it.
    let mut body = vec![REPLY_PORT, 20, ctx.0, ctx.1, ctx.2];
    body.extend_from_slice(b"X\r");
    let sent = h.request(0, &body);
    let reply = &sent[0].payload;
    assert_eq!(reply[1], 0, "delete: {reply:?}");
    // The reply reports the metadata and size of the removed file.
    assert_eq!(&reply[2..6], &0x0000_8000u32.to_le_bytes());
    assert_eq!(&reply[10..13], &[5, 0, 0]);

    // Opening it again must fail with "Channel".
    let sent = h.open(ctx, true, false, "X");
    assert_eq!(sent[0].payload[1], 0xde);
}

#[test]
fn load_streams_the_file_out() {
    let mut h = Harness::new();
    let ctx = h.login();
    std::fs::write(h.root.path().join("prog"), b"CONTENT").unwrap();
    let mut body = vec![REPLY_PORT, 2, 0x93, ctx.1, ctx.2];
    body.extend_from_slice(b"prog\r");
    let sent = h.request(0, &body);
    // First reply carries meta, size, access and date.
    assert_eq!(sent[0].port, REPLY_PORT);
    assert_eq!(sent[0].payload[1], 0);
    assert_eq!(&sent[0].payload[10..13], &[7, 0, 0]);
    // Data frames go to the client's stated port.
    let data: Vec<u8> = sent
        .iter()
        .filter(|s| s.port == 0x93)
        .flat_map(|s| s.payload.clone())
        .collect();
    assert_eq!(data, b"CONTENT");
    // The closing reply is empty success.
    let last = sent.last().unwrap();
    assert_eq!(last.port, REPLY_PORT);
    assert_eq!(&last.payload[..2], &[0, 0]);
}

#[test]
fn putbytes_to_read_only_handle_is_refused() {
    let mut h = Harness::new();
    let ctx = h.login();
    std::fs::write(h.root.path().join("ro"), b"x").unwrap();
    let sent = h.open(ctx, true, true, "ro");
    let handle = sent[0].payload[2];
    let mut body = vec![REPLY_PORT, 11, 0x92, ctx.1, ctx.2, handle, 1];
    body.extend_from_slice(&[1, 0, 0]);
    body.extend_from_slice(&[0, 0, 0]);
    let sent = h.request(0, &body);
    assert_eq!(sent[0].payload[1], 0xc1, "file not open for update");
}

#[test]
fn close_handle_zero_closes_every_file_handle() {
    let mut h = Harness::new();
    let ctx = h.login();
    std::fs::write(h.root.path().join("a"), b"x").unwrap();
    std::fs::write(h.root.path().join("b"), b"x").unwrap();
    let ha = h.open(ctx, true, false, "a")[0].payload[2];
    let hb = h.open(ctx, true, false, "b")[0].payload[2];
    assert_ne!(ha, hb);

    let sent = h.request(0, &[REPLY_PORT, 7, ctx.0, ctx.1, ctx.2, 0]);
    assert_eq!(&sent[0].payload[..2], &[0, 0]);

    for handle in [ha, hb] {
        let sent = h.request(0, &[REPLY_PORT, 8, handle]);
        assert_eq!(sent[0].payload[1], 0xde, "handle {handle} still live");
    }
}

#[test]
fn examine_paginates_without_duplicates() {
    let mut h = Harness::new();
    let ctx = h.login();
    for i in 0..50 {
        std::fs::write(h.root.path().join(format!("e{i:02}")), b"x").unwrap();
    }
    let mut names: Vec<String> = Vec::new();
    for (start, expect) in [(0u8, 20usize), (20, 20), (40, 10)] {
        let mut body = vec![REPLY_PORT, 3, ctx.0, ctx.1, ctx.2, 2, start, 20];
        body.push(b'\r');
        let sent = h.request(0, &body);
        let reply = &sent[0].payload;
        assert_eq!(reply[1], 0, "examine: {reply:?}");
        assert_eq!(reply[2] as usize, expect, "entries at start {start}");
        let mut rec = &reply[4..];
        for _ in 0..reply[2] {
            assert_eq!(rec[0], 10);
            names.push(String::from_utf8_lossy(&rec[1..11]).trim_end().to_string());
            rec = &rec[11..];
        }
    }
    assert_eq!(names.len(), 50);
    let mut sorted = names.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted, names, "sorted and free of duplicates");
}

#[test]
fn unknown_function_is_unrecognised() {
    let mut h = Harness::new();
    let sent = h.request(0, &[REPLY_PORT, 77, 0, 0, 0]);
    assert_eq!(&sent[0].payload[..2], &[8, 0]);
}

#[test]
fn requests_without_a_session_get_who_are_you() {
    let mut h = Harness::new();
    let sent = h.open((0, 0, 0), true, false, "x");
    let reply = &sent[0].payload;
    assert_eq!(reply[1], 0xbf);
    assert!(reply[2..].starts_with(b"Who are you?"));
}

#[test]
fn unrecognised_star_command_is_echoed() {
    let mut h = Harness::new();
    h.login();
    let sent = h.request(0, &[REPLY_PORT, 0, 0, 0, 0, b'F', b'R', b'O', b'B', b'\r']);
    let reply = &sent[0].payload;
    assert_eq!(reply[0], 8, "unrecognised command code");
    assert_eq!(reply[1], 0);
    assert!(reply[2..].starts_with(b"FROB"));
}

#[test]
fn save_load_round_trip_preserves_metadata() {
    let mut h = Harness::new();
    let ctx = h.login();
    let mut body = vec![REPLY_PORT, 1, 0x92, ctx.1, ctx.2];
    body.extend_from_slice(&0xfff0_1234u32.to_le_bytes());
    body.extend_from_slice(&0x0000_8023u32.to_le_bytes());
    body.extend_from_slice(&[4, 0, 0]);
    body.extend_from_slice(b"keep\r");
    h.push_data(DATA_PORT, b"DATA");
    let sent = h.request(0, &body);
    assert_eq!(sent.last().unwrap().payload[1], 0);

    // Read the metadata back through get-info "all".
    let mut body = vec![REPLY_PORT, 18, ctx.0, ctx.1, ctx.2, 5];
    body.extend_from_slice(b"keep\r");
    let sent = h.request(0, &body);
    let reply = &sent[0].payload;
    assert_eq!(reply[2], 1);
    assert_eq!(&reply[3..7], &0xfff0_1234u32.to_le_bytes());
    assert_eq!(&reply[7..11], &0x0000_8023u32.to_le_bytes());
    assert_eq!(&reply[11..14], &[4, 0, 0]);
}

#[test]
fn logoff_destroys_the_session() {
    let mut h = Harness::new();
    let ctx = h.login();
    let sent = h.request(0, &[REPLY_PORT, 23, ctx.0, ctx.1, ctx.2]);
    assert_eq!(&sent[0].payload[..2], &[0, 0]);
    let sent = h.open(ctx, true, false, "x");
    assert_eq!(sent[0].payload[1], 0xbf, "session gone");
}

#[test]
fn getbytes_reports_eof_and_count() {
    let mut h = Harness::new();
    let ctx = h.login();
    std::fs::write(h.root.path().join("blob"), b"0123456789").unwrap();
    let sent = h.open(ctx, true, true, "blob");
    let handle = sent[0].payload[2];

    // Ask for more than the file holds, from offset zero.
    let mut body = vec![REPLY_PORT, 10, 0x93, ctx.1, ctx.2, handle, 0];
    body.extend_from_slice(&[32, 0, 0]);
    body.extend_from_slice(&[0, 0, 0]);
    let sent = h.request(0, &body);
    let data: Vec<u8> = sent
        .iter()
        .filter(|s| s.port == 0x93)
        .flat_map(|s| s.payload.clone())
        .collect();
    assert_eq!(&data[..10], b"0123456789");
    let last = sent.last().unwrap();
    assert_eq!(last.payload[2], 0x80, "eof flag");
    assert_eq!(&last.payload[3..6], &[10, 0, 0], "ten real bytes");
}

#[test]
fn star_dir_changes_directory_handle() {
    let mut h = Harness::new();
    let ctx = h.login();
    std::fs::create_dir(h.root.path().join("sub")).unwrap();
    let mut body = vec![REPLY_PORT, 0, ctx.0, ctx.1, ctx.2];
    body.extend_from_slice(b"DIR sub\r");
    let sent = h.request(0, &body);
    let reply = &sent[0].payload;
    assert_eq!(reply[0], 7, "store-CSD command code");
    assert_eq!(reply[1], 0);
    assert_ne!(reply[2], 0);
    assert_ne!(reply[2], ctx.1);
}

#[test]
fn star_dir_to_a_file_is_not_a_directory() {
    let mut h = Harness::new();
    let ctx = h.login();
    std::fs::write(h.root.path().join("plain"), b"x").unwrap();
    let mut body = vec![REPLY_PORT, 0, ctx.0, ctx.1, ctx.2];
    body.extend_from_slice(b"DIR plain\r");
    let sent = h.request(0, &body);
    assert_eq!(sent[0].payload[1], 0xbe);
}
