//! File I/O calls: open, close, random access, byte I/O and the bulk
//! data transfers behind load, save, getbytes and putbytes.
//!
//! Mandatory open-time locking is delegated to the server by the
//! clients' OSes, realised here with advisory `flock` locks: shared for
//! read-only opens, exclusive otherwise.  The locks guard against other
//! processes touching the served tree; the single-threaded server needs
//! no locking of its own.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use log::debug;
use nix::fcntl::Flock;
use nix::fcntl::FlockArg;

use crate::fs::FileServer;
use crate::fs::ReqInfo;
use crate::fs::handle::FileState;
use crate::fs::handle::Handle;
use crate::fs::handle::HandleKind;
use crate::fs::handle::SEQUENCE_UNKNOWN;
use crate::fs::meta;
use crate::fs::meta::FileMeta;
use crate::proto::argument::ArgumentIterator;
use crate::proto::errors::ErrorCode;
use crate::proto::errors::FsError;
use crate::proto::frame::port;
use crate::proto::reply::CommandCode;
use crate::proto::reply::Reply;
use crate::proto::request::ReqContext;
use crate::transport::Transport;

/// End-of-file flag in a getbyte/getbytes completion.
const FLAG_LAST: u8 = 0x80;
/// Byte requested while already at end of file.
const FLAG_EOF: u8 = 0xc0;

/// Random-access argument selectors.
const ARG_PTR: u8 = 0;
const ARG_EXT: u8 = 1;
const ARG_SIZE: u8 = 2;

fn at_eof(state: &mut FileState) -> Result<bool, FsError> {
    let pos = state.file.stream_position().map_err(FsError::from)?;
    let len = state.file.metadata().map_err(FsError::from)?.len();
    Ok(pos >= len)
}

impl FileServer {
    fn file_state_mut(&mut self, ci: usize, h: u8) -> Result<&mut FileState, FsError> {
        self.clients[ci]
            .handles
            .get_mut(h)
            .and_then(Handle::file_mut)
            .ok_or(FsError::Code(ErrorCode::Channel))
    }

    /// Retransmission recovery shared by every random-access call.
    ///
    /// When the request's sequence bit matches the last one seen, the
    /// client never saw our reply: rewind to the position saved before
    /// that request ran.  Otherwise save the current position first.
    fn randomio_common(&mut self, ci: usize, h: u8, flag: u8) -> Result<(), FsError> {
        let state = self.file_state_mut(ci, h)?;
        let bit = flag & 1;
        if state.sequence != bit {
            state.old_offset = state.file.stream_position().map_err(FsError::from)?;
            state.sequence = bit;
        } else {
            debug!("repeat of last request on handle {h}");
            let off = state.old_offset;
            state.file.seek(SeekFrom::Start(off)).map_err(FsError::from)?;
        }
        Ok(())
    }

    /// Open (function 6).
    pub(crate) fn op_open(
        &mut self,
        req: &ReqInfo,
        ctx: &ReqContext,
        args: &[u8],
    ) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let mut it = ArgumentIterator::new(args);
        let must_exist = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))? != 0;
        let read_only = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))? != 0;
        let path = it.fetch_cr_str();
        debug!(
            "open [{}/{}, {}]",
            if must_exist { "exist" } else { "create" },
            if read_only { "read" } else { "rdwr" },
            String::from_utf8_lossy(path)
        );
        let upath = self.unixify(Some(ci), ctx, path)?;

        let is_owner = self.is_owner(ci, &upath);
        let found = meta::fs_stat(&upath).is_ok();
        if !found && must_exist {
            return Err(ErrorCode::Channel.into());
        }

        let mut options = OpenOptions::new();
        options.read(true);
        if !read_only {
            options.write(true);
        }
        let mut did_create = false;
        if !must_exist {
            options.create(true);
            if !found {
                if !is_owner {
                    return Err(ErrorCode::NoAccess.into());
                }
                did_create = true;
            }
        }
        let file = options.open(&upath).map_err(FsError::from)?;
        let lock_arg = if read_only {
            FlockArg::LockSharedNonblock
        } else {
            FlockArg::LockExclusiveNonblock
        };
        let file = Flock::lock(file, lock_arg).map_err(|(_, errno)| {
            if errno == nix::errno::Errno::EAGAIN {
                FsError::Code(ErrorCode::Open)
            } else {
                errno.into()
            }
        })?;

        let st = file.metadata().map_err(FsError::from)?;
        let mode = st.mode();
        let kind = if st.is_dir() {
            // Some clients open a directory to catalogue it; that gets a
            // directory handle, never random I/O.
            HandleKind::Dir
        } else {
            HandleKind::File(FileState {
                file,
                sequence: SEQUENCE_UNKNOWN,
                old_offset: 0,
                read_only,
                is_owner,
                can_read: mode & (libc::S_IRUSR | libc::S_IROTH) != 0,
                can_write: mode & (libc::S_IWUSR | libc::S_IWOTH) != 0,
                is_locked: mode & libc::S_IXUSR != 0,
                did_create,
            })
        };
        let client = &mut self.clients[ci];
        let safehandles = client.safehandles;
        let h = client.handles.insert(true, safehandles, Handle { path: upath, kind });
        if h == 0 {
            return Err(ErrorCode::ManyOpen.into());
        }
        let mut reply = Reply::new(CommandCode::Done);
        reply.u8(h);
        self.send_reply(req, &reply);
        Ok(())
    }

    /// Close (function 7).  Handle 0 closes every open file handle.
    pub(crate) fn op_close(&mut self, req: &ReqInfo, args: &[u8]) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let handle = ArgumentIterator::new(args)
            .fetch_u8()
            .ok_or(FsError::Code(ErrorCode::BadStr))?;
        debug!("close [{handle}]");
        let mut first_err = None;
        if handle == 0 {
            for h in self.clients[ci].handles.live() {
                let is_file = self.clients[ci]
                    .handles
                    .get(h)
                    .is_some_and(|hd| !hd.is_dir());
                if is_file {
                    if let Some(e) = self.close_one(ci, h) {
                        first_err.get_or_insert(e);
                    }
                }
            }
        } else {
            first_err = self.close_one(ci, handle);
        }
        match first_err {
            Some(e) => Err(e),
            None => {
                self.send_reply(req, &Reply::new(CommandCode::Done));
                Ok(())
            }
        }
    }

    /// Close one handle, syncing file contents out first.
    fn close_one(&mut self, ci: usize, h: u8) -> Option<FsError> {
        let handles = &mut self.clients[ci].handles;
        let h = handles.check(h);
        if h == 0 {
            return None;
        }
        let mut err = None;
        if let Some(state) = handles.get_mut(h).and_then(Handle::file_mut) {
            if let Err(e) = state.file.sync_all() {
                // Some descriptors are fundamentally unfsyncable.
                if e.raw_os_error() != Some(libc::EINVAL) {
                    err = Some(FsError::from(e));
                }
            }
        }
        handles.release(h);
        err
    }

    /// Get random-access info (function 12).
    pub(crate) fn op_get_args(&mut self, req: &ReqInfo, args: &[u8]) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let mut it = ArgumentIterator::new(args);
        let handle = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))?;
        let arg = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))?;
        debug!("get args [{handle}, {arg}]");
        let state = self.file_state_mut(ci, handle)?;
        let val = match arg {
            ARG_PTR => state.file.stream_position().map_err(FsError::from)?,
            ARG_EXT => state.file.metadata().map_err(FsError::from)?.len(),
            ARG_SIZE => {
                let st = state.file.metadata().map_err(FsError::from)?;
                st.blocks() * 512
            }
            _ => return Err(ErrorCode::BadArgs.into()),
        };
        let mut reply = Reply::new(CommandCode::Done);
        reply.val(val, 3);
        self.send_reply(req, &reply);
        Ok(())
    }

    /// Set random-access info (function 13).
    pub(crate) fn op_set_args(&mut self, req: &ReqInfo, args: &[u8]) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let mut it = ArgumentIterator::new(args);
        let handle = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))?;
        let arg = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))?;
        let val = it.fetch_val(3).ok_or(FsError::Code(ErrorCode::BadStr))?;
        debug!("set args [{handle}, {arg} := {val}]");
        let state = self.file_state_mut(ci, handle)?;
        match arg {
            ARG_PTR => {
                state.file.seek(SeekFrom::Start(val)).map_err(FsError::from)?;
            }
            ARG_EXT => {
                state.file.set_len(val).map_err(FsError::from)?;
            }
            // Newer clients set the allocated size; there is nothing
            // useful to do with it, and agreeing keeps them happy.
            ARG_SIZE => {}
            _ => return Err(FsError::Custom("bad argument to set_args")),
        }
        self.send_reply(req, &Reply::new(CommandCode::Done));
        Ok(())
    }

    /// Get byte (function 8).
    pub(crate) fn op_getbyte(&mut self, req: &ReqInfo, args: &[u8]) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let handle = ArgumentIterator::new(args)
            .fetch_u8()
            .ok_or(FsError::Code(ErrorCode::BadStr))?;
        debug!("getbyte [{handle}]");
        let h = self.clients[ci].handles.check(handle);
        if h == 0 {
            return Err(ErrorCode::Channel.into());
        }
        self.randomio_common(ci, h, req.flag)?;
        let state = self.file_state_mut(ci, h)?;
        if !state.can_read {
            return Err(ErrorCode::NoAccess.into());
        }
        let mut byte = [0u8; 1];
        let got = state.file.read(&mut byte).map_err(FsError::from)?;
        let (byte, flag) = if got == 0 {
            (0xff, FLAG_EOF)
        } else {
            (byte[0], if at_eof(state)? { FLAG_LAST } else { 0 })
        };
        let mut reply = Reply::new(CommandCode::Done);
        reply.u8(byte).u8(flag);
        self.send_reply(req, &reply);
        Ok(())
    }

    /// Put byte (function 9).
    pub(crate) fn op_putbyte(&mut self, req: &ReqInfo, args: &[u8]) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let mut it = ArgumentIterator::new(args);
        let handle = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))?;
        let byte = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))?;
        debug!("putbyte [{handle}, {byte:#04x}]");
        let h = self.clients[ci].handles.check(handle);
        if h == 0 {
            return Err(ErrorCode::Channel.into());
        }
        self.randomio_common(ci, h, req.flag)?;
        let state = self.file_state_mut(ci, h)?;
        if state.read_only {
            return Err(ErrorCode::RdOnly.into());
        }
        if !state.can_write {
            return Err(ErrorCode::NoAccess.into());
        }
        if state.is_locked {
            return Err(ErrorCode::Locked.into());
        }
        state.file.write_all(&[byte]).map_err(FsError::from)?;
        self.send_reply(req, &Reply::new(CommandCode::Done));
        Ok(())
    }

    /// Read end-of-file status (function 17).
    pub(crate) fn op_get_eof(&mut self, req: &ReqInfo, args: &[u8]) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let handle = ArgumentIterator::new(args)
            .fetch_u8()
            .ok_or(FsError::Code(ErrorCode::BadStr))?;
        debug!("get eof [{handle}]");
        let state = self.file_state_mut(ci, handle)?;
        let status = if at_eof(state)? { 0xff } else { 0 };
        let mut reply = Reply::new(CommandCode::Done);
        reply.u8(status);
        self.send_reply(req, &reply);
        Ok(())
    }

    /// Get bytes (function 10): streamed read to the client's port.
    pub(crate) fn op_getbytes(
        &mut self,
        req: &ReqInfo,
        ctx: &ReqContext,
        args: &[u8],
    ) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let mut it = ArgumentIterator::new(args);
        let handle = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))?;
        let use_ptr = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))? != 0;
        let size = it.fetch_val(3).ok_or(FsError::Code(ErrorCode::BadStr))?;
        let off = it.fetch_val(3).unwrap_or(0);
        debug!(
            "getbytes [{handle}, {size}{}{off}]",
            if use_ptr { "!" } else { "@" }
        );
        let h = self.clients[ci].handles.check(handle);
        if h == 0 {
            return Err(ErrorCode::Channel.into());
        }
        self.randomio_common(ci, h, req.flag)?;
        let state = self.file_state_mut(ci, h)?;
        if !state.can_read {
            return Err(ErrorCode::NoAccess.into());
        }
        if !use_ptr {
            state.file.seek(SeekFrom::Start(off)).map_err(FsError::from)?;
        }
        self.send_reply(req, &Reply::new(CommandCode::Done));

        let FileServer {
            transport, clients, ..
        } = self;
        let state = clients[ci]
            .handles
            .get_mut(h)
            .and_then(Handle::file_mut)
            .ok_or(FsError::Code(ErrorCode::Channel))?;
        let got = data_send(transport.as_mut(), req, &mut state.file, size, ctx.port)?;
        let eof = got != size || at_eof(state)?;

        let mut reply2 = Reply::new(CommandCode::Done);
        reply2.u8(if eof { FLAG_LAST } else { 0 }).val(got, 3);
        self.send_reply(req, &reply2);
        Ok(())
    }

    /// Put bytes (function 11): streamed write on our data port.
    pub(crate) fn op_putbytes(
        &mut self,
        req: &ReqInfo,
        ctx: &ReqContext,
        args: &[u8],
    ) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let mut it = ArgumentIterator::new(args);
        let handle = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))?;
        let use_ptr = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))? != 0;
        let size = it.fetch_val(3).ok_or(FsError::Code(ErrorCode::BadStr))?;
        let off = it.fetch_val(3).unwrap_or(0);
        debug!(
            "putbytes [{handle}, {size}{}{off}]",
            if use_ptr { "!" } else { "@" }
        );
        let h = self.clients[ci].handles.check(handle);
        if h == 0 {
            return Err(ErrorCode::Channel.into());
        }
        self.randomio_common(ci, h, req.flag)?;
        let state = self.file_state_mut(ci, h)?;
        if state.read_only {
            return Err(ErrorCode::RdOnly.into());
        }
        if !state.can_write {
            return Err(ErrorCode::NoAccess.into());
        }
        if state.is_locked {
            return Err(ErrorCode::Locked.into());
        }
        if !use_ptr {
            state.file.seek(SeekFrom::Start(off)).map_err(FsError::from)?;
        }
        let block = self.transport.max_block();
        let mut reply1 = Reply::new(CommandCode::Done);
        reply1.u8(port::OUR_DATA).val(block as u64, 2);
        self.send_reply(req, &reply1);

        let FileServer {
            transport, clients, ..
        } = self;
        let state = clients[ci]
            .handles
            .get_mut(h)
            .and_then(Handle::file_mut)
            .ok_or(FsError::Code(ErrorCode::Channel))?;
        let got = data_recv(transport.as_mut(), req, &mut state.file, size, ctx.port)?;

        let mut reply2 = Reply::new(CommandCode::Done);
        reply2.u8(0).val(got, 3);
        self.send_reply(req, &reply2);
        Ok(())
    }

    /// Load (function 2) and load-as-command (function 5).
    pub(crate) fn op_load(
        &mut self,
        req: &ReqInfo,
        ctx: &ReqContext,
        args: &[u8],
        as_command: bool,
    ) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let mut it = ArgumentIterator::new(args);
        let mut path = it.fetch_cr_str();
        // Eight-bit clients tend to send the whole command line for
        // "load as command", so trim it for them.
        if let Some(space) = path.iter().position(|&c| c == b' ') {
            path = &path[..space];
        }
        debug!(
            "load{} [{}]",
            if as_command { " as command" } else { "" },
            String::from_utf8_lossy(path)
        );
        let mut upath = self.unixify(Some(ci), ctx, path)?;
        let mut st = meta::fs_stat(&upath);
        let absent = st
            .as_ref()
            .is_err_and(|e| e.kind() == std::io::ErrorKind::NotFound);
        if absent && as_command {
            // Not in the current directory; search the library.
            let mut libctx = *ctx;
            libctx.csd = libctx.lib;
            upath = self.unixify(Some(ci), &libctx, path)?;
            st = meta::fs_stat(&upath);
        }
        let st = st.map_err(FsError::from)?;
        if st.is_dir() {
            return Err(ErrorCode::IsDir.into());
        }
        let is_owner = self.is_owner(ci, &upath);
        let can_read = if is_owner {
            st.mode() & libc::S_IRUSR != 0
        } else {
            st.mode() & libc::S_IROTH != 0
        };
        if !can_read {
            return Err(ErrorCode::NoAccess.into());
        }
        let mut file = File::open(&upath).map_err(FsError::from)?;

        let filemeta = meta::get_meta(&upath, Some(&st), &self.opts.typemap);
        let mut reply1 = Reply::new(CommandCode::Done);
        reply1
            .val(filemeta.load.into(), 4)
            .val(filemeta.exec.into(), 4)
            .val(st.len(), 3)
            .u8(meta::mode_to_access(st.mode()).bits())
            .bytes(&meta::pack_date(meta::get_birthtime(&st)));
        self.send_reply(req, &reply1);

        data_send(self.transport.as_mut(), req, &mut file, st.len(), ctx.port)?;
        self.send_reply(req, &Reply::new(CommandCode::Done));
        Ok(())
    }

    /// Save (function 1): create or truncate, then bulk-receive.
    pub(crate) fn op_save(
        &mut self,
        req: &ReqInfo,
        ctx: &ReqContext,
        args: &[u8],
    ) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let mut it = ArgumentIterator::new(args);
        let load = it.fetch_val(4).ok_or(FsError::Code(ErrorCode::BadStr))? as u32;
        let exec = it.fetch_val(4).ok_or(FsError::Code(ErrorCode::BadStr))? as u32;
        let size = it.fetch_val(3).ok_or(FsError::Code(ErrorCode::BadStr))?;
        let path = it.fetch_cr_str();
        debug!("save [{}, {size} bytes]", String::from_utf8_lossy(path));
        let upath = self.unixify(Some(ci), ctx, path)?;
        let filemeta = FileMeta { load, exec };

        let mut file = self.open_for_rewrite(ci, &upath)?;
        let block = self.transport.max_block();
        let mut reply1 = Reply::new(CommandCode::Done);
        reply1.u8(port::OUR_DATA).val(block as u64, 2);
        self.send_reply(req, &reply1);

        data_recv(self.transport.as_mut(), req, &mut file, size, ctx.port)?;
        drop(file);

        meta::set_meta(&upath, &filemeta).map_err(FsError::from)?;
        let st = meta::fs_stat(&upath).map_err(FsError::from)?;
        let mut reply2 = Reply::new(CommandCode::Done);
        reply2
            .u8(meta::mode_to_access(st.mode()).bits())
            .bytes(&meta::pack_date(meta::get_birthtime(&st)));
        self.send_reply(req, &reply2);
        Ok(())
    }

    /// Create (function 29): like save, but sized with no data
    /// transfer.
    pub(crate) fn op_create(
        &mut self,
        req: &ReqInfo,
        ctx: &ReqContext,
        args: &[u8],
    ) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let mut it = ArgumentIterator::new(args);
        let load = it.fetch_val(4).ok_or(FsError::Code(ErrorCode::BadStr))? as u32;
        let exec = it.fetch_val(4).ok_or(FsError::Code(ErrorCode::BadStr))? as u32;
        let size = it.fetch_val(3).ok_or(FsError::Code(ErrorCode::BadStr))?;
        let path = it.fetch_cr_str();
        debug!("create [{}, {size} bytes]", String::from_utf8_lossy(path));
        let upath = self.unixify(Some(ci), ctx, path)?;
        let filemeta = FileMeta { load, exec };

        let file = self.open_for_rewrite(ci, &upath)?;
        file.set_len(size).map_err(FsError::from)?;
        drop(file);

        meta::set_meta(&upath, &filemeta).map_err(FsError::from)?;
        let st = meta::fs_stat(&upath).map_err(FsError::from)?;
        let mut reply = Reply::new(CommandCode::Done);
        reply
            .u8(meta::mode_to_access(st.mode()).bits())
            .bytes(&meta::pack_date(meta::get_birthtime(&st)));
        self.send_reply(req, &reply);
        Ok(())
    }

    /// Open a path for truncation and rewriting, honouring ownership,
    /// the write bits and the lock bit.  Owners may create; the public
    /// may only rewrite what already exists.
    fn open_for_rewrite(&self, ci: usize, upath: &Path) -> Result<File, FsError> {
        let is_owner = self.is_owner(ci, upath);
        let mut options = OpenOptions::new();
        options.read(true).write(true).truncate(true);
        if is_owner {
            options.create(true);
        }
        let file = options.open(upath).map_err(FsError::from)?;
        let mode = file.metadata().map_err(FsError::from)?.mode();
        let mut can_write = false;
        if mode & libc::S_IWUSR != 0 && is_owner {
            if mode & libc::S_IXUSR != 0 {
                return Err(ErrorCode::Locked.into());
            }
            can_write = true;
        }
        if mode & libc::S_IWOTH != 0 && !is_owner {
            if mode & libc::S_IXUSR != 0 {
                return Err(ErrorCode::Locked.into());
            }
            can_write = true;
        }
        if !can_write {
            return Err(ErrorCode::NoAccess.into());
        }
        Ok(file)
    }
}

/// Stream `size` bytes from `file` to the client as unicast frames on
/// `dest_port`.
///
/// After end of file the remaining protocol-required chunks still go
/// out, zero-filled; nothing further is read.  Returns the number of
/// real bytes sent.
pub(crate) fn data_send(
    transport: &mut dyn Transport,
    req: &ReqInfo,
    file: &mut File,
    size: u64,
    dest_port: u8,
) -> Result<u64, FsError> {
    let max = transport.max_block();
    let mut buf = vec![0u8; max.min(size as usize).max(1)];
    let mut remaining = size;
    let mut done = 0u64;
    let mut faking = false;
    while remaining > 0 {
        let mut this = remaining.min(max as u64) as usize;
        if !faking {
            match file.read(&mut buf[..this]) {
                Ok(0) => {
                    faking = true;
                    buf[..this].fill(0);
                }
                Ok(n) => {
                    this = n;
                    done += n as u64;
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            buf[..this].fill(0);
        }
        transport
            .xmit(dest_port, req.flag & 1, &buf[..this], &req.from)
            .map_err(FsError::from)?;
        remaining -= this as u64;
    }
    Ok(done)
}

/// Receive `size` bytes of bulk data on our data port, writing them to
/// `file` and sending a one-byte partial acknowledgement to `ack_port`
/// after every non-final chunk.  Returns the total bytes written.
pub(crate) fn data_recv(
    transport: &mut dyn Transport,
    req: &ReqInfo,
    file: &mut File,
    size: u64,
    ack_port: u8,
) -> Result<u64, FsError> {
    let mut remaining = size;
    let mut done = 0u64;
    while remaining > 0 {
        let mut from = req.from;
        let frame = transport
            .recv(port::OUR_DATA, &mut from)
            .map_err(FsError::from)?;
        if frame.dest_port != port::OUR_DATA || from != req.from {
            return Err(FsError::Custom("I'm confused"));
        }
        file.write_all(&frame.payload).map_err(FsError::from)?;
        done += frame.payload.len() as u64;
        remaining = remaining.saturating_sub(frame.payload.len() as u64);
        if remaining > 0 {
            transport
                .xmit(ack_port, 0, &[0], &req.from)
                .map_err(FsError::from)?;
        }
    }
    Ok(done)
}
