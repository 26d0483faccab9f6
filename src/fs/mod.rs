//! The file server proper.
//!
//! [`FileServer`] owns the chosen transport, the user provider and the
//! session table, and processes one request to completion before
//! accepting the next.  Request handlers live in the sibling modules
//! ([`fileio`], [`examine`], [`misc`], [`cli`]) as further `impl`
//! blocks; everything here is the dispatch path and the helpers they
//! share.

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use log::debug;
use log::info;
use log::warn;

use crate::InfoFormat;
use crate::fs::session::Session;
use crate::fs::typemap::TypeMap;
use crate::proto::errors::ErrorCode;
use crate::proto::errors::FsError;
use crate::proto::frame::SrcAddr;
use crate::proto::frame::port;
use crate::proto::reply::CommandCode;
use crate::proto::reply::Reply;
use crate::proto::request::ContextClass;
use crate::proto::request::Function;
use crate::proto::request::ReqContext;
use crate::proto::request::Request;
use crate::transport::RxFrame;
use crate::transport::Transport;
use crate::users::UserProvider;

pub mod cli;
pub mod examine;
pub mod fileio;
pub mod handle;
pub mod meta;
pub mod misc;
pub mod nametrans;
pub mod session;
pub mod typemap;

/// Server-wide settings the handlers consult.
#[derive(Debug)]
pub struct ServerOptions {
    /// Name of the single disc we serve.
    pub discname: String,
    /// Path of the default library directory, relative to the root.
    pub lib: String,
    /// Starting `*INFO` format for new sessions.
    pub infofmt: InfoFormat,
    /// Starting safe-handles setting for new sessions.
    pub safehandles: bool,
    /// File-type guessing rules.
    pub typemap: TypeMap,
}

/// Everything a handler needs to answer one request.
#[derive(Debug, Clone, Copy)]
pub struct ReqInfo {
    /// Port the reply goes to.
    pub reply_port: u8,
    /// Flag byte echoed into the reply header; bit 0 is the sequence
    /// marker.
    pub flag: u8,
    /// Who asked.
    pub from: SrcAddr,
}

/// The file server.
pub struct FileServer {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) users: Box<dyn UserProvider>,
    pub(crate) clients: Vec<Session>,
    pub(crate) opts: ServerOptions,
}

impl std::fmt::Debug for FileServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileServer")
            .field("clients", &self.clients.len())
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

impl FileServer {
    /// Assemble a server from its collaborators.
    pub fn new(
        transport: Box<dyn Transport>,
        users: Box<dyn UserProvider>,
        opts: ServerOptions,
    ) -> FileServer {
        FileServer {
            transport,
            users,
            clients: Vec::new(),
            opts,
        }
    }

    /// Receive and handle requests until `stop` is raised.
    ///
    /// The loop is deliberately single-threaded: one request runs to
    /// completion, bulk transfers included, before the next is read.
    pub fn run(&mut self, stop: &AtomicBool) -> std::io::Result<()> {
        while !stop.load(Ordering::Relaxed) {
            let mut from = SrcAddr::ANY;
            let frame = match self.transport.recv(port::FILE_SERVER, &mut from) {
                Ok(frame) => frame,
                // A signal interrupting the wait re-checks the stop
                // flag.
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.handle_frame(&frame, from);
        }
        Ok(())
    }

    /// Dispatch one received frame.
    pub fn handle_frame(&mut self, frame: &RxFrame, from: SrcAddr) {
        let request = match Request::parse(&frame.payload, frame.flag) {
            Ok(r) => r,
            Err(e) => {
                debug!("dropping malformed request from {}: {e}", self.transport.ntoa(&from));
                return;
            }
        };
        let req = ReqInfo {
            reply_port: request.reply_port,
            flag: request.flag,
            from,
        };
        let Ok(function) = Function::try_from(request.function) else {
            debug!("unknown function {}", request.function);
            self.unrec_reply(&req, &[]);
            return;
        };
        let (ctx, args) = match self.check_handles(&from, function, request.data) {
            Some(split) => split,
            None => {
                debug!("short context in function {function:?}");
                return;
            }
        };
        debug!(
            "{}: {function:?} [&={} @={} %={}]",
            self.transport.ntoa(&from),
            ctx.urd,
            ctx.csd,
            ctx.lib
        );
        let result = match function {
            Function::Cli => self.op_cli(&req, &ctx, args),
            Function::Save => self.op_save(&req, &ctx, args),
            Function::Load | Function::LoadCommand => {
                self.op_load(&req, &ctx, args, function == Function::LoadCommand)
            }
            Function::Examine => self.op_examine(&req, &ctx, args),
            Function::CatHeader => self.op_cat_header(&req, &ctx, args),
            Function::Open => self.op_open(&req, &ctx, args),
            Function::Close => self.op_close(&req, args),
            Function::GetByte => self.op_getbyte(&req, args),
            Function::PutByte => self.op_putbyte(&req, args),
            Function::GetBytes => self.op_getbytes(&req, &ctx, args),
            Function::PutBytes => self.op_putbytes(&req, &ctx, args),
            Function::GetArgs => self.op_get_args(&req, args),
            Function::SetArgs => self.op_set_args(&req, args),
            Function::GetDiscs => self.op_get_discs(&req, args),
            Function::GetUsersOn => self.op_get_users_on(&req, args),
            Function::GetTime => self.op_get_time(&req),
            Function::GetEof => self.op_get_eof(&req, args),
            Function::GetInfo => self.op_get_info(&req, &ctx, args),
            Function::SetInfo => self.op_set_info(&req, &ctx, args),
            Function::Delete => self.op_delete(&req, &ctx, args),
            Function::GetUEnv => self.op_get_uenv(&req, &ctx),
            Function::SetOpt4 => self.op_set_opt4(&req, args),
            Function::Logoff => self.op_logoff(&req),
            Function::GetUser => self.op_get_user(&req, args),
            Function::GetVersion => self.op_get_version(&req),
            Function::GetDiscFree => self.op_get_disc_free(&req, args),
            Function::CdirN => self.op_cdirn(&req, &ctx, args),
            Function::Create => self.op_create(&req, &ctx, args),
            Function::GetUserFree => self.op_get_user_free(&req, args),
            Function::SetTime => {
                // Recognised but never served.
                self.unrec_reply(&req, &[]);
                Ok(())
            }
        };
        if let Err(e) = result {
            self.error_reply(&req, &e);
        }
    }

    /// Validate the request's context bytes for its function class,
    /// zeroing invalid handles, and split off the argument bytes.
    fn check_handles<'a>(
        &self,
        from: &SrcAddr,
        function: Function,
        data: &'a [u8],
    ) -> Option<(ReqContext, &'a [u8])> {
        let mut ctx = ReqContext::default();
        match function.context_class() {
            ContextClass::None => Some((ctx, data)),
            ContextClass::Full => {
                let &[urd, csd, lib, ref rest @ ..] = data else {
                    return None;
                };
                ctx.urd = self.check_handle(from, urd);
                ctx.csd = self.check_handle(from, csd);
                ctx.lib = self.check_handle(from, lib);
                Some((ctx, rest))
            }
            ContextClass::Port => {
                let &[dport, csd, lib, ref rest @ ..] = data else {
                    return None;
                };
                ctx.port = dport;
                ctx.csd = self.check_handle(from, csd);
                ctx.lib = self.check_handle(from, lib);
                Some((ctx, rest))
            }
        }
    }

    fn check_handle(&self, from: &SrcAddr, h: u8) -> u8 {
        match self.find_client(from) {
            Some(ci) => self.clients[ci].handles.check(h),
            None => 0,
        }
    }

    /// Index of the session owning `from`, if any.
    pub(crate) fn find_client(&self, from: &SrcAddr) -> Option<usize> {
        self.clients.iter().position(|c| c.host == *from)
    }

    /// The session for a request, or the "Who are you?" error.
    pub(crate) fn client_of(&mut self, req: &ReqInfo) -> Result<usize, FsError> {
        self.find_client(&req.from)
            .ok_or(FsError::Code(ErrorCode::WhoAreYou))
    }

    /// Destroy a session, closing everything it holds.
    pub(crate) fn delete_client(&mut self, ci: usize) {
        let client = self.clients.remove(ci);
        info!(
            "logout {} from {}",
            client.login,
            self.transport.ntoa(&client.host)
        );
        // Handles and their descriptors drop here.
    }

    /// Send a reply body back to the requester.
    pub(crate) fn send_reply(&mut self, req: &ReqInfo, reply: &Reply) {
        if let Err(e) = self
            .transport
            .xmit(req.reply_port, req.flag, reply.as_bytes(), &req.from)
        {
            warn!("tx reply to {}: {e}", self.transport.ntoa(&req.from));
        }
    }

    /// Reply "command unrecognised", echoing any command text.
    pub(crate) fn unrec_reply(&mut self, req: &ReqInfo, text: &[u8]) {
        let mut reply = Reply::new(CommandCode::Unrec);
        if !text.is_empty() {
            reply.bytes(text).u8(b'\r');
        }
        self.send_reply(req, &reply);
    }

    /// Serialise an error as a reply.
    pub(crate) fn error_reply(&mut self, req: &ReqInfo, err: &FsError) {
        debug!("error reply: {err}");
        let reply = Reply::error(err);
        self.send_reply(req, &reply);
    }

    /// Translate a client path against the request's context handles.
    pub(crate) fn unixify(
        &self,
        ci: Option<usize>,
        ctx: &ReqContext,
        client_path: &[u8],
    ) -> Result<PathBuf, FsError> {
        let mut bases = nametrans::Bases::default();
        if let Some(ci) = ci {
            let handles = &self.clients[ci].handles;
            bases.urd = handles.get(ctx.urd).map(|h| h.path.as_path());
            bases.csd = handles.get(ctx.csd).map(|h| h.path.as_path());
            bases.lib = handles.get(ctx.lib).map(|h| h.path.as_path());
        }
        nametrans::unixify_path(client_path, &bases, &self.opts.discname)
    }

    /// Whether the session owns `upath`: system privilege owns
    /// everything, and otherwise the canonicalized path must sit at or
    /// below the user's canonicalized root directory.
    pub(crate) fn is_owner(&self, ci: usize, upath: &Path) -> bool {
        let client = &self.clients[ci];
        if client.privilege == crate::users::Privilege::System {
            return true;
        }
        let Some(urd) = self.users.urd(&client.login) else {
            return false;
        };
        let Ok(urd) = fs::canonicalize(urd) else {
            return false;
        };
        let Some(target) = canonical_for_compare(upath) else {
            return false;
        };
        target.starts_with(&urd)
    }
}

/// Canonicalize a path that may not exist yet: fall back to its parent
/// plus the leaf.
fn canonical_for_compare(path: &Path) -> Option<PathBuf> {
    if let Ok(p) = fs::canonicalize(path) {
        return Some(p);
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Some(fs::canonicalize(parent).ok()?.join(path.file_name()?))
}

/// The leaf of a Unix path as a displayable string.
pub(crate) fn leafname(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default()
}
