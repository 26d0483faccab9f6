//! The `*`-command interpreter (function 0).
//!
//! Commands match case-insensitively and may be abbreviated with a
//! trailing dot after a per-command minimum prefix.  Arguments are
//! space-separated; double quotes make an argument literal (there is no
//! escape for an embedded quote).  Anything unmatched is echoed back as
//! "unrecognised" for the client to interpret itself.

use std::fs;

use log::debug;
use log::info;

use crate::InfoFormat;
use crate::fs::FileServer;
use crate::fs::ReqInfo;
use crate::fs::examine::long_info;
use crate::fs::handle::Handle;
use crate::fs::handle::HandleKind;
use crate::fs::meta;
use crate::fs::session::Session;
use crate::proto::errors::ErrorCode;
use crate::proto::errors::FsError;
use crate::proto::reply::CommandCode;
use crate::proto::reply::Reply;
use crate::proto::request::ReqContext;

struct Command {
    name: &'static str,
    minlen: usize,
    exec: fn(&mut FileServer, &ReqInfo, &ReqContext, &str) -> Result<(), FsError>,
}

const COMMANDS: &[Command] = &[
    Command { name: "BYE", minlen: 1, exec: FileServer::cmd_bye },
    Command { name: "CAT", minlen: 0, exec: FileServer::cmd_cat },
    Command { name: "CDIR", minlen: 2, exec: FileServer::cmd_cdir },
    Command { name: "DELETE", minlen: 3, exec: FileServer::cmd_delete },
    Command { name: "DIR", minlen: 3, exec: FileServer::cmd_dir },
    Command { name: "FSOPT", minlen: 2, exec: FileServer::cmd_fsopt },
    Command { name: "INFO", minlen: 1, exec: FileServer::cmd_info },
    Command { name: "I AM", minlen: 2, exec: FileServer::cmd_i_am },
    Command { name: "LIB", minlen: 3, exec: FileServer::cmd_lib },
    Command { name: "LOAD", minlen: 1, exec: FileServer::cmd_load },
    Command { name: "LOGOFF", minlen: 3, exec: FileServer::cmd_bye },
    Command { name: "PASS", minlen: 1, exec: FileServer::cmd_pass },
    Command { name: "PRIV", minlen: 1, exec: FileServer::cmd_priv },
    Command { name: "RENAME", minlen: 1, exec: FileServer::cmd_rename },
    Command { name: "SAVE", minlen: 1, exec: FileServer::cmd_save },
    Command { name: "SDISC", minlen: 3, exec: FileServer::cmd_sdisc },
    Command { name: "ACCESS", minlen: 2, exec: FileServer::cmd_access },
];

/// Work out whether `line` starts with an acceptable form of `name`.
/// On a match, returns the tail after the command word.
fn cli_match<'a>(line: &'a str, name: &str, minlen: usize) -> Option<&'a str> {
    let line_b = line.as_bytes();
    let name_b = name.as_bytes();
    for i in 0..=name_b.len() {
        let this = line_b.get(i).copied().unwrap_or(0).to_ascii_uppercase();
        if i == name_b.len() {
            // The full command name has matched; the input must end
            // here or continue with a separator.
            return matches!(this, 0 | b' ' | b'.' | b'^' | b'&' | b'@' | b'$' | b'%')
                .then(|| &line[i..]);
        }
        if this == b'.' {
            // Abbreviated input.
            return (i >= minlen).then(|| &line[i + 1..]);
        }
        if name_b[i] != this {
            return None;
        }
    }
    None
}

/// Break off the first argument of `tail`, quoted or bare, returning it
/// and the rest.
pub(crate) fn cli_getarg(tail: &str) -> (&str, &str) {
    let tail = tail.trim_start_matches(' ');
    if let Some(rest) = tail.strip_prefix('"') {
        // No way to embed a double quote; the next one ends the string.
        match rest.find('"') {
            Some(end) => (&rest[..end], &rest[end + 1..]),
            None => (rest, ""),
        }
    } else {
        match tail.find(' ') {
            Some(end) => (&tail[..end], &tail[end + 1..]),
            None => (tail, ""),
        }
    }
}

impl FileServer {
    /// Handle a command-line packet (function 0).
    pub(crate) fn op_cli(
        &mut self,
        req: &ReqInfo,
        ctx: &ReqContext,
        args: &[u8],
    ) -> Result<(), FsError> {
        let mut line = args;
        if let Some(cr) = line.iter().position(|&c| c == b'\r') {
            line = &line[..cr];
        }
        let line = String::from_utf8_lossy(line).into_owned();
        let head = line.trim_start_matches(['*', ' ', '\t']);
        if head.is_empty() {
            debug!("cli [{line}] -> ignore");
            self.send_reply(req, &Reply::new(CommandCode::Done));
            return Ok(());
        }
        for cmd in COMMANDS {
            if let Some(tail) = cli_match(head, cmd.name, cmd.minlen) {
                if cmd.name == "I AM" || cmd.name == "PASS" {
                    debug!("cli [{} <hidden>]", cmd.name);
                } else {
                    debug!("cli [{head}]");
                }
                return (cmd.exec)(self, req, ctx, tail);
            }
        }
        debug!("cli [{head}] -> unrecognised");
        self.unrec_reply(req, head.as_bytes());
        Ok(())
    }

    fn cmd_i_am(
        &mut self,
        req: &ReqInfo,
        _ctx: &ReqContext,
        tail: &str,
    ) -> Result<(), FsError> {
        let (mut login, mut tail) = cli_getarg(tail);
        if login.starts_with(|c: char| c.is_ascii_digit()) {
            // The client passed a station number first.  Skip it.
            (login, tail) = cli_getarg(tail);
        }
        let (password, _) = cli_getarg(tail);
        debug!("log on [{login}]");
        let Some(ok) = self.users.validate(login, password) else {
            return Err(ErrorCode::WrongPw.into());
        };
        // Authenticated.  A previous session from this address is
        // replaced wholesale.
        if let Some(old) = self.find_client(&req.from) {
            self.delete_client(old);
        }
        let mut session = Session::new(
            req.from,
            login.to_string(),
            self.opts.infofmt,
            self.opts.safehandles,
        );
        session.privilege = self.users.get_priv(login);
        info!(
            "login {} from {} (priv {:?})",
            login,
            self.transport.ntoa(&req.from),
            session.privilege
        );
        // The initial user environment: three distinct handles even
        // though two share a path.
        let urd = open_dir_handle(&mut session, &ok.urd);
        let csd = open_dir_handle(&mut session, &ok.urd);
        let lib = open_dir_handle(&mut session, &self.opts.lib);
        self.clients.push(session);

        let mut reply = Reply::new(CommandCode::Logon);
        reply.u8(urd).u8(csd).u8(lib).u8(ok.opt4);
        self.send_reply(req, &reply);
        Ok(())
    }

    fn cmd_bye(&mut self, req: &ReqInfo, _ctx: &ReqContext, _tail: &str) -> Result<(), FsError> {
        // *LOGOFF lands here too: SJ servers allowed it as an
        // unprivileged synonym for *BYE.
        self.op_logoff(req)
    }

    fn cmd_pass(&mut self, req: &ReqInfo, _ctx: &ReqContext, tail: &str) -> Result<(), FsError> {
        let (oldpw, tail) = cli_getarg(tail);
        let (newpw, _) = cli_getarg(tail);
        debug!("change password");
        let ci = self.client_of(req)?;
        let login = self.clients[ci].login.clone();
        self.users
            .change(&login, oldpw, newpw)
            .map_err(|_| FsError::Code(ErrorCode::BadPw))?;
        self.send_reply(req, &Reply::new(CommandCode::Done));
        Ok(())
    }

    fn cmd_priv(&mut self, req: &ReqInfo, _ctx: &ReqContext, tail: &str) -> Result<(), FsError> {
        let (user, tail) = cli_getarg(tail);
        let (newpriv, _) = cli_getarg(tail);
        debug!("priv request {user} to '{newpriv}'");
        let ci = self.client_of(req)?;
        let caller = self.clients[ci].privilege;
        self.users
            .set_priv(caller, user, newpriv)
            .map_err(|_| FsError::Code(ErrorCode::NoPriv))?;
        self.send_reply(req, &Reply::new(CommandCode::Done));
        Ok(())
    }

    fn cmd_cat(&mut self, req: &ReqInfo, _ctx: &ReqContext, tail: &str) -> Result<(), FsError> {
        // Nothing is interpreted here; the client is handed the path
        // back and performs the catalogue itself.
        let (path, _) = cli_getarg(tail);
        debug!("cat [{path}]");
        let mut reply = Reply::new(CommandCode::Cat);
        reply.cr_str(path);
        self.send_reply(req, &reply);
        Ok(())
    }

    fn cmd_rename(&mut self, req: &ReqInfo, ctx: &ReqContext, tail: &str) -> Result<(), FsError> {
        let (oldname, tail) = cli_getarg(tail);
        let (newname, _) = cli_getarg(tail);
        debug!("rename [{oldname},{newname}]");
        let ci = self.client_of(req)?;
        let old_upath = self.unixify(Some(ci), ctx, oldname.as_bytes())?;
        let new_upath = self.unixify(Some(ci), ctx, newname.as_bytes())?;
        // Capture any sidecar before the object moves out from under
        // its path.
        let had_sidecar = fs::read_link(
            old_upath
                .parent()
                .unwrap_or_else(|| std::path::Path::new("."))
                .join(".Acorn")
                .join(old_upath.file_name().unwrap_or_default()),
        )
        .is_ok();
        let st = meta::fs_stat(&old_upath).ok();
        let filemeta = meta::get_meta(&old_upath, st.as_ref(), &self.opts.typemap);
        fs::rename(&old_upath, &new_upath).map_err(FsError::from)?;
        meta::del_meta(&old_upath);
        if had_sidecar {
            meta::set_meta(&new_upath, &filemeta).map_err(FsError::from)?;
        }
        self.send_reply(req, &Reply::new(CommandCode::Done));
        Ok(())
    }

    fn cmd_cdir(&mut self, req: &ReqInfo, ctx: &ReqContext, tail: &str) -> Result<(), FsError> {
        let (path, _) = cli_getarg(tail);
        debug!("cdir [{path}]");
        if path.is_empty() {
            return Err(FsError::Custom("Syntax"));
        }
        self.create_dir(req, ctx, path.as_bytes())
    }

    fn cmd_delete(&mut self, req: &ReqInfo, ctx: &ReqContext, tail: &str) -> Result<(), FsError> {
        let (path, _) = cli_getarg(tail);
        debug!("delete [{path}]");
        if path.is_empty() {
            return Err(FsError::Custom("Syntax"));
        }
        self.delete_path(req, ctx, path.as_bytes(), false)
    }

    fn cmd_sdisc(&mut self, req: &ReqInfo, ctx: &ReqContext, _tail: &str) -> Result<(), FsError> {
        debug!("sdisc");
        let ci = self.client_of(req)?;
        let login = self.clients[ci].login.clone();
        let Some(urd_path) = self.users.urd(&login) else {
            return Err(FsError::Custom("Failed lookup"));
        };
        // Reset the user environment; the old context handles go away.
        let lib_path = self.opts.lib.clone();
        let client = &mut self.clients[ci];
        client.handles.release(ctx.urd);
        client.handles.release(ctx.csd);
        client.handles.release(ctx.lib);
        let urd = open_dir_handle(client, &urd_path);
        let csd = open_dir_handle(client, &urd_path);
        let lib = open_dir_handle(client, &lib_path);
        let mut reply = Reply::new(CommandCode::Sdisc);
        reply.u8(urd).u8(csd).u8(lib);
        self.send_reply(req, &reply);
        Ok(())
    }

    fn cmd_dir(&mut self, req: &ReqInfo, ctx: &ReqContext, tail: &str) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let (mut path, _) = cli_getarg(tail);
        if path.is_empty() {
            path = "&";
        }
        debug!("dir [{path}]");
        let upath = self.unixify(Some(ci), ctx, path.as_bytes())?;
        let new_handle = self.open_checked_dir(ci, upath)?;
        self.clients[ci].handles.release(ctx.csd);
        let mut reply = Reply::new(CommandCode::Dir);
        reply.u8(new_handle);
        self.send_reply(req, &reply);
        Ok(())
    }

    fn cmd_lib(&mut self, req: &ReqInfo, ctx: &ReqContext, tail: &str) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let (path, _) = cli_getarg(tail);
        let upath = if path.is_empty() {
            debug!("default lib");
            self.opts.lib.clone().into()
        } else {
            debug!("lib [{path}]");
            self.unixify(Some(ci), ctx, path.as_bytes())?
        };
        let new_handle = self.open_checked_dir(ci, upath)?;
        self.clients[ci].handles.release(ctx.lib);
        let mut reply = Reply::new(CommandCode::Lib);
        reply.u8(new_handle);
        self.send_reply(req, &reply);
        Ok(())
    }

    /// Open a directory handle for `*DIR`/`*LIB`, rejecting non-dirs.
    fn open_checked_dir(
        &mut self,
        ci: usize,
        upath: std::path::PathBuf,
    ) -> Result<u8, FsError> {
        let st = meta::fs_stat(&upath).map_err(FsError::from)?;
        if !st.is_dir() {
            return Err(ErrorCode::NotDir.into());
        }
        let safehandles = self.clients[ci].safehandles;
        let h = self.clients[ci].handles.insert(
            false,
            safehandles,
            Handle {
                path: upath,
                kind: HandleKind::Dir,
            },
        );
        if h == 0 {
            return Err(ErrorCode::ManyOpen.into());
        }
        Ok(h)
    }

    fn cmd_info(&mut self, req: &ReqInfo, ctx: &ReqContext, tail: &str) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let (path, _) = cli_getarg(tail);
        debug!("info [{path}]");
        let upath = self.unixify(Some(ci), ctx, path.as_bytes())?;
        let st = meta::fs_stat(&upath).map_err(FsError::from)?;
        let name = crate::fs::leafname(&upath);
        let line = long_info(
            self.clients[ci].infofmt,
            &upath,
            &name,
            &st,
            &self.opts.typemap,
        );
        let mut reply = Reply::new(CommandCode::Info);
        reply.bytes(&line);
        self.send_reply(req, &reply);
        Ok(())
    }

    /// `*SAVE` and `*LOAD` don't transfer anything themselves; they
    /// parse the command and hand the pieces back for the client to
    /// re-issue as the bulk operation.
    fn cmd_save(&mut self, req: &ReqInfo, _ctx: &ReqContext, tail: &str) -> Result<(), FsError> {
        let (path, tail) = cli_getarg(tail);
        if path.is_empty() {
            return Err(FsError::Custom("Syntax"));
        }
        let (start_s, tail) = cli_getarg(tail);
        let (end_s, tail) = cli_getarg(tail);
        let (exec_s, _) = cli_getarg(tail);
        if start_s.is_empty() || end_s.is_empty() {
            return Err(FsError::Custom("Syntax"));
        }
        let start = u32::from_str_radix(start_s, 16).unwrap_or(0);
        let end = u32::from_str_radix(end_s, 16).unwrap_or(0);
        let exec = if exec_s.is_empty() {
            start
        } else {
            u32::from_str_radix(exec_s, 16).unwrap_or(0)
        };
        debug!("save [{start:08x}, {exec:08x}, {:06x}, {path}]", end.wrapping_sub(start));
        let mut reply = Reply::new(CommandCode::Save);
        reply
            .val(start.into(), 4)
            .val(exec.into(), 4)
            .val(end.wrapping_sub(start).into(), 3)
            .cr_str(path);
        self.send_reply(req, &reply);
        Ok(())
    }

    fn cmd_load(&mut self, req: &ReqInfo, _ctx: &ReqContext, tail: &str) -> Result<(), FsError> {
        let (path, tail) = cli_getarg(tail);
        if path.is_empty() {
            return Err(FsError::Custom("Syntax"));
        }
        let (addr_s, _) = cli_getarg(tail);
        let (addr, found) = if addr_s.is_empty() {
            (0, 0)
        } else {
            (u32::from_str_radix(addr_s, 16).unwrap_or(0), 0xff)
        };
        debug!("load [{addr:08x}/{found:02x}, {path}]");
        let mut reply = Reply::new(CommandCode::Load);
        reply.val(addr.into(), 4).u8(found).cr_str(path);
        self.send_reply(req, &reply);
        Ok(())
    }

    fn cmd_fsopt(&mut self, req: &ReqInfo, _ctx: &ReqContext, tail: &str) -> Result<(), FsError> {
        const SYNTAX: FsError = FsError::Custom("Syntax: FSOPT <OPTION> <VALUE>");
        let ci = self.client_of(req)?;
        let (key, tail) = cli_getarg(tail);
        let (val, _) = cli_getarg(tail);
        if key.is_empty() || val.is_empty() {
            return Err(SYNTAX);
        }
        if key.eq_ignore_ascii_case("infofmt") {
            self.clients[ci].infofmt = if val.eq_ignore_ascii_case("riscos") {
                InfoFormat::RiscOs
            } else if val.eq_ignore_ascii_case("sj") {
                InfoFormat::Sj
            } else {
                return Err(SYNTAX);
            };
        } else if key.eq_ignore_ascii_case("safehandles") {
            self.clients[ci].safehandles = if ["true", "on", "yes"]
                .iter()
                .any(|v| val.eq_ignore_ascii_case(v))
            {
                true
            } else if ["false", "off", "no"]
                .iter()
                .any(|v| val.eq_ignore_ascii_case(v))
            {
                false
            } else {
                return Err(SYNTAX);
            };
        } else {
            return Err(SYNTAX);
        }
        self.send_reply(req, &Reply::new(CommandCode::Done));
        Ok(())
    }

    fn cmd_access(&mut self, req: &ReqInfo, ctx: &ReqContext, tail: &str) -> Result<(), FsError> {
        let (name, tail) = cli_getarg(tail);
        let (_access, _) = cli_getarg(tail);
        debug!("access [{name}]");
        let ci = self.client_of(req)?;
        let upath = self.unixify(Some(ci), ctx, name.as_bytes())?;
        // The access string is parsed but not applied; owners (and
        // system users) are simply told it worked.
        if !self.is_owner(ci, &upath) {
            return Err(ErrorCode::NoAccess.into());
        }
        self.send_reply(req, &Reply::new(CommandCode::Done));
        Ok(())
    }
}

/// Open a directory-context handle at login/sdisc time.  Returns 0 when
/// the path is unusable; the reply still goes out and the client sees
/// the null handle.
fn open_dir_handle(session: &mut Session, path: &str) -> u8 {
    let path = std::path::PathBuf::from(path);
    if meta::fs_stat(&path).is_err() {
        return 0;
    }
    session.handles.insert(
        false,
        session.safehandles,
        Handle {
            path,
            kind: HandleKind::Dir,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviations() {
        assert_eq!(cli_match("BYE", "BYE", 1), Some(""));
        assert_eq!(cli_match("bye", "BYE", 1), Some(""));
        assert_eq!(cli_match("B.", "BYE", 1), Some(""));
        assert_eq!(cli_match("BY. extra", "BYE", 1), Some(" extra"));
        // Too short an abbreviation.
        assert_eq!(cli_match("D.", "DELETE", 3), None);
        assert_eq!(cli_match("DEL.X", "DELETE", 3), Some("X"));
        // A mismatched character.
        assert_eq!(cli_match("BYTE", "BYE", 1), None);
        // The full name may run straight into a path character.
        assert_eq!(cli_match("DIR&", "DIR", 3), Some("&"));
        assert_eq!(cli_match("DIRT", "DIR", 3), None);
    }

    #[test]
    fn i_am_matches_with_space() {
        assert_eq!(cli_match("I AM GUEST", "I AM", 2), Some(" GUEST"));
        assert_eq!(cli_match("i am guest", "I AM", 2), Some(" guest"));
        assert_eq!(cli_match("I.GUEST", "I AM", 2), None);
    }

    #[test]
    fn getarg_quoting() {
        assert_eq!(cli_getarg("  plain tail"), ("plain", "tail"));
        assert_eq!(cli_getarg("\"two words\" rest"), ("two words", "rest"));
        assert_eq!(cli_getarg("\"unterminated"), ("unterminated", ""));
        assert_eq!(cli_getarg(""), ("", ""));
        assert_eq!(cli_getarg("last"), ("last", ""));
    }
}
