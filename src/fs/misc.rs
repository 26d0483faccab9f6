//! Miscellaneous file server calls: object info, environment queries,
//! user enumeration, deletion, directory creation, time, version and
//! free-space reporting.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::time::SystemTime;

use chrono::DateTime;
use chrono::Local;
use chrono::Timelike;
use log::debug;
use nix::sys::statvfs::statvfs;

use crate::fs::FileServer;
use crate::fs::ReqInfo;
use crate::fs::leafname;
use crate::fs::meta;
use crate::fs::meta::ObjType;
use crate::fs::nametrans;
use crate::proto::argument::ArgumentIterator;
use crate::proto::errors::ErrorCode;
use crate::proto::errors::FsError;
use crate::proto::frame;
use crate::proto::reply::CommandCode;
use crate::proto::reply::Reply;
use crate::proto::request::ReqContext;
use crate::users::Privilege;

/// Info sub-format selectors.
const INFO_CTIME: u8 = 1;
const INFO_META: u8 = 2;
const INFO_SIZE: u8 = 3;
const INFO_ACCESS: u8 = 4;
const INFO_ALL: u8 = 5;
const INFO_DIR: u8 = 6;
const INFO_UID: u8 = 7;

/// Set-info sub-format selectors.
const SET_INFO_ALL: u8 = 1;
const SET_INFO_LOAD: u8 = 2;
const SET_INFO_EXEC: u8 = 3;
const SET_INFO_ACCESS: u8 = 4;

/// Directory-access bytes in the info-dir reply.
const DIR_ACCESS_OWNER: u8 = 0x00;
const DIR_ACCESS_PUBLIC: u8 = 0xff;

impl FileServer {
    /// Read disc info (function 14).  We keep up the illusion of one
    /// disc, numbered zero.
    pub(crate) fn op_get_discs(&mut self, req: &ReqInfo, args: &[u8]) -> Result<(), FsError> {
        let mut it = ArgumentIterator::new(args);
        let sdrive = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))?;
        let ndrives = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))?;
        debug!("get discs [{sdrive}/{ndrives}]");
        let found = sdrive == 0 && ndrives > 0;
        let mut reply = Reply::new(CommandCode::Discs);
        reply.u8(u8::from(found));
        if found {
            reply.u8(0);
            let discname = self.opts.discname.clone();
            reply.padded(&discname, 16, b' ');
        }
        self.send_reply(req, &reply);
        Ok(())
    }

    /// Read object info (function 18).
    pub(crate) fn op_get_info(
        &mut self,
        req: &ReqInfo,
        ctx: &ReqContext,
        args: &[u8],
    ) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let mut it = ArgumentIterator::new(args);
        let arg = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))?;
        let path = it.fetch_cr_str();
        debug!("get info [{arg}, '{}']", String::from_utf8_lossy(path));
        let upath = self.unixify(Some(ci), ctx, path)?;
        let st = meta::fs_stat(&upath).ok();
        let objtype = st
            .as_ref()
            .map_or(ObjType::None, |st| meta::mode_to_type(st.mode()));

        let mut reply = Reply::new(CommandCode::Done);
        match arg {
            INFO_CTIME => {
                reply.u8(objtype as u8);
                match &st {
                    Some(st) => reply.bytes(&meta::pack_date(meta::get_birthtime(st))),
                    None => reply.bytes(&[0, 0]),
                };
            }
            INFO_META => {
                reply.u8(objtype as u8);
                match &st {
                    Some(st) => {
                        let m = meta::get_meta(&upath, Some(st), &self.opts.typemap);
                        reply.val(m.load.into(), 4).val(m.exec.into(), 4)
                    }
                    None => reply.bytes(&[0; 8]),
                };
            }
            INFO_SIZE => {
                reply.u8(objtype as u8);
                match &st {
                    Some(st) => reply.val(st.len(), 3),
                    None => reply.bytes(&[0; 3]),
                };
            }
            INFO_ACCESS => {
                reply.u8(objtype as u8);
                match &st {
                    Some(st) => reply.u8(meta::mode_to_access(st.mode()).bits()),
                    None => reply.u8(0),
                };
            }
            INFO_ALL => {
                reply.u8(objtype as u8);
                match &st {
                    Some(st) => {
                        let m = meta::get_meta(&upath, Some(st), &self.opts.typemap);
                        reply
                            .val(m.load.into(), 4)
                            .val(m.exec.into(), 4)
                            .val(st.len(), 3)
                            .u8(meta::mode_to_access(st.mode()).bits())
                            .bytes(&meta::pack_date(meta::get_birthtime(st)))
                    }
                    None => reply.bytes(&[0; 14]),
                };
            }
            INFO_DIR => {
                let Some(_st) = &st else {
                    return Err(ErrorCode::NotFound.into());
                };
                let mut dir_name = nametrans::acornify_name(&leafname(&upath));
                if dir_name.is_empty() {
                    dir_name = "$".to_string();
                }
                let dir_access = if self.is_owner(ci, &upath)
                    || self.clients[ci].privilege == Privilege::System
                {
                    DIR_ACCESS_OWNER
                } else {
                    DIR_ACCESS_PUBLIC
                };
                reply.u8(0).u8(0).u8(10);
                reply.padded(&dir_name, 10, b' ');
                reply.u8(dir_access);
                reply.u8(0); // cycle number; changes are not tracked
            }
            INFO_UID => {
                reply.u8(objtype as u8);
                match &st {
                    Some(st) => {
                        reply
                            .val(u64::from(meta::get_sin(st)), 3)
                            .u8(0)
                            .val(st.dev(), 2)
                    }
                    None => reply.bytes(&[0; 6]),
                };
            }
            _ => return Err(ErrorCode::BadInfo.into()),
        }
        self.send_reply(req, &reply);
        Ok(())
    }

    /// Set object info (function 19).
    pub(crate) fn op_set_info(
        &mut self,
        req: &ReqInfo,
        ctx: &ReqContext,
        args: &[u8],
    ) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let mut it = ArgumentIterator::new(args);
        let arg = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))?;
        let bad = || FsError::Code(ErrorCode::BadStr);
        let (set_load, set_exec, set_access, load, exec, access, path);
        match arg {
            SET_INFO_ALL => {
                load = it.fetch_val(4).ok_or_else(bad)? as u32;
                exec = it.fetch_val(4).ok_or_else(bad)? as u32;
                access = it.fetch_u8().ok_or_else(bad)?;
                path = it.fetch_cr_str();
                (set_load, set_exec, set_access) = (true, true, true);
            }
            SET_INFO_LOAD => {
                load = it.fetch_val(4).ok_or_else(bad)? as u32;
                (exec, access) = (0, 0);
                path = it.fetch_cr_str();
                (set_load, set_exec, set_access) = (true, false, false);
            }
            SET_INFO_EXEC => {
                exec = it.fetch_val(4).ok_or_else(bad)? as u32;
                (load, access) = (0, 0);
                path = it.fetch_cr_str();
                (set_load, set_exec, set_access) = (false, true, false);
            }
            SET_INFO_ACCESS => {
                access = it.fetch_u8().ok_or_else(bad)?;
                (load, exec) = (0, 0);
                path = it.fetch_cr_str();
                (set_load, set_exec, set_access) = (false, false, true);
            }
            _ => return Err(ErrorCode::BadInfo.into()),
        }
        debug!("set info [{arg}, {}]", String::from_utf8_lossy(path));
        let upath = self.unixify(Some(ci), ctx, path)?;
        let st = meta::fs_stat(&upath).map_err(FsError::from)?;

        if set_load || set_exec {
            let mut m = meta::get_meta(&upath, Some(&st), &self.opts.typemap);
            if set_load {
                m.load = load;
            }
            if set_exec {
                m.exec = exec;
            }
            meta::set_meta(&upath, &m).map_err(FsError::from)?;
        }
        // Access is never written to directories: historic servers had
        // no directory permissions and clients do strange things with
        // them, so the request succeeds without touching the mode.
        if set_access && !st.is_dir() {
            let mode = meta::access_to_mode(
                meta::Access::from_bits_truncate(access),
                false,
            );
            fs::set_permissions(&upath, std::os::unix::fs::PermissionsExt::from_mode(mode))
                .map_err(FsError::from)?;
        }
        self.send_reply(req, &Reply::new(CommandCode::Done));
        Ok(())
    }

    /// Read user environment (function 21).
    pub(crate) fn op_get_uenv(&mut self, req: &ReqInfo, ctx: &ReqContext) -> Result<(), FsError> {
        debug!("get user environment");
        let leaf_of = |h: u8| -> String {
            let Some(ci) = self.find_client(&req.from) else {
                return String::new();
            };
            match self.clients[ci].handles.get(h) {
                Some(handle) => {
                    let mut leaf = nametrans::acornify_name(&leafname(&handle.path));
                    if leaf.is_empty() {
                        leaf = "$".to_string();
                    }
                    leaf
                }
                None => String::new(),
            }
        };
        let csd_leaf = leaf_of(ctx.csd);
        let lib_leaf = leaf_of(ctx.lib);
        let discname = self.opts.discname.clone();
        let mut reply = Reply::new(CommandCode::Done);
        reply.u8(16);
        reply.padded(&discname, 16, b' ');
        reply.padded(&csd_leaf, 10, b' ');
        reply.padded(&lib_leaf, 10, b' ');
        self.send_reply(req, &reply);
        Ok(())
    }

    /// Catalogue header (function 4), an heirloom from the earliest
    /// clients.
    pub(crate) fn op_cat_header(
        &mut self,
        req: &ReqInfo,
        ctx: &ReqContext,
        args: &[u8],
    ) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let mut it = ArgumentIterator::new(args);
        let path = it.fetch_cr_str();
        debug!("catalogue header [{}]", String::from_utf8_lossy(path));
        let upath = self.unixify(Some(ci), ctx, path)?;
        meta::fs_stat(&upath).map_err(FsError::from)?;

        let mut dir_name = nametrans::acornify_name(&leafname(&upath));
        if dir_name.is_empty() {
            dir_name = "$".to_string();
        }
        let ownership = if self.is_owner(ci, &upath)
            || self.clients[ci].privilege == Privilege::System
        {
            b'O'
        } else {
            b'P'
        };
        let discname = self.opts.discname.clone();
        let mut reply = Reply::new(CommandCode::Done);
        reply.padded(&dir_name, 10, b' ');
        reply.u8(b' ').u8(ownership);
        reply.bytes(b"   ");
        reply.padded(&discname, 12, 0);
        reply.bytes(b"\r\x80");
        self.send_reply(req, &reply);
        Ok(())
    }

    /// Log off (function 23).
    pub(crate) fn op_logoff(&mut self, req: &ReqInfo) -> Result<(), FsError> {
        debug!("log off");
        if let Some(ci) = self.find_client(&req.from) {
            self.delete_client(ci);
        }
        self.send_reply(req, &Reply::new(CommandCode::Done));
        Ok(())
    }

    /// Read logged-on users (function 15).
    pub(crate) fn op_get_users_on(&mut self, req: &ReqInfo, args: &[u8]) -> Result<(), FsError> {
        self.client_of(req)?;
        let mut it = ArgumentIterator::new(args);
        let start = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))? as usize;
        let nusers = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))? as usize;
        debug!("users on [{start}/{nusers}]");
        let mut body = Vec::new();
        let mut count = 0usize;
        for client in self.clients.iter().skip(start).take(nusers) {
            body.extend_from_slice(&self.transport.get_stn(&client.host));
            let login: String = client.login.chars().take(10).collect();
            body.extend_from_slice(login.as_bytes());
            body.push(b'\r');
            body.push(client.privilege as u8);
            count += 1;
        }
        let mut reply = Reply::new(CommandCode::Done);
        reply.u8(count as u8).bytes(&body);
        self.send_reply(req, &reply);
        Ok(())
    }

    /// Read user info (function 24).
    pub(crate) fn op_get_user(&mut self, req: &ReqInfo, args: &[u8]) -> Result<(), FsError> {
        self.client_of(req)?;
        let mut it = ArgumentIterator::new(args);
        let user = it.fetch_cr_str();
        let user = String::from_utf8_lossy(user);
        debug!("get user info [{user}]");
        let found = self
            .clients
            .iter()
            .find(|c| c.login.eq_ignore_ascii_case(&user))
            .map(|c| (c.privilege, c.host));
        match found {
            Some((privilege, host)) => {
                let stn = self.transport.get_stn(&host);
                let mut reply = Reply::new(CommandCode::Done);
                reply.u8(privilege as u8).bytes(&stn);
                self.send_reply(req, &reply);
            }
            None => {
                let mut reply = Reply::new(CommandCode::Done);
                reply.set_return_code(ErrorCode::UserNotOn as u8);
                self.send_reply(req, &reply);
            }
        }
        Ok(())
    }

    /// Delete (function 20).
    pub(crate) fn op_delete(
        &mut self,
        req: &ReqInfo,
        ctx: &ReqContext,
        args: &[u8],
    ) -> Result<(), FsError> {
        let mut it = ArgumentIterator::new(args);
        let path = it.fetch_cr_str().to_vec();
        debug!("delete [{}]", String::from_utf8_lossy(&path));
        self.delete_path(req, ctx, &path, true)
    }

    /// Shared by function 20 and `*DELETE`.  The protocol-level delete
    /// reports the metadata and size of what it removed.
    pub(crate) fn delete_path(
        &mut self,
        req: &ReqInfo,
        ctx: &ReqContext,
        path: &[u8],
        with_info: bool,
    ) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let upath = self.unixify(Some(ci), ctx, path)?;
        let st = meta::fs_stat(&upath).map_err(FsError::from)?;
        let mode = st.mode();
        if mode & libc::S_IXUSR != 0 {
            return Err(ErrorCode::Locked.into());
        }
        let is_owner = self.is_owner(ci, &upath);
        let allowed = if is_owner {
            mode & libc::S_IWUSR != 0
        } else {
            mode & libc::S_IWOTH != 0
        };
        if !allowed {
            return Err(ErrorCode::NoAccess.into());
        }
        let filemeta = meta::get_meta(&upath, Some(&st), &self.opts.typemap);
        if st.is_dir() {
            // A lone sidecar directory must not make the directory look
            // occupied.
            let _ = fs::remove_dir(upath.join(".Acorn"));
            fs::remove_dir(&upath).map_err(FsError::from)?;
        } else {
            fs::remove_file(&upath).map_err(FsError::from)?;
        }
        meta::del_meta(&upath);
        let mut reply = Reply::new(CommandCode::Done);
        if with_info {
            reply
                .val(filemeta.load.into(), 4)
                .val(filemeta.exec.into(), 4)
                .val(st.len(), 3);
        }
        self.send_reply(req, &reply);
        Ok(())
    }

    /// Create directory (function 27).
    pub(crate) fn op_cdirn(
        &mut self,
        req: &ReqInfo,
        ctx: &ReqContext,
        args: &[u8],
    ) -> Result<(), FsError> {
        let mut it = ArgumentIterator::new(args);
        // The client names a size in sectors; space is not reserved.
        let _size = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))?;
        let path = it.fetch_cr_str().to_vec();
        debug!("cdirn [{}]", String::from_utf8_lossy(&path));
        self.create_dir(req, ctx, &path)
    }

    /// Shared by function 27 and `*CDIR`.
    pub(crate) fn create_dir(
        &mut self,
        req: &ReqInfo,
        ctx: &ReqContext,
        path: &[u8],
    ) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let upath = self.unixify(Some(ci), ctx, path)?;
        if !self.is_owner(ci, &upath) {
            return Err(ErrorCode::NoAccess.into());
        }
        fs::create_dir(&upath).map_err(FsError::from)?;
        let _ = fs::set_permissions(
            &upath,
            std::os::unix::fs::PermissionsExt::from_mode(0o777),
        );
        self.send_reply(req, &Reply::new(CommandCode::Done));
        Ok(())
    }

    /// Set boot option (function 22).
    pub(crate) fn op_set_opt4(&mut self, req: &ReqInfo, args: &[u8]) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let opt4 = ArgumentIterator::new(args)
            .fetch_u8()
            .ok_or(FsError::Code(ErrorCode::BadStr))?
            & 0xf;
        debug!("set boot option [{opt4}]");
        let login = self.clients[ci].login.clone();
        self.users.set_opt4(&login, opt4)?;
        self.send_reply(req, &Reply::new(CommandCode::Done));
        Ok(())
    }

    /// Read date and time (function 16).  Open to anyone, logged on or
    /// not.
    pub(crate) fn op_get_time(&mut self, req: &ReqInfo) -> Result<(), FsError> {
        debug!("get time");
        let now = SystemTime::now();
        let local: DateTime<Local> = now.into();
        let mut reply = Reply::new(CommandCode::Done);
        reply.bytes(&meta::pack_date(now));
        reply
            .u8(local.hour() as u8)
            .u8(local.minute() as u8)
            .u8(local.second() as u8);
        self.send_reply(req, &reply);
        Ok(())
    }

    /// Read file server version (function 25).
    pub(crate) fn op_get_version(&mut self, req: &ReqInfo) -> Result<(), FsError> {
        debug!("get version");
        // Nine characters of description, a space, then x.yz in BCD,
        // and a CR for the clients that insist on one.
        let text = format!(
            "{:<9.9} {:x}.{:02x}",
            frame::FS_DESCRIPTION,
            frame::VERSION_MAJOR,
            frame::VERSION_MINOR
        );
        let mut reply = Reply::new(CommandCode::Done);
        reply.cr_str(&text);
        self.send_reply(req, &reply);
        Ok(())
    }

    /// Read disc free space (function 26).
    pub(crate) fn op_get_disc_free(&mut self, req: &ReqInfo, args: &[u8]) -> Result<(), FsError> {
        let mut it = ArgumentIterator::new(args);
        let discname = it.fetch_cr_str();
        debug!("get disc free [{}]", String::from_utf8_lossy(discname));
        // Whatever disc the client names, there is only one to report.
        let f = statvfs(".").map_err(FsError::from)?;
        let bytes = (f.blocks() as u64 * f.fragment_size() as u64).min(0xffff_ffff);
        let bfree = (f.blocks_free() as u64 * f.fragment_size() as u64).min(0xffff_ffff);
        let mut reply = Reply::new(CommandCode::Done);
        reply.val(bfree >> 8, 3).val(bytes >> 8, 3);
        self.send_reply(req, &reply);
        Ok(())
    }

    /// Read user free space (function 30).  There are no quotas, so
    /// everyone gets the disc's available space.
    pub(crate) fn op_get_user_free(&mut self, req: &ReqInfo, args: &[u8]) -> Result<(), FsError> {
        let mut it = ArgumentIterator::new(args);
        let username = it.fetch_cr_str();
        debug!("get user free [{}]", String::from_utf8_lossy(username));
        let f = statvfs(".").map_err(FsError::from)?;
        let bavail = (f.blocks_available() as u64 * f.fragment_size() as u64).min(0xffff_ffff);
        let mut reply = Reply::new(CommandCode::Done);
        reply.val(bavail, 4);
        self.send_reply(req, &reply);
        Ok(())
    }
}
