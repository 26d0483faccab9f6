//! Directory listing (function 3) and the long catalogue text it shares
//! with `*INFO`.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::SystemTime;

use chrono::DateTime;
use chrono::Datelike;
use chrono::Local;
use chrono::Timelike;
use log::debug;

use crate::InfoFormat;
use crate::fs::FileServer;
use crate::fs::ReqInfo;
use crate::fs::meta;
use crate::fs::nametrans;
use crate::fs::session::DirCache;
use crate::proto::argument::ArgumentIterator;
use crate::proto::errors::ErrorCode;
use crate::proto::errors::FsError;
use crate::proto::reply::CommandCode;
use crate::proto::reply::Reply;
use crate::proto::request::ReqContext;

/// Listing formats selected by the request argument.
const EXAMINE_ALL: u8 = 0;
const EXAMINE_LONGTXT: u8 = 1;
const EXAMINE_NAME: u8 = 2;
const EXAMINE_SHORTTXT: u8 = 3;

/// Terminator of the text formats.
const TEXT_END: u8 = 0x80;

const MONTHS: &str = "janfebmaraprmayjunjulaugsepoctnovdec";

fn month_abbrev(month0: u32) -> &'static str {
    let i = (month0 as usize % 12) * 3;
    &MONTHS[i..i + 3]
}

impl FileServer {
    /// Examine (function 3).
    pub(crate) fn op_examine(
        &mut self,
        req: &ReqInfo,
        ctx: &ReqContext,
        args: &[u8],
    ) -> Result<(), FsError> {
        let ci = self.client_of(req)?;
        let mut it = ArgumentIterator::new(args);
        let arg = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))?;
        let start = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))? as usize;
        let nentries = it.fetch_u8().ok_or(FsError::Code(ErrorCode::BadStr))? as usize;
        let path = it.fetch_cr_str();
        debug!(
            "examine [{arg}, {start}/{nentries}, {}]",
            String::from_utf8_lossy(path)
        );
        if !matches!(
            arg,
            EXAMINE_ALL | EXAMINE_LONGTXT | EXAMINE_NAME | EXAMINE_SHORTTXT
        ) {
            return Err(ErrorCode::BadExamine.into());
        }
        let upath = self.unixify(Some(ci), ctx, path)?;

        self.examine_read(ci, &upath, start)?;

        let infofmt = self.clients[ci].infofmt;
        let typemap = &self.opts.typemap;
        let Some(cache) = self.clients[ci].dir_cache.as_mut() else {
            return Err(FsError::Custom("Internal server error"));
        };

        // Skip forward to the requested start, counting visible entries.
        let mut seen = cache.start;
        while seen < start {
            let Some(name) = cache.names.get(cache.pos) else {
                break;
            };
            cache.pos += 1;
            if nametrans::hidden_name(name) {
                continue;
            }
            seen += 1;
        }

        let mut body: Vec<u8> = Vec::new();
        let mut emitted = 0usize;
        while emitted < nentries {
            let Some(name) = cache.names.get(cache.pos).cloned() else {
                break;
            };
            cache.pos += 1;
            if nametrans::hidden_name(&name) {
                continue;
            }
            let entry_path = cache.path.join(&name);
            let Ok(st) = meta::fs_stat(&entry_path) else {
                continue;
            };
            emitted += 1;
            let acorn = nametrans::acornify_name(&name);
            match arg {
                EXAMINE_ALL => {
                    let filemeta = meta::get_meta(&entry_path, Some(&st), typemap);
                    push_padded(&mut body, &acorn, 10);
                    body.extend_from_slice(&filemeta.load.to_le_bytes());
                    body.extend_from_slice(&filemeta.exec.to_le_bytes());
                    body.push(meta::mode_to_access(st.mode()).bits());
                    body.extend_from_slice(&meta::pack_date(meta::get_birthtime(&st)));
                    push_val(&mut body, u64::from(meta::get_sin(&st)), 3);
                    push_val(&mut body, st.len(), 3);
                }
                EXAMINE_NAME => {
                    body.push(10);
                    push_padded(&mut body, &acorn, 10);
                }
                EXAMINE_SHORTTXT => {
                    let access = meta::access_to_string(meta::mode_to_access(st.mode()));
                    body.extend_from_slice(
                        format!("{acorn:<10.10} {access:<7.7}").as_bytes(),
                    );
                    body.push(0);
                }
                EXAMINE_LONGTXT => {
                    let line = long_info(infofmt, &entry_path, &name, &st, typemap);
                    let cut = line
                        .iter()
                        .position(|&c| c == b'\r' || c == TEXT_END)
                        .unwrap_or(line.len());
                    body.extend_from_slice(&line[..cut]);
                    body.push(0);
                }
                _ => unreachable!(),
            }
        }

        let ended = cache.names.get(cache.pos).is_none();
        if ended {
            self.clients[ci].dir_cache = None;
        } else if let Some(cache) = self.clients[ci].dir_cache.as_mut() {
            cache.start = start + emitted;
        }

        let mut reply = Reply::new(CommandCode::Done);
        reply.u8(emitted as u8).u8(0).bytes(&body);
        if matches!(arg, EXAMINE_LONGTXT | EXAMINE_SHORTTXT) {
            reply.u8(TEXT_END);
        }
        self.send_reply(req, &reply);
        Ok(())
    }

    /// Make sure the session's listing cache covers `upath` at `start`.
    fn examine_read(&mut self, ci: usize, upath: &Path, start: usize) -> Result<(), FsError> {
        if let Some(cache) = &self.clients[ci].dir_cache {
            if cache.path == upath && cache.start == start {
                debug!("listing cache hit");
                return Ok(());
            }
        }
        let st = meta::fs_stat(upath).map_err(FsError::from)?;
        if !st.is_dir() {
            return Err(io::Error::from_raw_os_error(libc::ENOTDIR).into());
        }
        let mut names: Vec<String> = fs::read_dir(upath)
            .map_err(FsError::from)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort_by(|a, b| {
            a.to_ascii_lowercase()
                .cmp(&b.to_ascii_lowercase())
                .then_with(|| a.cmp(b))
        });
        self.clients[ci].dir_cache = Some(DirCache {
            path: upath.to_path_buf(),
            names,
            pos: 0,
            start: 0,
        });
        Ok(())
    }
}

fn push_padded(body: &mut Vec<u8>, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let take = bytes.len().min(width);
    body.extend_from_slice(&bytes[..take]);
    body.resize(body.len() + width - take, b' ');
}

fn push_val(body: &mut Vec<u8>, value: u64, len: usize) {
    let max = (1u64 << (len * 8)) - 1;
    let v = value.min(max);
    for i in 0..len {
        body.push((v >> (8 * i)) as u8);
    }
}

/// One line of catalogue text for an entry, in the session's chosen
/// format, terminated with CR and the text-end byte.
pub(crate) fn long_info(
    infofmt: InfoFormat,
    path: &Path,
    name: &str,
    st: &fs::Metadata,
    typemap: &crate::fs::typemap::TypeMap,
) -> Vec<u8> {
    let mut acorn = nametrans::acornify_name(name);
    if acorn.is_empty() {
        acorn = "$".to_string();
    }
    let access = meta::access_to_string(meta::mode_to_access(st.mode()));
    let mtime: DateTime<Local> = st.modified().unwrap_or(SystemTime::UNIX_EPOCH).into();
    let btime: DateTime<Local> = meta::get_birthtime(st).into();

    let text = match infofmt {
        InfoFormat::Sj if st.is_dir() => {
            // Directory lines show an entry count and the default
            // access a fresh entry would get under the current umask.
            let umask = nix::sys::stat::umask(nix::sys::stat::Mode::from_bits_truncate(0o777));
            nix::sys::stat::umask(umask);
            let default_access =
                meta::access_to_string(meta::mode_to_access(0o777 & !umask.bits()));
            let entries = count_visible_entries(path);
            format!(
                "{acorn:<10.10}  Entries={entries:<4}Default={default_access:<6.6}  \
                 {access:<6.6}  {:02}{}{:02} {:02}{}{:02} {:02}:{:02} 000 (000)",
                btime.day(),
                month_abbrev(btime.month0()),
                btime.year() % 100,
                mtime.day(),
                month_abbrev(mtime.month0()),
                mtime.year() % 100,
                mtime.hour(),
                mtime.minute(),
            )
        }
        InfoFormat::Sj => {
            let filemeta = meta::get_meta(path, Some(st), typemap);
            format!(
                "{acorn:<10.10} {:08X} {:08X}     {:06X} {access:<6.6}  \
                 {:02}{}{:02} {:02}{}{:02} {:02}:{:02} 000 (000)",
                filemeta.load,
                filemeta.exec,
                st.len(),
                btime.day(),
                month_abbrev(btime.month0()),
                btime.year() % 100,
                mtime.day(),
                month_abbrev(mtime.month0()),
                mtime.year() % 100,
                mtime.hour(),
                mtime.minute(),
            )
        }
        InfoFormat::RiscOs => {
            let filemeta = meta::get_meta(path, Some(st), typemap);
            format!(
                "{acorn:<10.10} {:08X} {:08X}   {:06X}   {access:<6.6}     \
                 {:02}:{:02}:{:02} {:06x}",
                filemeta.load,
                filemeta.exec,
                st.len(),
                btime.day(),
                btime.month(),
                btime.year() % 100,
                meta::get_sin(st),
            )
        }
    };
    let mut line = text.into_bytes();
    line.push(b'\r');
    line.push(TEXT_END);
    line
}

/// Count the visible entries of a subdirectory for SJ-style listings.
fn count_visible_entries(path: &Path) -> usize {
    let Ok(rd) = fs::read_dir(path) else { return 0 };
    rd.filter_map(|e| e.ok())
        .filter(|e| !nametrans::hidden_name(&e.file_name().to_string_lossy()))
        .count()
}
