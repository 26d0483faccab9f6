//! File-name translation between the client naming model and Unix.
//!
//! Client paths use `.` as the separator and `/` inside leaves, may
//! start with a disc prefix or a magic base character, climb with `^`,
//! and may contain `*`/`?` wildcards.  Unix leaves beginning with a dot
//! are stuffed behind two extra dots so that `.`, `..` and the `.Acorn`
//! sidecar directory can never be named from the wire.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::ffi::OsStringExt;
use std::path::Path;
use std::path::PathBuf;

use log::debug;

use crate::proto::errors::ErrorCode;
use crate::proto::errors::FsError;

/// The directory handles a path may be resolved against.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bases<'a> {
    /// User root directory, for `&`.
    pub urd: Option<&'a Path>,
    /// Currently selected directory, for `@` and unprefixed paths.
    pub csd: Option<&'a Path>,
    /// Library directory, for `%`.
    pub lib: Option<&'a Path>,
}

/// Convert a Unix leaf name to client style for presentation: un-stuff
/// the leading dots, swap `.` and `/`, and drop a `,xxx` type suffix.
pub fn acornify_name(name: &str) -> String {
    let mut b = name.as_bytes();
    if b == b"." {
        b = b"";
    }
    if b.len() >= 3 && b[0] == b'.' && b[1] == b'.' && b[2] == b'.' {
        b = &b[2..];
    }
    let mut out: Vec<u8> = b
        .iter()
        .map(|&c| if c == b'.' { b'/' } else { c })
        .collect();
    if out.len() >= 4 && out[out.len() - 4] == b',' {
        out.truncate(out.len() - 4);
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Whether a Unix leaf name is hidden from clients: dotfiles that are
/// not dot-stuffed, and names longer than ten significant characters
/// (discounting a `,xxx` suffix).
pub fn hidden_name(name: &str) -> bool {
    let b = name.as_bytes();
    let rest = if b.first() == Some(&b'.') {
        if b.len() >= 3 && b[1] == b'.' && b[2] == b'.' {
            &b[2..]
        } else {
            return true;
        }
    } else {
        b
    };
    let mut len = rest.len();
    if len >= 4 && rest[len - 4] == b',' {
        len -= 4;
    }
    len > 10
}

/// Swap separators, dot-stuffing any leaf that would start with a dot.
fn trans_simple(path: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < path.len() {
        if path[i] == b'/' {
            out.extend_from_slice(b"..");
        }
        while i < path.len() && path[i] != b'.' {
            out.push(if path[i] == b'/' { b'.' } else { path[i] });
            i += 1;
        }
        if i < path.len() {
            i += 1;
            out.push(b'/');
        }
    }
}

/// Remove `foo/^` constructs from a path.
fn unhat(path: &[u8]) -> Vec<u8> {
    let mut kept: Vec<&[u8]> = Vec::new();
    for comp in path.split(|&c| c == b'/') {
        if comp == b"^" {
            kept.pop();
        } else {
            kept.push(comp);
        }
    }
    kept.join(&b'/')
}

/// Case-insensitively match one wildcard fragment at the given position.
fn wcfrag(frag: &[u8], file: &[u8]) -> bool {
    for (i, &f) in frag.iter().enumerate() {
        if f != b'?' && !file.get(i).is_some_and(|c| c.eq_ignore_ascii_case(&f)) {
            return false;
        }
    }
    true
}

/// Match a whole wildcard against the first `len` bytes of `file`.  The
/// leading fragment anchors at the start and the trailing fragment at
/// the end; `*` between fragments spans anything.
fn wcmatch(wc: &[u8], file: &[u8], len: usize) -> bool {
    let mut wc = wc;
    let mut pos = 0usize;
    let mut len = len;
    let mut at_start = true;
    while !wc.is_empty() {
        let fragend = wc.iter().position(|&c| c == b'*').unwrap_or(wc.len());
        let frag = &wc[..fragend];
        if fragend < wc.len() {
            while len >= frag.len()
                && ((at_start && pos != 0) || !wcfrag(frag, &file[pos..]))
            {
                pos += 1;
                len -= 1;
            }
            if len < frag.len() {
                return false;
            }
            pos += frag.len();
            len -= frag.len();
            wc = &wc[fragend..];
        } else {
            if len < frag.len() {
                return false;
            }
            pos += len - frag.len();
            return (!at_start || pos == 0) && wcfrag(frag, &file[pos..]);
        }
        while wc.first() == Some(&b'*') {
            wc = &wc[1..];
        }
        at_start = false;
    }
    true
}

/// Find the real file matching the leaf of `parent`/`leaf`.  This may
/// involve truncating to ten characters, case-insensitive matching,
/// wildcard matching (first hit wins) and a `,xxx` type suffix on the
/// real name.
fn match_component(parent: &[u8], leaf: &[u8]) -> Vec<u8> {
    let leaf = if leaf.len() > 10 { &leaf[..10] } else { leaf };
    let parent_path: &Path = match parent {
        b"" => Path::new("."),
        b"/" => Path::new("/"),
        other => Path::new(std::ffi::OsStr::from_bytes(other)),
    };
    let full = parent_path.join(std::ffi::OsStr::from_bytes(leaf));
    match fs::symlink_metadata(&full) {
        Ok(_) => return leaf.to_vec(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(_) => return leaf.to_vec(),
    }
    let Ok(entries) = fs::read_dir(parent_path) else {
        return leaf.to_vec();
    };
    for entry in entries.flatten() {
        let name_os = entry.file_name();
        let name = name_os.as_bytes();
        if name.first() == Some(&b'.')
            && !(name.len() >= 3 && name[1] == b'.' && name[2] == b'.')
        {
            continue; // hidden file
        }
        let mut namelen = name.len();
        if namelen >= 4 && name[namelen - 4] == b',' {
            namelen -= 4;
        }
        if namelen <= 10 && wcmatch(leaf, name, namelen) {
            return name.to_vec();
        }
    }
    leaf.to_vec()
}

/// Convert a client path into a Unix path relative to the served root.
pub fn unixify_path(
    client_path: &[u8],
    bases: &Bases<'_>,
    discname: &str,
) -> Result<PathBuf, FsError> {
    let mut path = client_path;
    // By default, resolve things from the CSD.
    let mut base: Option<&Path> = bases.csd;

    // Disc names can start with either ':' or '$', the latter being an
    // SJ-ism.  In either case paths are resolved from the root of that
    // disc.
    if matches!(path.first(), Some(b':' | b'$'))
        && !matches!(path.get(1), None | Some(b'.'))
    {
        path = &path[1..];
        let disclen = path.iter().position(|&c| c == b'.').unwrap_or(path.len());
        let named = &path[..disclen];
        if !named.eq_ignore_ascii_case(discname.as_bytes()) {
            return Err(ErrorCode::NotFound.into());
        }
        path = &path[disclen..];
        if !path.is_empty() {
            path = &path[1..];
        }
        base = Some(Path::new("."));
    }

    // A single magic character (optionally followed by a separator)
    // picks the base directory.
    if matches!(path.first(), Some(b'$' | b':' | b'&' | b'@' | b'%'))
        && matches!(path.get(1), None | Some(b'.'))
    {
        base = match path[0] {
            b'$' | b':' => Some(Path::new(".")),
            b'&' => bases.urd,
            b'@' => bases.csd,
            b'%' => bases.lib,
            _ => unreachable!(),
        };
        path = &path[1..];
        if !path.is_empty() {
            path = &path[1..];
        }
    }

    let Some(base) = base else {
        return Err(ErrorCode::Channel.into());
    };

    let mut acc = base.as_os_str().as_bytes().to_vec();
    acc.push(b'/');
    trans_simple(path, &mut acc);
    let acc = unhat(&acc);
    let acc = if acc.is_empty() { b".".to_vec() } else { acc };

    // Process every path component through the matcher.  An empty
    // component in the middle only arises from a leaf whose real name
    // starts with a dot; those are never reachable from the wire.
    let mut out: Vec<u8> = Vec::with_capacity(acc.len());
    let mut comps: Vec<&[u8]> = acc.split(|&c| c == b'/').collect();
    if acc.first() == Some(&b'/') {
        // Absolute base: keep the leading slash as-is.
        out.push(b'/');
        comps.remove(0);
    }
    let last = comps.len().saturating_sub(1);
    for (i, comp) in comps.into_iter().enumerate() {
        if comp.is_empty() && i != last {
            return Err(ErrorCode::NotFound.into());
        }
        let matched = match_component(&out, comp);
        if !matches!(out.as_slice(), b"" | b"/") {
            out.push(b'/');
        }
        out.extend_from_slice(&matched);
    }
    debug!(
        "unixify [{}] -> [{}]",
        String::from_utf8_lossy(client_path),
        String::from_utf8_lossy(&out)
    );
    Ok(PathBuf::from(OsString::from_vec(out)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bases_at<'a>(csd: &'a Path) -> Bases<'a> {
        Bases {
            urd: Some(csd),
            csd: Some(csd),
            lib: Some(csd),
        }
    }

    #[test]
    fn acornify() {
        assert_eq!(acornify_name("HELLO"), "HELLO");
        assert_eq!(acornify_name("."), "");
        assert_eq!(acornify_name("...hid"), "/hid");
        assert_eq!(acornify_name("a.b"), "a/b");
        assert_eq!(acornify_name("prog,ffb"), "prog");
    }

    #[test]
    fn hidden_names() {
        assert!(hidden_name(".profile"));
        assert!(hidden_name(".Acorn"));
        assert!(!hidden_name("...stuffed"));
        assert!(!hidden_name("shortname"));
        assert!(hidden_name("averylongfilename"));
        assert!(!hidden_name("0123456789,ffb"));
    }

    #[test]
    fn wildcards() {
        assert!(wcmatch(b"hello", b"HELLO", 5));
        assert!(wcmatch(b"h?llo", b"hello", 5));
        assert!(wcmatch(b"h*o", b"hello", 5));
        assert!(!wcmatch(b"h*x", b"hello", 5));
        assert!(wcmatch(b"*llo", b"hello", 5));
        // A trailing fragment anchors at the end.
        assert!(!wcmatch(b"*ll", b"hello", 5));
        // The leading fragment anchors at the start.
        assert!(!wcmatch(b"ell*", b"hello", 5));
        // Suffix bytes beyond the significant length don't take part.
        assert!(wcmatch(b"prog", b"prog,ffb", 4));
    }

    #[test]
    fn unhatting() {
        assert_eq!(unhat(b"a/b/^/c"), b"a/c".to_vec());
        assert_eq!(unhat(b"a/^/^/c"), b"c".to_vec());
        assert_eq!(unhat(b"^"), b"".to_vec());
    }

    #[test]
    fn separator_swap_and_stuffing() {
        let mut out = Vec::new();
        trans_simple(b"lib.prog/c", &mut out);
        assert_eq!(out, b"lib/prog.c".to_vec());
        let mut out = Vec::new();
        trans_simple(b"/hid", &mut out);
        assert_eq!(out, b"...hid".to_vec());
    }

    #[test]
    fn resolves_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("HELLO"), b"x").unwrap();
        let b = bases_at(dir.path());
        let p = unixify_path(b"hello", &b, "disc").unwrap();
        assert_eq!(p.file_name().unwrap(), "HELLO");
    }

    #[test]
    fn wrong_disc_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let b = bases_at(dir.path());
        assert!(matches!(
            unixify_path(b":elsewhere.x", &b, "disc"),
            Err(FsError::Code(ErrorCode::NotFound))
        ));
        // The right disc resolves from the root.
        let p = unixify_path(b":disc.x", &b, "disc").unwrap();
        assert_eq!(p, PathBuf::from("./x"));
    }

    #[test]
    fn missing_base_is_channel() {
        let b = Bases::default();
        assert!(matches!(
            unixify_path(b"anything", &b, "disc"),
            Err(FsError::Code(ErrorCode::Channel))
        ));
    }

    #[test]
    fn sidecar_cannot_be_named() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".Acorn")).unwrap();
        let b = bases_at(dir.path());
        // The dotted name never resolves to the real sidecar directory.
        assert!(matches!(
            unixify_path(b".Acorn", &b, "disc"),
            Err(FsError::Code(ErrorCode::NotFound))
        ));
        // A trailing separator is harmless.
        assert!(unixify_path(b"x.", &b, "disc").is_ok());
    }

    #[test]
    fn ten_char_truncation_matches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0123456789"), b"x").unwrap();
        let b = bases_at(dir.path());
        let p = unixify_path(b"0123456789abc", &b, "disc").unwrap();
        assert_eq!(p.file_name().unwrap(), "0123456789");
    }
}
