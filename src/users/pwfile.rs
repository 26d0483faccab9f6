//! The password-file user provider.
//!
//! One user per line, colon-separated:
//! `user:pwhash:urd:priv[:opt4]`.  The hash field is
//! `salt$hex(sha256(salt ‖ password))`; an empty hash means no password
//! is required.  The privilege field is a letter (`S`, `L`, `F`, or
//! empty).  All writes go through a temporary file renamed into place.

use std::fs;
use std::io;
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use log::warn;
use sha2::Digest;
use sha2::Sha256;

use crate::proto::errors::ErrorCode;
use crate::proto::errors::FsError;
use crate::users::LoginOk;
use crate::users::Privilege;
use crate::users::UserProvider;

/// One parsed password-file line.
#[derive(Debug, Clone)]
struct PwEntry {
    user: String,
    hash: String,
    urd: String,
    privilege: String,
    opt4: Option<u8>,
}

impl PwEntry {
    fn render(&self, default_opt4: u8) -> String {
        format!(
            "{}:{}:{}:{}:{}\n",
            self.user,
            self.hash,
            self.urd,
            self.privilege,
            self.opt4.unwrap_or(default_opt4)
        )
    }
}

/// The password-file provider.
#[derive(Debug)]
pub struct PwFile {
    path: PathBuf,
    default_opt4: u8,
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{salt}${}", hex::encode(hasher.finalize()))
}

fn check_password(stored: &str, password: &str) -> bool {
    if stored.is_empty() {
        return password.is_empty();
    }
    match stored.split_once('$') {
        Some((salt, _)) => hash_password(salt, password) == stored,
        None => false,
    }
}

impl PwFile {
    /// Serve users from the file at `path`.
    pub fn new(path: PathBuf, default_opt4: u8) -> PwFile {
        PwFile { path, default_opt4 }
    }

    fn read_entries(&self) -> io::Result<Vec<PwEntry>> {
        let text = fs::read_to_string(&self.path)?;
        let mut entries = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let mut fields = line.splitn(5, ':');
            let (Some(user), Some(hash), Some(urd), Some(privilege)) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                warn!("{}:{}: malformatted line", self.path.display(), lineno + 1);
                continue;
            };
            let opt4 = fields.next().and_then(|s| s.parse().ok());
            entries.push(PwEntry {
                user: user.to_string(),
                hash: hash.to_string(),
                urd: urd.to_string(),
                privilege: privilege.to_string(),
                opt4,
            });
        }
        Ok(entries)
    }

    /// Rewrite the whole file via a temporary and rename.
    fn write_entries(&self, entries: &[PwEntry]) -> io::Result<()> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut out = fs::File::create(&tmp)?;
            for entry in entries {
                out.write_all(entry.render(self.default_opt4).as_bytes())?;
            }
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.path)
    }

    fn find(&self, login: &str) -> Option<PwEntry> {
        self.read_entries()
            .ok()?
            .into_iter()
            .find(|e| e.user.eq_ignore_ascii_case(login))
    }
}

impl UserProvider for PwFile {
    fn validate(&self, login: &str, password: &str) -> Option<LoginOk> {
        let entry = self.find(login)?;
        if !check_password(&entry.hash, password) {
            return None;
        }
        Some(LoginOk {
            urd: entry.urd.clone(),
            opt4: entry.opt4.unwrap_or(self.default_opt4),
        })
    }

    fn urd(&self, login: &str) -> Option<String> {
        Some(self.find(login)?.urd)
    }

    fn change(&self, login: &str, oldpw: &str, newpw: &str) -> Result<(), FsError> {
        let mut entries = self.read_entries().map_err(FsError::from)?;
        let entry = entries
            .iter_mut()
            .find(|e| e.user.eq_ignore_ascii_case(login))
            .ok_or(FsError::Code(ErrorCode::BadUser))?;
        if Privilege::from_letter(&entry.privilege) == Privilege::Limited
            || Privilege::from_letter(&entry.privilege) == Privilege::Fixed
        {
            return Err(ErrorCode::NoPriv.into());
        }
        if !check_password(&entry.hash, oldpw) {
            return Err(ErrorCode::WrongPw.into());
        }
        let salt = format!("{:08x}", Utc::now().timestamp() as u32);
        entry.hash = hash_password(&salt, newpw);
        self.write_entries(&entries).map_err(FsError::from)
    }

    fn set_opt4(&self, login: &str, opt4: u8) -> Result<(), FsError> {
        let mut entries = self.read_entries().map_err(FsError::from)?;
        let entry = entries
            .iter_mut()
            .find(|e| e.user.eq_ignore_ascii_case(login))
            .ok_or(FsError::Code(ErrorCode::BadUser))?;
        if matches!(
            Privilege::from_letter(&entry.privilege),
            Privilege::Limited | Privilege::Fixed
        ) {
            return Err(ErrorCode::NoPriv.into());
        }
        entry.opt4 = Some(opt4 & 0xf);
        self.write_entries(&entries).map_err(FsError::from)
    }

    fn set_priv(&self, caller: Privilege, target: &str, newpriv: &str) -> Result<(), FsError> {
        if caller != Privilege::System {
            return Err(ErrorCode::NoPriv.into());
        }
        let mut entries = self.read_entries().map_err(FsError::from)?;
        let entry = entries
            .iter_mut()
            .find(|e| e.user.eq_ignore_ascii_case(target))
            .ok_or(FsError::Code(ErrorCode::BadUser))?;
        entry.privilege = Privilege::from_letter(newpriv).letter().to_string();
        self.write_entries(&entries).map_err(FsError::from)
    }

    fn get_priv(&self, login: &str) -> Privilege {
        self.find(login)
            .map(|e| Privilege::from_letter(&e.privilege))
            .unwrap_or(Privilege::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pwfile_with(content: &str) -> (tempfile::TempDir, PwFile) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passwd");
        fs::write(&path, content).unwrap();
        (dir, PwFile::new(path, 0))
    }

    #[test]
    fn empty_hash_means_no_password() {
        let (_d, pw) = pwfile_with("guest::urd.guest::\n");
        assert!(pw.validate("GUEST", "").is_some());
        assert!(pw.validate("guest", "secret").is_none());
    }

    #[test]
    fn hashed_password_round_trip() {
        let hash = hash_password("00c0ffee", "secret");
        let (_d, pw) = pwfile_with(&format!("fred:{hash}:users.fred:S:2\n"));
        let ok = pw.validate("fred", "secret").unwrap();
        assert_eq!(ok.urd, "users.fred");
        assert_eq!(ok.opt4, 2);
        assert!(pw.validate("fred", "wrong").is_none());
        assert_eq!(pw.get_priv("FRED"), Privilege::System);
    }

    #[test]
    fn change_rewrites_the_file() {
        let (_d, pw) = pwfile_with("fred::urd::\n");
        pw.change("fred", "", "newpw").unwrap();
        assert!(pw.validate("fred", "").is_none());
        assert!(pw.validate("fred", "newpw").is_some());
        // Wrong old password is rejected.
        assert!(matches!(
            pw.change("fred", "bad", "x"),
            Err(FsError::Code(ErrorCode::WrongPw))
        ));
    }

    #[test]
    fn limited_users_cannot_change_password() {
        let (_d, pw) = pwfile_with("ltd::urd:L:\n");
        assert!(matches!(
            pw.change("ltd", "", "x"),
            Err(FsError::Code(ErrorCode::NoPriv))
        ));
    }

    #[test]
    fn only_system_sets_privilege() {
        let (_d, pw) = pwfile_with("fred::urd::\nboss::urd:S:\n");
        assert!(pw.set_priv(Privilege::None, "fred", "S").is_err());
        pw.set_priv(Privilege::System, "fred", "S").unwrap();
        assert_eq!(pw.get_priv("fred"), Privilege::System);
    }

    #[test]
    fn opt4_is_stored() {
        let (_d, pw) = pwfile_with("fred::urd::\n");
        pw.set_opt4("fred", 3).unwrap();
        assert_eq!(pw.validate("fred", "").unwrap().opt4, 3);
    }
}
