//! User database.
//!
//! The server validates logins and looks up per-user state through a
//! pluggable provider: [`null::NullUsers`] accepts anyone into one
//! shared root, [`pwfile::PwFile`] keeps a colon-separated password
//! file.

use num_enum::TryFromPrimitive;

use crate::proto::errors::FsError;

pub mod null;
pub mod pwfile;

/// Privilege levels a user can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, TryFromPrimitive)]
#[repr(u8)]
pub enum Privilege {
    /// Normal user.
    None = 0,
    /// Fixed: may not change password or boot option.
    Fixed = 1,
    /// Limited: may not change password.
    Limited = 2,
    /// System: may administer other users.
    System = 3,
}

impl Privilege {
    /// The letter the password file stores, empty for none.
    pub fn letter(self) -> &'static str {
        match self {
            Privilege::None => "",
            Privilege::Fixed => "F",
            Privilege::Limited => "L",
            Privilege::System => "S",
        }
    }

    /// Parse a privilege field letter; anything unrecognised is none.
    pub fn from_letter(s: &str) -> Privilege {
        match s.chars().next() {
            Some('S' | 's') => Privilege::System,
            Some('L' | 'l') => Privilege::Limited,
            Some('F' | 'f') => Privilege::Fixed,
            _ => Privilege::None,
        }
    }
}

/// Outcome of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOk {
    /// The user root directory, as a server-side path.
    pub urd: String,
    /// Boot option to hand back to the client.
    pub opt4: u8,
}

/// The pluggable user database.
pub trait UserProvider {
    /// Validate credentials; `None` means not authorized.
    fn validate(&self, login: &str, password: &str) -> Option<LoginOk>;

    /// The user root directory of a known user.
    fn urd(&self, login: &str) -> Option<String>;

    /// Change a password.
    fn change(&self, login: &str, oldpw: &str, newpw: &str) -> Result<(), FsError>;

    /// Store a new boot option.
    fn set_opt4(&self, login: &str, opt4: u8) -> Result<(), FsError>;

    /// Store a new privilege for `target`; only system callers may.
    fn set_priv(&self, caller: Privilege, target: &str, newpriv: &str) -> Result<(), FsError>;

    /// The privilege of a user, none when unknown.
    fn get_priv(&self, login: &str) -> Privilege;
}
