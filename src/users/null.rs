//! The anonymous user provider.
//!
//! Any login succeeds and lands in one fixed, shared user root.  Nothing
//! can be changed, and nobody has privilege.

use crate::proto::errors::ErrorCode;
use crate::proto::errors::FsError;
use crate::users::LoginOk;
use crate::users::Privilege;
use crate::users::UserProvider;

/// Provider used when no password file is configured.
#[derive(Debug)]
pub struct NullUsers {
    fixed_urd: String,
    default_opt4: u8,
}

impl NullUsers {
    /// All users share `fixed_urd` and boot with `default_opt4`.
    pub fn new(fixed_urd: String, default_opt4: u8) -> NullUsers {
        NullUsers {
            fixed_urd,
            default_opt4,
        }
    }
}

impl UserProvider for NullUsers {
    fn validate(&self, _login: &str, _password: &str) -> Option<LoginOk> {
        Some(LoginOk {
            urd: self.fixed_urd.clone(),
            opt4: self.default_opt4,
        })
    }

    fn urd(&self, _login: &str) -> Option<String> {
        Some(self.fixed_urd.clone())
    }

    fn change(&self, _login: &str, _oldpw: &str, _newpw: &str) -> Result<(), FsError> {
        Err(ErrorCode::BadPw.into())
    }

    fn set_opt4(&self, _login: &str, _opt4: u8) -> Result<(), FsError> {
        Err(FsError::Custom("Not allowed"))
    }

    fn set_priv(&self, _caller: Privilege, _target: &str, _newpriv: &str) -> Result<(), FsError> {
        Err(ErrorCode::NoPriv.into())
    }

    fn get_priv(&self, _login: &str) -> Privilege {
        Privilege::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyone_may_log_in() {
        let users = NullUsers::new(".".into(), 0);
        let ok = users.validate("GUEST", "").unwrap();
        assert_eq!(ok.urd, ".");
        assert_eq!(ok.opt4, 0);
        assert_eq!(users.get_priv("GUEST"), Privilege::None);
        assert!(users.change("GUEST", "", "pw").is_err());
    }
}
