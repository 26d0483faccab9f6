//! Configuration file parsing.
//!
//! One option per line, keyword first, `#` comments.  Recognised
//! options:
//!
//! ```text
//! root <path>                  directory served as the disc (required
//!                              unless urd does without it)
//! urd <path>                   shared fixed user root (null provider)
//! pwfile <path>                password file (switches user provider)
//! lib <path>                   default library directory
//! opt4 <n>                     default boot option
//! station <n.n>                our station address (emulated transport)
//! beebem_cfg <path>            station table (switches transport)
//! beebem_ingress <bool>        also check source UDP ports on ingress
//! typemap name <regex> <hex>   file type for leaf names matching regex
//! typemap mode <val> <mask> <hex>  file type by Unix mode bits (octal)
//! typemap default <hex>        fallback file type
//! infofmt riscos|sj            default *INFO format
//! safehandles <bool>           default safe-handles setting
//! debug <bool>                 debug logging
//! syslog <bool>                log through the system log
//! ```
//!
//! Unknown options are a fatal configuration error.

use std::error;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use crate::InfoFormat;
use crate::fs::typemap::TypeMap;

/// Parsed server configuration.
#[derive(Debug)]
pub struct Config {
    /// Directory served as the disc.
    pub root: Option<PathBuf>,
    /// Fixed user root for the anonymous provider, relative to root.
    pub urd: String,
    /// Password file path, if the password provider is wanted.
    pub pwfile: Option<PathBuf>,
    /// Default library directory, relative to root.
    pub lib: String,
    /// Default boot option.
    pub opt4: u8,
    /// Our station address, network*256+station.
    pub station: u16,
    /// Station table path; selects the emulated transport.
    pub beebem_cfg: Option<PathBuf>,
    /// Check source UDP ports against the station table.
    pub beebem_ingress: bool,
    /// File-type guessing rules.
    pub typemap: TypeMap,
    /// Default `*INFO` format.
    pub infofmt: InfoFormat,
    /// Default safe-handles setting.
    pub safehandles: bool,
    /// Debug logging.
    pub debug: bool,
    /// Log through the system log rather than stderr.
    pub syslog: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            root: None,
            urd: ".".to_string(),
            pwfile: None,
            lib: ".".to_string(),
            opt4: 0,
            station: 254,
            beebem_cfg: None,
            beebem_ingress: false,
            typemap: TypeMap::default(),
            infofmt: InfoFormat::RiscOs,
            safehandles: true,
            debug: false,
            syslog: true,
        }
    }
}

/// A configuration problem; always fatal at startup.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(io::Error),
    /// A line did not parse.
    Parse {
        /// Line number, 1-based.
        line: usize,
        /// What was wrong.
        message: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "reading configuration: {e}"),
            ConfigError::Parse { line, message } => write!(f, "line {line}: {message}"),
        }
    }
}

impl error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    if ["true", "on", "yes", "1"].iter().any(|v| s.eq_ignore_ascii_case(v)) {
        Some(true)
    } else if ["false", "off", "no", "0"].iter().any(|v| s.eq_ignore_ascii_case(v)) {
        Some(false)
    } else {
        None
    }
}

fn parse_station(s: &str) -> Option<u16> {
    let (net, stn) = s.split_once('.')?;
    let net: u16 = net.parse().ok()?;
    let stn: u16 = stn.parse().ok()?;
    if net > 255 || stn > 255 {
        return None;
    }
    Some(net * 256 + stn)
}

impl Config {
    /// Read and parse the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path)?;
        Config::parse(&text)
    }

    /// Parse configuration text.
    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        for (idx, raw) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut words = line.split_whitespace();
            let keyword = words.next().unwrap_or_default().to_ascii_lowercase();
            let parse_err = |message: String| ConfigError::Parse { line: lineno, message };
            let mut need = |what: &str| {
                words
                    .next()
                    .map(str::to_string)
                    .ok_or_else(|| parse_err(format!("{keyword}: missing {what}")))
            };
            match keyword.as_str() {
                "root" => config.root = Some(PathBuf::from(need("path")?)),
                "urd" => config.urd = need("path")?,
                "pwfile" => config.pwfile = Some(PathBuf::from(need("path")?)),
                "lib" => config.lib = need("path")?,
                "opt4" => {
                    config.opt4 = need("value")?
                        .parse()
                        .map_err(|_| parse_err("opt4: not a number".into()))?;
                }
                "station" => {
                    config.station = parse_station(&need("address")?)
                        .ok_or_else(|| parse_err("station: want <net>.<stn>".into()))?;
                }
                "beebem_cfg" => config.beebem_cfg = Some(PathBuf::from(need("path")?)),
                "beebem_ingress" => {
                    config.beebem_ingress = parse_bool(&need("value")?)
                        .ok_or_else(|| parse_err("beebem_ingress: not a boolean".into()))?;
                }
                "typemap" => {
                    let kind = need("kind")?;
                    match kind.as_str() {
                        "name" => {
                            let re = need("regex")?;
                            let ty = u16::from_str_radix(&need("type")?, 16)
                                .map_err(|_| parse_err("typemap: bad type".into()))?;
                            config
                                .typemap
                                .add_name(&re, ty)
                                .map_err(|e| parse_err(format!("typemap: {e}")))?;
                        }
                        "mode" => {
                            let val = u32::from_str_radix(&need("value")?, 8)
                                .map_err(|_| parse_err("typemap: bad mode value".into()))?;
                            let mask = u32::from_str_radix(&need("mask")?, 8)
                                .map_err(|_| parse_err("typemap: bad mode mask".into()))?;
                            let ty = u16::from_str_radix(&need("type")?, 16)
                                .map_err(|_| parse_err("typemap: bad type".into()))?;
                            config.typemap.add_mode(val, mask, ty);
                        }
                        "default" => {
                            let ty = u16::from_str_radix(&need("type")?, 16)
                                .map_err(|_| parse_err("typemap: bad type".into()))?;
                            config.typemap.add_default(ty);
                        }
                        other => {
                            return Err(parse_err(format!("typemap: unknown kind '{other}'")));
                        }
                    }
                }
                "infofmt" => {
                    let val = need("value")?;
                    config.infofmt = if val.eq_ignore_ascii_case("riscos") {
                        InfoFormat::RiscOs
                    } else if val.eq_ignore_ascii_case("sj") {
                        InfoFormat::Sj
                    } else {
                        return Err(parse_err("infofmt: want riscos or sj".into()));
                    };
                }
                "safehandles" => {
                    config.safehandles = parse_bool(&need("value")?)
                        .ok_or_else(|| parse_err("safehandles: not a boolean".into()))?;
                }
                "debug" => {
                    config.debug = parse_bool(&need("value")?)
                        .ok_or_else(|| parse_err("debug: not a boolean".into()))?;
                }
                "syslog" => {
                    config.syslog = parse_bool(&need("value")?)
                        .ok_or_else(|| parse_err("syslog: not a boolean".into()))?;
                }
                other => {
                    return Err(parse_err(format!("unknown option '{other}'")));
                }
            }
            if let Some(extra) = words.next() {
                return Err(ConfigError::Parse {
                    line: lineno,
                    message: format!("{keyword}: trailing junk '{extra}'"),
                });
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_configuration() {
        let text = "\
# comment
root /srv/econet
urd .
pwfile /etc/ecofs.passwd
lib library
opt4 2
station 0.254
beebem_cfg /etc/beebem.cfg
beebem_ingress yes
typemap name \\.txt$ fff
typemap mode 100 100 fe6
typemap default ffd
infofmt sj
safehandles off
debug on
syslog no
";
        let config = Config::parse(text).unwrap();
        assert_eq!(config.root, Some(PathBuf::from("/srv/econet")));
        assert_eq!(config.lib, "library");
        assert_eq!(config.opt4, 2);
        assert_eq!(config.station, 254);
        assert!(config.beebem_ingress);
        assert_eq!(config.infofmt, InfoFormat::Sj);
        assert!(!config.safehandles);
        assert!(config.debug);
        assert!(!config.syslog);
        assert_eq!(config.typemap.guess("a.txt", 0o644), 0xfff);
        assert_eq!(config.typemap.guess("prog", 0o755), 0xfe6);
        assert_eq!(config.typemap.guess("misc", 0o644), 0xffd);
    }

    #[test]
    fn unknown_option_is_fatal() {
        assert!(matches!(
            Config::parse("nonsense 1\n"),
            Err(ConfigError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn station_parsing() {
        assert_eq!(parse_station("0.254"), Some(254));
        assert_eq!(parse_station("2.1"), Some(513));
        assert_eq!(parse_station("300.1"), None);
        assert_eq!(parse_station("254"), None);
    }
}
