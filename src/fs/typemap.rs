//! Guessing 12-bit file types for Unix files.
//!
//! A `,xxx` suffix on the Unix name is authoritative.  Otherwise the
//! configured rules are tried in order: a name regex, a mode/mask pair,
//! or an unconditional default.  With no matching rule everything is
//! plain data.

use regex::Regex;

/// Type given to files nothing else claims.
pub const TYPE_DATA: u16 = 0xffd;
/// Type for text files.
pub const TYPE_TEXT: u16 = 0xfff;
/// Type conventionally used for Unix executables.
pub const TYPE_UNIXEX: u16 = 0xfe6;

#[derive(Debug)]
enum Rule {
    Name { re: Regex, filetype: u16 },
    Mode { val: u32, mask: u32, filetype: u16 },
    Default { filetype: u16 },
}

/// An ordered set of type-guessing rules.
#[derive(Debug, Default)]
pub struct TypeMap {
    rules: Vec<Rule>,
}

impl TypeMap {
    /// Append a rule matching the leaf name against a regex.
    pub fn add_name(&mut self, pattern: &str, filetype: u16) -> Result<(), regex::Error> {
        let re = Regex::new(pattern)?;
        self.rules.push(Rule::Name { re, filetype });
        Ok(())
    }

    /// Append a rule matching `mode & mask == val`.
    pub fn add_mode(&mut self, val: u32, mask: u32, filetype: u16) {
        self.rules.push(Rule::Mode { val, mask, filetype });
    }

    /// Append an unconditional rule.
    pub fn add_default(&mut self, filetype: u16) {
        self.rules.push(Rule::Default { filetype });
    }

    /// Pick a type for a file from its leaf name and Unix mode.
    pub fn guess(&self, name: &str, mode: u32) -> u16 {
        if let Some(suffix) = name.len().checked_sub(4).and_then(|i| name.get(i..)) {
            if let Some(hex) = suffix.strip_prefix(',') {
                if let Ok(t) = u16::from_str_radix(hex, 16) {
                    return t;
                }
            }
        }
        for rule in &self.rules {
            match rule {
                Rule::Name { re, filetype } => {
                    if re.is_match(name) {
                        return *filetype;
                    }
                }
                Rule::Mode { val, mask, filetype } => {
                    if mode & mask == *val {
                        return *filetype;
                    }
                }
                Rule::Default { filetype } => return *filetype,
            }
        }
        TYPE_DATA
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_wins() {
        let map = TypeMap::default();
        assert_eq!(map.guess("prog,ffb", 0o644), 0xffb);
        assert_eq!(map.guess("plain", 0o644), TYPE_DATA);
    }

    #[test]
    fn rules_apply_in_order() {
        let mut map = TypeMap::default();
        map.add_name("(?i)\\.txt$", TYPE_TEXT).unwrap();
        map.add_mode(0o100, 0o100, TYPE_UNIXEX);
        map.add_default(0x123);
        assert_eq!(map.guess("README.TXT", 0o644), TYPE_TEXT);
        assert_eq!(map.guess("a.out", 0o755), TYPE_UNIXEX);
        assert_eq!(map.guess("misc", 0o644), 0x123);
    }

    #[test]
    fn bad_regex_is_rejected() {
        let mut map = TypeMap::default();
        assert!(map.add_name("(", TYPE_TEXT).is_err());
    }
}
