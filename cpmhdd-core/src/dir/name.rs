//! CP/M 8.3 file names and their attribute bits.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// File attributes carried in the high bits of the name.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Attributes: u8 {
        /// High bit of the first extension byte.
        const READ_ONLY = 1 << 0;
        /// High bit of the second extension byte.
        const HIDDEN = 1 << 1;
    }
}

const READ_ONLY_BYTE: usize = 8;
const HIDDEN_BYTE: usize = 9;

/// Space-padded 8+3 name with attribute bits stripped.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpmName([u8; 11]);

impl CpmName {
    /// Encode a host file name.
    ///
    /// - Uppercases everything
    /// - Drops characters CP/M does not allow
    /// - Truncates name to 8 chars, extension to 3 chars
    ///
    /// An empty base name becomes `_`.
    pub fn encode(filename: &str) -> Self {
        let upper = filename.to_uppercase();
        let (name, ext) = match upper.rfind('.') {
            Some(pos) => (&upper[..pos], &upper[pos + 1..]),
            None => (upper.as_str(), ""),
        };

        // Valid CP/M characters: A-Z, 0-9, $ # @ ! % ' ` ( ) { } ~ ^ - _
        fn clean(s: &str) -> impl Iterator<Item = u8> + '_ {
            s.bytes()
                .filter(|c| c.is_ascii_alphanumeric() || b"$#@!%'`(){}~^-_".contains(c))
        }

        let mut raw = [b' '; 11];
        let mut len = 0;
        for (slot, c) in raw[..8].iter_mut().zip(clean(name)) {
            *slot = c;
            len += 1;
        }
        if len == 0 {
            raw[0] = b'_';
        }
        for (slot, c) in raw[8..].iter_mut().zip(clean(ext)) {
            *slot = c;
        }
        Self(raw)
    }

    /// Split 11 raw on-disk bytes into a name and its attributes.
    pub fn from_raw(raw: &[u8]) -> (Self, Attributes) {
        let mut name = [b' '; 11];
        for (dst, &src) in name.iter_mut().zip(raw) {
            *dst = src & 0x7F;
        }
        let mut attrs = Attributes::empty();
        if raw[READ_ONLY_BYTE] & 0x80 != 0 {
            attrs |= Attributes::READ_ONLY;
        }
        if raw[HIDDEN_BYTE] & 0x80 != 0 {
            attrs |= Attributes::HIDDEN;
        }
        (Self(name), attrs)
    }

    /// On-disk bytes with attribute bits applied.
    pub fn to_raw(&self, attrs: Attributes) -> [u8; 11] {
        let mut raw = self.0;
        if attrs.contains(Attributes::READ_ONLY) {
            raw[READ_ONLY_BYTE] |= 0x80;
        }
        if attrs.contains(Attributes::HIDDEN) {
            raw[HIDDEN_BYTE] |= 0x80;
        }
        raw
    }

    pub fn as_bytes(&self) -> &[u8; 11] {
        &self.0
    }

    /// Base name, trimmed.
    pub fn base(&self) -> String {
        trimmed(&self.0[..8])
    }

    /// Extension, trimmed.
    pub fn extension(&self) -> String {
        trimmed(&self.0[8..])
    }
}

fn trimmed(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| b as char)
        .collect::<String>()
        .trim_end()
        .to_string()
}

impl fmt::Display for CpmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ext = self.extension();
        if ext.is_empty() {
            write!(f, "{}", self.base())
        } else {
            write!(f, "{}.{}", self.base(), ext)
        }
    }
}

impl fmt::Debug for CpmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpmName({self})")
    }
}
