use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Base-32 alphabet used by Antelope account, action and table names.
const NAME_CHARS: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

/// An Antelope name: 12 base-32 characters plus an optional 13th character
/// restricted to the first 16 symbols, packed into a `u64`.
///
/// Serialized as its string form so decoded payloads and sink documents stay
/// human-readable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Name(pub u64);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum NameError {
    #[error("name `{0}` is longer than 13 characters")]
    TooLong(String),
    #[error("name `{0}` contains character `{1}` outside [.1-5a-z]")]
    BadChar(String, char),
    #[error("13th character of `{0}` must be in [.1-5a-j]")]
    BadThirteenth(String),
}

fn symbol(c: u8) -> Option<u64> {
    match c {
        b'.' => Some(0),
        b'1'..=b'5' => Some((c - b'1') as u64 + 1),
        b'a'..=b'z' => Some((c - b'a') as u64 + 6),
        _ => None,
    }
}

impl Name {
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromStr for Name {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() > 13 {
            return Err(NameError::TooLong(s.to_string()));
        }
        let mut value = 0u64;
        for (i, &c) in bytes.iter().enumerate() {
            let sym = symbol(c).ok_or_else(|| NameError::BadChar(s.to_string(), c as char))?;
            if i < 12 {
                value |= (sym & 0x1f) << (64 - 5 * (i + 1));
            } else {
                // The 13th character only has 4 bits of room left.
                if sym > 0x0f {
                    return Err(NameError::BadThirteenth(s.to_string()));
                }
                value |= sym;
            }
        }
        Ok(Name(value))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars = [b'.'; 13];
        let mut v = self.0;
        for i in (0..13).rev() {
            if i == 12 {
                chars[i] = NAME_CHARS[(v & 0x0f) as usize];
                v >>= 4;
            } else {
                chars[i] = NAME_CHARS[(v & 0x1f) as usize];
                v >>= 5;
            }
        }
        let printed = std::str::from_utf8(&chars).expect("alphabet is ascii");
        f.write_str(printed.trim_end_matches('.'))
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({self})")
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
