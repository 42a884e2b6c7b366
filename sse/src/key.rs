use crate::error::{Error, ErrorKind, InvalidKeyKind};
use std::fmt;

/// Leading marker commonly typed in front of a broadcaster handle.
const HANDLE_MARKER: char = '@';

const MAX_KEY_LEN: usize = 64;

/// Normalized identifier of one broadcaster's chat feed.
///
/// `"@Foo"`, `"foo"` and `" FOO "` all normalize to the same key, so they
/// share one upstream session in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BroadcasterKey(String);

impl BroadcasterKey {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let trimmed = raw.trim();
        let unmarked = trimmed.strip_prefix(HANDLE_MARKER).unwrap_or(trimmed);
        let key = unmarked.to_lowercase();

        if key.is_empty() {
            return Err(Error::new(ErrorKind::InvalidKey(InvalidKeyKind::Empty)));
        }

        if key.len() > MAX_KEY_LEN || !key.chars().all(is_handle_char) {
            return Err(Error::new(ErrorKind::InvalidKey(
                InvalidKeyKind::Malformed(raw.to_string()),
            )));
        }

        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_handle_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

impl fmt::Display for BroadcasterKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BroadcasterKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
