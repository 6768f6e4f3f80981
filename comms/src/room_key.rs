use std::fmt;

use thiserror::Error;

/// Longest room key (in bytes, after percent-decoding) a client may ask for
pub const MAX_ROOM_KEY_LEN: usize = 128;

/// Reasons a connection target could not be turned into a [RoomKey]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomKeyError {
    #[error("path '{path}' is not under '{base_path}'")]
    OutsideBasePath { path: String, base_path: String },
    #[error("room key is empty")]
    Empty,
    #[error("room key contains a path separator")]
    NestedPath,
    #[error("room key is {0} bytes long, the limit is {MAX_ROOM_KEY_LEN}")]
    TooLong(usize),
    #[error("room key is not valid percent-encoded utf-8")]
    InvalidEncoding,
}

/// [RoomKey] is the opaque name of a room, taken from the last segment of the connection path.
///
/// The relay never interprets it beyond the checks done in [RoomKey::new].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomKey(String);

impl RoomKey {
    pub fn new(key: impl Into<String>) -> Result<Self, RoomKeyError> {
        let key = key.into();

        if key.is_empty() {
            return Err(RoomKeyError::Empty);
        }
        if key.contains('/') {
            return Err(RoomKeyError::NestedPath);
        }
        if key.len() > MAX_ROOM_KEY_LEN {
            return Err(RoomKeyError::TooLong(key.len()));
        }

        Ok(RoomKey(key))
    }

    /// Extracts the room key from a request path of the form `<base_path>/<room key>`
    ///
    /// # Arguments
    ///
    /// - `path` - The path of the request uri, without the query string
    /// - `base_path` - The fixed prefix rooms are served under, e.g. `/ws`
    pub fn from_path(path: &str, base_path: &str) -> Result<Self, RoomKeyError> {
        let base_path = base_path.trim_end_matches('/');
        let outside = || RoomKeyError::OutsideBasePath {
            path: String::from(path),
            base_path: String::from(base_path),
        };

        let encoded = path
            .strip_prefix(base_path)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(outside)?;

        // `%2F` decodes to a separator as well, so nesting is checked on the decoded key
        let decoded =
            urlencoding::decode(encoded).map_err(|_| RoomKeyError::InvalidEncoding)?;

        RoomKey::new(decoded.into_owned())
    }

    /// The request path a client should connect to in order to join this room
    pub fn to_path(&self, base_path: &str) -> String {
        format!(
            "{}/{}",
            base_path.trim_end_matches('/'),
            urlencoding::encode(&self.0)
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
