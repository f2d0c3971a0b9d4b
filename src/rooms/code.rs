use std::{fmt, str::FromStr};

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

/// Upper-case letters and digits minus the look-alikes `O`/`0` and `I`/`1`.
pub const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LEN: usize = 4;

/// Short human-typeable room code. Always held upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("room codes are 4 letters or digits, without O, 0, I or 1")]
pub struct BadRoomCode;

impl RoomCode {
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let code = (0..CODE_LEN)
            .filter_map(|_| ALPHABET.choose(&mut rng))
            .map(|&b| b as char)
            .collect();
        Self(code)
    }

    /// Accepts any casing and surrounding whitespace.
    pub fn parse(input: &str) -> Result<Self, BadRoomCode> {
        let code = input.trim().to_ascii_uppercase();
        if code.len() != CODE_LEN || !code.bytes().all(|b| ALPHABET.contains(&b)) {
            return Err(BadRoomCode);
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = BadRoomCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = BadRoomCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}
