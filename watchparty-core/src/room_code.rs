//! Room Code Generation and Parsing
//!
//! Generates human-friendly room codes used as the store key for a room.

use std::fmt;
use std::str::FromStr;

/// Characters used in room codes (unambiguous, uppercase)
/// Excludes: 0/O, 1/I/L, 5/S, 2/Z to avoid confusion
const ALPHABET: &[u8] = b"346789ABCDEFGHJKMNPQRTUVWXY";

/// Room code length (8 chars = ~282 trillion combinations with 27-char alphabet)
const CODE_LENGTH: usize = 8;

/// A room code that can be shared to join a room
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a random room code using cryptographically secure RNG
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        let mut code = String::with_capacity(CODE_LENGTH);
        for _ in 0..CODE_LENGTH {
            let idx = rng.gen_range(0..ALPHABET.len());
            code.push(ALPHABET[idx] as char);
        }
        RoomCode(code)
    }

    /// The canonical 8 characters, used as the store key
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a room code from user input
    ///
    /// Normalizes to uppercase, drops separators and validates format.
    pub fn parse(input: &str) -> Option<Self> {
        let normalized: String = input
            .chars()
            .filter(|c| c.is_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if normalized.len() != CODE_LENGTH {
            return None;
        }

        if normalized.bytes().all(|b| ALPHABET.contains(&b)) {
            Some(RoomCode(normalized))
        } else {
            None
        }
    }
}

impl FromStr for RoomCode {
    type Err = InvalidRoomCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoomCode::parse(s).ok_or_else(|| InvalidRoomCode(s.to_string()))
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Format as XXXX-XXXX for readability
        if self.0.len() == CODE_LENGTH {
            write!(f, "{}-{}", &self.0[..4], &self.0[4..])
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// User input that is not a room code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid room code: {0:?}")]
pub struct InvalidRoomCode(pub String);
