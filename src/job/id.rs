//! Proquint job identifiers.
//!
//! Job ids are human-pronounceable "proquints" (<https://arxiv.org/html/0901.4016>)
//! derived from a 48-bit millisecond timestamp with 16 random bits appended,
//! rendered as four dash-separated quints, e.g. `bazad-kipuv-norab-lusod`.
//! Time-ordering makes collisions practically impossible; the job manager
//! still verifies uniqueness against its table before use.

use std::fmt;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

const CONSONANTS: &[u8; 16] = b"bdfghjklmnprstvz";
const VOWELS: &[u8; 4] = b"aiou";

/// Unique identifier of an archival job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Allocate a fresh id from the current time and a randomness source.
    #[must_use]
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        let rand_bits: u64 = rand::rng().random_range(0..1 << 16);
        Self(uint_to_quint((millis << 16) | rand_bits, 4))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Render a single 16 bit value as one quint (consonant-vowel alternation,
/// big-endian).
fn u16_to_quint(v: u16) -> String {
    let v = u32::from(v);
    [
        CONSONANTS[((v >> 12) & 0xf) as usize],
        VOWELS[((v >> 10) & 0x3) as usize],
        CONSONANTS[((v >> 6) & 0xf) as usize],
        VOWELS[((v >> 4) & 0x3) as usize],
        CONSONANTS[(v & 0xf) as usize],
    ]
    .iter()
    .map(|&b| b as char)
    .collect()
}

/// Render an integer as `length` dash-joined quints, most significant first.
fn uint_to_quint(v: u64, length: usize) -> String {
    let quints: Vec<String> = (0..length)
        .rev()
        .map(|i| u16_to_quint(((v >> (i * 16)) & 0xffff) as u16))
        .collect();
    quints.join("-")
}
