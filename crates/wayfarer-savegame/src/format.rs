//! Wire constants.

use chrono::{DateTime, TimeDelta, Utc};

use crate::errors::SaveError;

/// Leading bytes of every save file.
pub const SIGNATURE: [u8; 7] = [0x02, 0x0A, 0x53, 0x59, 0x4E, 0x43, 0x00];

/// Reserved back-reference index addressing the player object.
pub const PLAYER_OBJECT_INDEX: i16 = -21555;

/// Unix time of the timestamp epoch, 2004-02-10T01:00:00Z.
pub const EPOCH_UNIX_SECONDS: i64 = 1_076_374_800;

/// Deepest table nesting accepted while decoding.
pub(crate) const MAX_NESTING: usize = 64;

/// Value tag preceding every encoded value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    /// `bool`, one byte.
    Bool = 1,
    /// `f64`.
    Number = 2,
    /// `u32` length, then bytes.
    String = 3,
    /// `u32` length, then bytecode.
    Function = 4,
    /// Start of a key/value block.
    TableBegin = 5,
    /// End of a key/value block.
    TableEnd = 6,
    /// `i16` registry index.
    Reference = 7,
    /// Length-prefixed class name, then a table block.
    Record = 8,
}

impl TryFrom<u8> for Tag {
    type Error = SaveError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            1 => Self::Bool,
            2 => Self::Number,
            3 => Self::String,
            4 => Self::Function,
            5 => Self::TableBegin,
            6 => Self::TableEnd,
            7 => Self::Reference,
            8 => Self::Record,
            tag => return Err(SaveError::CorruptStream { tag }),
        })
    }
}

/// Seconds between the save epoch and `time`.
pub fn to_save_seconds(time: DateTime<Utc>) -> i64 {
    time.timestamp() - EPOCH_UNIX_SECONDS
}

/// Inverse of [`to_save_seconds`].
pub fn from_save_seconds(seconds: i64) -> Result<DateTime<Utc>, SaveError> {
    seconds
        .checked_add(EPOCH_UNIX_SECONDS)
        .and_then(|unix| DateTime::from_timestamp(unix, 0))
        .ok_or_else(|| SaveError::InvalidFormat(format!("timestamp out of range: {seconds}")))
}

/// Drop sub-second precision, matching what survives a round trip.
pub fn truncate_to_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    time - TimeDelta::nanoseconds(i64::from(time.timestamp_subsec_nanos()))
}
