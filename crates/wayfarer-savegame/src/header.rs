//! Save file header.
//!
//! ```text
//! signature      7 bytes   02 0A 53 59 4E 43 00
//! header length  u32       bytes from cartridge name through altitude
//! cartridge name cstring
//! player name    cstring
//! device name    cstring
//! device id      cstring
//! save name      cstring
//! cartridge created  i64   seconds since 2004-02-10T01:00:00Z
//! save created       i64
//! latitude, longitude, altitude  f64
//! ```

use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use wayfarer_core::CartridgeInfo;

use crate::codec::{ByteReader, ByteWriter};
use crate::errors::{Result, SaveError};
use crate::format::{SIGNATURE, from_save_seconds, to_save_seconds};

/// Identity and position block at the start of a save file.
#[derive(Clone, Debug, PartialEq)]
pub struct SaveHeader {
    /// Name of the cartridge being played.
    pub cartridge_name: String,
    /// Creation time of the cartridge; identifies which cartridge a save is for.
    pub cartridge_created: DateTime<Utc>,
    /// Player name.
    pub player_name: String,
    /// Device name.
    pub device_name: String,
    /// Device identifier.
    pub device_id: String,
    /// Name of this save.
    pub save_name: String,
    /// When the save was taken.
    pub saved_at: DateTime<Utc>,
    /// Last known latitude.
    pub latitude: f64,
    /// Last known longitude.
    pub longitude: f64,
    /// Last known altitude.
    pub altitude: f64,
}

impl SaveHeader {
    /// Header for `cartridge` with empty names, zero position and `saved_at`
    /// set to now.
    pub fn for_cartridge(cartridge: &CartridgeInfo) -> Self {
        Self {
            cartridge_name: cartridge.name.clone(),
            cartridge_created: cartridge.created,
            player_name: String::new(),
            device_name: String::new(),
            device_id: String::new(),
            save_name: String::new(),
            saved_at: Utc::now(),
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
        }
    }

    /// Size of the length-counted part of the header.
    fn body_len(&self) -> usize {
        [
            &self.cartridge_name,
            &self.player_name,
            &self.device_name,
            &self.device_id,
            &self.save_name,
        ]
        .iter()
        .map(|s| s.len() + 1)
        .sum::<usize>()
            + 2 * 8
            + 3 * 8
    }

    pub(crate) fn write<W: Write>(&self, w: &mut ByteWriter<W>) -> Result<()> {
        let len = u32::try_from(self.body_len())
            .map_err(|_| SaveError::InvalidFormat("header too large".to_owned()))?;
        w.bytes(&SIGNATURE)?;
        w.u32(len)?;
        w.cstring(&self.cartridge_name)?;
        w.cstring(&self.player_name)?;
        w.cstring(&self.device_name)?;
        w.cstring(&self.device_id)?;
        w.cstring(&self.save_name)?;
        w.i64(to_save_seconds(self.cartridge_created))?;
        w.i64(to_save_seconds(self.saved_at))?;
        w.f64(self.latitude)?;
        w.f64(self.longitude)?;
        w.f64(self.altitude)
    }

    pub(crate) fn read<R: Read>(r: &mut ByteReader<R>) -> Result<Self> {
        let signature: [u8; 7] = r.array()?;
        if signature != SIGNATURE {
            return Err(SaveError::InvalidFormat(format!(
                "bad signature {signature:02X?}"
            )));
        }
        let len = r.u32()? as usize;
        let block = r.exact(len)?;

        let mut h = ByteReader::new(block.as_slice(), 0);
        let header = Self {
            cartridge_name: h.cstring()?,
            player_name: h.cstring()?,
            device_name: h.cstring()?,
            device_id: h.cstring()?,
            save_name: h.cstring()?,
            cartridge_created: from_save_seconds(h.i64()?)?,
            saved_at: from_save_seconds(h.i64()?)?,
            latitude: h.f64()?,
            longitude: h.f64()?,
            altitude: h.f64()?,
        };
        if header.body_len() != len {
            return Err(SaveError::InvalidFormat(format!(
                "header length {len} does not match contents ({})",
                header.body_len()
            )));
        }
        Ok(header)
    }
}
