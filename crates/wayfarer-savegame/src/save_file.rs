//! Decoded save file and its body layout.

use std::io::{Read, Write};

use tracing::debug;
use wayfarer_core::{CartridgeInfo, Table};

use crate::codec::{ByteReader, ByteWriter};
use crate::errors::{Result, SaveError};
use crate::format::to_save_seconds;
use crate::header::SaveHeader;

/// Complete contents of a save file.
///
/// `class_names[i]` and `objects[i]` describe registry object `i`; the two
/// vectors always have the same length.
#[derive(Clone, Debug, PartialEq)]
pub struct SaveFile {
    /// Header block.
    pub header: SaveHeader,
    /// Class name of every registry object, in index order.
    pub class_names: Vec<String>,
    /// Player fields.
    pub player: Table,
    /// Registry object fields, in index order.
    pub objects: Vec<Table>,
}

impl SaveFile {
    /// Number of registry objects recorded.
    pub fn object_count(&self) -> usize {
        self.class_names.len()
    }

    /// Encode into `writer`.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<W> {
        if self.objects.len() != self.class_names.len() {
            return Err(SaveError::InvalidFormat(format!(
                "{} class names for {} objects",
                self.class_names.len(),
                self.objects.len()
            )));
        }
        let count = u32::try_from(self.object_count())
            .map_err(|_| SaveError::InvalidFormat("too many objects".to_owned()))?;

        let mut w = ByteWriter::new(writer, self.object_count());
        self.header.write(&mut w)?;
        w.u32(count)?;
        for class_name in &self.class_names {
            w.prefixed(class_name.as_bytes())?;
        }
        w.table(&self.player)?;
        for object in &self.objects {
            w.table(object)?;
        }
        debug!(
            objects = self.object_count(),
            cartridge = %self.header.cartridge_name,
            "save file encoded"
        );
        Ok(w.into_inner())
    }

    /// Encode into a new buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.write_to(Vec::new())
    }

    /// Decode a complete save file. Every back-reference is checked against
    /// the declared registry size.
    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let mut r = ByteReader::new(reader, 0);
        let header = SaveHeader::read(&mut r)?;
        let count = r.u32()? as usize;
        r.set_object_count(count);

        let class_names = (0..count)
            .map(|_| r.prefixed_string())
            .collect::<Result<Vec<_>>>()?;
        let player = r.table()?;
        let objects = (0..count)
            .map(|_| r.table())
            .collect::<Result<Vec<_>>>()?;

        debug!(objects = count, cartridge = %header.cartridge_name, "save file decoded");
        Ok(Self {
            header,
            class_names,
            player,
            objects,
        })
    }

    /// Decode from a byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::read_from(bytes)
    }

    /// Fail with [`SaveError::ForeignSaveFile`] unless this save was taken
    /// from `cartridge`. Timestamps are compared at whole-second precision.
    pub fn verify_cartridge(&self, cartridge: &CartridgeInfo) -> Result<()> {
        let expected = to_save_seconds(cartridge.created);
        let found = to_save_seconds(self.header.cartridge_created);
        if expected != found {
            return Err(SaveError::ForeignSaveFile {
                expected: cartridge.created,
                found: self.header.cartridge_created,
            });
        }
        Ok(())
    }
}
