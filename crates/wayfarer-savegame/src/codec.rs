//! Primitive and value encoding shared by the header and body.

use std::io::{Read, Write};

use bytes::Bytes;
use wayfarer_core::{Bytecode, ObjectRef, Record, ScriptValue, Table};

use crate::errors::{Result, SaveError};
use crate::format::{MAX_NESTING, PLAYER_OBJECT_INDEX, Tag};

// ─────────────────────────────────────────────────────────────────────────────
// Writer
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct ByteWriter<W> {
    inner: W,
    /// Registry size; references must stay below it.
    object_count: usize,
}

impl<W: Write> ByteWriter<W> {
    pub(crate) fn new(inner: W, object_count: usize) -> Self {
        Self {
            inner,
            object_count,
        }
    }

    pub(crate) fn bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    pub(crate) fn u8(&mut self, v: u8) -> Result<()> {
        self.bytes(&[v])
    }

    pub(crate) fn u32(&mut self, v: u32) -> Result<()> {
        self.bytes(&v.to_le_bytes())
    }

    pub(crate) fn i64(&mut self, v: i64) -> Result<()> {
        self.bytes(&v.to_le_bytes())
    }

    pub(crate) fn f64(&mut self, v: f64) -> Result<()> {
        self.bytes(&v.to_le_bytes())
    }

    pub(crate) fn cstring(&mut self, s: &str) -> Result<()> {
        if s.as_bytes().contains(&0) {
            return Err(SaveError::InvalidFormat(format!(
                "header string contains NUL: {s:?}"
            )));
        }
        self.bytes(s.as_bytes())?;
        self.u8(0)
    }

    /// `u32` length followed by the raw bytes.
    pub(crate) fn prefixed(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            SaveError::InvalidFormat(format!("blob of {} bytes too large", bytes.len()))
        })?;
        self.u32(len)?;
        self.bytes(bytes)
    }

    fn tag(&mut self, tag: Tag) -> Result<()> {
        self.u8(tag as u8)
    }

    /// Encode a table as a `5 … 6` block. Nil values are skipped.
    pub(crate) fn table(&mut self, table: &Table) -> Result<()> {
        self.tag(Tag::TableBegin)?;
        for (key, value) in table.iter() {
            if key.is_nil() || value.is_nil() {
                continue;
            }
            self.value(key)?;
            self.value(value)?;
        }
        self.tag(Tag::TableEnd)
    }

    fn value(&mut self, value: &ScriptValue) -> Result<()> {
        match value {
            ScriptValue::Nil => Err(SaveError::InvalidFormat(
                "nil cannot be encoded".to_owned(),
            )),
            ScriptValue::Bool(b) => {
                self.tag(Tag::Bool)?;
                self.u8(u8::from(*b))
            }
            ScriptValue::Number(n) => {
                self.tag(Tag::Number)?;
                self.f64(*n)
            }
            ScriptValue::String(s) => {
                self.tag(Tag::String)?;
                self.prefixed(s)
            }
            ScriptValue::Function(code) => {
                self.tag(Tag::Function)?;
                self.prefixed(code.as_bytes())
            }
            ScriptValue::Table(table) => self.table(table),
            ScriptValue::Object(object) => {
                self.tag(Tag::Reference)?;
                let index = self.reference_index(*object)?;
                self.bytes(&index.to_le_bytes())
            }
            ScriptValue::Record(record) => {
                self.tag(Tag::Record)?;
                self.prefixed(record.class_name.as_bytes())?;
                self.table(&record.fields)
            }
        }
    }

    fn reference_index(&self, object: ObjectRef) -> Result<i16> {
        match object {
            ObjectRef::Player => Ok(PLAYER_OBJECT_INDEX),
            ObjectRef::Registry(index) => {
                let unresolved =
                    || SaveError::UnresolvedReference(i64::try_from(index).unwrap_or(i64::MAX));
                if index >= self.object_count {
                    return Err(unresolved());
                }
                i16::try_from(index).map_err(|_| unresolved())
            }
        }
    }

    pub(crate) fn into_inner(self) -> W {
        self.inner
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reader
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct ByteReader<R> {
    inner: R,
    object_count: usize,
}

impl<R: Read> ByteReader<R> {
    pub(crate) fn new(inner: R, object_count: usize) -> Self {
        Self {
            inner,
            object_count,
        }
    }

    pub(crate) fn set_object_count(&mut self, object_count: usize) {
        self.object_count = object_count;
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub(crate) fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub(crate) fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    /// Exactly `len` bytes, without trusting `len` for the allocation.
    pub(crate) fn exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let read = (&mut self.inner).take(len as u64).read_to_end(&mut buf)?;
        if read < len {
            return Err(SaveError::TruncatedFile);
        }
        Ok(buf)
    }

    pub(crate) fn prefixed(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        self.exact(len)
    }

    pub(crate) fn prefixed_string(&mut self) -> Result<String> {
        utf8(self.prefixed()?)
    }

    pub(crate) fn cstring(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        loop {
            match self.u8()? {
                0 => break,
                b => buf.push(b),
            }
        }
        utf8(buf)
    }

    /// Decode a table block whose `5` tag has not been consumed yet.
    pub(crate) fn table(&mut self) -> Result<Table> {
        match Tag::try_from(self.u8()?)? {
            Tag::TableBegin => self.table_body(0),
            other => Err(SaveError::CorruptStream { tag: other as u8 }),
        }
    }

    fn table_body(&mut self, depth: usize) -> Result<Table> {
        if depth >= MAX_NESTING {
            return Err(SaveError::InvalidFormat(format!(
                "tables nested deeper than {MAX_NESTING}"
            )));
        }
        let mut table = Table::new();
        loop {
            let tag = Tag::try_from(self.u8()?)?;
            if tag == Tag::TableEnd {
                return Ok(table);
            }
            let key = self.value(tag, depth)?;
            let tag = Tag::try_from(self.u8()?)?;
            let value = self.value(tag, depth)?;
            table.set(key, value);
        }
    }

    fn value(&mut self, tag: Tag, depth: usize) -> Result<ScriptValue> {
        Ok(match tag {
            Tag::Bool => ScriptValue::Bool(self.u8()? != 0),
            Tag::Number => ScriptValue::Number(self.f64()?),
            Tag::String => ScriptValue::String(Bytes::from(self.prefixed()?)),
            Tag::Function => ScriptValue::Function(Bytecode::new(self.prefixed()?)),
            Tag::TableBegin => ScriptValue::Table(self.table_body(depth + 1)?),
            Tag::Reference => ScriptValue::Object(self.reference()?),
            Tag::Record => {
                let class_name = self.prefixed_string()?;
                let fields = match Tag::try_from(self.u8()?)? {
                    Tag::TableBegin => self.table_body(depth + 1)?,
                    other => return Err(SaveError::CorruptStream { tag: other as u8 }),
                };
                ScriptValue::Record(Record::new(class_name, fields))
            }
            Tag::TableEnd => {
                return Err(SaveError::CorruptStream {
                    tag: Tag::TableEnd as u8,
                });
            }
        })
    }

    fn reference(&mut self) -> Result<ObjectRef> {
        let index = self.i16()?;
        if index == PLAYER_OBJECT_INDEX {
            return Ok(ObjectRef::Player);
        }
        match usize::try_from(index) {
            Ok(i) if i < self.object_count => Ok(ObjectRef::Registry(i)),
            _ => Err(SaveError::UnresolvedReference(i64::from(index))),
        }
    }
}

fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| SaveError::InvalidFormat(format!("invalid UTF-8: {e}")))
}
