//! Bit-packed state vector codec.
//!
//! Bits are packed LSB-first: bit `i` of the vector is bit `i % 8` of byte
//! `i / 8`. Padding at the end of the last byte is always zero.

use crate::error::{CodecError, CodecResult, ConstructionResult};
use crate::graph::{ComponentGraph, ObjectId};
use crate::layout::{FieldLayout, ObjectTable, StateVectorLayout};
use crate::shape::{FieldFlags, FieldKind, IntRange, SerializationMode, StateVisitor};
use serde::{Deserialize, Serialize};

/// Write the low `width` bits of `value` at bit `offset`. The target bits must
/// be zero.
#[inline]
pub(crate) fn write_bits(buf: &mut [u8], offset: usize, width: u32, value: u64) {
    let width = width as usize;
    let mut written = 0;
    while written < width {
        let pos = offset + written;
        let shift = pos % 8;
        let take = (8 - shift).min(width - written);
        let mask = ((1u16 << take) - 1) as u8;
        let chunk = ((value >> written) as u8) & mask;
        buf[pos / 8] |= chunk << shift;
        written += take;
    }
}

#[inline]
pub(crate) fn read_bits(buf: &[u8], offset: usize, width: u32) -> u64 {
    let width = width as usize;
    let mut value = 0u64;
    let mut read = 0;
    while read < width {
        let pos = offset + read;
        let shift = pos % 8;
        let take = (8 - shift).min(width - read);
        let mask = ((1u16 << take) - 1) as u8;
        let chunk = (buf[pos / 8] >> shift) & mask;
        value |= (chunk as u64) << read;
        read += take;
    }
    value
}

/// Serializes a live component graph into a fixed-size state vector and back.
///
/// The header is an opaque bit field in front of the fields; the model driver
/// stores the persistent fault activations there.
#[derive(Debug, Clone)]
pub struct StateCodec {
    table: ObjectTable,
    layout: StateVectorLayout,
}

impl StateCodec {
    /// Build the object table and layout for `graph`.
    pub fn new(
        graph: &mut ComponentGraph,
        header_bits: u32,
        mode: SerializationMode,
    ) -> ConstructionResult<Self> {
        let table = ObjectTable::build(graph)?;
        let layout = StateVectorLayout::compute(graph, &table, header_bits, mode)?;
        Ok(Self { table, layout })
    }

    pub fn table(&self) -> &ObjectTable {
        &self.table
    }

    pub fn layout(&self) -> &StateVectorLayout {
        &self.layout
    }

    /// Size of a state vector in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Write `graph` and `header` into `out`, which must be exactly
    /// [`size`](Self::size) bytes long.
    ///
    /// Integer fields outside their range are normalized according to their
    /// overflow behaviour and the normalized value is written back into the
    /// graph.
    pub fn serialize(
        &self,
        graph: &mut ComponentGraph,
        header: u64,
        out: &mut [u8],
    ) -> CodecResult<()> {
        self.check_size(out.len())?;
        out.fill(0);
        let header_bits = self.layout.header_bits();
        let header = if header_bits < 64 {
            header & ((1u64 << header_bits) - 1)
        } else {
            header
        };
        write_bits(out, 0, header_bits, header);

        for (slot, id) in self.table.iter() {
            let mut writer = FieldWriter {
                cursor: self.cursor(slot),
                table: &self.table,
                out: &mut *out,
            };
            self.object(graph, slot, id)?.visit(&mut writer);
            writer.cursor.finish()?;
        }
        Ok(())
    }

    /// Serialize into a freshly allocated vector.
    pub fn encode(&self, graph: &mut ComponentGraph, header: u64) -> CodecResult<Box<[u8]>> {
        let mut out = vec![0u8; self.size()].into_boxed_slice();
        self.serialize(graph, header, &mut out)?;
        Ok(out)
    }

    /// Overwrite the serialized fields of `graph` with the content of `bytes`
    /// and return the header. Fields outside the vector keep their values.
    pub fn deserialize(&self, graph: &mut ComponentGraph, bytes: &[u8]) -> CodecResult<u64> {
        self.check_size(bytes.len())?;
        let header = read_bits(bytes, 0, self.layout.header_bits());

        for (slot, id) in self.table.iter() {
            let mut reader = FieldReader {
                cursor: self.cursor(slot),
                table: &self.table,
                bytes,
            };
            self.object(graph, slot, id)?.visit(&mut reader);
            reader.cursor.finish()?;
        }
        Ok(header)
    }

    /// Human-readable values of every field of every table object, including
    /// hidden and read-only ones.
    pub fn dump(&self, graph: &mut ComponentGraph) -> CodecResult<Vec<ObjectDump>> {
        let mut dumps = Vec::with_capacity(self.table.len());
        for (slot, id) in self.table.iter() {
            let mut dumper = FieldDumper {
                table: &self.table,
                fields: Vec::new(),
            };
            self.object(graph, slot, id)?.visit(&mut dumper);
            dumps.push(ObjectDump {
                slot,
                type_name: short_type_name(self.table.type_name(slot)).to_string(),
                fields: dumper.fields,
            });
        }
        Ok(dumps)
    }

    fn check_size(&self, found: usize) -> CodecResult<()> {
        if found != self.size() {
            return Err(CodecError::SizeMismatch {
                expected: self.size(),
                found,
            });
        }
        Ok(())
    }

    fn cursor(&self, slot: usize) -> FieldCursor<'_> {
        FieldCursor {
            object: self.table.type_name(slot),
            fields: self.layout.object_fields(slot),
            next: 0,
            mode: self.layout.mode(),
            error: None,
        }
    }

    fn object<'g>(
        &self,
        graph: &'g mut ComponentGraph,
        slot: usize,
        id: ObjectId,
    ) -> CodecResult<&'g mut dyn crate::graph::Stateful> {
        graph
            .object_mut(id)
            .ok_or(CodecError::MissingObject { slot })
    }
}

fn short_type_name(name: &'static str) -> &'static str {
    name.rsplit("::").next().unwrap_or(name)
}

/// Walks the layout entries of one object alongside its visit, recording the
/// first error. Visitor methods cannot return errors, so later fields are
/// ignored once one is set.
struct FieldCursor<'a> {
    object: &'static str,
    fields: &'a [FieldLayout],
    next: usize,
    mode: SerializationMode,
    error: Option<CodecError>,
}

impl FieldCursor<'_> {
    /// The layout entry for the visited field, if it is part of the vector.
    fn advance(&mut self, name: &'static str, kind: FieldKind, len: usize) -> Option<FieldLayout> {
        if self.error.is_some() {
            return None;
        }
        let Some(field) = self.fields.get(self.next).copied() else {
            self.error = Some(CodecError::LayoutMismatch {
                object: self.object,
                expected: "<end of object>",
                found: name,
            });
            return None;
        };
        self.next += 1;
        let shape = crate::shape::FieldShape {
            name: field.name,
            kind: field.kind,
            len: field.len,
            flags: field.flags,
        };
        if !shape.matches(name, &kind, len) {
            self.error = Some(CodecError::LayoutMismatch {
                object: self.object,
                expected: field.name,
                found: name,
            });
            return None;
        }
        field.is_serialized(self.mode).then_some(field)
    }

    fn fail(&mut self, error: CodecError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn finish(self) -> CodecResult<()> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if let Some(missing) = self.fields.get(self.next) {
            return Err(CodecError::LayoutMismatch {
                object: self.object,
                expected: missing.name,
                found: "<end of object>",
            });
        }
        Ok(())
    }
}

struct FieldWriter<'a> {
    cursor: FieldCursor<'a>,
    table: &'a ObjectTable,
    out: &'a mut [u8],
}

impl FieldWriter<'_> {
    fn put(&mut self, field: &FieldLayout, element: usize, raw: u64) {
        let offset = field.bit_offset + element * field.element_width as usize;
        write_bits(self.out, offset, field.element_width, raw);
    }

    fn encode_int(&mut self, name: &'static str, value: &mut i64, range: IntRange) -> Option<u64> {
        match range.normalize(*value) {
            Some(normalized) => {
                *value = normalized;
                Some((normalized as i128 - range.min as i128) as u64)
            }
            None => {
                self.cursor.fail(CodecError::RangeViolation {
                    object: self.cursor.object,
                    field: name,
                    value: *value,
                    min: range.min,
                    max: range.max,
                });
                None
            }
        }
    }
}

impl FieldWriter<'_> {
    fn encode_variant(&mut self, name: &'static str, value: u32, count: u32) -> Option<u64> {
        if value >= count {
            self.cursor.fail(CodecError::RangeViolation {
                object: self.cursor.object,
                field: name,
                value: value as i64,
                min: 0,
                max: count as i64 - 1,
            });
            return None;
        }
        Some(value as u64)
    }

    /// 0 encodes `None`, slot `s` encodes as `s + 1`.
    fn encode_ref(&mut self, name: &'static str, value: Option<ObjectId>) -> Option<u64> {
        let Some(target) = value else {
            return Some(0);
        };
        match self.table.slot_of(target) {
            Some(slot) => Some(slot as u64 + 1),
            None => {
                self.cursor.fail(CodecError::UnknownReference {
                    object: self.cursor.object,
                    field: name,
                    target,
                });
                None
            }
        }
    }
}

impl StateVisitor for FieldWriter<'_> {
    fn visit_bool(&mut self, name: &'static str, value: &mut bool, _flags: FieldFlags) {
        if let Some(field) = self.cursor.advance(name, FieldKind::Bool, 1) {
            self.put(&field, 0, *value as u64);
        }
    }

    fn visit_int(&mut self, name: &'static str, value: &mut i64, range: IntRange, _flags: FieldFlags) {
        if let Some(field) = self.cursor.advance(name, FieldKind::Int(range), 1) {
            if let Some(raw) = self.encode_int(name, value, range) {
                self.put(&field, 0, raw);
            }
        }
    }

    fn visit_variant(&mut self, name: &'static str, value: &mut u32, count: u32, _flags: FieldFlags) {
        if let Some(field) = self.cursor.advance(name, FieldKind::Variant { count }, 1) {
            if let Some(raw) = self.encode_variant(name, *value, count) {
                self.put(&field, 0, raw);
            }
        }
    }

    fn visit_ref(&mut self, name: &'static str, value: &mut Option<ObjectId>, _flags: FieldFlags) {
        if let Some(field) = self.cursor.advance(name, FieldKind::Ref, 1) {
            if let Some(raw) = self.encode_ref(name, *value) {
                self.put(&field, 0, raw);
            }
        }
    }

    fn visit_bool_array(&mut self, name: &'static str, values: &mut [bool], _flags: FieldFlags) {
        if let Some(field) = self.cursor.advance(name, FieldKind::Bool, values.len()) {
            for (i, value) in values.iter().enumerate() {
                self.put(&field, i, *value as u64);
            }
        }
    }

    fn visit_int_array(
        &mut self,
        name: &'static str,
        values: &mut [i64],
        range: IntRange,
        _flags: FieldFlags,
    ) {
        if let Some(field) = self.cursor.advance(name, FieldKind::Int(range), values.len()) {
            for (i, value) in values.iter_mut().enumerate() {
                match self.encode_int(name, value, range) {
                    Some(raw) => self.put(&field, i, raw),
                    None => return,
                }
            }
        }
    }

    fn visit_variant_array(
        &mut self,
        name: &'static str,
        values: &mut [u32],
        count: u32,
        _flags: FieldFlags,
    ) {
        let kind = FieldKind::Variant { count };
        if let Some(field) = self.cursor.advance(name, kind, values.len()) {
            for (i, value) in values.iter().enumerate() {
                match self.encode_variant(name, *value, count) {
                    Some(raw) => self.put(&field, i, raw),
                    None => return,
                }
            }
        }
    }

    fn visit_ref_array(
        &mut self,
        name: &'static str,
        values: &mut [Option<ObjectId>],
        _flags: FieldFlags,
    ) {
        if let Some(field) = self.cursor.advance(name, FieldKind::Ref, values.len()) {
            for (i, value) in values.iter().enumerate() {
                match self.encode_ref(name, *value) {
                    Some(raw) => self.put(&field, i, raw),
                    None => return,
                }
            }
        }
    }
}

struct FieldReader<'a> {
    cursor: FieldCursor<'a>,
    table: &'a ObjectTable,
    bytes: &'a [u8],
}

impl FieldReader<'_> {
    fn get(&self, field: &FieldLayout, element: usize) -> u64 {
        let offset = field.bit_offset + element * field.element_width as usize;
        read_bits(self.bytes, offset, field.element_width)
    }

    fn corrupt(&mut self, name: &'static str, raw: u64) {
        self.cursor.fail(CodecError::CorruptState {
            object: self.cursor.object,
            field: name,
            raw,
        });
    }

    fn decode_int(&mut self, name: &'static str, raw: u64, range: IntRange) -> Option<i64> {
        let span = (range.max as i128 - range.min as i128) as u128;
        if raw as u128 > span {
            self.corrupt(name, raw);
            return None;
        }
        Some((range.min as i128 + raw as i128) as i64)
    }

    fn decode_variant(&mut self, name: &'static str, raw: u64, count: u32) -> Option<u32> {
        if raw >= count as u64 {
            self.corrupt(name, raw);
            return None;
        }
        Some(raw as u32)
    }

    /// `Some(None)` for a null reference; `None` once the raw value is corrupt.
    fn decode_ref(&mut self, name: &'static str, raw: u64) -> Option<Option<ObjectId>> {
        if raw == 0 {
            return Some(None);
        }
        match self.table.object(raw as usize - 1) {
            Some(target) => Some(Some(target)),
            None => {
                self.corrupt(name, raw);
                None
            }
        }
    }
}

impl StateVisitor for FieldReader<'_> {
    fn visit_bool(&mut self, name: &'static str, value: &mut bool, _flags: FieldFlags) {
        if let Some(field) = self.cursor.advance(name, FieldKind::Bool, 1) {
            *value = self.get(&field, 0) != 0;
        }
    }

    fn visit_int(&mut self, name: &'static str, value: &mut i64, range: IntRange, _flags: FieldFlags) {
        if let Some(field) = self.cursor.advance(name, FieldKind::Int(range), 1) {
            let raw = self.get(&field, 0);
            if let Some(decoded) = self.decode_int(name, raw, range) {
                *value = decoded;
            }
        }
    }

    fn visit_variant(&mut self, name: &'static str, value: &mut u32, count: u32, _flags: FieldFlags) {
        if let Some(field) = self.cursor.advance(name, FieldKind::Variant { count }, 1) {
            let raw = self.get(&field, 0);
            if let Some(decoded) = self.decode_variant(name, raw, count) {
                *value = decoded;
            }
        }
    }

    fn visit_ref(&mut self, name: &'static str, value: &mut Option<ObjectId>, _flags: FieldFlags) {
        if let Some(field) = self.cursor.advance(name, FieldKind::Ref, 1) {
            let raw = self.get(&field, 0);
            if let Some(decoded) = self.decode_ref(name, raw) {
                *value = decoded;
            }
        }
    }

    fn visit_bool_array(&mut self, name: &'static str, values: &mut [bool], _flags: FieldFlags) {
        if let Some(field) = self.cursor.advance(name, FieldKind::Bool, values.len()) {
            for (i, value) in values.iter_mut().enumerate() {
                *value = self.get(&field, i) != 0;
            }
        }
    }

    fn visit_int_array(
        &mut self,
        name: &'static str,
        values: &mut [i64],
        range: IntRange,
        _flags: FieldFlags,
    ) {
        if let Some(field) = self.cursor.advance(name, FieldKind::Int(range), values.len()) {
            for i in 0..values.len() {
                let raw = self.get(&field, i);
                match self.decode_int(name, raw, range) {
                    Some(decoded) => values[i] = decoded,
                    None => return,
                }
            }
        }
    }

    fn visit_variant_array(
        &mut self,
        name: &'static str,
        values: &mut [u32],
        count: u32,
        _flags: FieldFlags,
    ) {
        let kind = FieldKind::Variant { count };
        if let Some(field) = self.cursor.advance(name, kind, values.len()) {
            for i in 0..values.len() {
                let raw = self.get(&field, i);
                match self.decode_variant(name, raw, count) {
                    Some(decoded) => values[i] = decoded,
                    None => return,
                }
            }
        }
    }

    fn visit_ref_array(
        &mut self,
        name: &'static str,
        values: &mut [Option<ObjectId>],
        _flags: FieldFlags,
    ) {
        if let Some(field) = self.cursor.advance(name, FieldKind::Ref, values.len()) {
            for i in 0..values.len() {
                let raw = self.get(&field, i);
                match self.decode_ref(name, raw) {
                    Some(decoded) => values[i] = decoded,
                    None => return,
                }
            }
        }
    }
}

/// Field values of one object, for counterexample output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDump {
    pub slot: usize,
    pub type_name: String,
    pub fields: Vec<FieldDump>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDump {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

struct FieldDumper<'a> {
    table: &'a ObjectTable,
    fields: Vec<FieldDump>,
}

impl FieldDumper<'_> {
    fn push(&mut self, name: &'static str, value: String, flags: FieldFlags) {
        if flags.contains(FieldFlags::UNSERIALIZABLE) {
            return;
        }
        self.fields.push(FieldDump {
            name: name.to_string(),
            value,
            hidden: !flags.is_serialized(SerializationMode::Optimized),
        });
    }

    fn reference(&self, value: Option<ObjectId>) -> String {
        match value {
            None => "null".to_string(),
            Some(id) => match self.table.slot_of(id) {
                Some(slot) => format!("@{slot}"),
                None => format!("{id:?}"),
            },
        }
    }
}

impl StateVisitor for FieldDumper<'_> {
    fn visit_bool(&mut self, name: &'static str, value: &mut bool, flags: FieldFlags) {
        self.push(name, value.to_string(), flags);
    }

    fn visit_int(&mut self, name: &'static str, value: &mut i64, _range: IntRange, flags: FieldFlags) {
        self.push(name, value.to_string(), flags);
    }

    fn visit_variant(&mut self, name: &'static str, value: &mut u32, count: u32, flags: FieldFlags) {
        self.push(name, format!("{value}/{count}"), flags);
    }

    fn visit_ref(&mut self, name: &'static str, value: &mut Option<ObjectId>, flags: FieldFlags) {
        let rendered = self.reference(*value);
        self.push(name, rendered, flags);
    }

    fn visit_bool_array(&mut self, name: &'static str, values: &mut [bool], flags: FieldFlags) {
        self.push(name, format!("{values:?}"), flags);
    }

    fn visit_int_array(
        &mut self,
        name: &'static str,
        values: &mut [i64],
        _range: IntRange,
        flags: FieldFlags,
    ) {
        self.push(name, format!("{values:?}"), flags);
    }

    fn visit_variant_array(
        &mut self,
        name: &'static str,
        values: &mut [u32],
        count: u32,
        flags: FieldFlags,
    ) {
        let rendered: Vec<String> = values.iter().map(|v| format!("{v}/{count}")).collect();
        self.push(name, format!("[{}]", rendered.join(", ")), flags);
    }

    fn visit_ref_array(
        &mut self,
        name: &'static str,
        values: &mut [Option<ObjectId>],
        flags: FieldFlags,
    ) {
        let rendered: Vec<String> = values.iter().map(|v| self.reference(*v)).collect();
        self.push(name, format!("[{}]", rendered.join(", ")), flags);
    }
}
