//! Object table and state vector layout.
//!
//! Both are computed once, before exploration, from the prototype graph. The
//! layout fixes the bit offset of every field so that serialization is a
//! straight walk over the table without any per-state metadata.

use crate::error::{ConstructionError, ConstructionResult};
use crate::graph::{ComponentGraph, ObjectId};
use crate::shape::{FieldFlags, FieldKind, SerializationMode, ShapeCollector};
use std::collections::VecDeque;
use std::ops::Range;
use tracing::debug;

/// Widest supported field element; leaves room for the offset arithmetic.
const MAX_FIELD_BITS: u32 = 63;

/// Stable mapping from table slot to object.
///
/// Slots are assigned breadth-first from the roots, following references
/// through every field that is not `UNSERIALIZABLE`. Hidden objects never get
/// a slot.
#[derive(Debug, Clone)]
pub struct ObjectTable {
    objects: Vec<ObjectId>,
    type_names: Vec<&'static str>,
    slot_of: Vec<Option<u32>>,
}

impl ObjectTable {
    pub fn build(graph: &mut ComponentGraph) -> ConstructionResult<Self> {
        if graph.roots().is_empty() {
            return Err(ConstructionError::NoRoots);
        }

        let mut table = ObjectTable {
            objects: Vec::new(),
            type_names: Vec::new(),
            slot_of: vec![None; graph.len()],
        };
        let mut queue = VecDeque::new();

        let roots = graph.roots().to_vec();
        for root in roots {
            if !graph.is_hidden(root) && table.assign(graph, root) {
                queue.push_back(root);
            }
        }

        while let Some(id) = queue.pop_front() {
            let object_name = graph.type_name(id);
            let mut collector = ShapeCollector::new();
            if let Some(object) = graph.object_mut(id) {
                object.visit(&mut collector);
            }

            for (field, target, flags) in collector.references {
                if flags.contains(FieldFlags::UNSERIALIZABLE) {
                    continue;
                }
                if !graph.contains(target) {
                    return Err(ConstructionError::DanglingReference {
                        object: object_name,
                        field,
                        target,
                    });
                }
                if graph.is_hidden(target) {
                    return Err(ConstructionError::HiddenReference {
                        object: object_name,
                        field,
                        target,
                    });
                }
                if table.assign(graph, target) {
                    queue.push_back(target);
                }
            }
        }

        debug!(objects = table.len(), graph_objects = graph.len(), "object table built");
        Ok(table)
    }

    /// Returns false if the object already has a slot.
    fn assign(&mut self, graph: &ComponentGraph, id: ObjectId) -> bool {
        if self.slot_of[id.index()].is_some() {
            return false;
        }
        self.slot_of[id.index()] = Some(self.objects.len() as u32);
        self.objects.push(id);
        self.type_names.push(graph.type_name(id));
        true
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn object(&self, slot: usize) -> Option<ObjectId> {
        self.objects.get(slot).copied()
    }

    pub fn slot_of(&self, id: ObjectId) -> Option<usize> {
        self.slot_of
            .get(id.index())
            .copied()
            .flatten()
            .map(|slot| slot as usize)
    }

    /// Concrete type recorded for the object in `slot` at construction.
    pub fn type_name(&self, slot: usize) -> &'static str {
        self.type_names.get(slot).copied().unwrap_or("<unknown>")
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, ObjectId)> + '_ {
        self.objects.iter().copied().enumerate()
    }
}

/// Placement of one field inside the state vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    pub object_slot: u32,
    pub name: &'static str,
    pub kind: FieldKind,
    pub len: usize,
    pub flags: FieldFlags,
    pub bit_offset: usize,
    /// Bits of one element; zero when the field is not part of this mode.
    pub element_width: u32,
}

impl FieldLayout {
    #[inline]
    pub fn width(&self) -> usize {
        self.element_width as usize * self.len
    }

    #[inline]
    pub fn is_serialized(&self, mode: SerializationMode) -> bool {
        self.flags.is_serialized(mode)
    }
}

/// Bit layout of the state vector: the fault header followed by every field
/// of every table object, in slot order.
#[derive(Debug, Clone)]
pub struct StateVectorLayout {
    mode: SerializationMode,
    header_bits: u32,
    fields: Vec<FieldLayout>,
    objects: Vec<Range<usize>>,
    total_bits: usize,
}

impl StateVectorLayout {
    pub fn compute(
        graph: &mut ComponentGraph,
        table: &ObjectTable,
        header_bits: u32,
        mode: SerializationMode,
    ) -> ConstructionResult<Self> {
        let mut fields = Vec::new();
        let mut objects = Vec::with_capacity(table.len());
        let mut offset = header_bits as usize;

        for (slot, id) in table.iter() {
            let object_name = table.type_name(slot);
            let mut collector = ShapeCollector::new();
            if let Some(object) = graph.object_mut(id) {
                object.visit(&mut collector);
            }

            let start = fields.len();
            for shape in collector.fields {
                check_shape(object_name, shape.name, &shape.kind, shape.flags)?;
                let element_width = if shape.flags.is_serialized(mode) {
                    shape.kind.slot_count(table.len())
                } else {
                    0
                };
                let field = FieldLayout {
                    object_slot: slot as u32,
                    name: shape.name,
                    kind: shape.kind,
                    len: shape.len,
                    flags: shape.flags,
                    bit_offset: offset,
                    element_width,
                };
                offset += field.width();
                fields.push(field);
            }
            objects.push(start..fields.len());
        }

        let layout = Self {
            mode,
            header_bits,
            fields,
            objects,
            total_bits: offset,
        };
        debug!(
            ?mode,
            bits = layout.total_bits,
            bytes = layout.size(),
            fields = layout.fields.len(),
            "state vector layout computed"
        );
        Ok(layout)
    }

    pub fn mode(&self) -> SerializationMode {
        self.mode
    }

    pub fn header_bits(&self) -> u32 {
        self.header_bits
    }

    /// Size of a state vector in bytes.
    pub fn size(&self) -> usize {
        self.total_bits.div_ceil(8)
    }

    pub fn total_bits(&self) -> usize {
        self.total_bits
    }

    /// Bits occupied by the object in `slot`.
    pub fn slot_count(&self, slot: usize) -> usize {
        self.objects
            .get(slot)
            .map(|range| self.fields[range.clone()].iter().map(|f| f.width()).sum())
            .unwrap_or(0)
    }

    pub fn object_fields(&self, slot: usize) -> &[FieldLayout] {
        self.objects
            .get(slot)
            .map(|range| &self.fields[range.clone()])
            .unwrap_or(&[])
    }

    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }
}

fn check_shape(
    object: &'static str,
    field: &'static str,
    kind: &FieldKind,
    flags: FieldFlags,
) -> ConstructionResult<()> {
    if flags.contains(FieldFlags::UNSERIALIZABLE) {
        return Ok(());
    }
    match kind {
        FieldKind::Int(range) => {
            let Some(card) = range.cardinality() else {
                return Err(ConstructionError::EmptyRange {
                    object,
                    field,
                    min: range.min,
                    max: range.max,
                });
            };
            let bits = crate::shape::bits_for(card);
            if bits > MAX_FIELD_BITS {
                return Err(ConstructionError::UnboundedField {
                    object,
                    field,
                    bits,
                });
            }
        }
        FieldKind::Variant { count: 0 } => {
            return Err(ConstructionError::EmptyVariant { object, field });
        }
        FieldKind::Bool | FieldKind::Variant { .. } | FieldKind::Ref => {}
    }
    Ok(())
}
