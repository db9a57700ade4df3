//! Component graph: an arena of stateful objects addressed by typed handles.

use crate::shape::StateVisitor;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

/// Index of an object in its [`ComponentGraph`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u32);

impl ObjectId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn from_index(index: usize) -> Self {
        ObjectId(index as u32)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

/// Typed handle to an object of type `T`.
pub struct Handle<T> {
    id: ObjectId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    #[inline]
    pub fn id(self) -> ObjectId {
        self.id
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.id.0)
    }
}

/// Type-erased access to an object.
pub trait AnyObject: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Send + Sync> AnyObject for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An object whose fields belong to the model state.
pub trait Stateful: AnyObject {
    /// Visit every field, always in the same order and with the same shapes.
    fn visit(&mut self, visitor: &mut dyn StateVisitor);

    /// Hidden objects are kept out of the object table entirely.
    fn hidden(&self) -> bool {
        false
    }
}

/// Object-safe cloning for graph entries.
pub trait GraphObject: Stateful {
    fn clone_object(&self) -> Box<dyn GraphObject>;
    fn as_stateful_mut(&mut self) -> &mut dyn Stateful;
}

impl<T: Stateful + Clone> GraphObject for T {
    fn clone_object(&self) -> Box<dyn GraphObject> {
        Box::new(self.clone())
    }

    fn as_stateful_mut(&mut self) -> &mut dyn Stateful {
        self
    }
}

struct Entry {
    object: Box<dyn GraphObject>,
    type_name: &'static str,
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        Self {
            object: self.object.clone_object(),
            type_name: self.type_name,
        }
    }
}

/// Arena of the model's objects. Objects are never removed, so ids stay valid
/// for the lifetime of the graph and of every clone of it.
#[derive(Clone, Default)]
pub struct ComponentGraph {
    entries: Vec<Entry>,
    roots: Vec<ObjectId>,
}

impl ComponentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object and return its handle.
    pub fn insert<T: Stateful + Clone>(&mut self, object: T) -> Handle<T> {
        let id = ObjectId::from_index(self.entries.len());
        self.entries.push(Entry {
            object: Box::new(object),
            type_name: std::any::type_name::<T>(),
        });
        Handle {
            id,
            _marker: PhantomData,
        }
    }

    /// Add an object and mark it as a root component.
    pub fn insert_root<T: Stateful + Clone>(&mut self, object: T) -> Handle<T> {
        let handle = self.insert(object);
        self.roots.push(handle.id);
        handle
    }

    pub fn add_root<T>(&mut self, handle: Handle<T>) {
        if !self.roots.contains(&handle.id) {
            self.roots.push(handle.id);
        }
    }

    pub fn roots(&self) -> &[ObjectId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        id.index() < self.entries.len()
    }

    /// Borrow an object through its typed handle.
    ///
    /// Handles are only created by [`ComponentGraph::insert`], so the stored
    /// type always matches.
    pub fn get<T: Stateful>(&self, handle: Handle<T>) -> &T {
        let object: &dyn GraphObject = &*self.entries[handle.id.index()].object;
        object
            .as_any()
            .downcast_ref::<T>()
            .expect("handle type matches the stored object")
    }

    pub fn get_mut<T: Stateful>(&mut self, handle: Handle<T>) -> &mut T {
        let object: &mut dyn GraphObject = &mut *self.entries[handle.id.index()].object;
        object
            .as_any_mut()
            .downcast_mut::<T>()
            .expect("handle type matches the stored object")
    }

    /// Borrow two distinct objects mutably at once.
    pub fn get_pair_mut<A: Stateful, B: Stateful>(
        &mut self,
        a: Handle<A>,
        b: Handle<B>,
    ) -> (&mut A, &mut B) {
        let (ia, ib) = (a.id.index(), b.id.index());
        assert_ne!(ia, ib, "get_pair_mut requires distinct objects");
        let (first, second) = if ia < ib {
            let (lo, hi) = self.entries.split_at_mut(ib);
            (&mut lo[ia], &mut hi[0])
        } else {
            let (lo, hi) = self.entries.split_at_mut(ia);
            (&mut hi[0], &mut lo[ib])
        };
        let first: &mut dyn GraphObject = &mut *first.object;
        let second: &mut dyn GraphObject = &mut *second.object;
        (
            first
                .as_any_mut()
                .downcast_mut::<A>()
                .expect("handle type matches the stored object"),
            second
                .as_any_mut()
                .downcast_mut::<B>()
                .expect("handle type matches the stored object"),
        )
    }

    /// Type-erased access used by the codec.
    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut dyn Stateful> {
        self.entries
            .get_mut(id.index())
            .map(|entry| entry.object.as_stateful_mut())
    }

    pub fn is_hidden(&self, id: ObjectId) -> bool {
        self.entries
            .get(id.index())
            .map(|entry| entry.object.hidden())
            .unwrap_or(false)
    }

    pub fn type_name(&self, id: ObjectId) -> &'static str {
        self.entries
            .get(id.index())
            .map(|entry| entry.type_name)
            .unwrap_or("<unknown>")
    }
}

impl fmt::Debug for ComponentGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentGraph")
            .field(
                "objects",
                &self.entries.iter().map(|e| e.type_name).collect::<Vec<_>>(),
            )
            .field("roots", &self.roots)
            .finish()
    }
}
