//! Indirect-object store
//!
//! Sparse keyed container owning every indirect object of a document.
//! Implements the cross-reference free-list protocol (generation bump on
//! removal, terminal generation 65535), allocation of fresh references,
//! garbage collection over the reference-reachability graph and a small
//! observer registry for stream-append notifications.

use crate::error::{Error, ErrorKind, Result};
use crate::object::{Dict, Indirect, Name, Object, Ref, MAX_GENERATION};
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Default cap on object numbers
pub const DEFAULT_MAX_OBJECT_COUNT: u32 = (1 << 31) - 1;

static NULL_OBJECT: Object = Object::Null;

/// Receives stream-append notifications from the store
///
/// Observers must outlive the store or detach themselves before dropping.
pub trait StoreObserver {
    fn begin_append_stream(&self, id: Ref);
    fn end_append_stream(&self, id: Ref);
}

/// The indirect-object store
pub struct ObjectStore {
    objects: BTreeMap<Ref, Indirect>,
    /// Sorted ascending by object number, no duplicates
    free_list: VecDeque<Ref>,
    /// Object numbers whose generation reached the terminal value
    unavailable: BTreeSet<u32>,
    /// Object numbers of compressed object-stream containers
    compressed_streams: BTreeSet<u32>,
    max_num: u32,
    max_object_count: u32,
    recursion_limit: u16,
    observers: Vec<Arc<dyn StoreObserver>>,
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_OBJECT_COUNT, 500)
    }

    pub fn with_limits(max_object_count: u32, recursion_limit: u16) -> Self {
        Self {
            objects: BTreeMap::new(),
            free_list: VecDeque::new(),
            unavailable: BTreeSet::new(),
            compressed_streams: BTreeSet::new(),
            max_num: 0,
            max_object_count,
            recursion_limit,
            observers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Highest object number ever inserted.
    pub fn max_object_number(&self) -> u32 {
        self.max_num
    }

    pub fn iter(&self) -> impl Iterator<Item = &Indirect> {
        self.objects.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Indirect> {
        self.objects.values_mut()
    }

    pub fn get(&self, id: Ref) -> Option<&Indirect> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: Ref) -> Option<&mut Indirect> {
        self.objects.get_mut(&id)
    }

    /// Lookup that fails with `ObjectNotFound`.
    pub fn must_get(&self, id: Ref) -> Result<&Indirect> {
        self.objects
            .get(&id)
            .ok_or_else(|| Error::with_message(ErrorKind::ObjectNotFound, format!("{id}")))
    }

    /// Follow a reference chain until a non-reference value is reached.
    pub fn resolve<'a>(&'a self, value: &'a Object) -> &'a Object {
        let mut current = value;
        let mut hops = 0u16;
        while let Object::Reference(id) = current {
            match self.objects.get(id) {
                Some(obj) if hops < self.recursion_limit => {
                    current = &obj.value;
                    hops += 1;
                }
                _ => return &NULL_OBJECT,
            }
        }
        current
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a dictionary object with optional `/Type` and `/Subtype`.
    pub fn create_dict_object(
        &mut self,
        type_name: Option<Name>,
        subtype: Option<Name>,
    ) -> Result<&mut Indirect> {
        let mut dict = Dict::new();
        if let Some(name) = type_name {
            dict.insert(Name::new("Type"), Object::Name(name));
        }
        if let Some(name) = subtype {
            dict.insert(Name::new("Subtype"), Object::Name(name));
        }
        self.create_object(Object::Dict(dict))
    }

    /// Create an empty array object.
    pub fn create_array_object(&mut self) -> Result<&mut Indirect> {
        self.create_object(Object::Array(Vec::new()))
    }

    /// Insert a caller-supplied value under a freshly allocated reference.
    pub fn create_object(&mut self, value: Object) -> Result<&mut Indirect> {
        let id = self.allocate()?;
        let mut obj = Indirect::new(id, value);
        obj.mark_dirty();
        self.track_max(id);
        Ok(self.objects.entry(id).or_insert(obj))
    }

    /// Insert with a caller-chosen reference, replacing any existing object
    /// with the same reference.
    pub fn push(&mut self, obj: Indirect) {
        self.track_max(obj.id());
        self.objects.insert(obj.id(), obj);
    }

    // ------------------------------------------------------------------
    // Removal and the free list
    // ------------------------------------------------------------------

    /// Remove an object. With `mark_free` its reference joins the free list
    /// at the next generation. Compressed object-stream containers cannot
    /// be removed.
    pub fn remove(&mut self, id: Ref, mark_free: bool) -> Result<Option<Indirect>> {
        if self.compressed_streams.contains(&id.num) {
            return Err(Error::with_message(
                ErrorKind::InternalLogic,
                "can't remove a compressed object stream",
            ));
        }
        let removed = self.objects.remove(&id);
        if removed.is_some() && mark_free {
            self.safe_add_free(id);
        }
        Ok(removed)
    }

    /// Free the reference at its next generation. A generation that would
    /// reach the terminal value retires the object number instead.
    pub fn safe_add_free(&mut self, id: Ref) {
        let next_gen = id.gen as u32 + 1;
        if next_gen >= MAX_GENERATION as u32 {
            self.unavailable.insert(id.num);
            return;
        }
        self.add_free(Ref::new(id.num, next_gen as u16));
    }

    /// Sorted, idempotent insert into the free list.
    pub fn add_free(&mut self, id: Ref) {
        match self
            .free_list
            .binary_search_by_key(&id.num, |entry| entry.num)
        {
            Ok(_) => {
                debug!("object {} is already on the free list", id.num);
            }
            Err(pos) => {
                self.free_list.insert(pos, id);
                self.track_max(id);
            }
        }
    }

    /// Mark an object number as a compressed object-stream container.
    pub fn add_compressed_stream(&mut self, num: u32) {
        self.compressed_streams.insert(num);
    }

    pub fn is_compressed_stream(&self, num: u32) -> bool {
        self.compressed_streams.contains(&num)
    }

    /// Object numbers retired at the terminal generation.
    pub fn unavailable(&self) -> impl Iterator<Item = u32> + '_ {
        self.unavailable.iter().copied()
    }

    /// Current free list, sorted ascending.
    pub fn free_list(&self) -> impl Iterator<Item = Ref> + '_ {
        self.free_list.iter().copied()
    }

    /// Pop a reusable reference or mint the next object number.
    fn allocate(&mut self) -> Result<Ref> {
        if let Some(id) = self.free_list.pop_front() {
            return Ok(id);
        }

        let mut next = self.max_num.saturating_add(1);
        while self.unavailable.contains(&next) {
            next = next.saturating_add(1);
        }
        if next > self.max_object_count {
            return Err(Error::with_message(
                ErrorKind::ValueOutOfRange,
                "reached the maximum number of indirect objects",
            ));
        }
        Ok(Ref::new(next, 0))
    }

    fn track_max(&mut self, id: Ref) {
        if id.num > self.max_num {
            self.max_num = id.num;
        }
    }

    /// Drop all objects and bookkeeping.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.free_list.clear();
        self.unavailable.clear();
        self.compressed_streams.clear();
        self.max_num = 0;
    }

    // ------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------

    /// Remove every object unreachable from the trailer. Compressed
    /// object-stream containers survive even when unreferenced; the objects
    /// they carry stay reachable through them.
    pub fn collect_garbage(&mut self, trailer: &Dict) -> Result<()> {
        let mut reachable: BTreeSet<Ref> = BTreeSet::new();
        for value in trailer.values() {
            Self::visit(
                &self.objects,
                value,
                &mut reachable,
                0,
                self.recursion_limit,
            )?;
        }

        for &num in &self.compressed_streams {
            let id = Ref::new(num, 0);
            if reachable.contains(&id) {
                continue;
            }
            if let Some(container) = self.objects.get(&id) {
                Self::visit(
                    &self.objects,
                    &container.value,
                    &mut reachable,
                    0,
                    self.recursion_limit,
                )?;
            }
        }

        let doomed: Vec<Ref> = self
            .objects
            .keys()
            .copied()
            .filter(|id| !reachable.contains(id) && !self.compressed_streams.contains(&id.num))
            .collect();

        for id in doomed {
            self.objects.remove(&id);
            self.safe_add_free(id);
        }
        Ok(())
    }

    fn visit(
        objects: &BTreeMap<Ref, Indirect>,
        value: &Object,
        reachable: &mut BTreeSet<Ref>,
        depth: u16,
        limit: u16,
    ) -> Result<()> {
        if depth >= limit {
            return Err(Error::with_message(
                ErrorKind::RecursionLimit,
                "reference graph deeper than the configured limit",
            ));
        }
        match value {
            Object::Reference(id) => {
                if reachable.insert(*id) {
                    if let Some(child) = objects.get(id) {
                        Self::visit(objects, &child.value, reachable, depth + 1, limit)?;
                    }
                }
            }
            Object::Array(array) => {
                for item in array {
                    Self::visit(objects, item, reachable, depth + 1, limit)?;
                }
            }
            Object::Dict(dict) => {
                for item in dict.values() {
                    Self::visit(objects, item, reachable, depth + 1, limit)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Observers and stream data
    // ------------------------------------------------------------------

    pub fn attach_observer(&mut self, observer: Arc<dyn StoreObserver>) {
        self.observers.push(observer);
    }

    pub fn detach_observer(&mut self, observer: &Arc<dyn StoreObserver>) {
        self.observers
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }

    /// Replace the stream body of an object, notifying observers around the
    /// mutation. Creates the stream when the object has none yet.
    pub fn set_stream_data(&mut self, id: Ref, data: Vec<u8>) -> Result<()> {
        if !self.objects.contains_key(&id) {
            return Err(Error::with_message(ErrorKind::ObjectNotFound, format!("{id}")));
        }
        for observer in &self.observers {
            observer.begin_append_stream(id);
        }
        if let Some(obj) = self.objects.get_mut(&id) {
            match &mut obj.stream {
                Some(stream) => stream.set_data(data),
                None => obj.stream = Some(crate::object::StreamData::owned(data)),
            }
            obj.mark_dirty();
        }
        for observer in &self.observers {
            observer.end_append_stream(id);
        }
        Ok(())
    }

    /// Sanity pass used after parsing: every free-list entry for a live
    /// object number is suspicious and logged.
    pub fn audit_free_list(&self) {
        for id in &self.free_list {
            if self.objects.contains_key(id) {
                warn!("free-list entry {id} shadows a live object");
            }
        }
    }
}
