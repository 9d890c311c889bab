//! Rendering frame states into interpreter frame descriptions.
//!
//! The builder walks a frame state and its outer chain and produces one
//! [`InterpreterFrame`] per inlining level, plus one [`VirtualObjectValue`]
//! per escape-analyzed object that is still virtual at the deopt point.
//! Rendering happens in three steps:
//!
//! 1. Collect the escape-object mappings of the whole chain. The innermost
//!    state wins when the same object is mapped twice.
//! 2. Render the frames outermost-first so each frame can own its caller.
//!    Values resolve to constants, allocator locations or virtual-object
//!    references; virtual objects are registered lazily and queued.
//! 3. Drain the queue, rendering each virtual object's field or element
//!    values. Entries discovered here may queue further objects.
//!
//! Two-slot rule: an INVALID slot directly after a live `Long`/`Double`
//! value is the upper half of that value and is elided from the rendered
//! frame. Any other INVALID slot renders as an explicit `Illegal` entry, so
//! `values.len()` always equals the rendered locals + stack + locks counts.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use super::kind::{SlotKind, ValueLocation};
use super::FrameError;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{MethodId, Operator, TypeId, VirtualObjectInfo};
use crate::transform::unproxify;

// =============================================================================
// Rendered output
// =============================================================================

/// A constant rendered into a frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstValue {
    Int(i64),
    /// Raw bits; width is given by the slot kind.
    Float(u64),
    Null,
}

/// A single rendered slot or virtual-object entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameValue {
    Constant(ConstValue),
    Location(ValueLocation),
    /// Index into [`FrameSnapshot::virtual_objects`].
    Virtual(u32),
    Illegal,
}

/// One interpreter frame, with its caller chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterFrame {
    pub caller: Option<Box<InterpreterFrame>>,
    pub method: MethodId,
    pub bci: i32,
    pub rethrow_exception: bool,
    pub during_call: bool,
    /// Rendered locals, then stack, then locks.
    pub values: Vec<FrameValue>,
    /// Kinds for the locals and stack portions of `values`.
    pub slot_kinds: Vec<SlotKind>,
    pub num_locals: usize,
    pub num_stack: usize,
    pub num_locks: usize,
}

/// An object the compiler never allocated, described by its entry values so
/// the runtime can materialize it on deopt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualObjectValue {
    pub id: u32,
    pub type_id: TypeId,
    pub is_array: bool,
    pub values: Vec<FrameValue>,
    pub slot_kinds: Vec<SlotKind>,
}

/// Everything the runtime needs to rebuild the interpreter state at one
/// deopt point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSnapshot {
    pub frame: InterpreterFrame,
    pub virtual_objects: Vec<VirtualObjectValue>,
}

// =============================================================================
// Environment traits
// =============================================================================

/// Where the register allocator placed each live value.
pub trait ValueLocator {
    fn operand(&self, node: NodeId) -> Option<ValueLocation>;
}

/// Declared storage layout of runtime types, used for layout checking of
/// rendered virtual objects. Both queries may answer `None` for types the
/// runtime has no layout for; those objects are simply not checked.
pub trait TypeLayouts {
    /// Declared instance field kinds, in field order.
    fn field_kinds(&self, type_id: TypeId) -> Option<Vec<SlotKind>>;
    /// Element kind of an array type.
    fn array_component_kind(&self, type_id: TypeId) -> Option<SlotKind>;
}

/// Classification of a rendered slot, reported to a [`BuildObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotClass {
    Constant,
    Location,
    VirtualObject,
    Illegal,
}

/// Hook into frame rendering, for statistics and diagnostics.
pub trait BuildObserver {
    fn slot_rendered(&mut self, _class: SlotClass) {}
    fn frame_rendered(&mut self, _method: MethodId, _bci: i32) {}
}

/// Observer that ignores everything.
pub struct NullObserver;

impl BuildObserver for NullObserver {}

/// Observer that tallies rendered slots by class.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CountingObserver {
    pub constants: usize,
    pub locations: usize,
    pub virtual_objects: usize,
    pub illegals: usize,
    pub frames: usize,
}

impl BuildObserver for CountingObserver {
    fn slot_rendered(&mut self, class: SlotClass) {
        match class {
            SlotClass::Constant => self.constants += 1,
            SlotClass::Location => self.locations += 1,
            SlotClass::VirtualObject => self.virtual_objects += 1,
            SlotClass::Illegal => self.illegals += 1,
        }
    }

    fn frame_rendered(&mut self, _method: MethodId, _bci: i32) {
        self.frames += 1;
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Renders frame state subtrees into [`FrameSnapshot`]s.
///
/// A builder is reusable: every call to [`FrameBuilder::build`] starts from
/// a clean slate.
pub struct FrameBuilder<'a> {
    graph: &'a Graph,
    locator: &'a dyn ValueLocator,
    layouts: Option<&'a dyn TypeLayouts>,
    /// Object node to winning mapping, collected over the whole chain.
    object_states: FxHashMap<NodeId, NodeId>,
    /// Object node to its slot in `rendered`.
    virtual_ids: FxHashMap<NodeId, u32>,
    /// Objects registered but not yet rendered, with their ids.
    pending: VecDeque<(NodeId, u32)>,
    rendered: Vec<VirtualObjectValue>,
}

impl<'a> FrameBuilder<'a> {
    pub fn new(graph: &'a Graph, locator: &'a dyn ValueLocator) -> Self {
        FrameBuilder {
            graph,
            locator,
            layouts: None,
            object_states: FxHashMap::default(),
            virtual_ids: FxHashMap::default(),
            pending: VecDeque::new(),
            rendered: Vec::new(),
        }
    }

    /// Enable layout checking of rendered virtual objects (debug builds
    /// only).
    pub fn with_layouts(mut self, layouts: &'a dyn TypeLayouts) -> Self {
        self.layouts = Some(layouts);
        self
    }

    /// Render the frame state `top` and its outer chain.
    ///
    /// `top` must be a frame state node.
    pub fn build(
        &mut self,
        top: NodeId,
        observer: &mut dyn BuildObserver,
    ) -> Result<FrameSnapshot, FrameError> {
        debug_assert!(matches!(self.graph.op(top), Operator::FrameState(_)));
        self.object_states.clear();
        self.virtual_ids.clear();
        self.pending.clear();
        self.rendered.clear();

        self.collect_object_states(top);
        let frame = self.render_frames(top, observer)?;
        self.drain_pending(observer)?;
        let virtual_objects = std::mem::take(&mut self.rendered);
        Ok(FrameSnapshot {
            frame,
            virtual_objects,
        })
    }

    // =========================================================================
    // Mapping collection
    // =========================================================================

    fn collect_object_states(&mut self, top: NodeId) {
        let mut current = top;
        while current.is_valid() {
            for mapping in self.graph.virtual_mappings(current) {
                let object = self.graph.mapping_object(mapping);
                // Innermost state wins.
                if self.object_states.contains_key(&object) {
                    continue;
                }
                // An object "materialized" as itself carries no information.
                if matches!(self.graph.op(mapping), Operator::MaterializedState)
                    && self.graph.materialized_value(mapping) == object
                {
                    continue;
                }
                self.object_states.insert(object, mapping);
            }
            current = self.graph.outer_frame_state(current);
        }
    }

    // =========================================================================
    // Frame rendering
    // =========================================================================

    fn render_frames(
        &mut self,
        top: NodeId,
        observer: &mut dyn BuildObserver,
    ) -> Result<InterpreterFrame, FrameError> {
        let mut chain = Vec::new();
        let mut current = top;
        while current.is_valid() {
            chain.push(current);
            current = self.graph.outer_frame_state(current);
        }
        // Outermost first so each frame can take ownership of its caller.
        let mut caller: Option<Box<InterpreterFrame>> = None;
        for &state in chain[1..].iter().rev() {
            let frame = self.render_frame(state, caller.take(), observer)?;
            caller = Some(Box::new(frame));
        }
        self.render_frame(top, caller, observer)
    }

    fn render_frame(
        &mut self,
        state: NodeId,
        caller: Option<Box<InterpreterFrame>>,
        observer: &mut dyn BuildObserver,
    ) -> Result<InterpreterFrame, FrameError> {
        let info = self.graph.frame_state_info(state);
        if !info.can_produce_frame() {
            return Err(FrameError::NonReconstructible {
                method: info.method,
                bci: info.bci,
            });
        }
        let mut values = Vec::with_capacity(info.slot_count());
        let mut slot_kinds = Vec::with_capacity(info.locals as usize + info.stack as usize);
        let num_locals = self.render_slots(
            state,
            0,
            info.locals as usize,
            &mut values,
            &mut slot_kinds,
            observer,
        )?;
        let num_stack = self.render_slots(
            state,
            info.locals as usize,
            info.stack as usize,
            &mut values,
            &mut slot_kinds,
            observer,
        )?;
        let mut num_locks = 0;
        for i in 0..info.locks as usize {
            let lock = self.graph.lock_at(state, i);
            values.push(self.render_value(lock, observer)?);
            num_locks += 1;
        }
        observer.frame_rendered(info.method, info.bci);
        Ok(InterpreterFrame {
            caller,
            method: info.method,
            bci: info.bci,
            rethrow_exception: info.rethrow_exception,
            during_call: info.during_call,
            values,
            slot_kinds,
            num_locals,
            num_stack,
            num_locks,
        })
    }

    /// Render `count` slots starting at `base`, applying the two-slot rule.
    /// Returns how many slots survived into the frame.
    fn render_slots(
        &mut self,
        state: NodeId,
        base: usize,
        count: usize,
        values: &mut Vec<FrameValue>,
        slot_kinds: &mut Vec<SlotKind>,
        observer: &mut dyn BuildObserver,
    ) -> Result<usize, FrameError> {
        let mut rendered = 0;
        for i in 0..count {
            let slot = self.graph.state_slot_at(state, base + i);
            if !slot.is_valid() {
                let prev = if i > 0 {
                    self.graph.state_slot_at(state, base + i - 1)
                } else {
                    NodeId::INVALID
                };
                if prev.is_valid() && self.kind_of(prev).needs_two_slots() {
                    // Upper half of the preceding two-slot value.
                    continue;
                }
                values.push(FrameValue::Illegal);
                slot_kinds.push(SlotKind::Illegal);
                observer.slot_rendered(SlotClass::Illegal);
                rendered += 1;
                continue;
            }
            values.push(self.render_value(slot, observer)?);
            slot_kinds.push(self.kind_of(slot));
            rendered += 1;
        }
        Ok(rendered)
    }

    // =========================================================================
    // Value rendering
    // =========================================================================

    fn render_value(
        &mut self,
        value: NodeId,
        observer: &mut dyn BuildObserver,
    ) -> Result<FrameValue, FrameError> {
        let mut value = value;
        loop {
            if !value.is_valid() {
                observer.slot_rendered(SlotClass::Illegal);
                return Ok(FrameValue::Illegal);
            }
            if let Operator::VirtualObject(info) = self.graph.op(value) {
                if let Some(&mapping) = self.object_states.get(&value) {
                    if matches!(self.graph.op(mapping), Operator::MaterializedState) {
                        // Escaped after all; render the allocation instead.
                        value = self.graph.materialized_value(mapping);
                        continue;
                    }
                } else if info.entry_count > 0 {
                    return Err(FrameError::MissingVirtualMapping { object: value });
                }
                let id = self.virtual_id(value, info);
                observer.slot_rendered(SlotClass::VirtualObject);
                return Ok(FrameValue::Virtual(id));
            }
            let unproxied = unproxify(self.graph, value);
            return match self.graph.op(unproxied) {
                Operator::ConstInt(v) => {
                    observer.slot_rendered(SlotClass::Constant);
                    Ok(FrameValue::Constant(ConstValue::Int(v)))
                }
                Operator::ConstFloat(bits) => {
                    observer.slot_rendered(SlotClass::Constant);
                    Ok(FrameValue::Constant(ConstValue::Float(bits)))
                }
                Operator::ConstNone => {
                    observer.slot_rendered(SlotClass::Constant);
                    Ok(FrameValue::Constant(ConstValue::Null))
                }
                _ => match self.locator.operand(unproxied) {
                    Some(location) => {
                        observer.slot_rendered(SlotClass::Location);
                        Ok(FrameValue::Location(location))
                    }
                    None => Err(FrameError::UnallocatedValue { node: unproxied }),
                },
            };
        }
    }

    /// Slot index of `object`, registering and queueing it on first sight.
    fn virtual_id(&mut self, object: NodeId, info: VirtualObjectInfo) -> u32 {
        if let Some(&id) = self.virtual_ids.get(&object) {
            return id;
        }
        let id = self.rendered.len() as u32;
        self.virtual_ids.insert(object, id);
        self.rendered.push(VirtualObjectValue {
            id,
            type_id: info.type_id,
            is_array: info.is_array,
            values: Vec::new(),
            slot_kinds: Vec::new(),
        });
        self.pending.push_back((object, id));
        id
    }

    // =========================================================================
    // Virtual object rendering
    // =========================================================================

    fn drain_pending(&mut self, observer: &mut dyn BuildObserver) -> Result<(), FrameError> {
        while let Some((object, id)) = self.pending.pop_front() {
            let info = match self.graph.op(object) {
                Operator::VirtualObject(info) => info,
                op => unreachable!("queued non-object {:?}", op),
            };
            let mut values = Vec::new();
            let mut slot_kinds = Vec::new();
            if info.entry_count > 0 {
                let mapping = match self.object_states.get(&object) {
                    Some(&mapping) => mapping,
                    None => return Err(FrameError::MissingVirtualMapping { object }),
                };
                debug_assert!(matches!(self.graph.op(mapping), Operator::VirtualState));
                let entries = self.graph.virtual_entries(mapping);
                for (i, &entry) in entries.iter().enumerate() {
                    if !entry.is_valid() {
                        // Upper-half filler of the preceding two-slot entry.
                        debug_assert!(i > 0);
                        debug_assert!(
                            entries[i - 1].is_valid()
                                && self.kind_of(entries[i - 1]).needs_two_slots()
                        );
                        continue;
                    }
                    values.push(self.render_value(entry, observer)?);
                    slot_kinds.push(self.kind_of(entry));
                }
                #[cfg(debug_assertions)]
                self.check_layout(info, &slot_kinds);
            }
            let slot = &mut self.rendered[id as usize];
            slot.values = values;
            slot.slot_kinds = slot_kinds;
        }
        Ok(())
    }

    /// Advisory check of rendered entry kinds against the declared layout.
    #[cfg(debug_assertions)]
    fn check_layout(&self, info: VirtualObjectInfo, slot_kinds: &[SlotKind]) {
        let Some(layouts) = self.layouts else {
            return;
        };
        if info.is_array {
            let Some(component) = layouts.array_component_kind(info.type_id) else {
                return;
            };
            for &kind in slot_kinds {
                if component == SlotKind::Object {
                    debug_assert_eq!(kind, SlotKind::Object);
                } else {
                    debug_assert!(kind != SlotKind::Object);
                    debug_assert!(kind.bit_count() <= component.bit_count().max(32));
                }
            }
        } else {
            let Some(fields) = layouts.field_kinds(info.type_id) else {
                return;
            };
            let mut field = 0;
            for &kind in slot_kinds {
                debug_assert!(field < fields.len());
                let declared = fields[field];
                field += 1;
                if kind.needs_two_slots() && declared == SlotKind::Int {
                    // One wide value stored across two int fields.
                    debug_assert_eq!(fields.get(field).copied(), Some(SlotKind::Int));
                    field += 1;
                } else if declared == SlotKind::Object {
                    debug_assert_eq!(kind, SlotKind::Object);
                } else {
                    debug_assert!(kind.bit_count() <= declared.bit_count());
                }
            }
            debug_assert_eq!(field, fields.len());
        }
    }

    #[inline]
    fn kind_of(&self, node: NodeId) -> SlotKind {
        SlotKind::from(self.graph.ty(node))
    }
}

// =============================================================================
// Tests
// =============================================================================
