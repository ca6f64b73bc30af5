//! Handle table of one environment
//!
//! Every handle minted by an environment indexes a slot here. Slots are
//! never reclaimed before teardown, so a handle stays valid for the whole
//! environment lifetime.

use crate::value::{CallbackData, ValueType};

use super::object::{ClassId, HostObject};

/// Reserved slots, allocated at startup
pub const SLOT_UNDEFINED: u32 = 0;
pub const SLOT_NULL: u32 = 1;
pub const SLOT_FALSE: u32 = 2;
pub const SLOT_TRUE: u32 = 3;
pub const SLOT_GLOBAL: u32 = 4;

/// Contents of one slot
#[derive(Debug)]
pub enum Cell {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Box<str>),
    Object(Box<HostObject>),
    External(CallbackData),
}

impl Cell {
    pub fn type_of(&self) -> ValueType {
        match self {
            Cell::Undefined => ValueType::Undefined,
            Cell::Null => ValueType::Null,
            Cell::Bool(_) => ValueType::Boolean,
            Cell::Number(_) => ValueType::Number,
            Cell::String(_) => ValueType::String,
            Cell::Object(obj) if obj.class_id().is_function() => ValueType::Function,
            Cell::Object(_) => ValueType::Object,
            Cell::External(_) => ValueType::External,
        }
    }

    #[inline]
    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            Cell::Object(obj) => Some(obj),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn class_id(&self) -> Option<ClassId> {
        self.as_object().map(HostObject::class_id)
    }
}

#[derive(Debug)]
pub struct Heap {
    cells: Vec<Cell>,
}

impl Heap {
    /// Create a heap with the reserved slots in place
    pub fn new(capacity: usize, global: HostObject) -> Self {
        let mut cells = Vec::with_capacity(capacity.max(SLOT_GLOBAL as usize + 1));
        cells.push(Cell::Undefined);
        cells.push(Cell::Null);
        cells.push(Cell::Bool(false));
        cells.push(Cell::Bool(true));
        cells.push(Cell::Object(Box::new(global)));
        Heap { cells }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Store a cell, returning its slot
    pub fn alloc(&mut self, cell: Cell) -> u32 {
        let slot = self.cells.len() as u32;
        self.cells.push(cell);
        slot
    }

    #[inline]
    pub fn get(&self, slot: u32) -> Option<&Cell> {
        self.cells.get(slot as usize)
    }

    #[inline]
    pub fn get_mut(&mut self, slot: u32) -> Option<&mut Cell> {
        self.cells.get_mut(slot as usize)
    }

    /// Drop every cell
    pub fn clear(&mut self) {
        self.cells.clear();
        self.cells.shrink_to_fit();
    }
}
