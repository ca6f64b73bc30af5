//! Dense array storage
//!
//! Host arrays have no holes: every index below the length holds a value,
//! undefined when never written.

use crate::value::Value;

/// Maximum array length (2^30 - 1)
pub const MAX_ARRAY_LENGTH: u32 = (1 << 30) - 1;

/// Furthest past the end a single write may land
///
/// Storage is dense, so a write far beyond the length would allocate every
/// slot in between.
pub const MAX_GROWTH_GAP: u32 = 1 << 16;

#[derive(Debug)]
pub struct DenseArray {
    elements: Vec<Value>,
    /// Filler for slots created by growth
    undefined: Value,
}

impl DenseArray {
    /// Create an array of `length` undefined elements
    pub fn with_length(length: u32, undefined: Value) -> Self {
        let len = length.min(MAX_ARRAY_LENGTH) as usize;
        DenseArray {
            elements: vec![undefined; len],
            undefined,
        }
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.elements.len() as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    #[inline]
    pub fn get(&self, index: u32) -> Option<Value> {
        self.elements.get(index as usize).copied()
    }

    /// Store an element, extending the array with undefined if needed
    ///
    /// Returns false if `index` is past the maximum length, or more than
    /// [`MAX_GROWTH_GAP`] past the current end.
    pub fn set(&mut self, index: u32, value: Value) -> bool {
        if index >= MAX_ARRAY_LENGTH || index - self.len().min(index) > MAX_GROWTH_GAP {
            return false;
        }
        let index = index as usize;
        if index >= self.elements.len() {
            self.elements.resize(index + 1, self.undefined);
        }
        self.elements[index] = value;
        true
    }

    /// Set the length, truncating or padding with undefined
    pub fn set_length(&mut self, length: u32) -> bool {
        if length > MAX_ARRAY_LENGTH {
            return false;
        }
        self.elements.resize(length as usize, self.undefined);
        true
    }

    pub fn push(&mut self, value: Value) -> bool {
        self.set(self.len(), value)
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        self.elements.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNDEFINED: Value = Value::from_raw(0);

    fn value(n: u64) -> Value {
        Value::from_raw(n)
    }

    #[test]
    fn test_with_length_fills_undefined() {
        let array = DenseArray::with_length(3, UNDEFINED);
        assert_eq!(array.len(), 3);
        assert!(array.iter().all(|v| v == UNDEFINED));
        assert_eq!(array.get(3), None);
    }

    #[test]
    fn test_set_extends() {
        let mut array = DenseArray::with_length(0, UNDEFINED);
        assert!(array.is_empty());
        assert!(array.set(4, value(9)));
        assert_eq!(array.len(), 5);
        assert_eq!(array.get(2), Some(UNDEFINED));
        assert_eq!(array.get(4), Some(value(9)));
    }

    #[test]
    fn test_push_and_set_length() {
        let mut array = DenseArray::with_length(0, UNDEFINED);
        array.push(value(1));
        array.push(value(2));
        assert_eq!(array.iter().collect::<Vec<_>>(), [value(1), value(2)]);

        assert!(array.set_length(1));
        assert_eq!(array.len(), 1);
        assert!(array.set_length(3));
        assert_eq!(array.get(2), Some(UNDEFINED));
    }

    #[test]
    fn test_max_length() {
        let mut array = DenseArray::with_length(0, UNDEFINED);
        assert!(!array.set(MAX_ARRAY_LENGTH, value(1)));
        assert!(!array.set_length(MAX_ARRAY_LENGTH + 1));
        assert!(array.is_empty());
    }

    #[test]
    fn test_far_write_is_rejected() {
        let mut array = DenseArray::with_length(2, UNDEFINED);
        assert!(!array.set(2 + MAX_GROWTH_GAP + 1, value(1)));
        assert!(!array.set(MAX_ARRAY_LENGTH - 1, value(1)));
        assert_eq!(array.len(), 2);

        assert!(array.set(2 + MAX_GROWTH_GAP, value(1)));
        assert_eq!(array.len(), 2 + MAX_GROWTH_GAP + 1);
    }
}
