//! Property storage for host objects
//!
//! Properties live in a vector in insertion order with a hash index over
//! their atoms. Deletion is not part of the boundary, so slots are never
//! reused and iteration order is stable.

use crate::boundary::PropertyAttributes;
use crate::value::Value;

use super::atom::Atom;

/// One own property of an object
#[derive(Clone, Copy, Debug)]
pub struct Property {
    pub key: Atom,
    pub value: Value,
    /// Hash chain next index (29 bits) and attribute bits (3 bits)
    /// Layout: hash_next (29 bits) | attributes (3 bits)
    hash_next_and_attrs: u32,
}

impl Property {
    const ATTR_BITS: u32 = 3;
    const ATTR_MASK: u32 = (1 << Self::ATTR_BITS) - 1;

    #[inline]
    fn new(key: Atom, value: Value, attributes: PropertyAttributes) -> Self {
        Property {
            key,
            value,
            hash_next_and_attrs: attributes.bits() as u32,
        }
    }

    #[inline]
    pub fn attributes(&self) -> PropertyAttributes {
        PropertyAttributes::from_bits((self.hash_next_and_attrs & Self::ATTR_MASK) as u8)
    }

    #[inline]
    fn set_attributes(&mut self, attributes: PropertyAttributes) {
        self.hash_next_and_attrs =
            (self.hash_next_and_attrs & !Self::ATTR_MASK) | attributes.bits() as u32;
    }

    #[inline]
    fn hash_next(&self) -> u32 {
        self.hash_next_and_attrs >> Self::ATTR_BITS
    }

    #[inline]
    fn set_hash_next(&mut self, next: u32) {
        self.hash_next_and_attrs = (next << Self::ATTR_BITS) | (self.hash_next_and_attrs & Self::ATTR_MASK);
    }
}

/// Why a write was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    ReadOnly,
    NotConfigurable,
}

#[derive(Debug)]
pub struct PropertyTable {
    properties: Vec<Property>,
    /// Indices into `properties` plus one (0 = end of chain)
    hash_table: Vec<u32>,
    hash_mask: u32,
}

impl PropertyTable {
    const MIN_HASH_SIZE: usize = 4;
    const MAX_LOAD_FACTOR: f64 = 0.75;

    pub fn new() -> Self {
        PropertyTable {
            properties: Vec::new(),
            hash_table: vec![0; Self::MIN_HASH_SIZE],
            hash_mask: (Self::MIN_HASH_SIZE - 1) as u32,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    #[inline]
    fn hash_key(key: Atom) -> u32 {
        let mut h = key.index();
        h ^= h >> 16;
        h = h.wrapping_mul(0x85eb_ca6b);
        h ^= h >> 13;
        h = h.wrapping_mul(0xc2b2_ae35);
        h ^= h >> 16;
        h
    }

    fn find(&self, key: Atom) -> Option<usize> {
        let mut idx = self.hash_table[(Self::hash_key(key) & self.hash_mask) as usize];
        while idx != 0 {
            let prop_idx = (idx - 1) as usize;
            let prop = &self.properties[prop_idx];
            if prop.key == key {
                return Some(prop_idx);
            }
            idx = prop.hash_next();
        }
        None
    }

    pub fn get(&self, key: Atom) -> Option<&Property> {
        self.find(key).map(|idx| &self.properties[idx])
    }

    #[inline]
    pub fn has(&self, key: Atom) -> bool {
        self.find(key).is_some()
    }

    /// Assign a value; new properties get default attributes
    pub fn set(&mut self, key: Atom, value: Value) -> Result<(), WriteError> {
        match self.find(key) {
            Some(idx) if !self.properties[idx].attributes().is_writable() => Err(WriteError::ReadOnly),
            Some(idx) => {
                self.properties[idx].value = value;
                Ok(())
            }
            None => {
                self.insert(Property::new(key, value, PropertyAttributes::DEFAULT));
                Ok(())
            }
        }
    }

    /// Define a property with explicit attributes
    pub fn define(&mut self, key: Atom, value: Value, attributes: PropertyAttributes) -> Result<(), WriteError> {
        match self.find(key) {
            Some(idx) => {
                let prop = &mut self.properties[idx];
                if !prop.attributes().contains(PropertyAttributes::CONFIGURABLE) {
                    return Err(WriteError::NotConfigurable);
                }
                prop.value = value;
                prop.set_attributes(attributes);
                Ok(())
            }
            None => {
                self.insert(Property::new(key, value, attributes));
                Ok(())
            }
        }
    }

    fn insert(&mut self, mut prop: Property) {
        let load = (self.properties.len() + 1) as f64 / (self.hash_mask + 1) as f64;
        if load > Self::MAX_LOAD_FACTOR {
            self.resize();
        }
        let bucket = (Self::hash_key(prop.key) & self.hash_mask) as usize;
        prop.set_hash_next(self.hash_table[bucket]);
        self.properties.push(prop);
        self.hash_table[bucket] = self.properties.len() as u32;
    }

    fn resize(&mut self) {
        let new_size = ((self.hash_mask + 1) * 2) as usize;
        self.hash_mask = (new_size - 1) as u32;
        self.hash_table = vec![0; new_size];
        for i in 0..self.properties.len() {
            let bucket = (Self::hash_key(self.properties[i].key) & self.hash_mask) as usize;
            self.properties[i].set_hash_next(self.hash_table[bucket]);
            self.hash_table[bucket] = (i + 1) as u32;
        }
    }

    /// Properties in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    /// Enumerable keys in insertion order
    pub fn enumerable_keys(&self) -> impl Iterator<Item = Atom> + '_ {
        self.iter()
            .filter(|p| p.attributes().is_enumerable())
            .map(|p| p.key)
    }
}

impl Default for PropertyTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::atom::AtomTable;

    fn value(n: u32) -> Value {
        Value::from_raw(n as u64)
    }

    #[test]
    fn test_set_get_update() {
        let mut atoms = AtomTable::new();
        let key = atoms.intern("x");
        let mut table = PropertyTable::new();
        assert!(table.is_empty());

        table.set(key, value(1)).unwrap();
        table.set(key, value(2)).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(key).unwrap().value, value(2));
        assert_eq!(table.get(key).unwrap().attributes(), PropertyAttributes::DEFAULT);
    }

    #[test]
    fn test_many_properties_survive_resize() {
        let mut atoms = AtomTable::new();
        let mut table = PropertyTable::new();
        for i in 0..100 {
            let key = atoms.intern(&format!("p{i}"));
            table.set(key, value(i)).unwrap();
        }
        for i in 0..100 {
            let key = atoms.find(&format!("p{i}")).unwrap();
            assert_eq!(table.get(key).unwrap().value, value(i));
        }
    }

    #[test]
    fn test_insertion_order() {
        let mut atoms = AtomTable::new();
        let mut table = PropertyTable::new();
        for name in ["zeta", "alpha", "mid"] {
            let key = atoms.intern(name);
            table.set(key, value(0)).unwrap();
        }
        let names: Vec<_> = table.enumerable_keys().map(|k| atoms.name(k)).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_read_only_and_hidden() {
        let mut atoms = AtomTable::new();
        let mut table = PropertyTable::new();
        let version = atoms.intern("version");
        let hidden = atoms.intern("hidden");

        table
            .define(version, value(1), PropertyAttributes::ENUMERABLE)
            .unwrap();
        table
            .define(hidden, value(2), PropertyAttributes::CONFIGURABLE)
            .unwrap();

        assert_eq!(table.set(version, value(3)), Err(WriteError::ReadOnly));
        assert_eq!(
            table.define(version, value(3), PropertyAttributes::DEFAULT),
            Err(WriteError::NotConfigurable)
        );
        assert_eq!(table.get(version).unwrap().value, value(1));

        let keys: Vec<_> = table.enumerable_keys().collect();
        assert_eq!(keys, [version]);

        table.define(hidden, value(4), PropertyAttributes::DEFAULT).unwrap();
        assert_eq!(table.enumerable_keys().count(), 2);
    }
}
