//! Property key interning
//!
//! Every property name the host stores is interned once per environment, so
//! property tables compare keys as integers.

/// Interned property name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(u32);

impl Atom {
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// String interning table
///
/// Open hashing: `hash_table` holds `index + 1` of the first entry of each
/// chain, `next` links entries sharing a bucket (0 = end of chain).
#[derive(Debug)]
pub struct AtomTable {
    names: Vec<Box<str>>,
    next: Vec<u32>,
    hash_table: Vec<u32>,
    hash_mask: u32,
}

impl AtomTable {
    /// Initial hash table size (power of 2)
    const INITIAL_SIZE: usize = 64;

    pub fn new() -> Self {
        AtomTable {
            names: Vec::new(),
            next: Vec::new(),
            hash_table: vec![0; Self::INITIAL_SIZE],
            hash_mask: (Self::INITIAL_SIZE - 1) as u32,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[inline]
    fn hash(name: &str) -> u32 {
        let mut h: u32 = 0;
        for b in name.bytes() {
            h = h.wrapping_mul(31).wrapping_add(b as u32);
        }
        h
    }

    /// Look up an already-interned name
    pub fn find(&self, name: &str) -> Option<Atom> {
        let mut idx = self.hash_table[(Self::hash(name) & self.hash_mask) as usize];
        while idx != 0 {
            let entry = (idx - 1) as usize;
            if &*self.names[entry] == name {
                return Some(Atom(entry as u32));
            }
            idx = self.next[entry];
        }
        None
    }

    /// Intern a name, returning the existing atom if there is one
    pub fn intern(&mut self, name: &str) -> Atom {
        if let Some(atom) = self.find(name) {
            return atom;
        }
        if self.names.len() + 1 > self.hash_table.len() {
            self.resize();
        }

        let entry = self.names.len();
        let bucket = (Self::hash(name) & self.hash_mask) as usize;
        self.names.push(name.into());
        self.next.push(self.hash_table[bucket]);
        self.hash_table[bucket] = (entry + 1) as u32;
        Atom(entry as u32)
    }

    /// Name of an atom minted by this table
    #[inline]
    pub fn name(&self, atom: Atom) -> &str {
        &self.names[atom.0 as usize]
    }

    fn resize(&mut self) {
        let new_size = self.hash_table.len() * 2;
        self.hash_mask = (new_size - 1) as u32;
        self.hash_table = vec![0; new_size];
        for entry in 0..self.names.len() {
            let bucket = (Self::hash(&self.names[entry]) & self.hash_mask) as usize;
            self.next[entry] = self.hash_table[bucket];
            self.hash_table[bucket] = (entry + 1) as u32;
        }
    }
}

impl Default for AtomTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a canonical array index ("0", "17", never "01" or "-1")
#[inline]
pub fn array_index(name: &str) -> Option<u32> {
    match name.as_bytes() {
        [] => None,
        [b] if b.is_ascii_digit() => Some((b - b'0') as u32),
        [b'0', ..] => None,
        bytes if bytes.iter().all(u8::is_ascii_digit) => {
            name.parse::<u32>().ok().filter(|&n| n < super::array::MAX_ARRAY_LENGTH)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let mut atoms = AtomTable::new();
        let a = atoms.intern("add");
        let b = atoms.intern("greet");
        assert_ne!(a, b);
        assert_eq!(atoms.intern("add"), a);
        assert_eq!(atoms.name(b), "greet");
        assert_eq!(atoms.len(), 2);
    }

    #[test]
    fn test_find_does_not_intern() {
        let mut atoms = AtomTable::new();
        assert!(atoms.find("missing").is_none());
        assert!(atoms.is_empty());
        let atom = atoms.intern("present");
        assert_eq!(atoms.find("present"), Some(atom));
    }

    #[test]
    fn test_resize_keeps_atoms() {
        let mut atoms = AtomTable::new();
        let interned: Vec<_> = (0..500).map(|i| atoms.intern(&format!("key{i}"))).collect();
        for (i, atom) in interned.into_iter().enumerate() {
            assert_eq!(atoms.find(&format!("key{i}")), Some(atom));
        }
    }

    #[test]
    fn test_array_index() {
        assert_eq!(array_index("0"), Some(0));
        assert_eq!(array_index("42"), Some(42));
        assert_eq!(array_index(""), None);
        assert_eq!(array_index("01"), None);
        assert_eq!(array_index("-1"), None);
        assert_eq!(array_index("1.5"), None);
        assert_eq!(array_index("length"), None);
        assert_eq!(array_index("99999999999"), None);
    }
}
