use std::collections::{BTreeMap, HashMap};

use crate::abi::{ByteArray, TypeInfo, type_index};

const BUILTIN_TYPES: &[(&str, i32)] = &[
    ("ffi.Object", type_index::OBJECT),
    ("ffi.String", type_index::STR),
    ("ffi.Bytes", type_index::BYTES),
    ("ffi.Error", type_index::ERROR),
    ("ffi.Function", type_index::FUNCTION),
    ("ffi.Shape", type_index::SHAPE),
    ("ffi.Tensor", type_index::TENSOR),
    ("ffi.Array", type_index::ARRAY),
    ("ffi.Map", type_index::MAP),
    ("ffi.Module", type_index::MODULE),
];

struct TypeEntry {
    info: TypeInfo,
    _key: Box<str>,
}

/// Key/index registry. Entries are boxed and never removed, so pointers to
/// their `TypeInfo` stay valid for the life of the process.
pub(crate) struct TypeTable {
    by_index: BTreeMap<i32, Box<TypeEntry>>,
    by_key: HashMap<String, i32>,
    next_dynamic: i32,
}

// SAFETY: the raw key pointers target boxed strings owned by the table.
unsafe impl Send for TypeTable {}

impl TypeTable {
    pub(crate) fn new() -> Self {
        let mut table = Self {
            by_index: BTreeMap::new(),
            by_key: HashMap::new(),
            next_dynamic: type_index::DYN_OBJECT_BEGIN,
        };
        for (key, index) in BUILTIN_TYPES {
            let (depth, parent) = if *index == type_index::OBJECT {
                (0, -1)
            } else {
                (1, type_index::OBJECT)
            };
            table.insert(key, *index, depth, parent);
        }
        table
    }

    fn insert(&mut self, key: &str, index: i32, depth: i32, parent_index: i32) {
        let key: Box<str> = key.into();
        let info = TypeInfo {
            type_index: index,
            type_depth: depth,
            type_key: ByteArray::from_slice(key.as_bytes()),
            parent_index,
        };
        self.by_key.insert(key.to_string(), index);
        self.by_index
            .insert(index, Box::new(TypeEntry { info, _key: key }));
    }

    pub(crate) fn key_to_index(&self, key: &str) -> Option<i32> {
        self.by_key.get(key).copied()
    }

    pub(crate) fn get_or_alloc(
        &mut self,
        key: &str,
        static_index: i32,
        depth: i32,
        parent_index: i32,
    ) -> i32 {
        if let Some(index) = self.by_key.get(key) {
            return *index;
        }
        let index = if static_index >= 0 {
            static_index
        } else {
            let index = self.next_dynamic;
            self.next_dynamic += 1;
            index
        };
        self.insert(key, index, depth, parent_index);
        index
    }

    pub(crate) fn info(&self, index: i32) -> *const TypeInfo {
        self.by_index
            .get(&index)
            .map(|entry| &entry.info as *const TypeInfo)
            .unwrap_or(std::ptr::null())
    }
}
