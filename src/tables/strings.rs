//! Content-addressed string table.
//!
//! Interns every identifier and user string of the output image. Identifiers
//! are **byte offsets** into the serialized UTF-8 heap (one trailing NUL per
//! entry), not sequential counters; two identical strings always share one
//! offset. A compile-time constants table pre-allocates well-known strings in
//! a reserved id range so they never occupy heap bytes.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{Error, Result};

/// First identifier of the constants range.
///
/// Heap offsets stay below this threshold; ids at or above it resolve
/// against the consuming runtime's built-in string table and are never
/// written to the heap.
pub const STRING_CONSTANT_BASE: u16 = 0x8000;

/// Well-known strings baked into the consuming runtime, in its table order.
///
/// Constant ids are `STRING_CONSTANT_BASE` plus the string's byte offset
/// within this virtual heap.
static WELL_KNOWN: &[&str] = &[
    ".cctor",
    ".ctor",
    "Abs",
    "Add",
    "AddDays",
    "AddHours",
    "AddMilliseconds",
    "AddMinutes",
    "AddSeconds",
    "AddTicks",
    "Append",
    "Array",
    "Boolean",
    "Byte",
    "CanRead",
    "CanWrite",
    "Capacity",
    "Char",
    "Clear",
    "Close",
    "Collections",
    "Compare",
    "CompareTo",
    "Concat",
    "Contains",
    "Convert",
    "Copy",
    "CopyTo",
    "Count",
    "CurrentThread",
    "Date",
    "DateTime",
    "Day",
    "DayOfWeek",
    "Days",
    "Delegate",
    "Dequeue",
    "Diagnostics",
    "Dispose",
    "Double",
    "Empty",
    "Enqueue",
    "Enum",
    "Equals",
    "Exception",
    "Flush",
    "Format",
    "GetHashCode",
    "GetType",
    "Globalization",
    "Hour",
    "Hours",
    "IndexOf",
    "Insert",
    "Int16",
    "Int32",
    "Int64",
    "IsEmpty",
    "Join",
    "Length",
    "Math",
    "Max",
    "MaxValue",
    "Message",
    "Millisecond",
    "Milliseconds",
    "Min",
    "MinValue",
    "Minute",
    "Minutes",
    "Month",
    "Normalize",
    "Now",
    "Object",
    "Parse",
    "Peek",
    "Pop",
    "Push",
    "Queue",
    "Read",
    "ReadByte",
    "Reflection",
    "Remove",
    "Replace",
    "Resources",
    "Reverse",
    "Runtime",
    "SByte",
    "Second",
    "Seconds",
    "Seek",
    "Single",
    "Sleep",
    "Sort",
    "Split",
    "Stack",
    "Start",
    "String",
    "Substring",
    "System",
    "Text",
    "Threading",
    "Ticks",
    "TimeSpan",
    "ToArray",
    "ToLower",
    "ToString",
    "ToUpper",
    "Today",
    "Trim",
    "TrimEnd",
    "TrimStart",
    "TryParse",
    "Type",
    "UInt16",
    "UInt32",
    "UInt64",
    "UtcNow",
    "Value",
    "ValueType",
    "Write",
    "WriteByte",
    "WriteLine",
    "Year",
    "get_Length",
    "value__",
];

/// The string table of one output image.
pub struct StringTable {
    ids: FxHashMap<String, u16>,
    next_offset: u16,
    constants: FxHashMap<&'static str, u16>,
}

impl StringTable {
    /// Create a table with the empty string pre-interned at offset 0 and the
    /// constants map initialized.
    #[must_use]
    pub fn new() -> Self {
        let mut constants = FxHashMap::default();
        let mut offset = 0u32;
        for &value in WELL_KNOWN {
            constants.insert(value, STRING_CONSTANT_BASE + offset as u16);
            offset += value.len() as u32 + 1;
        }

        let mut table = StringTable {
            ids: FxHashMap::default(),
            next_offset: 0,
            constants,
        };
        table
            .get_or_create("", false)
            .expect("interning the empty string cannot overflow");
        table
    }

    /// Intern a string and return its identifier.
    ///
    /// With `use_constants` set, the well-known constants table is consulted
    /// first and a hit short-circuits the heap entirely.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexOverflow`] when the heap would cross the
    /// constants threshold.
    pub fn get_or_create(&mut self, value: &str, use_constants: bool) -> Result<u16> {
        if use_constants {
            if let Some(&id) = self.constants.get(value) {
                return Ok(id);
            }
        }

        if let Some(&id) = self.ids.get(value) {
            return Ok(id);
        }

        let id = self.next_offset;
        let entry_size = value.len() as u32 + 1;
        let next = u32::from(id) + entry_size;
        if next > u32::from(STRING_CONSTANT_BASE) {
            return Err(Error::IndexOverflow("strings"));
        }

        self.ids.insert(value.to_string(), id);
        self.next_offset = next as u16;
        Ok(id)
    }

    /// Identifier of an already-interned string.
    #[must_use]
    pub fn try_get_id(&self, value: &str) -> Option<u16> {
        self.ids.get(value).copied()
    }

    /// Constant-table identifier of a well-known string.
    #[must_use]
    pub fn constant_id(&self, value: &str) -> Option<u16> {
        self.constants.get(value).copied()
    }

    /// Reverse lookup of a heap identifier.
    ///
    /// Linear over the map, mirroring the source semantics.
    #[must_use]
    pub fn try_get_string(&self, id: u16) -> Option<&str> {
        self.ids
            .iter()
            .find(|(_, &stored)| stored == id)
            .map(|(value, _)| value.as_str())
    }

    /// Delete every entry whose id is not in the surviving set.
    ///
    /// The empty string survives unconditionally.
    pub fn remove_unused(&mut self, surviving: &FxHashSet<u16>) {
        self.ids
            .retain(|value, id| value.is_empty() || surviving.contains(id));
    }

    /// Entries sorted by identifier.
    #[must_use]
    pub fn entries(&self) -> Vec<(u16, &str)> {
        let mut entries: Vec<(u16, &str)> = self
            .ids
            .iter()
            .map(|(value, &id)| (id, value.as_str()))
            .collect();
        entries.sort_unstable_by_key(|&(id, _)| id);
        entries
    }

    /// Serialize the heap: entries in ascending id order, each as raw UTF-8
    /// followed by a single NUL byte.
    pub fn write(&self, out: &mut Vec<u8>) {
        for (_, value) in self.entries() {
            out.extend_from_slice(value.as_bytes());
            out.push(0);
        }
    }

    /// Number of interned heap strings (constants excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when only the empty string is interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.len() <= 1
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_offset_zero() {
        let table = StringTable::new();
        assert_eq!(table.try_get_id(""), Some(0));
    }

    #[test]
    fn ids_are_byte_offsets() {
        let mut table = StringTable::new();
        assert_eq!(table.get_or_create("A", false).unwrap(), 1);
        assert_eq!(table.get_or_create("AB", false).unwrap(), 3);

        let mut heap = Vec::new();
        table.write(&mut heap);
        assert_eq!(heap, [0x00, b'A', 0x00, b'A', b'B', 0x00]);
    }

    #[test]
    fn identical_strings_share_an_id() {
        let mut table = StringTable::new();
        let first = table.get_or_create("Sensor", false).unwrap();
        let second = table.get_or_create("Sensor", false).unwrap();
        assert_eq!(first, second);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn distinct_ids_hold_distinct_strings() {
        let mut table = StringTable::new();
        for value in ["alpha", "beta", "gamma", "alpha"] {
            table.get_or_create(value, false).unwrap();
        }
        let entries = table.entries();
        for (i, &(id_a, str_a)) in entries.iter().enumerate() {
            for &(id_b, str_b) in &entries[i + 1..] {
                assert_ne!(id_a, id_b);
                assert_ne!(str_a, str_b);
            }
        }
    }

    #[test]
    fn heap_round_trips_every_entry() {
        let mut table = StringTable::new();
        for value in ["Main", "Loop", "Sensor"] {
            table.get_or_create(value, false).unwrap();
        }

        let mut heap = Vec::new();
        table.write(&mut heap);
        for (id, value) in table.entries() {
            let start = id as usize;
            let end = start + value.len();
            assert_eq!(&heap[start..end], value.as_bytes());
            assert_eq!(heap[end], 0);
        }
    }

    #[test]
    fn constants_bypass_the_heap() {
        let mut table = StringTable::new();
        let id = table.get_or_create("ToString", true).unwrap();
        assert!(id >= STRING_CONSTANT_BASE);
        assert_eq!(table.try_get_id("ToString"), None);

        // Without the constants table the same string lands on the heap.
        let heap_id = table.get_or_create("ToString", false).unwrap();
        assert!(heap_id < STRING_CONSTANT_BASE);
    }

    #[test]
    fn remove_unused_keeps_surviving_ids() {
        let mut table = StringTable::new();
        let keep = table.get_or_create("keep", false).unwrap();
        let drop = table.get_or_create("drop", false).unwrap();

        let mut surviving = FxHashSet::default();
        surviving.insert(keep);
        table.remove_unused(&surviving);

        assert_eq!(table.try_get_id("keep"), Some(keep));
        assert_eq!(table.try_get_id("drop"), None);
        assert_eq!(table.try_get_string(drop), None);
        assert_eq!(table.try_get_id(""), Some(0));
    }

    #[test]
    fn reverse_lookup_finds_interned_strings() {
        let mut table = StringTable::new();
        let id = table.get_or_create("Blink", false).unwrap();
        assert_eq!(table.try_get_string(id), Some("Blink"));
        assert_eq!(table.try_get_string(0x7EEE), None);
    }
}
