//! String interning: maps strings to dense 64-bit ids.
//!
//! The table itself is a mutex-guarded map; the `String` dictionary event
//! announcing a fresh id is written by the encoder *after* the lock is
//! released, so buffer rotation during the write can never re-enter the
//! table.

use std::collections::HashMap;
use std::sync::Mutex;

struct Inner {
    map: HashMap<String, u64>,
    seq: u64,
}

pub(crate) struct StringTable {
    inner: Mutex<Inner>,
}

impl StringTable {
    pub(crate) fn new() -> StringTable {
        StringTable {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                seq: 0,
            }),
        }
    }

    /// Return the id for `s` and whether it was newly assigned. Id 0 is
    /// reserved for the empty string and never stored here.
    pub(crate) fn lookup_or_insert(&self, s: &str) -> (u64, bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&id) = inner.map.get(s) {
            return (id, false);
        }
        inner.seq += 1;
        let id = inner.seq;
        inner.map.insert(s.to_string(), id);
        (id, true)
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.clear();
        inner.seq = 0;
    }
}
