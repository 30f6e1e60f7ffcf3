//! Striped per-path locks.
//!
//! Placeholder writes, updates, deletes, and notifications for one path are
//! serialized by the stripe its hash selects. Unrelated paths only contend
//! when they share a stripe.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::{Mutex, MutexGuard};

pub const DEFAULT_STRIPES: usize = 64;

pub struct PathLocks {
    stripes: Vec<Mutex<()>>,
}

impl PathLocks {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, path: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    pub fn lock(&self, path: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe(path)].lock()
    }

    /// Locks two paths in stripe order. One guard when they share a stripe.
    pub fn lock_pair(&self, a: &str, b: &str) -> Vec<MutexGuard<'_, ()>> {
        let (x, y) = (self.stripe(a), self.stripe(b));
        if x == y {
            return vec![self.stripes[x].lock()];
        }
        let (first, second) = if x < y { (x, y) } else { (y, x) };
        vec![self.stripes[first].lock(), self.stripes[second].lock()]
    }
}

impl Default for PathLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
