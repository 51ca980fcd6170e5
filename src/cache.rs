use std::sync::{Arc, Mutex};

/// A compute-once cell with explicit invalidation.
///
/// `get` runs the supplier at most once per generation: the lock is held for
/// the duration of the computation, so concurrent first-time callers block
/// and then share the same `Arc` result. `forget` discards the cached value;
/// the next `get` recomputes.
pub struct MemoizingSupplier<T> {
    supplier: Box<dyn Fn() -> T + Send + Sync>,
    cell: Mutex<Option<Arc<T>>>,
}

impl<T> MemoizingSupplier<T> {
    pub fn new(supplier: impl Fn() -> T + Send + Sync + 'static) -> Self {
        MemoizingSupplier {
            supplier: Box::new(supplier),
            cell: Mutex::new(None),
        }
    }

    pub fn get(&self) -> Arc<T> {
        let mut cell = self.cell.lock().expect("memoizing supplier lock");
        if let Some(value) = cell.as_ref() {
            return Arc::clone(value);
        }
        let value = Arc::new((self.supplier)());
        *cell = Some(Arc::clone(&value));
        value
    }

    /// Discard the memoized value, forcing the next `get` to recompute.
    pub fn forget(&self) {
        *self.cell.lock().expect("memoizing supplier lock") = None;
    }

    pub fn is_computed(&self) -> bool {
        self.cell.lock().expect("memoizing supplier lock").is_some()
    }
}
