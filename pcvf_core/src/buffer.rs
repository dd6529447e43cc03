use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, Result};

/// Kind of values a buffer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Real,
    Str,
}

/// The caller-owned column of one field.
#[derive(Debug, Clone)]
pub enum BufferValues {
    Integer(Vec<i64>),
    Real(Vec<f64>),
    Str(Vec<String>),
}

impl BufferValues {
    pub fn kind(&self) -> ValueKind {
        match self {
            BufferValues::Integer(_) => ValueKind::Integer,
            BufferValues::Real(_) => ValueKind::Real,
            BufferValues::Str(_) => ValueKind::Str,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BufferValues::Integer(v) => v.len(),
            BufferValues::Real(v) => v.len(),
            BufferValues::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct BufferData {
    values: BufferValues,
    pos: usize,
}

/// A caller-supplied column of field values, bound to a prototype path.
///
/// The handle is cheaply cloneable: the writer's encoders and the caller
/// share the same underlying column, so the caller can [`refill`] it
/// between `write` calls without rebinding. The whole write pipeline is
/// single-threaded by contract, hence `Rc<RefCell<…>>` rather than a
/// thread-safe wrapper.
///
/// [`refill`]: SourceBuffer::refill
#[derive(Debug, Clone)]
pub struct SourceBuffer {
    path: String,
    data: Rc<RefCell<BufferData>>,
}

impl SourceBuffer {
    fn new(path: &str, values: BufferValues) -> Self {
        Self {
            path: path.into(),
            data: Rc::new(RefCell::new(BufferData { values, pos: 0 })),
        }
    }

    pub fn integers(path: &str, values: Vec<i64>) -> Self {
        Self::new(path, BufferValues::Integer(values))
    }

    pub fn reals(path: &str, values: Vec<f64>) -> Self {
        Self::new(path, BufferValues::Real(values))
    }

    pub fn strings(path: &str, values: Vec<String>) -> Self {
        Self::new(path, BufferValues::Str(values))
    }

    /// Prototype path this buffer is bound to.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> ValueKind {
        self.data.borrow().values.kind()
    }

    /// Number of values currently held.
    pub fn capacity(&self) -> usize {
        self.data.borrow().values.len()
    }

    /// Reset the read position to the first value.
    pub fn rewind(&self) {
        self.data.borrow_mut().pos = 0;
    }

    /// Replace the column contents with fresh values of the same kind and
    /// rewind. Changing the value kind is a compatibility error.
    pub fn refill(&self, values: BufferValues) -> Result<()> {
        let mut data = self.data.borrow_mut();
        if data.values.kind() != values.kind() {
            return Err(Error::BuffersNotCompatible(format!(
                "refill of '{}' changes value kind from {:?} to {:?}",
                self.path,
                data.values.kind(),
                values.kind()
            )));
        }
        data.values = values;
        data.pos = 0;
        Ok(())
    }

    /// Pairwise compatibility test used when a writer is re-bound to a new
    /// buffer set: same path, same value kind.
    pub fn check_compatible(&self, other: &SourceBuffer) -> Result<()> {
        if self.path != other.path {
            return Err(Error::BuffersNotCompatible(format!(
                "buffer path changed from '{}' to '{}'",
                self.path, other.path
            )));
        }
        if self.kind() != other.kind() {
            return Err(Error::BuffersNotCompatible(format!(
                "buffer '{}' changed value kind from {:?} to {:?}",
                self.path,
                self.kind(),
                other.kind()
            )));
        }
        Ok(())
    }

    /// Adopt the contents of a compatible replacement buffer, so encoders
    /// bound to this handle observe the new values.
    pub(crate) fn adopt(&self, other: &SourceBuffer) -> Result<()> {
        self.check_compatible(other)?;
        if Rc::ptr_eq(&self.data, &other.data) {
            return Ok(());
        }
        let mut data = self.data.borrow_mut();
        data.values = other.data.borrow().values.clone();
        data.pos = 0;
        Ok(())
    }

    // ── encoder-side cursors ───────────────────────────────────────────────
    //
    // Used by the per-field encoders; each advances the shared read
    // position by one value. `None` means the column is exhausted.

    pub fn next_integer(&self) -> Option<i64> {
        let mut data = self.data.borrow_mut();
        let BufferData { values, pos } = &mut *data;
        match values {
            BufferValues::Integer(v) => v.get(*pos).copied().map(|value| {
                *pos += 1;
                value
            }),
            _ => None,
        }
    }

    pub fn next_real(&self) -> Option<f64> {
        let mut data = self.data.borrow_mut();
        let BufferData { values, pos } = &mut *data;
        match values {
            BufferValues::Real(v) => v.get(*pos).copied().map(|value| {
                *pos += 1;
                value
            }),
            _ => None,
        }
    }

    pub fn next_str(&self) -> Option<String> {
        let mut data = self.data.borrow_mut();
        let BufferData { values, pos } = &mut *data;
        match values {
            BufferValues::Str(v) => v.get(*pos).cloned().map(|value| {
                *pos += 1;
                value
            }),
            _ => None,
        }
    }
}
