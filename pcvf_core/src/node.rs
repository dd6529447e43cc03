use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::file::PagedFile;
use crate::prototype::Prototype;

/// A compressed-vector node: binds a record prototype to a destination file
/// and, after its writer closes, records where the binary section landed.
///
/// The writer holds the node; the node holds the destination file. The file
/// tracks live writers only as a counter, never as a reference.
pub struct CompressedVectorNode {
    prototype: Prototype,
    file: Rc<RefCell<PagedFile>>,
    record_count: Cell<u64>,
    section_logical_start: Cell<u64>,
    written: Cell<bool>,
}

impl CompressedVectorNode {
    pub fn new(prototype: Prototype, file: Rc<RefCell<PagedFile>>) -> Rc<Self> {
        Rc::new(Self {
            prototype,
            file,
            record_count: Cell::new(0),
            section_logical_start: Cell::new(0),
            written: Cell::new(false),
        })
    }

    pub fn prototype(&self) -> &Prototype {
        &self.prototype
    }

    pub fn file(&self) -> &Rc<RefCell<PagedFile>> {
        &self.file
    }

    /// Total records in the written section. Zero until the writer closes.
    pub fn record_count(&self) -> u64 {
        self.record_count.get()
    }

    /// Logical offset of the section header. Zero until the writer closes.
    pub fn binary_section_logical_start(&self) -> u64 {
        self.section_logical_start.get()
    }

    /// Whether a writer has already written this node's section. A node can
    /// be written exactly once.
    pub fn is_written(&self) -> bool {
        self.written.get()
    }

    pub(crate) fn mark_written(&self, record_count: u64, section_logical_start: u64) {
        self.record_count.set(record_count);
        self.section_logical_start.set(section_logical_start);
        self.written.set(true);
        self.file
            .borrow_mut()
            .set_section_info(section_logical_start, record_count);
    }
}
