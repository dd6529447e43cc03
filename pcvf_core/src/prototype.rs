use crate::buffer::{SourceBuffer, ValueKind};
use crate::error::{Error, Result};

/// Type of one terminal field in a record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// Integer constrained to `[min, max]`; stored bit-packed using the
    /// minimal width for the range.
    Integer { min: i64, max: i64 },
    /// Real value quantized to `raw = round((value - offset) / scale)` with
    /// `raw` constrained to `[min, max]`, stored like `Integer`.
    ScaledInteger {
        min: i64,
        max: i64,
        scale: f64,
        offset: f64,
    },
    /// IEEE-754 single (or double when `double`) stored verbatim.
    Float { double: bool },
    /// UTF-8 string, length-prefixed.
    String,
}

impl FieldType {
    /// The caller-side value kind a buffer for this field must carry.
    pub fn value_kind(&self) -> ValueKind {
        match self {
            FieldType::Integer { .. } => ValueKind::Integer,
            FieldType::ScaledInteger { .. } | FieldType::Float { .. } => ValueKind::Real,
            FieldType::String => ValueKind::Str,
        }
    }
}

/// One node of the prototype tree: a terminal field or a named structure
/// grouping children.
#[derive(Debug, Clone)]
pub enum ProtoNode {
    Terminal { name: String, field: FieldType },
    Structure { name: String, children: Vec<ProtoNode> },
}

impl ProtoNode {
    pub fn integer(name: &str, min: i64, max: i64) -> Self {
        ProtoNode::Terminal {
            name: name.into(),
            field: FieldType::Integer { min, max },
        }
    }

    pub fn scaled_integer(name: &str, min: i64, max: i64, scale: f64, offset: f64) -> Self {
        ProtoNode::Terminal {
            name: name.into(),
            field: FieldType::ScaledInteger {
                min,
                max,
                scale,
                offset,
            },
        }
    }

    pub fn float(name: &str) -> Self {
        ProtoNode::Terminal {
            name: name.into(),
            field: FieldType::Float { double: false },
        }
    }

    pub fn double(name: &str) -> Self {
        ProtoNode::Terminal {
            name: name.into(),
            field: FieldType::Float { double: true },
        }
    }

    pub fn string(name: &str) -> Self {
        ProtoNode::Terminal {
            name: name.into(),
            field: FieldType::String,
        }
    }

    pub fn structure(name: &str, children: Vec<ProtoNode>) -> Self {
        ProtoNode::Structure {
            name: name.into(),
            children,
        }
    }
}

/// Result of resolving a path against the prototype.
#[derive(Debug)]
pub enum PathResolution<'a> {
    /// Terminal field: its bytestream number and type.
    Terminal(usize, &'a FieldType),
    /// The path names a structure node, not a field.
    Structure,
    /// No node with this path.
    Unknown,
}

/// Schema of one record: a tree of named fields.
///
/// Terminal fields are numbered by depth-first traversal order; that number
/// is the field's **bytestream number** and fixes the order of streams
/// inside every data packet. Paths are `/`-separated, e.g. `"cartesianX"`
/// or `"color/red"`.
#[derive(Debug, Clone)]
pub struct Prototype {
    roots: Vec<ProtoNode>,
    /// `(full path, field)` for every terminal, in depth-first order.
    terminals: Vec<(String, FieldType)>,
}

impl Prototype {
    pub fn new(roots: Vec<ProtoNode>) -> Self {
        let mut terminals = Vec::new();
        collect_terminals(&roots, "", &mut terminals);
        Self { roots, terminals }
    }

    /// Number of terminal fields, i.e. the number of bytestreams.
    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    /// `(path, field)` of every terminal in bytestream order.
    pub fn terminals(&self) -> &[(String, FieldType)] {
        &self.terminals
    }

    pub fn roots(&self) -> &[ProtoNode] {
        &self.roots
    }

    /// Resolve a path to a terminal bytestream number, a structure node, or
    /// nothing.
    pub fn resolve(&self, path: &str) -> PathResolution<'_> {
        if let Some(idx) = self.terminals.iter().position(|(p, _)| p == path) {
            return PathResolution::Terminal(idx, &self.terminals[idx].1);
        }
        if self
            .terminals
            .iter()
            .any(|(p, _)| p.len() > path.len() && p.starts_with(path) && p.as_bytes()[path.len()] == b'/')
        {
            return PathResolution::Structure;
        }
        PathResolution::Unknown
    }

    /// Bytestream number of the terminal at `path`, if any.
    pub fn terminal_position(&self, path: &str) -> Option<usize> {
        match self.resolve(path) {
            PathResolution::Terminal(idx, _) => Some(idx),
            _ => None,
        }
    }

    /// Field type of the terminal at `path`, if any.
    pub fn field(&self, path: &str) -> Option<&FieldType> {
        match self.resolve(path) {
            PathResolution::Terminal(_, field) => Some(field),
            _ => None,
        }
    }

    /// Validate a caller-supplied buffer set: every terminal field must
    /// appear exactly once (no duplicates, no missing, no extras) and each
    /// buffer's value kind must match its field's type.
    pub fn check_buffers(&self, buffers: &[SourceBuffer]) -> Result<()> {
        let mut seen = vec![false; self.terminals.len()];
        for buf in buffers {
            let idx = match self.resolve(buf.path()) {
                PathResolution::Terminal(idx, field) => {
                    if field.value_kind() != buf.kind() {
                        return Err(Error::BuffersNotCompatible(format!(
                            "buffer for '{}' holds {:?} values but the field wants {:?}",
                            buf.path(),
                            buf.kind(),
                            field.value_kind()
                        )));
                    }
                    idx
                }
                PathResolution::Structure => {
                    return Err(Error::Internal(format!(
                        "path '{}' names a structure, not a terminal field",
                        buf.path()
                    )));
                }
                PathResolution::Unknown => {
                    return Err(Error::BuffersNotCompatible(format!(
                        "path '{}' does not exist in the prototype",
                        buf.path()
                    )));
                }
            };
            if seen[idx] {
                return Err(Error::BuffersNotCompatible(format!(
                    "duplicate buffer for '{}'",
                    buf.path()
                )));
            }
            seen[idx] = true;
        }
        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(Error::BuffersNotCompatible(format!(
                "no buffer supplied for '{}'",
                self.terminals[missing].0
            )));
        }
        Ok(())
    }
}

fn collect_terminals(nodes: &[ProtoNode], prefix: &str, out: &mut Vec<(String, FieldType)>) {
    for node in nodes {
        match node {
            ProtoNode::Terminal { name, field } => {
                out.push((join_path(prefix, name), field.clone()));
            }
            ProtoNode::Structure { name, children } => {
                collect_terminals(children, &join_path(prefix, name), out);
            }
        }
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}
