//! PDF object model
//!
//! The tagged value union, interned names, byte strings, indirect
//! references and the composite indirect-object record held by the store.

use indexmap::IndexMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Highest possible generation number. An object number whose generation
/// reaches this value is terminal and never reused.
pub const MAX_GENERATION: u16 = 65535;

// ============================================================================
// Interned names
// ============================================================================

/// Interned PDF name with shared storage
///
/// Names repeat heavily in PDF files (`Type`, `Length`, `Size`, ...), so the
/// common ones share a single `Arc<str>` allocation and compare by pointer
/// on the fast path.
#[derive(Debug, Clone, Eq)]
pub struct Name(Arc<str>);

/// Names pre-interned for the structures the core navigates
static COMMON_NAMES: LazyLock<Vec<(&'static str, Arc<str>)>> = LazyLock::new(|| {
    [
        // Stream dictionaries
        "Type", "Subtype", "Length", "Filter", "DecodeParms",
        // Trailer
        "Size", "Root", "Encrypt", "Info", "ID", "Prev", "XRefStm",
        // Xref streams
        "XRef", "W", "Index",
        // Object streams
        "ObjStm", "N", "First", "Extends",
        // Catalog
        "Catalog", "Version", "Pages", "Page", "Kids", "Parent", "Count", "Contents",
        // Flate parameters
        "FlateDecode", "Predictor", "Columns", "Colors", "BitsPerComponent",
        // Exempt from decryption
        "Metadata",
    ]
    .iter()
    .map(|s| (*s, Arc::from(*s)))
    .collect()
});

impl Name {
    /// Create a name, sharing storage with the pre-interned set when possible.
    pub fn new(s: &str) -> Self {
        if let Some(interned) = Self::get_interned(s) {
            return interned;
        }
        Self(Arc::from(s))
    }

    /// Create from an owned string.
    pub fn from_string(s: String) -> Self {
        if let Some(interned) = Self::get_interned(&s) {
            return interned;
        }
        Self(Arc::from(s))
    }

    /// The name text, without the leading slash.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn get_interned(s: &str) -> Option<Self> {
        COMMON_NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, arc)| Self(Arc::clone(arc)))
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.as_ref() == other.0.as_ref()
    }
}

impl std::hash::Hash for Name {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.as_ref().hash(state);
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl indexmap::Equivalent<Name> for str {
    fn equivalent(&self, key: &Name) -> bool {
        key.as_str() == self
    }
}

// ============================================================================
// Strings
// ============================================================================

/// Source notation of a PDF string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEncoding {
    /// `( ... )` literal string
    Literal,
    /// `< ... >` hexadecimal string
    Hex,
}

/// A PDF string: raw bytes plus the notation it was written in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfString {
    bytes: Vec<u8>,
    encoding: StringEncoding,
}

impl PdfString {
    pub fn new(bytes: Vec<u8>, encoding: StringEncoding) -> Self {
        Self { bytes, encoding }
    }

    pub fn literal(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes.into(), StringEncoding::Literal)
    }

    pub fn hex(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes.into(), StringEncoding::Hex)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn encoding(&self) -> StringEncoding {
        self.encoding
    }

    /// The bytes as UTF-8 text, when they happen to be valid.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

// ============================================================================
// References
// ============================================================================

/// Indirect object identifier `(object number, generation number)`
///
/// Ordering is lexicographic on the pair; `(0, 65535)` heads the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ref {
    pub num: u32,
    pub gen: u16,
}

impl Ref {
    pub fn new(num: u32, gen: u16) -> Self {
        Self { num, gen }
    }

    /// Head of the cross-reference free list.
    pub fn free_head() -> Self {
        Self::new(0, MAX_GENERATION)
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.num, self.gen)
    }
}

// ============================================================================
// Values
// ============================================================================

/// Ordered dictionary: unique name keys, iteration order = insertion order
pub type Dict = IndexMap<Name, Object>;

/// PDF array, preserving insertion order
pub type Array = Vec<Object>;

/// The PDF value union
#[derive(Debug, Clone, Default)]
pub enum Object {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Name(Name),
    String(PdfString),
    Array(Array),
    Dict(Dict),
    Reference(Ref),
    /// Opaque content-stream payload; never produced by the front-end parser.
    Raw(Vec<u8>),
}

impl Object {
    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Object::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Object::Real(r) => Some(*r),
            Object::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&Name> {
        match self {
            Object::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&PdfString> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Object::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Object::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut Dict> {
        match self {
            Object::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<Ref> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }
}

// ============================================================================
// Streams and indirect objects
// ============================================================================

/// Body of a stream object
///
/// The transition `Pending -> Owned` is monotonic and happens on first read
/// (demand loading) or when a caller replaces the data.
#[derive(Debug, Clone)]
pub enum StreamBody {
    /// Byte range `[begin, end)` in the source device; `end` is unresolved
    /// while `/Length` is an indirect reference that has not been followed.
    Pending { begin: u64, end: Option<u64> },
    /// Fully materialized body bytes (still filtered, already decrypted).
    Owned(Vec<u8>),
}

/// Stream attached to an indirect object. The header is the owning
/// dictionary of the object itself.
#[derive(Debug, Clone)]
pub struct StreamData {
    body: StreamBody,
}

impl StreamData {
    pub fn pending(begin: u64, end: Option<u64>) -> Self {
        Self {
            body: StreamBody::Pending { begin, end },
        }
    }

    pub fn owned(data: Vec<u8>) -> Self {
        Self {
            body: StreamBody::Owned(data),
        }
    }

    pub fn body(&self) -> &StreamBody {
        &self.body
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.body, StreamBody::Owned(_))
    }

    /// The loaded bytes, `None` while the body is still pending.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.body {
            StreamBody::Owned(data) => Some(data),
            StreamBody::Pending { .. } => None,
        }
    }

    /// Replace the body with owned bytes.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.body = StreamBody::Owned(data);
    }
}

/// An indirect object as held by the store
#[derive(Debug, Clone)]
pub struct Indirect {
    id: Ref,
    pub value: Object,
    pub stream: Option<StreamData>,
    dirty: bool,
}

impl Indirect {
    pub fn new(id: Ref, value: Object) -> Self {
        Self {
            id,
            value,
            stream: None,
            dirty: false,
        }
    }

    pub fn with_stream(id: Ref, value: Object, stream: StreamData) -> Self {
        Self {
            id,
            value,
            stream: Some(stream),
            dirty: false,
        }
    }

    pub fn id(&self) -> Ref {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: Ref) {
        self.id = id;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// The object's dictionary, when it has one.
    pub fn dict(&self) -> Option<&Dict> {
        self.value.as_dict()
    }

    pub fn dict_mut(&mut self) -> Option<&mut Dict> {
        self.value.as_dict_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_interning() {
        let n1 = Name::new("Size");
        let n2 = Name::new("Size");
        assert!(Arc::ptr_eq(&n1.0, &n2.0));
        assert_eq!(n1, n2);
    }

    #[test]
    fn test_name_uncommon() {
        let n1 = Name::new("MyCustomKey");
        let n2 = Name::new("MyCustomKey");
        assert!(!Arc::ptr_eq(&n1.0, &n2.0));
        assert_eq!(n1, n2);
    }

    #[test]
    fn test_name_display() {
        assert_eq!(format!("{}", Name::new("Root")), "/Root");
    }

    #[test]
    fn test_dict_str_lookup() {
        let mut dict = Dict::new();
        dict.insert(Name::new("Size"), Object::Int(4));
        assert_eq!(dict.get("Size").and_then(Object::as_int), Some(4));
        assert!(dict.get("Missing").is_none());
    }

    #[test]
    fn test_dict_insertion_order() {
        let mut dict = Dict::new();
        dict.insert(Name::new("Zebra"), Object::Int(1));
        dict.insert(Name::new("Alpha"), Object::Int(2));
        dict.insert(Name::new("Mid"), Object::Int(3));
        let keys: Vec<&str> = dict.keys().map(Name::as_str).collect();
        assert_eq!(keys, ["Zebra", "Alpha", "Mid"]);
    }

    #[test]
    fn test_ref_ordering() {
        assert!(Ref::new(1, 0) < Ref::new(2, 0));
        assert!(Ref::new(2, 0) < Ref::new(2, 1));
        assert_eq!(Ref::free_head(), Ref::new(0, MAX_GENERATION));
    }

    #[test]
    fn test_object_accessors() {
        assert_eq!(Object::Int(7).as_int(), Some(7));
        assert_eq!(Object::Int(7).as_real(), Some(7.0));
        assert_eq!(Object::Real(1.5).as_real(), Some(1.5));
        assert_eq!(Object::Real(1.5).as_int(), None);
        assert!(Object::Null.is_null());
        assert_eq!(
            Object::Reference(Ref::new(3, 0)).as_reference(),
            Some(Ref::new(3, 0))
        );
    }

    #[test]
    fn test_pdf_string_encoding() {
        let s = PdfString::hex(b"\xca\xfe".to_vec());
        assert_eq!(s.encoding(), StringEncoding::Hex);
        assert_eq!(s.as_bytes(), b"\xca\xfe");
        assert_eq!(s.as_str(), None);

        let t = PdfString::literal(b"plain".to_vec());
        assert_eq!(t.as_str(), Some("plain"));
    }

    #[test]
    fn test_stream_body_transition() {
        let mut stream = StreamData::pending(100, Some(150));
        assert!(!stream.is_loaded());
        assert_eq!(stream.data(), None);
        stream.set_data(b"abc".to_vec());
        assert!(stream.is_loaded());
        assert_eq!(stream.data(), Some(&b"abc"[..]));
    }

    #[test]
    fn test_indirect_dirty() {
        let mut obj = Indirect::new(Ref::new(5, 0), Object::Int(9));
        assert!(!obj.is_dirty());
        obj.mark_dirty();
        assert!(obj.is_dirty());
    }
}
