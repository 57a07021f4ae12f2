//! picopdf - PDF cross-reference resolver, indirect-object store and
//! parser front-end
//!
//! The crate answers the central question of a PDF implementation: given a
//! byte offset or an indirect reference, produce the parsed object,
//! transparently following incremental updates, hybrid xref streams,
//! compressed object streams and encryption.
//!
//! # Modules
//!
//! - [`device`] - random-access byte sources (memory, memory-mapped file)
//! - [`lexer`] - tokenizer with the specialized number/string/name readers
//! - [`parser`] - recursive-descent value and indirect-object parser
//! - [`xref`] - sparse cross-reference entry table
//! - [`objstm`] - compressed object-stream decoder
//! - [`store`] - indirect-object store with free list, GC and observers
//! - [`crypt`] - encryption gate traits (the core implements no crypto)
//! - [`filter`] - filter pipeline boundary with the built-in Flate adapter
//! - [`document`] - parse front-end: xref discovery, revision walking,
//!   recovery, object loading
//!
//! # Example
//!
//! ```no_run
//! use picopdf::{parse, MemoryDevice, ParseOptions};
//!
//! let data = std::fs::read("example.pdf").unwrap();
//! let doc = parse(MemoryDevice::new(data), ParseOptions::default()).unwrap();
//! println!("version {}", doc.version());
//! if let Some(trailer) = doc.trailer() {
//!     println!("trailer keys: {}", trailer.len());
//! }
//! ```

pub mod crypt;
pub mod device;
pub mod document;
pub mod error;
pub mod filter;
pub mod lexer;
pub mod object;
pub mod objstm;
pub mod parser;
pub mod store;
pub mod xref;

pub use crypt::{AuthResult, Authenticator, Decryptor, EncryptSession};
pub use device::{Device, FileDevice, MemoryDevice};
pub use document::{parse, ParseOptions, ParsedDoc, PdfParser, PdfVersion};
pub use error::{Error, ErrorKind, Result};
pub use filter::{FilterPipeline, FlatePipeline};
pub use object::{
    Array, Dict, Indirect, Name, Object, PdfString, Ref, StreamBody, StreamData, StringEncoding,
    MAX_GENERATION,
};
pub use store::{ObjectStore, StoreObserver};
pub use xref::{XrefEntry, XrefTable};
