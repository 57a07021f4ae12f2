//! Encryption gate
//!
//! The core never implements cryptography. When a trailer carries an
//! `/Encrypt` dictionary, the parser hands it to an [`Authenticator`]
//! supplied through the parse options and receives an [`EncryptSession`].
//! The session authenticates the password and produces a per-object
//! [`Decryptor`] that the value parser applies to strings and stream
//! bodies. The encryption dictionary itself and xref streams are always
//! parsed unencrypted.

use crate::error::Result;
use crate::object::{Dict, Ref};

/// Outcome of a password check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    /// The owner password matched
    Owner,
    /// The user password matched
    User,
    /// Neither password matched
    Failed,
}

/// Decrypts the payload of one indirect object
pub trait Decryptor {
    /// Decrypt a string or stream body belonging to the wrapped object.
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// A live encryption session for one document
pub trait EncryptSession {
    /// Check a password against the encryption dictionary. May be called
    /// repeatedly until it succeeds.
    fn authenticate(&mut self, password: &[u8], doc_id: &[u8]) -> Result<AuthResult>;

    /// Produce a decryptor for the object identified by `id`.
    fn decryptor_for(&self, id: Ref) -> Result<Box<dyn Decryptor>>;
}

/// Factory turning an `/Encrypt` dictionary into a session
pub trait Authenticator {
    /// Open a session for the given encryption dictionary. `doc_id` is the
    /// first element of the trailer `/ID` array.
    fn open_session(&self, encrypt: &Dict, doc_id: &[u8]) -> Result<Box<dyn EncryptSession>>;
}
