//! The editable view of one live method body.
//!
//! [`MethodView::open`] reads a body from a [`MethodHost`], keeps the exact bytes it
//! read, and decodes them once into an [`InstructionSequence`]. Edits happen on the
//! sequence. [`MethodView::commit`] encodes and installs the result; nothing reaches
//! the host unless encoding succeeds. [`restore`] puts a saved body back.

use crate::{
    assembly::{decoder::decode_body, encoder::encode_body, sequence::InstructionSequence},
    config::SessionConfig,
    host::{MemberResolver, MethodHost, MethodRef},
    metadata::{body::MethodBody, member::MethodSignature},
    Error, Result,
};

/// A decoded method body open for editing.
#[derive(Debug, Clone)]
pub struct MethodView {
    method: MethodRef,
    original: Vec<u8>,
    header: MethodBody,
    sequence: InstructionSequence,
}

impl MethodView {
    /// Read and decode the live body of `method`.
    ///
    /// # Errors
    /// Returns [`Error::MethodNotFound`] if the host does not know the method and
    /// [`Error::Decode`] if the body cannot be decoded.
    pub fn open(host: &dyn MethodHost, method: &MethodRef) -> Result<Self> {
        let original = host.read_body(method)?;
        let signature = host.signature(method)?;
        let view = Self::from_bytes(method.clone(), original, signature)?;

        log::debug!(
            "opened {} ({} instructions, {} bytes)",
            method,
            view.sequence.len(),
            view.original.len()
        );
        Ok(view)
    }

    /// Decode `bytes` as the body of `method` without going through a host.
    ///
    /// # Errors
    /// Returns [`Error::Decode`] if the body cannot be decoded.
    pub fn from_bytes(method: MethodRef, bytes: Vec<u8>, signature: MethodSignature) -> Result<Self> {
        let (header, sequence) = decode_body(&bytes, signature)?;
        Ok(MethodView {
            method,
            original: bytes,
            header,
            sequence,
        })
    }

    /// The method this view edits
    #[must_use]
    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    /// The body exactly as it was read
    #[must_use]
    pub fn original(&self) -> &[u8] {
        &self.original
    }

    /// The parsed header of the original body
    #[must_use]
    pub fn header(&self) -> &MethodBody {
        &self.header
    }

    /// The instructions being edited
    #[must_use]
    pub fn sequence(&self) -> &InstructionSequence {
        &self.sequence
    }

    /// The instructions being edited, mutably
    pub fn sequence_mut(&mut self) -> &mut InstructionSequence {
        &mut self.sequence
    }

    /// Encode the current sequence into a complete body without installing it.
    ///
    /// # Errors
    /// Returns [`Error::Encode`] if the sequence fails validation.
    pub fn encode<R: MemberResolver + ?Sized>(&self, resolver: &R, config: &SessionConfig) -> Result<Vec<u8>> {
        let (_, bytes) = encode_body(&self.sequence, &self.header, resolver, config)?;
        Ok(bytes)
    }

    /// Encode the sequence and install it as the live body, consuming the view.
    ///
    /// Returns the bytes that were installed.
    ///
    /// # Errors
    /// Returns [`Error::Encode`] if the sequence fails validation, in which case the
    /// host is not touched, or whatever the host reports while writing.
    pub fn commit(self, host: &dyn MethodHost, config: &SessionConfig) -> Result<Vec<u8>> {
        let bytes = self.encode(host, config)?;
        host.write_body(&self.method, &bytes)?;
        log::debug!(
            "committed {} ({} -> {} bytes)",
            self.method,
            self.original.len(),
            bytes.len()
        );
        Ok(bytes)
    }
}

/// Reinstall `original` as the body of `method`.
///
/// With `verify` set, the body is read back and compared byte for byte.
///
/// # Errors
/// Every failure is reported as [`Error::Restore`]; the host is then in an unknown
/// state and the caller should treat it as fatal.
pub fn restore(host: &dyn MethodHost, method: &MethodRef, original: &[u8], verify: bool) -> Result<()> {
    host.write_body(method, original).map_err(|err| Error::Restore {
        method: method.clone(),
        message: err.to_string(),
    })?;

    if verify {
        let current = host.read_body(method).map_err(|err| Error::Restore {
            method: method.clone(),
            message: err.to_string(),
        })?;
        if current != original {
            return Err(Error::Restore {
                method: method.clone(),
                message: format!(
                    "body read back after restore differs ({} bytes, expected {})",
                    current.len(),
                    original.len()
                ),
            });
        }
    }

    log::debug!("restored {}", method);
    Ok(())
}
