//! An in-memory [`MethodHost`].
//!
//! `Image` stores method bodies and member descriptors in concurrent maps and hands
//! out tokens from per-table row counters, the same way a metadata loader numbers the
//! rows of its tables. It backs the tests and the demo, and is a reasonable starting
//! point for embedding the engine in a host that keeps its own method table.
//!
//! # Thread Safety
//!
//! All collections are `DashMap`s and all counters atomics, so an `Image` can be
//! shared behind an `Arc` and patched from several threads at once.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::{
    host::{ExternalRoutine, MemberResolver, MethodHost, MethodRef},
    metadata::{
        member::{FieldDesc, Member, MethodDesc, MethodSignature},
        token::Token,
    },
    Error, Result,
};

#[derive(Debug, Clone)]
struct MethodEntry {
    body: Vec<u8>,
    signature: MethodSignature,
}

/// In-memory method and member tables.
#[derive(Debug, Default)]
pub struct Image {
    methods: DashMap<MethodRef, MethodEntry>,
    members: DashMap<Token, Member>,
    imports: DashMap<ExternalRoutine, Token>,
    field_rows: AtomicU32,
    method_rows: AtomicU32,
    member_ref_rows: AtomicU32,
    writes: AtomicUsize,
}

impl Image {
    /// An empty image
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_token(counter: &AtomicU32, table: u8) -> Token {
        Token::from_parts(table, counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Register a field and return its `Field` token
    pub fn add_field(&self, field: FieldDesc) -> Token {
        let token = Self::next_token(&self.field_rows, Token::FIELD);
        self.members.insert(token, Member::Field(field));
        token
    }

    /// Register a method defined elsewhere and return its `MemberRef` token
    pub fn add_method_ref(&self, method: MethodDesc) -> Token {
        let token = Self::next_token(&self.member_ref_rows, Token::MEMBER_REF);
        self.members.insert(token, Member::Method(method));
        token
    }

    /// Define a method with a body and return its `MethodDef` token.
    ///
    /// The method is callable from other bodies through the returned token. Defining
    /// the same method again replaces its body and signature.
    pub fn define_method(&self, method: MethodRef, signature: MethodSignature, body: Vec<u8>) -> Token {
        let token = Self::next_token(&self.method_rows, Token::METHOD_DEF);
        let desc = MethodDesc {
            declaring_type: method.type_name.clone(),
            name: method.method_name.clone(),
            has_this: signature.has_this,
            params: signature.params,
            returns: signature.returns,
        };
        self.members.insert(token, Member::Method(desc));
        self.methods.insert(method, MethodEntry { body, signature });
        token
    }

    /// Returns true if `method` has a body in this image
    #[must_use]
    pub fn contains(&self, method: &MethodRef) -> bool {
        self.methods.contains_key(method)
    }

    /// Number of external routines imported so far
    #[must_use]
    pub fn import_count(&self) -> usize {
        self.imports.len()
    }

    /// Number of successful [`MethodHost::write_body`] calls so far
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl MemberResolver for Image {
    fn resolve(&self, token: Token) -> Option<Member> {
        self.members.get(&token).map(|member| member.clone())
    }
}

impl MethodHost for Image {
    fn read_body(&self, method: &MethodRef) -> Result<Vec<u8>> {
        self.methods
            .get(method)
            .map(|entry| entry.body.clone())
            .ok_or_else(|| Error::MethodNotFound(method.clone()))
    }

    fn write_body(&self, method: &MethodRef, body: &[u8]) -> Result<()> {
        let mut entry = self
            .methods
            .get_mut(method)
            .ok_or_else(|| Error::MethodNotFound(method.clone()))?;
        entry.body = body.to_vec();
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn signature(&self, method: &MethodRef) -> Result<MethodSignature> {
        self.methods
            .get(method)
            .map(|entry| entry.signature)
            .ok_or_else(|| Error::MethodNotFound(method.clone()))
    }

    fn import_routine(&self, routine: &ExternalRoutine) -> Result<Token> {
        let token = *self.imports.entry(routine.clone()).or_insert_with(|| {
            let token = Self::next_token(&self.member_ref_rows, Token::MEMBER_REF);
            self.members.insert(
                token,
                Member::Method(MethodDesc::of_static(
                    routine.declaring_type.clone(),
                    routine.name.clone(),
                    routine.params,
                    routine.returns,
                )),
            );
            token
        });
        Ok(token)
    }
}
