//! Resolved descriptions of the members instruction operands refer to.
//!
//! Pattern predicates compare fields and methods by `(declaring type, name)` rather
//! than by token, and the stack verifier needs the arity of every called method.
//! Both come from these descriptors, which a host produces for each token it hands out.

use std::fmt;

/// A field referenced by `ldfld`, `ldflda`, `stfld` and their static forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDesc {
    /// Name of the declaring type
    pub declaring_type: String,
    /// Field name
    pub name: String,
    /// True for static fields
    pub is_static: bool,
}

impl FieldDesc {
    /// An instance field of `declaring_type`
    pub fn instance(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        FieldDesc {
            declaring_type: declaring_type.into(),
            name: name.into(),
            is_static: false,
        }
    }

    /// A static field of `declaring_type`
    pub fn of_static(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        FieldDesc {
            declaring_type: declaring_type.into(),
            name: name.into(),
            is_static: true,
        }
    }
}

/// A method referenced by `call`, `callvirt`, `newobj`, `ldftn` or `jmp`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDesc {
    /// Name of the declaring type
    pub declaring_type: String,
    /// Method name
    pub name: String,
    /// True for instance methods (an implicit receiver is passed first)
    pub has_this: bool,
    /// Number of declared parameters, excluding the receiver
    pub params: u16,
    /// True if the method returns a value
    pub returns: bool,
}

impl MethodDesc {
    /// A static method
    pub fn of_static(
        declaring_type: impl Into<String>,
        name: impl Into<String>,
        params: u16,
        returns: bool,
    ) -> Self {
        MethodDesc {
            declaring_type: declaring_type.into(),
            name: name.into(),
            has_this: false,
            params,
            returns,
        }
    }

    /// An instance method
    pub fn instance(
        declaring_type: impl Into<String>,
        name: impl Into<String>,
        params: u16,
        returns: bool,
    ) -> Self {
        MethodDesc {
            has_this: true,
            ..MethodDesc::of_static(declaring_type, name, params, returns)
        }
    }

    /// Values popped by a `call`/`callvirt` of this method
    #[must_use]
    pub fn call_pops(&self) -> u16 {
        self.params + u16::from(self.has_this)
    }

    /// Values pushed by a `call`/`callvirt` of this method
    #[must_use]
    pub fn call_pushes(&self) -> u16 {
        u16::from(self.returns)
    }
}

/// Any member a token can resolve to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Member {
    /// A field
    Field(FieldDesc),
    /// A method
    Method(MethodDesc),
    /// A type, as used by `box`, `newarr`, `castclass` and friends
    Type(String),
}

impl Member {
    /// Name of the type declaring this member (the type itself for [`Member::Type`])
    #[must_use]
    pub fn declaring_type(&self) -> &str {
        match self {
            Member::Field(field) => &field.declaring_type,
            Member::Method(method) => &method.declaring_type,
            Member::Type(name) => name,
        }
    }

    /// The field, if this is one
    #[must_use]
    pub fn as_field(&self) -> Option<&FieldDesc> {
        match self {
            Member::Field(field) => Some(field),
            _ => None,
        }
    }

    /// The method, if this is one
    #[must_use]
    pub fn as_method(&self) -> Option<&MethodDesc> {
        match self {
            Member::Method(method) => Some(method),
            _ => None,
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Field(field) => write!(f, "{}::{}", field.declaring_type, field.name),
            Member::Method(method) => write!(f, "{}::{}", method.declaring_type, method.name),
            Member::Type(name) => write!(f, "{name}"),
        }
    }
}

/// The shape of a method whose body is being edited.
///
/// The decoder and encoder need the argument and local counts to validate slot
/// references, and `ret` needs to know whether a value is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodSignature {
    /// True for instance methods; argument 0 is then the receiver
    pub has_this: bool,
    /// Declared parameters, excluding the receiver
    pub params: u16,
    /// True if the method returns a value
    pub returns: bool,
    /// Number of local variable slots
    pub locals: u16,
}

impl MethodSignature {
    /// An instance method with the given parameter and local counts
    #[must_use]
    pub fn instance(params: u16, returns: bool, locals: u16) -> Self {
        MethodSignature {
            has_this: true,
            params,
            returns,
            locals,
        }
    }

    /// A static method with the given parameter and local counts
    #[must_use]
    pub fn of_static(params: u16, returns: bool, locals: u16) -> Self {
        MethodSignature {
            has_this: false,
            params,
            returns,
            locals,
        }
    }

    /// Number of argument slots, including the receiver
    #[must_use]
    pub fn arguments(&self) -> u16 {
        self.params + u16::from(self.has_this)
    }
}
