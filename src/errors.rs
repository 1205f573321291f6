//! Error taxonomy for every stage of schema compilation, expression
//! evaluation, scope resolution, function dispatch, union resolution, and
//! encode/decode. Each bucket is its own bare enum; [`CodecError`] wraps all
//! of them for the facade's `encode`/`decode` entry points.

/// Failures while compiling a raw [`crate::schema::SchemaDoc`] into a
/// [`crate::schema::Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    UnknownType(String),
    MissingAttribute { field: String, attribute: &'static str },
    Contradiction { field: String, reason: &'static str },
    InvalidUnion { field: String, reason: &'static str },
}

/// Failures while parsing or evaluating a `length_field`/`condition`
/// expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    Syntax(String),
    UnknownField(String),
    DivByZero,
    TypeMismatch(String),
}

/// Failures while resolving a calculated field's scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    UnknownScope(String),
    MissingBound(&'static str),
    UnknownField(String),
    BadRange(String),
}

/// Failures while invoking a calculated-field function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionError {
    Unknown(String),
    BadParams(String),
}

/// Failures while resolving a union's variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnionError {
    UnknownVariant { field: String, discriminator: String },
    MissingDiscriminator { field: String },
}

/// Failures while encoding a [`crate::document::Document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    MissingField(String),
    TypeMismatch { path: String, expected: &'static str },
    OutOfRange { path: String, reason: String },
}

/// Failures while decoding a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    UnexpectedEnd { field: String },
    BadEncoding { field: String },
}

/// Umbrella error returned by [`crate::codec::Codec::encode`] and
/// [`crate::codec::Codec::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    Schema(SchemaError),
    Expr(ExprError),
    Scope(ScopeError),
    Function(FunctionError),
    Union(UnionError),
    Encode(EncodeError),
    Decode(DecodeError),
    Io(String),
}

impl From<SchemaError> for CodecError {
    fn from(e: SchemaError) -> Self {
        CodecError::Schema(e)
    }
}

impl From<ExprError> for CodecError {
    fn from(e: ExprError) -> Self {
        CodecError::Expr(e)
    }
}

impl From<ScopeError> for CodecError {
    fn from(e: ScopeError) -> Self {
        CodecError::Scope(e)
    }
}

impl From<FunctionError> for CodecError {
    fn from(e: FunctionError) -> Self {
        CodecError::Function(e)
    }
}

impl From<UnionError> for CodecError {
    fn from(e: UnionError) -> Self {
        CodecError::Union(e)
    }
}

impl From<EncodeError> for CodecError {
    fn from(e: EncodeError) -> Self {
        CodecError::Encode(e)
    }
}

impl From<DecodeError> for CodecError {
    fn from(e: DecodeError) -> Self {
        CodecError::Decode(e)
    }
}
