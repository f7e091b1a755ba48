//! Structural type hashing for generic payloads.
//!
//! Payload types describe their own shape through [`Schema`]. Two processes compare the
//! hash of that description during the handshake; a mismatch means the peers were built
//! with different definitions of the type, and the message is dropped from the protocol.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

/// How the fields of a struct are laid out in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum LayoutKind {
    /// Fields in declaration order (`#[repr(C)]`).
    Sequential = 0,
    /// Fields at explicit offsets.
    Explicit = 2,
    /// Compiler-chosen order.
    Auto = 3,
}

/// Text encoding used for embedded strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CharSet {
    /// No embedded text.
    None = 1,
    /// Single-byte text.
    Ansi = 2,
    /// UTF-16 text.
    Unicode = 3,
}

/// Declared memory layout of a fixed-layout struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructLayout {
    /// Field ordering.
    pub kind: LayoutKind,
    /// Packing alignment in bytes.
    pub pack: i32,
    /// Embedded text encoding.
    pub char_set: CharSet,
    /// Marshalled size in bytes.
    pub size: i32,
}

impl StructLayout {
    /// Sequential layout with the given packing, sized from `T`.
    pub fn sequential<T>(pack: i32) -> Self {
        Self {
            kind: LayoutKind::Sequential,
            pack,
            char_set: CharSet::Ansi,
            size: std::mem::size_of::<T>() as i32,
        }
    }
}

/// A named field of a struct schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    /// Field name.
    pub name: String,
    /// Field type.
    pub schema: TypeSchema,
}

/// Declared shape of a payload type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSchema {
    /// Built-in scalar or string, identified by name alone.
    Primitive {
        /// Type name.
        name: String,
    },
    /// Enumeration with an integer representation.
    Enum {
        /// Type name.
        name: String,
        /// Representation type.
        underlying: Box<TypeSchema>,
        /// Variant names in declaration order.
        variants: Vec<String>,
    },
    /// Homogeneous sequence.
    Array {
        /// Type name.
        name: String,
        /// Element type.
        element: Box<TypeSchema>,
    },
    /// Record type.
    Struct(StructSchema),
}

/// Fields, layout and base of a record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructSchema {
    name: String,
    layout: Option<StructLayout>,
    fields: Vec<FieldSchema>,
    base: Option<Box<TypeSchema>>,
}

impl StructSchema {
    /// Start describing a struct named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layout: None,
            fields: Vec::new(),
            base: None,
        }
    }

    /// Declare the memory layout.
    pub fn layout(mut self, layout: StructLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Append a field; order matters.
    pub fn field<T: Schema>(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            schema: T::schema(),
        });
        self
    }

    /// Declare a base type whose fields are inherited.
    pub fn base<T: Schema>(mut self) -> Self {
        self.base = Some(Box::new(T::schema()));
        self
    }
}

impl From<StructSchema> for TypeSchema {
    fn from(schema: StructSchema) -> Self {
        TypeSchema::Struct(schema)
    }
}

impl TypeSchema {
    /// Describe a primitive.
    pub fn primitive(name: impl Into<String>) -> Self {
        TypeSchema::Primitive { name: name.into() }
    }

    /// Describe an enum by its representation and variant names.
    pub fn enumeration<U: Schema>(
        name: impl Into<String>,
        variants: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        TypeSchema::Enum {
            name: name.into(),
            underlying: Box::new(U::schema()),
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }

    /// Name written on the wire.
    pub fn name(&self) -> &str {
        match self {
            TypeSchema::Primitive { name }
            | TypeSchema::Enum { name, .. }
            | TypeSchema::Array { name, .. } => name,
            TypeSchema::Struct(schema) => &schema.name,
        }
    }

    /// Hash of the declared shape.
    pub fn structural_hash(&self) -> i32 {
        let mut hash = hash_string(self.name());

        match self {
            TypeSchema::Primitive { .. } => {}
            TypeSchema::Enum {
                underlying,
                variants,
                ..
            } => {
                combine(&mut hash, underlying.structural_hash());
                for variant in variants {
                    combine(&mut hash, hash_string(variant));
                }
            }
            TypeSchema::Array { element, .. } => {
                combine(&mut hash, element.structural_hash());
            }
            TypeSchema::Struct(schema) => {
                if let Some(layout) = schema.layout {
                    combine(&mut hash, layout.kind as i32);
                    combine(&mut hash, layout.pack);
                    combine(&mut hash, layout.char_set as i32);
                    combine(&mut hash, layout.size);
                }
                for field in &schema.fields {
                    combine(&mut hash, hash_string(&field.name));
                    combine(&mut hash, field.schema.structural_hash());
                }
                if let Some(base) = &schema.base {
                    combine(&mut hash, base.structural_hash());
                }
            }
        }

        hash
    }
}

/// Types that can describe their own shape.
pub trait Schema {
    /// Declared shape of the type.
    fn schema() -> TypeSchema;
}

/// Cached structural hash of `T`.
pub fn schema_hash<T: Schema + 'static>() -> i32 {
    static CACHE: OnceLock<RwLock<HashMap<TypeId, i32>>> = OnceLock::new();
    let cache = CACHE.get_or_init(Default::default);
    let key = TypeId::of::<T>();

    if let Some(hash) = cache
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
    {
        return *hash;
    }

    let hash = T::schema().structural_hash();
    cache
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key, hash);
    hash
}

/// Deterministic 32-bit hash of a string, stable across processes and platforms.
pub fn hash_string(value: &str) -> i32 {
    let digest = blake3::hash(value.as_bytes());
    let bytes = digest.as_bytes();
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn combine(a: &mut i32, b: i32) {
    *a = a.rotate_left(15) ^ b;
}

macro_rules! primitive_schema {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl Schema for $ty {
                fn schema() -> TypeSchema {
                    TypeSchema::primitive($name)
                }
            }
        )*
    };
}

primitive_schema! {
    bool => "bool",
    u8 => "u8",
    i8 => "i8",
    u16 => "u16",
    i16 => "i16",
    u32 => "u32",
    i32 => "i32",
    u64 => "u64",
    i64 => "i64",
    f32 => "f32",
    f64 => "f64",
    String => "string",
}

impl<T: Schema, const N: usize> Schema for [T; N] {
    fn schema() -> TypeSchema {
        let element = T::schema();
        TypeSchema::Array {
            name: format!("[{}; {N}]", element.name()),
            element: Box::new(element),
        }
    }
}

impl<T: Schema> Schema for Vec<T> {
    fn schema() -> TypeSchema {
        let element = T::schema();
        TypeSchema::Array {
            name: format!("[{}]", element.name()),
            element: Box::new(element),
        }
    }
}
