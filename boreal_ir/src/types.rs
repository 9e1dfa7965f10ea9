//! Type tags for the boreal IR.
//!
//! The tag set is fixed: scalar integers up to 64 bits, two floating-point
//! widths, and the 128-bit vector shapes the backend knows how to lower.
//! Attribute lookups go through a constant table indexed by the enum
//! discriminant; a static check keeps the table and the enum in sync.

/// A type in the boreal IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Type {
    Void = 0,
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    V4I1,
    V8I1,
    V16I1,
    V16I8,
    V8I16,
    V4I32,
    V4F32,
}

pub const NUM_TYPES: usize = 15;

struct TypeAttr {
    /// Width of the type in bytes (0 for void).
    size: u32,
    /// Width of a stack slot holding the type. Sub-word scalars widen to a
    /// full 4-byte slot.
    size_on_stack: u32,
    /// Number of vector lanes, 1 for scalars.
    elements: u32,
    /// Lane type for vectors, the type itself for scalars.
    element_ty: Type,
    name: &'static str,
}

const TYPE_ATTRS: [TypeAttr; NUM_TYPES] = [
    TypeAttr { size: 0, size_on_stack: 0, elements: 0, element_ty: Type::Void, name: "void" },
    TypeAttr { size: 1, size_on_stack: 4, elements: 1, element_ty: Type::I1, name: "i1" },
    TypeAttr { size: 1, size_on_stack: 4, elements: 1, element_ty: Type::I8, name: "i8" },
    TypeAttr { size: 2, size_on_stack: 4, elements: 1, element_ty: Type::I16, name: "i16" },
    TypeAttr { size: 4, size_on_stack: 4, elements: 1, element_ty: Type::I32, name: "i32" },
    TypeAttr { size: 8, size_on_stack: 8, elements: 1, element_ty: Type::I64, name: "i64" },
    TypeAttr { size: 4, size_on_stack: 4, elements: 1, element_ty: Type::F32, name: "f32" },
    TypeAttr { size: 8, size_on_stack: 8, elements: 1, element_ty: Type::F64, name: "f64" },
    TypeAttr { size: 16, size_on_stack: 16, elements: 4, element_ty: Type::I1, name: "v4i1" },
    TypeAttr { size: 16, size_on_stack: 16, elements: 8, element_ty: Type::I1, name: "v8i1" },
    TypeAttr { size: 16, size_on_stack: 16, elements: 16, element_ty: Type::I1, name: "v16i1" },
    TypeAttr { size: 16, size_on_stack: 16, elements: 16, element_ty: Type::I8, name: "v16i8" },
    TypeAttr { size: 16, size_on_stack: 16, elements: 8, element_ty: Type::I16, name: "v8i16" },
    TypeAttr { size: 16, size_on_stack: 16, elements: 4, element_ty: Type::I32, name: "v4i32" },
    TypeAttr { size: 16, size_on_stack: 16, elements: 4, element_ty: Type::F32, name: "v4f32" },
];

// Keep TYPE_ATTRS in sync with the enum.
const _: () = assert!(TYPE_ATTRS.len() == NUM_TYPES);

impl Type {
    fn attr(self) -> &'static TypeAttr {
        &TYPE_ATTRS[self as usize]
    }

    /// Width of the type in bytes.
    pub fn width_in_bytes(self) -> u32 {
        self.attr().size
    }

    /// Width of a stack slot holding the type, i.e. the natural spill-slot
    /// size with sub-word scalars widened to 4 bytes.
    pub fn width_on_stack(self) -> u32 {
        self.attr().size_on_stack
    }

    /// Alignment of the type in bytes.
    pub fn align_in_bytes(self) -> u32 {
        // Every type is naturally aligned to its width.
        self.attr().size.max(1)
    }

    pub fn is_vector(self) -> bool {
        self.attr().elements > 1
    }

    /// Number of vector lanes, 1 for scalars.
    pub fn num_elements(self) -> u32 {
        self.attr().elements
    }

    /// Lane type for vectors, the type itself for scalars.
    pub fn element_type(self) -> Type {
        self.attr().element_ty
    }

    pub fn is_scalar_int(self) -> bool {
        matches!(self, Type::I1 | Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    pub fn is_scalar_fp(self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.attr().name)
    }
}
