//! Branch conditions and the data-driven comparison tables.
//!
//! Each table is a plain constant array indexed by the IR predicate's
//! discriminant, with a static length check in place of the original
//! preprocessor integrity dance.

use boreal_ir::instruction::{NUM_FCONDS, NUM_ICONDS};
use boreal_ir::Type;

/// x86 conditional-branch (and cmov) condition codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrCond {
    A,
    Ae,
    B,
    Be,
    E,
    G,
    Ge,
    L,
    Le,
    Ne,
    Np,
    P,
}

impl BrCond {
    /// Mnemonic suffix, e.g. `jne`/`cmovne`.
    pub fn suffix(self) -> &'static str {
        match self {
            BrCond::A => "a",
            BrCond::Ae => "ae",
            BrCond::B => "b",
            BrCond::Be => "be",
            BrCond::E => "e",
            BrCond::G => "g",
            BrCond::Ge => "ge",
            BrCond::L => "l",
            BrCond::Le => "le",
            BrCond::Ne => "ne",
            BrCond::Np => "np",
            BrCond::P => "p",
        }
    }
}

/// `cmpps` comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmppsCond {
    Eq,
    Lt,
    Le,
    Unord,
    Neq,
    Nlt,
    Nle,
    Ord,
}

impl CmppsCond {
    /// Condition infix of the mnemonic, e.g. `cmpneqps`.
    pub fn infix(self) -> &'static str {
        match self {
            CmppsCond::Eq => "eq",
            CmppsCond::Lt => "lt",
            CmppsCond::Le => "le",
            CmppsCond::Unord => "unord",
            CmppsCond::Neq => "neq",
            CmppsCond::Nlt => "nlt",
            CmppsCond::Nle => "nle",
            CmppsCond::Ord => "ord",
        }
    }
}

/// Lowering rule for one scalar/vector fcmp predicate.
///
/// Scalar template: optional `ucomiss` (operands swapped when
/// `swap_scalar`), `mov dst, default`, up to two conditional jumps to a
/// merge label, then `mov dst, !default`. Vector: a single `cmpps` with
/// `predicate` (operands swapped when `swap_vector`); predicates that have
/// no single-`cmpps` encoding are `None` and handled specially.
pub struct FcmpEntry {
    pub default: i32,
    pub swap_scalar: bool,
    pub c1: Option<BrCond>,
    pub c2: Option<BrCond>,
    pub swap_vector: bool,
    pub predicate: Option<CmppsCond>,
}

#[rustfmt::skip]
pub const TABLE_FCMP: [FcmpEntry; NUM_FCONDS] = [
    /* False */ FcmpEntry { default: 0, swap_scalar: false, c1: None,              c2: None,            swap_vector: false, predicate: None },
    /* Oeq */   FcmpEntry { default: 0, swap_scalar: false, c1: Some(BrCond::Ne),  c2: Some(BrCond::P), swap_vector: false, predicate: Some(CmppsCond::Eq) },
    /* Ogt */   FcmpEntry { default: 1, swap_scalar: false, c1: Some(BrCond::A),   c2: None,            swap_vector: true,  predicate: Some(CmppsCond::Lt) },
    /* Oge */   FcmpEntry { default: 1, swap_scalar: false, c1: Some(BrCond::Ae),  c2: None,            swap_vector: true,  predicate: Some(CmppsCond::Le) },
    /* Olt */   FcmpEntry { default: 1, swap_scalar: true,  c1: Some(BrCond::A),   c2: None,            swap_vector: false, predicate: Some(CmppsCond::Lt) },
    /* Ole */   FcmpEntry { default: 1, swap_scalar: true,  c1: Some(BrCond::Ae),  c2: None,            swap_vector: false, predicate: Some(CmppsCond::Le) },
    /* One */   FcmpEntry { default: 1, swap_scalar: false, c1: Some(BrCond::Ne),  c2: None,            swap_vector: false, predicate: None },
    /* Ord */   FcmpEntry { default: 1, swap_scalar: false, c1: Some(BrCond::Np),  c2: None,            swap_vector: false, predicate: Some(CmppsCond::Ord) },
    /* Ueq */   FcmpEntry { default: 1, swap_scalar: false, c1: Some(BrCond::E),   c2: None,            swap_vector: false, predicate: None },
    /* Ugt */   FcmpEntry { default: 1, swap_scalar: true,  c1: Some(BrCond::B),   c2: None,            swap_vector: false, predicate: Some(CmppsCond::Nle) },
    /* Uge */   FcmpEntry { default: 1, swap_scalar: true,  c1: Some(BrCond::Be),  c2: None,            swap_vector: false, predicate: Some(CmppsCond::Nlt) },
    /* Ult */   FcmpEntry { default: 1, swap_scalar: false, c1: Some(BrCond::B),   c2: None,            swap_vector: true,  predicate: Some(CmppsCond::Nle) },
    /* Ule */   FcmpEntry { default: 1, swap_scalar: false, c1: Some(BrCond::Be),  c2: None,            swap_vector: true,  predicate: Some(CmppsCond::Nlt) },
    /* Une */   FcmpEntry { default: 1, swap_scalar: false, c1: Some(BrCond::Ne),  c2: Some(BrCond::P), swap_vector: false, predicate: Some(CmppsCond::Neq) },
    /* Uno */   FcmpEntry { default: 1, swap_scalar: false, c1: Some(BrCond::P),   c2: None,            swap_vector: false, predicate: Some(CmppsCond::Unord) },
    /* True */  FcmpEntry { default: 1, swap_scalar: false, c1: None,              c2: None,            swap_vector: false, predicate: None },
];

const _: () = assert!(TABLE_FCMP.len() == NUM_FCONDS);

/// One branch condition per icmp predicate, for i32 and narrower.
#[rustfmt::skip]
pub const TABLE_ICMP32: [BrCond; NUM_ICONDS] = [
    /* Eq */  BrCond::E,
    /* Ne */  BrCond::Ne,
    /* Ugt */ BrCond::A,
    /* Uge */ BrCond::Ae,
    /* Ult */ BrCond::B,
    /* Ule */ BrCond::Be,
    /* Sgt */ BrCond::G,
    /* Sge */ BrCond::Ge,
    /* Slt */ BrCond::L,
    /* Sle */ BrCond::Le,
];

const _: () = assert!(TABLE_ICMP32.len() == NUM_ICONDS);

/// Three-branch rule for i64 icmp: compare the high halves and branch to
/// true on `c1` / false on `c2`, then compare the low halves and branch to
/// true on `c3`. `Eq`/`Ne` take a separate two-compare path and have no
/// entry.
pub struct Icmp64Entry {
    pub c1: Option<BrCond>,
    pub c2: Option<BrCond>,
    pub c3: Option<BrCond>,
}

#[rustfmt::skip]
pub const TABLE_ICMP64: [Icmp64Entry; NUM_ICONDS] = [
    /* Eq */  Icmp64Entry { c1: None,              c2: None,             c3: None },
    /* Ne */  Icmp64Entry { c1: None,              c2: None,             c3: None },
    /* Ugt */ Icmp64Entry { c1: Some(BrCond::A),   c2: Some(BrCond::B),  c3: Some(BrCond::A) },
    /* Uge */ Icmp64Entry { c1: Some(BrCond::A),   c2: Some(BrCond::B),  c3: Some(BrCond::Ae) },
    /* Ult */ Icmp64Entry { c1: Some(BrCond::B),   c2: Some(BrCond::A),  c3: Some(BrCond::B) },
    /* Ule */ Icmp64Entry { c1: Some(BrCond::B),   c2: Some(BrCond::A),  c3: Some(BrCond::Be) },
    /* Sgt */ Icmp64Entry { c1: Some(BrCond::G),   c2: Some(BrCond::L),  c3: Some(BrCond::A) },
    /* Sge */ Icmp64Entry { c1: Some(BrCond::G),   c2: Some(BrCond::L),  c3: Some(BrCond::Ae) },
    /* Slt */ Icmp64Entry { c1: Some(BrCond::L),   c2: Some(BrCond::G),  c3: Some(BrCond::B) },
    /* Sle */ Icmp64Entry { c1: Some(BrCond::L),   c2: Some(BrCond::G),  c3: Some(BrCond::Be) },
];

const _: () = assert!(TABLE_ICMP64.len() == NUM_ICONDS);

/// The type a vector's lanes take inside the x86 representation: i1 lanes
/// widen to the full lane width of their container.
pub fn in_vector_element_type(ty: Type) -> Type {
    match ty {
        Type::V4I1 => Type::I32,
        Type::V8I1 => Type::I16,
        Type::V16I1 => Type::I8,
        Type::V16I8 => Type::I8,
        Type::V8I16 => Type::I16,
        Type::V4I32 => Type::I32,
        Type::V4F32 => Type::F32,
        _ => ty,
    }
}
