//! Typed SSA intermediate representation for the boreal code generator.
//!
//! All references into the IR are u32 arena indices, not pointers. The
//! per-function arena owns every variable and instruction; the global
//! context owns symbols, constant pools and option flags.

pub mod context;
pub mod error;
pub mod function;
pub mod instruction;
pub mod operand;
pub mod types;


pub use context::{GlobalContext, InstructionSet, OptLevel, Options, SymbolId, SymbolTable};
pub use error::CodegenError;
pub use function::{Block, BlockId, Function};
pub use instruction::{
    ArithOp, AtomicRmwOp, CastOp, FCond, ICond, Inst, InstKind, IntrinsicOp, MEMORY_ORDER_SEQ_CST,
};
pub use operand::{Half, MemOffset, MemOperand, Operand, RegWeight, SegmentReg, VarId, Variable};
pub use types::Type;
