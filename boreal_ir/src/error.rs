//! Fatal per-function lowering errors.

use thiserror::Error;

/// A lowering error. All variants are fatal for the current function: the
/// first error is recorded on the `Function` and every subsequent lowering
/// call becomes a cheap pass-through. No partial emission is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    #[error("cast kind not supported")]
    UnsupportedCast,
    #[error("unexpected memory ordering for {0}")]
    InvalidMemoryOrder(&'static str),
    #[error("phi found in regular instruction list")]
    PhiInInstStream,
    #[error("should not be lowering an unknown intrinsic")]
    UnknownIntrinsic,
    #[error("unknown atomic RMW operation")]
    UnknownAtomicRmwOp,
    #[error("arithmetic on invalid type combination")]
    InvalidArithmeticType,
    #[error("atomic is-lock-free byte size should be a compile-time constant")]
    NonConstantLockFreeSize,
}
