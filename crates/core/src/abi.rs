//! ABI layout self-check
//!
//! A module that drives the runtime passes the [`AbiLayout`] it was
//! compiled with. The runtime compares it field by field against its own
//! and refuses to start on any difference, so a stale build can never
//! misread a result code.

use crate::error::{Error, Result};
use crate::types::{ContextStatus, MemoryValidationLevel, TransactionResult};
use static_assertions::{assert_eq_align, assert_eq_size};

/// Bumped whenever an exported enum changes shape
pub const ABI_VERSION: u32 = 1;

assert_eq_size!(TransactionResult, u8);
assert_eq_size!(ContextStatus, u8);
assert_eq_size!(MemoryValidationLevel, u8);
assert_eq_align!(TransactionResult, u8);

/// Size, alignment and variant count of one exported type
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeLayout {
    /// `size_of`
    pub size: u32,
    /// `align_of`
    pub align: u32,
    /// Number of enum variants
    pub variants: u32,
}

impl TypeLayout {
    const fn of<T>(variants: u8) -> Self {
        TypeLayout {
            size: std::mem::size_of::<T>() as u32,
            align: std::mem::align_of::<T>() as u32,
            variants: variants as u32,
        }
    }
}

impl std::fmt::Display for TypeLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "size={} align={} variants={}",
            self.size, self.align, self.variants
        )
    }
}

/// Layout of every type exchanged with the runtime
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbiLayout {
    /// [`ABI_VERSION`] at compile time
    pub version: u32,
    /// Layout of [`TransactionResult`]
    pub transaction_result: TypeLayout,
    /// Layout of [`ContextStatus`]
    pub context_status: TypeLayout,
    /// Layout of [`MemoryValidationLevel`]
    pub memory_validation_level: TypeLayout,
}

impl AbiLayout {
    /// Layout as seen by the crate being compiled
    pub const fn current() -> Self {
        AbiLayout {
            version: ABI_VERSION,
            transaction_result: TypeLayout::of::<TransactionResult>(
                TransactionResult::VARIANT_COUNT,
            ),
            context_status: TypeLayout::of::<ContextStatus>(ContextStatus::VARIANT_COUNT),
            memory_validation_level: TypeLayout::of::<MemoryValidationLevel>(
                MemoryValidationLevel::VARIANT_COUNT,
            ),
        }
    }
}

impl Default for AbiLayout {
    fn default() -> Self {
        Self::current()
    }
}

fn compare<T: PartialEq + std::fmt::Display>(
    field: &'static str,
    runtime: T,
    caller: T,
) -> Result<()> {
    if runtime == caller {
        Ok(())
    } else {
        Err(Error::AbiMismatch {
            field,
            runtime: runtime.to_string(),
            caller: caller.to_string(),
        })
    }
}

/// Compare a caller's layout against this build's layout
pub fn check_abi(caller: &AbiLayout) -> Result<()> {
    let runtime = AbiLayout::current();
    compare("version", runtime.version, caller.version)?;
    compare(
        "TransactionResult",
        runtime.transaction_result,
        caller.transaction_result,
    )?;
    compare(
        "ContextStatus",
        runtime.context_status,
        caller.context_status,
    )?;
    compare(
        "MemoryValidationLevel",
        runtime.memory_validation_level,
        caller.memory_validation_level,
    )
}
