//! Open-to-closed function registry
//!
//! Closed code may only call functions that are safe to run instrumented.
//! A module that exports a function with side effects the engine cannot
//! track registers a closed substitute for it; [`resolve`] picks the right
//! variant for the calling context.
//!
//! ```ignore
//! fn append_log(line: u32) -> u32 { /* real effect */ }
//! fn append_log_closed(line: u32) -> u32 { /* defers through on_commit */ }
//!
//! let handle = register_open_to_closed_functions(
//!     OpenToClosedTable::new("logging")
//!         .with::<fn(u32) -> u32>(append_log, append_log_closed),
//! );
//! let f = resolve::<fn(u32) -> u32>(append_log);
//! f(3);
//! unregister_open_to_closed_functions(handle);
//! ```
//!
//! Registrations are typed: each pair remembers the `TypeId` of its
//! function-pointer type and a lookup only matches the same type. The most
//! recent registration of an open function wins; unregistering its table
//! restores the previous one.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use smallvec::SmallVec;
use std::any::TypeId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Function-pointer types that can be registered
pub trait FnPtr: Copy + Send + Sync + 'static {
    /// Address of the function
    fn addr(self) -> usize;

    /// Rebuild a pointer from [`FnPtr::addr`]
    ///
    /// # Safety
    ///
    /// `addr` must have been produced by `addr` on a value of `Self`.
    unsafe fn from_addr(addr: usize) -> Self;
}

macro_rules! impl_fn_ptr {
    (@one $ty:ty; $($arg:ident),*) => {
        impl<Ret: 'static, $($arg: 'static),*> FnPtr for $ty {
            #[inline]
            fn addr(self) -> usize {
                self as usize
            }

            #[inline]
            unsafe fn from_addr(addr: usize) -> Self {
                std::mem::transmute_copy::<usize, Self>(&addr)
            }
        }
    };
    ($($arg:ident),*) => {
        impl_fn_ptr!(@one fn($($arg),*) -> Ret; $($arg),*);
        impl_fn_ptr!(@one unsafe fn($($arg),*) -> Ret; $($arg),*);
        impl_fn_ptr!(@one extern "C" fn($($arg),*) -> Ret; $($arg),*);
        impl_fn_ptr!(@one unsafe extern "C" fn($($arg),*) -> Ret; $($arg),*);
    };
}

impl_fn_ptr!();
impl_fn_ptr!(A);
impl_fn_ptr!(A, B);
impl_fn_ptr!(A, B, C);
impl_fn_ptr!(A, B, C, D);
impl_fn_ptr!(A, B, C, D, E);
impl_fn_ptr!(A, B, C, D, E, G);

/// One open function and its closed substitute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenToClosedPair {
    open: usize,
    closed: usize,
    signature: TypeId,
}

impl OpenToClosedPair {
    /// Pair two functions of the same type
    pub fn new<F: FnPtr>(open: F, closed: F) -> Self {
        OpenToClosedPair {
            open: open.addr(),
            closed: closed.addr(),
            signature: TypeId::of::<F>(),
        }
    }
}

/// The pairs one module registers
#[derive(Debug, Clone, Default)]
pub struct OpenToClosedTable {
    name: &'static str,
    pairs: Vec<OpenToClosedPair>,
}

impl OpenToClosedTable {
    /// Empty table labelled `name` in diagnostics
    pub fn new(name: &'static str) -> Self {
        OpenToClosedTable {
            name,
            pairs: Vec::new(),
        }
    }

    /// Add a pair
    pub fn with<F: FnPtr>(mut self, open: F, closed: F) -> Self {
        self.pairs.push(OpenToClosedPair::new(open, closed));
        self
    }

    /// Add a prebuilt pair
    pub fn push(&mut self, pair: OpenToClosedPair) {
        self.pairs.push(pair);
    }

    /// Label of the table
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of pairs
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the table has no pairs
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Identifies a registered table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableHandle(u64);

#[derive(Debug, Clone, Copy)]
struct Registration {
    table: u64,
    closed: usize,
    signature: TypeId,
}

struct Registry {
    by_open: DashMap<usize, SmallVec<[Registration; 1]>>,
    tables: DashMap<u64, OpenToClosedTable>,
    next_table: AtomicU64,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| Registry {
    by_open: DashMap::new(),
    tables: DashMap::new(),
    next_table: AtomicU64::new(1),
});

/// Register every pair of `table`
///
/// Called once per module at load time.
pub fn register_open_to_closed_functions(table: OpenToClosedTable) -> TableHandle {
    let id = REGISTRY.next_table.fetch_add(1, Ordering::Relaxed);
    for pair in &table.pairs {
        REGISTRY
            .by_open
            .entry(pair.open)
            .or_default()
            .push(Registration {
                table: id,
                closed: pair.closed,
                signature: pair.signature,
            });
    }
    tracing::debug!(table = table.name, pairs = table.pairs.len(), "registered open-to-closed table");
    REGISTRY.tables.insert(id, table);
    TableHandle(id)
}

/// Remove a table registered by [`register_open_to_closed_functions`]
///
/// Returns false if the handle was already unregistered.
pub fn unregister_open_to_closed_functions(handle: TableHandle) -> bool {
    let Some((_, table)) = REGISTRY.tables.remove(&handle.0) else {
        return false;
    };
    for pair in &table.pairs {
        if let Some(mut entry) = REGISTRY.by_open.get_mut(&pair.open) {
            entry.retain(|r| r.table != handle.0);
        }
        REGISTRY.by_open.remove_if(&pair.open, |_, regs| regs.is_empty());
    }
    tracing::debug!(table = table.name, "unregistered open-to-closed table");
    true
}

/// The registered closed substitute for `open`, if any
pub fn closed_variant_of<F: FnPtr>(open: F) -> Option<F> {
    let signature = TypeId::of::<F>();
    let entry = REGISTRY.by_open.get(&open.addr())?;
    let registration = entry.iter().rev().find(|r| r.signature == signature)?;
    // SAFETY: the address was registered for this exact function type
    Some(unsafe { F::from_addr(registration.closed) })
}

/// The variant of `open` to call from here
///
/// Open code gets `open` itself. Closed code gets the registered closed
/// substitute; calling an unregistered function from closed code is a
/// language abort.
pub fn resolve<F: FnPtr>(open: F) -> F {
    if !crate::transact::is_closed() {
        return open;
    }
    match closed_variant_of(open) {
        Some(closed) => closed,
        None => crate::transact::language_abort(&format!(
            "no closed variant registered for function at {:#x}",
            open.addr()
        )),
    }
}
