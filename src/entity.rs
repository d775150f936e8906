//! Opaque, dense index references into the IR's owning arenas.
//!
//! The design notes call for a cyclic graph (blocks reference each other,
//! phis reference blocks, instructions reference their operands) built
//! without raw pointers or reference counting. Rather than intrusive
//! pointers we follow the entity-reference style used by real SSA IRs in
//! Rust: every cross-reference is a small `Copy` index into a `Vec` owned
//! by the container the spec's ownership rule assigns it to (module owns
//! functions and globals, function owns blocks, block owns instructions).
//! This keeps the ownership graph a tree while every use/def edge is a
//! plain, freely-copyable value.

use std::fmt;

macro_rules! entity_ref {
    ($name:ident, $prefix:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }

            pub fn new(index: usize) -> Self {
                debug_assert!(index <= u32::MAX as usize, "entity index overflow");
                $name(index as u32)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

entity_ref!(FuncRef, "f");
entity_ref!(GlobalRef, "g");
entity_ref!(ConstRef, "c");

/// A block within one function. Numbering restarts at every function
/// (per §6's "per-function numeric ids reset at each function definition"),
/// so a `BlockRef` is only meaningful alongside the `FuncRef` it was
/// produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct BlockRef {
    pub func: FuncRef,
    pub index: u32,
}

impl BlockRef {
    pub fn new(func: FuncRef, index: usize) -> Self {
        BlockRef { func, index: index as u32 }
    }

    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%L{}", self.index)
    }
}

/// An instruction within one function, addressed by a dense per-function
/// index. Instructions are never moved between functions, and LICM only
/// ever relocates them between blocks of the *same* function, so scoping
/// the index to `FuncRef` is sufficient and avoids a second level of
/// indirection for the common case of "the instruction that defines this
/// operand".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct InstRef {
    pub func: FuncRef,
    pub index: u32,
}

impl InstRef {
    pub fn new(func: FuncRef, index: usize) -> Self {
        InstRef { func, index: index as u32 }
    }

    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for InstRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.index)
    }
}

/// Every operand in the IR resolves to one of these. This is the closed
/// variant set from §3 ("A Value is a variant of ..."), collapsed to the
/// handles needed to look the actual payload up in its owning arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ValueId {
    Inst(InstRef),
    /// The `index`-th parameter of `FuncRef`'s declared type.
    Arg(FuncRef, u32),
    Global(GlobalRef),
    Func(FuncRef),
    Const(ConstRef),
    Undef,
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueId::Inst(i) => write!(f, "{i}"),
            ValueId::Arg(func, idx) => write!(f, "%{func}.arg{idx}"),
            ValueId::Global(g) => write!(f, "@{g}"),
            ValueId::Func(fr) => write!(f, "@{fr}"),
            ValueId::Const(c) => write!(f, "{c}"),
            ValueId::Undef => write!(f, "undef"),
        }
    }
}
