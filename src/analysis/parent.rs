//! Parent-block scanner (§4.3).
//!
//! `Instruction::parent` is kept current incrementally by every builder
//! and transform operation, so in this encoding a `ParentMap` is mostly
//! a consistency check rather than the sole source of truth — but
//! passes that want a frozen view (to detect "does this transform
//! change anyone's parent" without re-reading the live module) can snap
//! one.

use std::collections::HashMap;

use crate::entity::{BlockRef, InstRef};
use crate::module::Module;

#[derive(Debug, Clone, Default)]
pub struct ParentMap {
    parents: HashMap<InstRef, BlockRef>,
}

impl ParentMap {
    /// One pass over every block's instruction list, as specified.
    pub fn compute(module: &Module, func: crate::entity::FuncRef) -> Self {
        let mut parents = HashMap::new();
        let f = module.func(func);
        for (block_ref, block) in f.blocks_in_order() {
            for &inst in &block.instructions {
                parents.insert(inst, block_ref);
            }
        }
        ParentMap { parents }
    }

    pub fn parent_of(&self, inst: InstRef) -> Option<BlockRef> {
        self.parents.get(&inst).copied()
    }

    /// True if `module`'s live `Instruction::parent` fields agree with
    /// this frozen snapshot — false once a transform has moved anything
    /// without refreshing the map.
    pub fn is_stale(&self, module: &Module, func: crate::entity::FuncRef) -> bool {
        let f = module.func(func);
        for (&inst, &block) in &self.parents {
            if f.inst(inst).parent != block {
                return true;
            }
        }
        false
    }
}
