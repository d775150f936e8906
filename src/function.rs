//! Functions: the per-function instruction/block arenas (§3, §4.2).
//!
//! A `Function` owns every `Block` and `Instruction` that belongs to it.
//! Cross-references within a function (block successors, instruction
//! operands that point at other instructions) are `BlockRef`/`InstRef`
//! values scoped to this function's `FuncRef`, so they stay valid no
//! matter how the function is later relocated within its module's
//! function arena.

use crate::entity::{BlockRef, FuncRef, InstRef};
use crate::instruction::{Block, Instruction};
use crate::types::Ty;
use crate::value::Linkage;

/// A function definition or external declaration.
///
/// `ty` is always `Ty::Function { .. }`; parameter values are referenced
/// as `ValueId::Arg(self_ref, index)` rather than stored as instructions,
/// since they are not defined by any instruction in the body.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Function {
    pub name: String,
    pub ty: Ty,
    pub linkage: Linkage,
    pub blocks: Vec<Block>,
    pub instructions: Vec<Instruction>,
    pub entry: Option<BlockRef>,
}

impl Function {
    pub fn new(name: impl Into<String>, ty: Ty, linkage: Linkage) -> Self {
        assert!(ty.is_function(), "function type must be Ty::Function");
        Function { name: name.into(), ty, linkage, blocks: Vec::new(), instructions: Vec::new(), entry: None }
    }

    pub fn param_count(&self) -> usize {
        self.ty.args().map_or(0, |a| a.len())
    }

    pub fn param_ty(&self, index: u32) -> Option<&Ty> {
        self.ty.args().and_then(|a| a.get(index as usize))
    }

    pub fn return_ty(&self) -> &Ty {
        self.ty.return_ty().expect("function type always has a return type")
    }

    /// True for an extern declaration: no body has been built yet.
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, r: BlockRef) -> &Block {
        &self.blocks[r.index()]
    }

    pub fn block_mut(&mut self, r: BlockRef) -> &mut Block {
        &mut self.blocks[r.index()]
    }

    pub fn inst(&self, r: InstRef) -> &Instruction {
        &self.instructions[r.index()]
    }

    pub fn inst_mut(&mut self, r: InstRef) -> &mut Instruction {
        &mut self.instructions[r.index()]
    }

    /// Appends an empty block and returns its reference. Callers insert
    /// instructions through the module builder, which also maintains
    /// predecessor lists and the use-list side table.
    pub fn push_block(&mut self, func: FuncRef, name: Option<String>) -> BlockRef {
        let r = BlockRef::new(func, self.blocks.len());
        self.blocks.push(Block::new(func, name));
        if self.entry.is_none() {
            self.entry = Some(r);
        }
        r
    }

    pub fn push_inst(&mut self, func: FuncRef, inst: Instruction) -> InstRef {
        let r = InstRef::new(func, self.instructions.len());
        self.instructions.push(inst);
        r
    }

    /// Blocks in declaration order, paired with their reference — the
    /// order the textual backend and the dominance analysis both walk.
    pub fn blocks_in_order(&self) -> impl Iterator<Item = (BlockRef, &Block)> {
        self.blocks.iter().enumerate().map(move |(i, b)| (BlockRef::new(b.parent, i), b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::FuncRef;

    #[test]
    fn new_function_has_no_entry_until_a_block_is_pushed() {
        let ty = Ty::function(vec![Ty::i32(true)], Ty::i32(true), false);
        let mut f = Function::new("add_one", ty, Linkage::External);
        assert!(f.entry.is_none());
        assert!(f.is_declaration());
        let fref = FuncRef::new(0);
        let b0 = f.push_block(fref, None);
        assert_eq!(f.entry, Some(b0));
        assert!(!f.is_declaration());
    }

    #[test]
    fn param_count_matches_function_type() {
        let ty = Ty::function(vec![Ty::i32(true), Ty::i32(true)], Ty::i32(true), false);
        let f = Function::new("add", ty, Linkage::Internal);
        assert_eq!(f.param_count(), 2);
        assert_eq!(f.param_ty(1), Some(&Ty::i32(true)));
    }
}
