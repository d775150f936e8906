//! Code generator interface and the textual backend (§4.6, §6).
//!
//! `CodeGenVisitor` is the double-dispatch seam: the module walks its own
//! globals and functions in insertion order and calls into the visitor,
//! which recursively drives each node's children. A target backend (here,
//! the textual dump used for snapshot tests; an AArch32 backend would be
//! a sibling implementing the same trait) never needs to know how the IR
//! arenas are laid out.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::entity::{BlockRef, FuncRef, GlobalRef, InstRef, ValueId};
use crate::instruction::{AccessKind, InstKind};
use crate::module::Module;
use crate::types::Ty;

/// One callback per concrete IR node kind. Implementors return whatever
/// their target needs per node; the textual backend returns `()` and
/// accumulates into its own buffer, while a future object-emitting
/// backend might return bytes written.
pub trait CodeGenVisitor {
    fn visit_global(&mut self, module: &Module, global: GlobalRef);
    fn visit_function(&mut self, module: &Module, func: FuncRef);
    fn visit_block(&mut self, module: &Module, block: BlockRef);
    fn visit_instruction(&mut self, module: &Module, inst: InstRef);
}

/// Walks `module` in insertion order, invoking `visitor` on every node.
/// Per §4.2, the global constructor must already be sealed — callers go
/// through `Module::dump`/`Module::generate_code`, which seal first.
pub fn drive(module: &Module, visitor: &mut dyn CodeGenVisitor) {
    for i in 0..module.globals.len() {
        visitor.visit_global(module, GlobalRef::new(i));
    }
    for i in 0..module.functions.len() {
        let f = FuncRef::new(i);
        if module.func(f).is_declaration() {
            continue;
        }
        visitor.visit_function(module, f);
    }
}

/// The human-readable printer used for snapshot tests (§6). Per-function
/// value numbering restarts at every `visit_function`.
#[derive(Default)]
pub struct TextualBackend {
    out: String,
    names: HashMap<InstRef, u32>,
    next_id: u32,
}

impl TextualBackend {
    pub fn new() -> Self {
        TextualBackend::default()
    }

    pub fn into_string(self) -> String {
        self.out
    }

    fn name_of(&mut self, inst: InstRef) -> u32 {
        *self.names.entry(inst).or_insert_with(|| {
            let id = self.next_id;
            self.next_id += 1;
            id
        })
    }

    fn render_operand(&mut self, module: &Module, v: ValueId) -> String {
        match v {
            ValueId::Inst(r) => format!("%{}", self.name_of(r)),
            ValueId::Arg(_, idx) => format!("%arg{idx}"),
            ValueId::Global(g) => format!("@{}", module.global(g).name),
            ValueId::Func(f) => format!("@{}", module.func(f).name),
            ValueId::Const(c) => module.constant(c).to_string(),
            ValueId::Undef => "undef".to_string(),
        }
    }

    fn render_instruction(&mut self, module: &Module, r: InstRef) -> String {
        let func = r.func;
        let inst = module.func(func).inst(r);
        let ty = &inst.ty;
        let mut ops: Vec<String> = inst.operands.iter().map(|&o| self.render_operand(module, o)).collect();
        match &inst.kind {
            InstKind::Load { is_ref } => {
                let dest = self.name_of(r);
                format!("%{dest} = load{} {ty} {}", if *is_ref { ".ref" } else { "" }, ops[0])
            }
            InstKind::Store => format!("store {ty} {}, {}", ops[0], ops[1]),
            InstKind::Alloca => {
                let dest = self.name_of(r);
                let pointee = inst.ty.deref().expect("alloca result is always a pointer");
                format!("%{dest} = alloca {pointee}")
            }
            InstKind::Access(AccessKind::Pointer) => {
                let dest = self.name_of(r);
                format!("%{dest} = ptr_access {ty} {}, {}", ops[0], ops[1])
            }
            InstKind::Access(AccessKind::Element) => {
                let dest = self.name_of(r);
                format!("%{dest} = elem_access {ty} {}, {}", ops[0], ops[1])
            }
            InstKind::Binary(op) => {
                let dest = self.name_of(r);
                format!("%{dest} = {op} {ty} {}, {}", ops[0], ops[1])
            }
            InstKind::Unary(op) => {
                let dest = self.name_of(r);
                format!("%{dest} = {op} {ty} {}", ops[0])
            }
            InstKind::Cast => {
                let dest = self.name_of(r);
                let src_ty = inst.original_ty.clone().unwrap_or_else(|| Ty::void());
                format!("%{dest} = cast {src_ty} {} to {ty}", ops[0])
            }
            InstKind::Call => {
                let dest = self.name_of(r);
                let callee = ops.remove(0);
                if ty.is_void() {
                    format!("call {ty} {callee}({})", ops.join(", "))
                } else {
                    format!("%{dest} = call {ty} {callee}({})", ops.join(", "))
                }
            }
            InstKind::Branch { then_block, else_block } => {
                format!("br {}, {then_block}, {else_block}", ops[0])
            }
            InstKind::Jump { target } => format!("jump {target}"),
            InstKind::Return => {
                if ops.is_empty() {
                    "ret void".to_string()
                } else {
                    format!("ret {ty} {}", ops[0])
                }
            }
            InstKind::Phi => {
                let dest = self.name_of(r);
                format!("%{dest} = phi {ty} [{}]", ops.join(", "))
            }
            InstKind::PhiOperand { block } => format!("[{}, {block}]", ops[0]),
            InstKind::Select => {
                let dest = self.name_of(r);
                format!("%{dest} = select {ty} {}, {}, {}", ops[0], ops[1], ops[2])
            }
        }
    }
}

impl CodeGenVisitor for TextualBackend {
    fn visit_global(&mut self, module: &Module, global: GlobalRef) {
        let g = module.global(global);
        let mutability = if g.is_mutable { "mut" } else { "const" };
        write!(self.out, "{} {} @{}: {}", g.linkage, mutability, g.name, g.value_ty).expect("writing to a String cannot fail");
        if let Some(init) = g.init {
            let rendered = self.render_operand(module, init);
            write!(self.out, " = {rendered}").expect("writing to a String cannot fail");
        }
        self.out.push('\n');
    }

    fn visit_function(&mut self, module: &Module, func: FuncRef) {
        self.names.clear();
        self.next_id = 0;
        let f = module.func(func);
        writeln!(self.out, "{} function @{}: {} {{", f.linkage, f.name, f.ty).expect("writing to a String cannot fail");
        for (block_ref, _) in f.blocks_in_order() {
            self.visit_block(module, block_ref);
        }
        self.out.push_str("}\n");
    }

    fn visit_block(&mut self, module: &Module, block: BlockRef) {
        let b = module.func(block.func).block(block);
        let label = b.name.clone().unwrap_or_else(|| block.to_string());
        if b.predecessors.is_empty() {
            writeln!(self.out, "{label}:").expect("writing to a String cannot fail");
        } else {
            let preds: Vec<String> = b.predecessors.iter().map(ToString::to_string).collect();
            writeln!(self.out, "{label}: ; preds: {}", preds.join(", ")).expect("writing to a String cannot fail");
        }
        for &inst in &b.instructions {
            self.visit_instruction(module, inst);
        }
    }

    fn visit_instruction(&mut self, module: &Module, inst: InstRef) {
        let rendered = self.render_instruction(module, inst);
        writeln!(self.out, "  {rendered}").expect("writing to a String cannot fail");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Linkage;

    #[test]
    fn dump_renders_simple_arithmetic() {
        let mut m = Module::new("t");
        let ty = Ty::function(vec![Ty::i32(true), Ty::i32(true)], Ty::i32(true), false);
        let f = m.create_function(Linkage::External, "f", ty);
        let entry = m.create_block(f, None);
        m.set_insert_point(entry);
        let a = m.create_arg_ref(f, 0);
        let b = m.create_arg_ref(f, 1);
        let two = m.get_int32(2);
        let mul = m.create_mul(b, two);
        let sum = m.create_add(a, mul);
        m.create_return(Some(sum));

        let dumped = m.dump();
        assert!(dumped.contains("function @f"));
        assert!(dumped.contains("mul i32 %arg1, constant i32 2"));
        assert!(dumped.contains("add i32 %arg0, %0"));
        assert!(dumped.contains("ret i32 %1"));
    }

    #[test]
    fn dump_is_idempotent_after_sealing() {
        let mut m = Module::new("t");
        let ty = Ty::i32(true);
        m.create_global_var(Linkage::Internal, true, "g", ty, None);
        let first = m.dump();
        let second = m.dump();
        assert_eq!(first, second);
    }

    #[test]
    fn cast_renders_its_true_source_type() {
        let mut m = Module::new("t");
        let ty = Ty::function(vec![Ty::i8(true)], Ty::void(), false);
        let f = m.create_function(Linkage::Internal, "widen", ty);
        let entry = m.create_block(f, None);
        m.set_insert_point(entry);
        let a = m.create_arg_ref(f, 0);
        m.create_cast(a, Ty::i32(true));
        m.create_return(None);

        let dumped = m.dump();
        assert!(dumped.contains("cast i8 %arg0 to i32"), "cast must print its real source type, not void:\n{dumped}");
    }

    #[test]
    fn select_renders_condition_then_both_arms() {
        let mut m = Module::new("t");
        let ty = Ty::function(vec![Ty::bool(), Ty::i32(true), Ty::i32(true)], Ty::i32(true), false);
        let f = m.create_function(Linkage::Internal, "pick", ty);
        let entry = m.create_block(f, None);
        m.set_insert_point(entry);
        let cond = m.create_arg_ref(f, 0);
        let a = m.create_arg_ref(f, 1);
        let b = m.create_arg_ref(f, 2);
        let picked = m.create_select(cond, a, b, Ty::i32(true));
        m.create_return(Some(picked));

        let dumped = m.dump();
        assert!(dumped.contains("select i32 %arg0, %arg1, %arg2"));
    }

    #[test]
    fn branch_and_jump_render_target_labels() {
        let mut m = Module::new("t");
        let ty = Ty::function(vec![Ty::bool()], Ty::void(), false);
        let f = m.create_function(Linkage::Internal, "g", ty);
        let entry = m.create_block(f, None);
        let then_b = m.create_block(f, None);
        let exit = m.create_block(f, None);
        m.set_insert_point(entry);
        let cond = m.create_arg_ref(f, 0);
        m.create_branch(cond, then_b, exit);
        m.set_insert_point(then_b);
        m.create_jump(exit);
        m.set_insert_point(exit);
        m.create_return(None);

        let dumped = m.dump();
        assert!(dumped.contains("br %arg0"));
        assert!(dumped.contains("jump "));
        assert!(dumped.contains("ret void"));
    }
}
