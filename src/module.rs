//! The module: global/function arenas plus the factory API that builds
//! well-typed SSA during lowering (§4.2).
//!
//! Every `create_*` method either appends at the current insert point or,
//! for constants and declarations, is insert-point-agnostic. Precondition
//! violations are contract violations (§7): they panic through
//! `error::fatal` rather than returning a `Result`, matching the design
//! decision that malformed IR is always a caller bug, never a recoverable
//! condition.

use std::collections::HashMap;

use crate::entity::{BlockRef, ConstRef, FuncRef, GlobalRef, InstRef, ValueId};
use crate::error::{fatal, IrError, IrResult};
use crate::function::Function;
use crate::instruction::{AccessKind, BinaryOp, InstKind, Instruction, UnaryOp};
use crate::types::Ty;
use crate::value::{Constant, GlobalVar, Linkage, Use};

const CTOR_NAME: &str = "_$ctor";

/// Top-level IR container. Owns every function and global variable; all
/// cross-references are `*Ref` indices into this module's arenas (§5's
/// ownership discipline).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    pub globals: Vec<GlobalVar>,
    pub constants: Vec<Constant>,
    uses: HashMap<ValueId, Vec<Use>>,
    insert_point: Option<BlockRef>,
    ctor: Option<FuncRef>,
    ctor_sealed: bool,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            functions: Vec::new(),
            globals: Vec::new(),
            constants: Vec::new(),
            uses: HashMap::new(),
            insert_point: None,
            ctor: None,
            ctor_sealed: false,
        }
    }

    fn require(&self, cond: bool, msg: impl Into<String>) {
        if !cond {
            fatal(IrError::contract(msg.into()));
        }
    }

    /// `(function, block)` of the current insert point. Every operation
    /// except constant factories and declarations needs one.
    fn cursor(&self) -> (FuncRef, BlockRef) {
        let b = self
            .insert_point
            .unwrap_or_else(|| fatal(IrError::contract("operation requires an insert point")));
        (b.func, b)
    }

    pub fn set_insert_point(&mut self, block: BlockRef) {
        self.insert_point = Some(block);
    }

    pub fn insert_point(&self) -> Option<BlockRef> {
        self.insert_point
    }

    pub fn func(&self, r: FuncRef) -> &Function {
        &self.functions[r.index()]
    }

    pub fn func_mut(&mut self, r: FuncRef) -> &mut Function {
        &mut self.functions[r.index()]
    }

    pub fn global(&self, r: GlobalRef) -> &GlobalVar {
        &self.globals[r.index()]
    }

    pub fn constant(&self, r: ConstRef) -> &Constant {
        &self.constants[r.index()]
    }

    pub fn uses_of(&self, v: ValueId) -> &[Use] {
        self.uses.get(&v).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The type a value carries as an operand. `Undef` has no real type
    /// of its own — it is typed by the context that consumes it — so it
    /// reports `void` here as a sentinel; callers must not rely on it.
    pub fn value_ty(&self, v: ValueId) -> Ty {
        match v {
            ValueId::Inst(r) => self.functions[r.func.index()].inst(r).ty.clone(),
            ValueId::Arg(f, idx) => self.functions[f.index()]
                .param_ty(idx)
                .cloned()
                .unwrap_or_else(|| fatal(IrError::invalid_ref(format!("{f} has no argument {idx}")))),
            ValueId::Global(g) => self.globals[g.index()].ty.clone(),
            ValueId::Func(f) => self.functions[f.index()].ty.clone(),
            ValueId::Const(c) => self.constants[c.index()].ty(),
            ValueId::Undef => Ty::void(),
        }
    }

    fn record_uses(&mut self, user: InstRef, operands: &[ValueId]) {
        for (i, v) in operands.iter().enumerate() {
            self.uses.entry(*v).or_default().push(Use { user, operand_index: i as u32 });
        }
    }

    fn unrecord_uses(&mut self, user: InstRef, operands: &[ValueId]) {
        for v in operands {
            if let Some(list) = self.uses.get_mut(v) {
                list.retain(|u| u.user != user);
            }
        }
    }

    fn append_inst(
        &mut self,
        func: FuncRef,
        block: BlockRef,
        kind: InstKind,
        operands: Vec<ValueId>,
        ty: Ty,
        original_ty: Option<Ty>,
    ) -> InstRef {
        if let Some(&last) = self.functions[func.index()].block(block).instructions.last() {
            self.require(
                !self.functions[func.index()].inst(last).kind.is_terminator(),
                format!("cannot append after the terminator in {block}"),
            );
        }
        let inst = Instruction { kind, operands: operands.clone(), ty, original_ty, parent: block };
        let r = self.functions[func.index()].push_inst(func, inst);
        self.record_uses(r, &operands);
        self.functions[func.index()].block_mut(block).instructions.push(r);
        r
    }

    /// Allocates an instruction *not* appended to any block's printed
    /// stream — used only for `PhiOperand` nodes, which exist purely to
    /// give each incoming phi edge a use-list-trackable identity.
    fn push_raw_inst(&mut self, func: FuncRef, inst: Instruction) -> InstRef {
        let operands = inst.operands.clone();
        let r = self.functions[func.index()].push_inst(func, inst);
        self.record_uses(r, &operands);
        r
    }

    // ---- functions, blocks, arguments ----------------------------------

    pub fn create_function(&mut self, linkage: Linkage, name: impl Into<String>, ty: Ty) -> FuncRef {
        self.require(ty.is_function(), "create_function requires a Ty::Function");
        let r = FuncRef::new(self.functions.len());
        self.functions.push(Function::new(name, ty, linkage));
        r
    }

    pub fn create_block(&mut self, parent: FuncRef, name: Option<String>) -> BlockRef {
        self.functions[parent.index()].push_block(parent, name)
    }

    pub fn create_arg_ref(&self, function: FuncRef, index: u32) -> ValueId {
        self.require(self.functions[function.index()].param_ty(index).is_some(), "argument index out of range");
        ValueId::Arg(function, index)
    }

    // ---- memory ---------------------------------------------------------

    pub fn create_alloca(&mut self, ty: Ty) -> ValueId {
        self.require(!ty.is_void(), "cannot allocate storage for void");
        let (func, block) = self.cursor();
        let ptr_ty = Ty::pointer(ty, true);
        let r = self.append_inst(func, block, InstKind::Alloca, vec![], ptr_ty, None);
        ValueId::Inst(r)
    }

    /// Materializes a non-addressable SSA value into a fresh stack slot
    /// and returns a pointer to it — the "take the address of a value"
    /// operation `create_init`'s `is_ref` path needs.
    fn get_addr_of(&mut self, value: ValueId) -> ValueId {
        let ty = self.value_ty(value);
        let slot = self.create_alloca(ty);
        self.create_store(value, slot);
        slot
    }

    pub fn create_load(&mut self, ptr: ValueId, is_ref: bool) -> ValueId {
        let ptr_ty = self.value_ty(ptr);
        let pointee = ptr_ty
            .deref()
            .cloned()
            .unwrap_or_else(|| fatal(IrError::contract("load target is not a pointer")));
        let (func, block) = self.cursor();
        let r = self.append_inst(func, block, InstKind::Load { is_ref }, vec![ptr], pointee, None);
        let v = ValueId::Inst(r);
        if is_ref {
            self.create_load(v, false)
        } else {
            v
        }
    }

    /// `ptr`'s pointee not accepting `value`'s type, when `ptr` was
    /// produced for a front-end reference local, means `ptr` is actually
    /// one indirection short of the real target: it points at the real
    /// pointer rather than at the value. We peel one load and retry,
    /// mirroring `create_load`'s own `is_ref` recursion.
    pub fn create_store(&mut self, value: ValueId, mut ptr: ValueId) {
        let mut value = value;
        loop {
            let ptr_ty = self.value_ty(ptr);
            let pointee = ptr_ty
                .deref()
                .cloned()
                .unwrap_or_else(|| fatal(IrError::contract("store target is not a pointer")));
            let value_ty = self.value_ty(value);
            if Ty::can_accept(&pointee, &value_ty) {
                if !Ty::is_identical(&pointee, &value_ty) {
                    value = self.create_cast(value, pointee);
                }
                break;
            }
            if pointee.is_pointer() {
                ptr = self.create_load(ptr, false);
                continue;
            }
            fatal(IrError::contract(format!("cannot store {value_ty} through {ptr_ty}")));
        }
        let (func, block) = self.cursor();
        self.append_inst(func, block, InstKind::Store, vec![value, ptr], Ty::void(), None);
    }

    pub fn create_init(&mut self, value: ValueId, ptr: ValueId, is_ref: bool) {
        let value = if is_ref { self.get_addr_of(value) } else { value };
        self.create_store(value, ptr);
    }

    // ---- control flow -----------------------------------------------------

    pub fn create_jump(&mut self, target: BlockRef) {
        let (func, block) = self.cursor();
        self.append_inst(func, block, InstKind::Jump { target }, vec![], Ty::void(), None);
        self.functions[target.func.index()].block_mut(target).predecessors.push(block);
    }

    pub fn create_branch(&mut self, cond: ValueId, then_block: BlockRef, else_block: BlockRef) {
        self.require(self.value_ty(cond).is_integer(), "branch condition must be integer-typed");
        let (func, block) = self.cursor();
        self.append_inst(func, block, InstKind::Branch { then_block, else_block }, vec![cond], Ty::void(), None);
        self.functions[then_block.func.index()].block_mut(then_block).predecessors.push(block);
        self.functions[else_block.func.index()].block_mut(else_block).predecessors.push(block);
    }

    pub fn create_return(&mut self, value: Option<ValueId>) {
        let (func, block) = self.cursor();
        let ret_ty = self.functions[func.index()].return_ty().clone();
        match &value {
            None => self.require(ret_ty.is_void(), "non-void function requires a return value"),
            Some(v) => {
                let vt = self.value_ty(*v);
                self.require(
                    Ty::is_identical(&ret_ty.trivial(), &vt.trivial()),
                    format!("return type mismatch: expected {ret_ty}, got {vt}"),
                );
            }
        }
        let operands: Vec<ValueId> = value.into_iter().collect();
        self.append_inst(func, block, InstKind::Return, operands, Ty::void(), None);
    }

    pub fn create_call(&mut self, callee: ValueId, args: Vec<ValueId>) -> ValueId {
        let callee_ty = self.value_ty(callee);
        let params = callee_ty
            .args()
            .unwrap_or_else(|| fatal(IrError::contract("call target is not a function")))
            .to_vec();
        let variadic = matches!(&callee_ty, Ty::Function { variadic, .. } if *variadic);
        self.require(
            args.len() == params.len() || (variadic && args.len() >= params.len()),
            "argument count does not match callee's parameter count",
        );
        let mut operands = Vec::with_capacity(args.len() + 1);
        operands.push(callee);
        for (i, arg) in args.into_iter().enumerate() {
            let coerced = match params.get(i) {
                Some(pty) => {
                    let at = self.value_ty(arg);
                    if Ty::is_identical(pty, &at) {
                        arg
                    } else {
                        self.create_cast(arg, pty.clone())
                    }
                }
                None => arg,
            };
            operands.push(coerced);
        }
        let ret_ty = callee_ty.return_ty().cloned().expect("function type always has a return type");
        let (func, block) = self.cursor();
        let r = self.append_inst(func, block, InstKind::Call, operands, ret_ty, None);
        ValueId::Inst(r)
    }

    // ---- addressing ---------------------------------------------------

    pub fn create_ptr_access(&mut self, ptr: ValueId, index: ValueId) -> ValueId {
        let ptr_ty = self.value_ty(ptr);
        self.require(ptr_ty.is_pointer(), "ptr_access requires a pointer operand");
        let (func, block) = self.cursor();
        let r = self.append_inst(func, block, InstKind::Access(AccessKind::Pointer), vec![ptr, index], ptr_ty, None);
        ValueId::Inst(r)
    }

    pub fn create_elem_access(&mut self, ptr_or_aggregate: ValueId, index: ValueId, elem_ty: Ty) -> ValueId {
        let ty = self.value_ty(ptr_or_aggregate);
        let ptr = if ty.is_pointer() { ptr_or_aggregate } else { self.get_addr_of(ptr_or_aggregate) };
        let pointee = self
            .value_ty(ptr)
            .deref()
            .cloned()
            .unwrap_or_else(|| fatal(IrError::contract("elem_access target is not addressable")));
        self.require(pointee.length().is_some(), "elem_access target has no defined length");
        let result_ty = Ty::pointer(elem_ty, true);
        let (func, block) = self.cursor();
        let r = self.append_inst(func, block, InstKind::Access(AccessKind::Element), vec![ptr, index], result_ty, None);
        ValueId::Inst(r)
    }

    // ---- arithmetic -----------------------------------------------------

    pub fn create_binary(&mut self, op: BinaryOp, l: ValueId, r: ValueId, result_ty: Ty) -> ValueId {
        let (func, block) = self.cursor();
        let inst = self.append_inst(func, block, InstKind::Binary(op), vec![l, r], result_ty, None);
        ValueId::Inst(inst)
    }

    pub fn create_unary(&mut self, op: UnaryOp, x: ValueId, ty: Ty) -> ValueId {
        let (func, block) = self.cursor();
        let inst = self.append_inst(func, block, InstKind::Unary(op), vec![x], ty, None);
        ValueId::Inst(inst)
    }

    fn matching_integer_operands(&self, l: ValueId, r: ValueId, what: &str) -> Ty {
        let lt = self.value_ty(l);
        let rt = self.value_ty(r);
        self.require(lt.is_integer() && Ty::is_identical(&lt, &rt), format!("{what} requires matching integer operands"));
        lt
    }

    pub fn create_add(&mut self, l: ValueId, r: ValueId) -> ValueId {
        let ty = self.matching_integer_operands(l, r, "add");
        self.create_binary(BinaryOp::Add, l, r, ty)
    }

    pub fn create_sub(&mut self, l: ValueId, r: ValueId) -> ValueId {
        let ty = self.matching_integer_operands(l, r, "sub");
        self.create_binary(BinaryOp::Sub, l, r, ty)
    }

    pub fn create_mul(&mut self, l: ValueId, r: ValueId) -> ValueId {
        let ty = self.matching_integer_operands(l, r, "mul");
        self.create_binary(BinaryOp::Mul, l, r, ty)
    }

    pub fn create_div(&mut self, l: ValueId, r: ValueId) -> ValueId {
        let ty = self.matching_integer_operands(l, r, "div");
        let op = if ty.is_unsigned() { BinaryOp::UDiv } else { BinaryOp::SDiv };
        self.create_binary(op, l, r, ty)
    }

    pub fn create_rem(&mut self, l: ValueId, r: ValueId) -> ValueId {
        let ty = self.matching_integer_operands(l, r, "rem");
        let op = if ty.is_unsigned() { BinaryOp::URem } else { BinaryOp::SRem };
        self.create_binary(op, l, r, ty)
    }

    pub fn create_and(&mut self, l: ValueId, r: ValueId) -> ValueId {
        let ty = self.matching_integer_operands(l, r, "and");
        self.create_binary(BinaryOp::And, l, r, ty)
    }

    pub fn create_or(&mut self, l: ValueId, r: ValueId) -> ValueId {
        let ty = self.matching_integer_operands(l, r, "or");
        self.create_binary(BinaryOp::Or, l, r, ty)
    }

    pub fn create_xor(&mut self, l: ValueId, r: ValueId) -> ValueId {
        let ty = self.matching_integer_operands(l, r, "xor");
        self.create_binary(BinaryOp::Xor, l, r, ty)
    }

    pub fn create_shl(&mut self, l: ValueId, r: ValueId) -> ValueId {
        let ty = self.matching_integer_operands(l, r, "shl");
        self.create_binary(BinaryOp::Shl, l, r, ty)
    }

    pub fn create_shr(&mut self, l: ValueId, r: ValueId) -> ValueId {
        let ty = self.matching_integer_operands(l, r, "shr");
        let op = if ty.is_unsigned() { BinaryOp::Lshr } else { BinaryOp::Ashr };
        self.create_binary(op, l, r, ty)
    }

    fn cmp_op(&self, lt: &Ty, signed: BinaryOp, unsigned: BinaryOp) -> BinaryOp {
        if lt.is_unsigned() || lt.is_pointer() {
            unsigned
        } else {
            signed
        }
    }

    pub fn create_lt(&mut self, l: ValueId, r: ValueId) -> ValueId {
        let lt = self.value_ty(l);
        let op = self.cmp_op(&lt, BinaryOp::Slt, BinaryOp::Ult);
        self.create_binary(op, l, r, Ty::i32(true))
    }

    pub fn create_le(&mut self, l: ValueId, r: ValueId) -> ValueId {
        let lt = self.value_ty(l);
        let op = self.cmp_op(&lt, BinaryOp::Sle, BinaryOp::Ule);
        self.create_binary(op, l, r, Ty::i32(true))
    }

    pub fn create_gt(&mut self, l: ValueId, r: ValueId) -> ValueId {
        let lt = self.value_ty(l);
        let op = self.cmp_op(&lt, BinaryOp::Sgt, BinaryOp::Ugt);
        self.create_binary(op, l, r, Ty::i32(true))
    }

    pub fn create_ge(&mut self, l: ValueId, r: ValueId) -> ValueId {
        let lt = self.value_ty(l);
        let op = self.cmp_op(&lt, BinaryOp::Sge, BinaryOp::Uge);
        self.create_binary(op, l, r, Ty::i32(true))
    }

    pub fn create_eq(&mut self, l: ValueId, r: ValueId) -> ValueId {
        let lt = self.value_ty(l);
        self.require(lt.is_integer() || lt.is_function() || lt.is_pointer(), "eq requires integer, function or pointer operands");
        self.create_binary(BinaryOp::Eq, l, r, Ty::i32(true))
    }

    pub fn create_ne(&mut self, l: ValueId, r: ValueId) -> ValueId {
        let lt = self.value_ty(l);
        self.require(lt.is_integer() || lt.is_function() || lt.is_pointer(), "neq requires integer, function or pointer operands");
        self.create_binary(BinaryOp::Neq, l, r, Ty::i32(true))
    }

    pub fn create_neg(&mut self, x: ValueId) -> ValueId {
        let ty = self.value_ty(x);
        self.require(ty.is_integer(), "neg requires an integer operand");
        self.create_unary(UnaryOp::Neg, x, ty)
    }

    pub fn create_not(&mut self, x: ValueId) -> ValueId {
        let ty = self.value_ty(x);
        self.require(ty.is_integer(), "not requires an integer operand");
        self.create_unary(UnaryOp::Not, x, ty)
    }

    pub fn create_lnot(&mut self, x: ValueId) -> ValueId {
        let ty = self.value_ty(x);
        self.require(ty.is_integer(), "lnot requires an integer operand");
        self.create_unary(UnaryOp::LogicNot, x, Ty::i32(true))
    }

    /// `cond ? if_true : if_false`, all three operands evaluated eagerly
    /// (no branching) — the ternary-expression lowering target and, per
    /// §4.5, a kind LICM may hoist like any other pure arithmetic op.
    pub fn create_select(&mut self, cond: ValueId, if_true: ValueId, if_false: ValueId, ty: Ty) -> ValueId {
        self.require(self.value_ty(cond).is_integer(), "select condition must be integer-typed");
        let (func, block) = self.cursor();
        let r = self.append_inst(func, block, InstKind::Select, vec![cond, if_true, if_false], ty, None);
        ValueId::Inst(r)
    }

    // ---- casts ------------------------------------------------------------

    pub fn create_cast(&mut self, value: ValueId, dst: Ty) -> ValueId {
        let src_ty = self.value_ty(value);
        if Ty::is_identical(&src_ty, &dst) {
            return value;
        }
        let value = match (&src_ty, value) {
            (Ty::Array { .. }, v) => {
                let zero = self.get_int32(0);
                self.create_ptr_access(v, zero)
            }
            _ => value,
        };
        let src_ty = self.value_ty(value);
        self.require(Ty::can_cast_to(&dst, &src_ty), format!("illegal cast from {src_ty} to {dst}"));
        if let ValueId::Const(c) = value {
            return self.const_cast(c, &dst);
        }
        let (func, block) = self.cursor();
        let r = self.append_inst(func, block, InstKind::Cast, vec![value], dst, Some(src_ty));
        ValueId::Inst(r)
    }

    /// A cast of a constant is itself a constant expression — it is never
    /// inserted as a `Cast` instruction into any block.
    fn const_cast(&mut self, c: ConstRef, dst: &Ty) -> ValueId {
        let folded = match &self.constants[c.index()] {
            Constant::ConstInt { value, .. } if dst.is_integer() => {
                let mask = if dst.size() >= 4 { u32::MAX } else { (1u32 << (dst.size() * 8)) - 1 };
                Constant::ConstInt { value: value & mask, ty: dst.clone() }
            }
            Constant::ConstZero(_) => Constant::ConstZero(dst.clone()),
            other => {
                let mut retyped = other.clone();
                match &mut retyped {
                    Constant::ConstInt { ty, .. }
                    | Constant::ConstStr { ty, .. }
                    | Constant::ConstStruct { ty, .. }
                    | Constant::ConstArray { ty, .. } => *ty = dst.clone(),
                    Constant::ConstZero(ty) => *ty = dst.clone(),
                }
                retyped
            }
        };
        let r = ConstRef::new(self.constants.len());
        self.constants.push(folded);
        ValueId::Const(r)
    }

    // ---- constants ----------------------------------------------------

    fn push_const(&mut self, c: Constant) -> ValueId {
        let r = ConstRef::new(self.constants.len());
        self.constants.push(c);
        ValueId::Const(r)
    }

    pub fn get_zero(&mut self, ty: Ty) -> ValueId {
        self.push_const(Constant::ConstZero(ty))
    }

    pub fn get_int(&mut self, value: u32, ty: Ty) -> ValueId {
        self.require(ty.is_integer(), "get_int requires an integer type");
        self.push_const(Constant::ConstInt { value, ty })
    }

    pub fn get_int32(&mut self, value: u32) -> ValueId {
        self.get_int(value, Ty::i32(true))
    }

    pub fn get_bool(&mut self, value: bool) -> ValueId {
        self.get_int(value as u32, Ty::bool())
    }

    pub fn get_string(&mut self, bytes: Vec<u8>, char_ptr_ty: Ty) -> ValueId {
        self.require(char_ptr_ty.is_pointer(), "string constant requires a pointer type");
        self.push_const(Constant::ConstStr { bytes, ty: char_ptr_ty })
    }

    pub fn get_struct(&mut self, fields: Vec<ValueId>, ty: Ty) -> ValueId {
        let field_tys = match &ty {
            Ty::Struct { fields } => fields.clone(),
            _ => fatal(IrError::contract("get_struct requires a struct type")),
        };
        self.require(fields.len() == field_tys.len(), "get_struct field count mismatch");
        let mut refs = Vec::with_capacity(fields.len());
        for (v, fty) in fields.into_iter().zip(field_tys.iter()) {
            match v {
                ValueId::Const(c) => {
                    self.require(Ty::is_identical(&self.constants[c.index()].ty(), fty), "get_struct field type mismatch");
                    refs.push(c);
                }
                _ => fatal(IrError::contract("get_struct fields must all be constants")),
            }
        }
        self.push_const(Constant::ConstStruct { fields: refs, ty })
    }

    pub fn get_array(&mut self, elems: Vec<ValueId>, ty: Ty) -> ValueId {
        let elem_ty = match &ty {
            Ty::Array { elem, .. } => (**elem).clone(),
            _ => fatal(IrError::contract("get_array requires an array type")),
        };
        let mut refs = Vec::with_capacity(elems.len());
        for v in elems {
            match v {
                ValueId::Const(c) => {
                    self.require(Ty::is_identical(&self.constants[c.index()].ty(), &elem_ty), "get_array element type mismatch");
                    refs.push(c);
                }
                _ => fatal(IrError::contract("get_array elements must all be constants")),
            }
        }
        self.push_const(Constant::ConstArray { elems: refs, ty })
    }

    // ---- globals and the synthetic constructor -------------------------

    pub fn create_global_var(
        &mut self,
        linkage: Linkage,
        is_mutable: bool,
        name: impl Into<String>,
        ty: Ty,
        init: Option<ValueId>,
    ) -> GlobalRef {
        let trivial = ty.trivial();
        if let Some(v) = init {
            match v {
                ValueId::Const(c) => self.require(
                    Ty::is_identical(&self.constants[c.index()].ty(), &trivial),
                    "global initializer type mismatch",
                ),
                _ => fatal(IrError::contract("global initializer must be a constant")),
            }
        }
        let global = GlobalVar {
            linkage,
            is_mutable,
            name: name.into(),
            value_ty: trivial.clone(),
            ty: Ty::pointer(trivial.clone(), false),
            original_ty: Ty::pointer(ty, false),
            init,
        };
        let r = GlobalRef::new(self.globals.len());
        self.globals.push(global);
        r
    }

    fn ensure_ctor(&mut self) -> FuncRef {
        if let Some(f) = self.ctor {
            return f;
        }
        let ty = Ty::function(vec![], Ty::void(), false);
        let f = self.create_function(Linkage::GlobalCtor, CTOR_NAME, ty);
        let entry = self.create_block(f, Some("entry".to_string()));
        let exit = self.create_block(f, Some("exit".to_string()));
        self.append_inst(f, exit, InstKind::Return, vec![], Ty::void(), None);
        let _ = entry;
        self.ctor = Some(f);
        self.ctor_sealed = false;
        f
    }

    /// Scoped-acquires the constructor's entry block as the insert point;
    /// the previous insert point is restored when the guard drops, on
    /// every exit path.
    pub fn enter_global_ctor(&mut self) -> GlobalCtorGuard<'_> {
        let f = self.ensure_ctor();
        let entry = self.functions[f.index()].entry.expect("ctor always has an entry block");
        let prev = self.insert_point;
        self.insert_point = Some(entry);
        GlobalCtorGuard { module: self, prev }
    }

    /// Links the constructor's entry to its exit with an unconditional
    /// jump. Idempotent: a second call is a no-op, and sealing a module
    /// with no non-constant initializers (no constructor ever created)
    /// is also a no-op.
    pub fn seal_global_ctor(&mut self) {
        let Some(f) = self.ctor else { return };
        if self.ctor_sealed {
            return;
        }
        let entry = self.functions[f.index()].entry.expect("ctor always has an entry block");
        let exit = BlockRef::new(f, 1);
        let saved = self.insert_point;
        self.insert_point = Some(entry);
        self.create_jump(exit);
        self.insert_point = saved;
        self.ctor_sealed = true;
    }

    pub fn ctor(&self) -> Option<FuncRef> {
        self.ctor
    }

    // ---- phis -----------------------------------------------------------

    pub fn create_phi(&mut self, ty: Ty) -> ValueId {
        let (func, block) = self.cursor();
        let r = self.append_inst(func, block, InstKind::Phi, vec![], ty, None);
        ValueId::Inst(r)
    }

    /// Adds one incoming edge to a phi. Per §3 invariant 5, `phi` must
    /// eventually carry exactly one operand per predecessor of its own
    /// parent block, each with the phi's own type.
    pub fn add_incoming(&mut self, phi: InstRef, pred: BlockRef, value: ValueId) {
        let func = phi.func;
        let vty = self.value_ty(value);
        let phi_ty = self.functions[func.index()].inst(phi).ty.clone();
        self.require(Ty::is_identical(&vty, &phi_ty), "phi operand type mismatch");
        let operand_inst = Instruction {
            kind: InstKind::PhiOperand { block: pred },
            operands: vec![value],
            ty: vty,
            original_ty: None,
            parent: pred,
        };
        let opref = self.push_raw_inst(func, operand_inst);
        let operand_value = ValueId::Inst(opref);
        let index = self.functions[func.index()].inst(phi).operands.len() as u32;
        self.functions[func.index()].inst_mut(phi).operands.push(operand_value);
        self.uses.entry(operand_value).or_default().push(Use { user: phi, operand_index: index });
    }

    // ---- transform support ----------------------------------------------

    /// Rewrites every use of `old` to consume `new` instead, in place —
    /// the operation LICM-adjacent passes rely on to fold duplicate
    /// computations without re-scanning the whole module.
    pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) {
        let uses = self.uses.remove(&old).unwrap_or_default();
        for u in &uses {
            self.functions[u.user.func.index()].inst_mut(u.user).operands[u.operand_index as usize] = new;
        }
        self.uses.entry(new).or_default().extend(uses);
    }

    /// Removes an instruction from its block. Fails as a contract
    /// violation if its use-list is non-empty — callers must
    /// `replace_all_uses_with` first (§3's lifecycle rule).
    pub fn remove_instruction(&mut self, r: InstRef) -> IrResult<()> {
        if !self.uses.get(&ValueId::Inst(r)).map_or(true, Vec::is_empty) {
            return Err(IrError::contract(format!("cannot remove {r}: use-list is not empty")));
        }
        let operands = self.functions[r.func.index()].inst(r).operands.clone();
        self.unrecord_uses(r, &operands);
        let block = self.functions[r.func.index()].inst(r).parent;
        self.functions[r.func.index()].block_mut(block).instructions.retain(|&i| i != r);
        Ok(())
    }

    /// Relocates an instruction to `dest`, inserted immediately before
    /// `dest`'s terminator — the primitive LICM's hoist step uses. The
    /// instruction's identity (`InstRef`) is unchanged, so every operand
    /// reference elsewhere in the function stays valid.
    pub fn move_instruction(&mut self, r: InstRef, dest: BlockRef) {
        let func = r.func;
        let src = self.functions[func.index()].inst(r).parent;
        self.functions[func.index()].block_mut(src).instructions.retain(|&i| i != r);
        let dest_block = self.functions[func.index()].block_mut(dest);
        let insert_at = dest_block
            .instructions
            .last()
            .map_or(dest_block.instructions.len(), |_| dest_block.instructions.len() - 1);
        dest_block.instructions.insert(insert_at, r);
        self.functions[func.index()].inst_mut(r).parent = dest;
    }

    /// Which block, if any, currently owns the printed instruction `r`.
    pub fn block_of(&self, r: InstRef) -> BlockRef {
        self.functions[r.func.index()].inst(r).parent
    }

    /// CFG successors of `block`, read off its terminator. Empty for an
    /// unterminated (still-building) block.
    pub fn successors(&self, block: BlockRef) -> Vec<BlockRef> {
        let func = &self.functions[block.func.index()];
        match func.block(block).instructions.last() {
            Some(&last) => match func.inst(last).kind {
                InstKind::Jump { target } => vec![target],
                InstKind::Branch { then_block, else_block } => vec![then_block, else_block],
                _ => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    /// Runs `pass_manager` over this module (§6's `module.run_passes`
    /// entry point), sealing the global constructor first so every pass
    /// sees a closed CFG.
    pub fn run_passes(&mut self, pass_manager: &mut crate::pass::PassManager) -> IrResult<()> {
        self.seal_global_ctor();
        pass_manager.run_passes(self)
    }

    /// Drives `backend` over this module (§6's `module.generate_code`
    /// entry point), sealing the global constructor first.
    pub fn generate_code(&mut self, backend: &mut dyn crate::codegen::CodeGenVisitor) {
        self.seal_global_ctor();
        crate::codegen::drive(self, backend);
    }

    /// The textual snapshot format (§6). Sealing first makes repeated
    /// calls idempotent: `dump()` twice in a row is byte-identical.
    pub fn dump(&mut self) -> String {
        self.seal_global_ctor();
        let mut backend = crate::codegen::TextualBackend::new();
        crate::codegen::drive(self, &mut backend);
        backend.into_string()
    }
}

/// RAII guard returned by `enter_global_ctor`. Dropping it (including via
/// early return or panic unwinding during lowering) restores the insert
/// point that was active before the constructor scope was entered.
pub struct GlobalCtorGuard<'a> {
    module: &'a mut Module,
    prev: Option<BlockRef>,
}

impl Drop for GlobalCtorGuard<'_> {
    fn drop(&mut self) {
        self.module.insert_point = self.prev;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_fn(m: &mut Module, name: &str, params: usize) -> (FuncRef, BlockRef) {
        let ty = Ty::function(vec![Ty::i32(true); params], Ty::i32(true), false);
        let f = m.create_function(Linkage::Internal, name, ty);
        let b = m.create_block(f, None);
        m.set_insert_point(b);
        (f, b)
    }

    #[test]
    fn simple_arithmetic_builds_expected_operand_chain() {
        let mut m = Module::new("t");
        let (f, _b) = int_fn(&mut m, "f", 2);
        let a = m.create_arg_ref(f, 0);
        let b = m.create_arg_ref(f, 1);
        let two = m.get_int32(2);
        let mul = m.create_mul(b, two);
        let add = m.create_add(a, mul);
        m.create_return(Some(add));
        let func = m.func(f);
        assert_eq!(func.blocks[0].instructions.len(), 3);
        assert!(func.inst(*func.blocks[0].instructions.last().unwrap()).kind.is_terminator());
    }

    #[test]
    fn store_inserts_exactly_one_cast_when_widening() {
        let mut m = Module::new("t");
        let (_f, _b) = int_fn(&mut m, "f", 0);
        let ptr = m.create_alloca(Ty::i32(true));
        let short = m.get_int(3, Ty::i8(true));
        m.create_store(short, ptr);
        let func = m.func(FuncRef::new(0));
        let casts = func.instructions.iter().filter(|i| matches!(i.kind, InstKind::Cast)).count();
        assert_eq!(casts, 1);
    }

    #[test]
    fn store_of_identical_type_inserts_no_cast() {
        let mut m = Module::new("t");
        int_fn(&mut m, "f", 0);
        let ptr = m.create_alloca(Ty::i32(true));
        let v = m.get_int32(3);
        m.create_store(v, ptr);
        let func = m.func(FuncRef::new(0));
        assert!(!func.instructions.iter().any(|i| matches!(i.kind, InstKind::Cast)));
    }

    #[test]
    fn cast_to_identical_type_is_a_noop() {
        let mut m = Module::new("t");
        int_fn(&mut m, "f", 1);
        let a = m.create_arg_ref(FuncRef::new(0), 0);
        let same = m.create_cast(a, Ty::i32(true));
        assert_eq!(a, same);
    }

    #[test]
    fn seal_global_ctor_is_idempotent() {
        let mut m = Module::new("t");
        {
            let _g = m.enter_global_ctor();
        }
        m.seal_global_ctor();
        let first = format!("{:?}", m.func(m.ctor().unwrap()));
        m.seal_global_ctor();
        let second = format!("{:?}", m.func(m.ctor().unwrap()));
        assert_eq!(first, second);
    }

    #[test]
    fn global_ctor_entry_jumps_to_exit_once_sealed() {
        let mut m = Module::new("t");
        let g = m.create_global_var(Linkage::Internal, true, "g", Ty::i32(true), None);
        {
            let _guard = m.enter_global_ctor();
            let gptr = ValueId::Global(g);
            let val = m.get_int32(7);
            m.create_store(val, gptr);
        }
        m.seal_global_ctor();
        let ctor = m.func(m.ctor().unwrap());
        let entry = ctor.entry.unwrap();
        let last = *ctor.block(entry).instructions.last().unwrap();
        assert!(matches!(ctor.inst(last).kind, InstKind::Jump { .. }));
    }

    #[test]
    fn remove_instruction_requires_empty_use_list() {
        let mut m = Module::new("t");
        int_fn(&mut m, "f", 1);
        let a = m.create_arg_ref(FuncRef::new(0), 0);
        let one = m.get_int32(1);
        let add = m.create_add(a, one);
        let add_ref = match add {
            ValueId::Inst(r) => r,
            _ => unreachable!(),
        };
        m.create_return(Some(add));
        assert!(m.remove_instruction(add_ref).is_err());
    }
}
