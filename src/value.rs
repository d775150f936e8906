//! Uses, constants and global variables — the non-instruction members of
//! the Value hierarchy (§3).

use std::fmt;

use crate::entity::{ConstRef, InstRef, ValueId};
use crate::types::Ty;

/// A directed def-use edge: `user` consumes the value recorded at
/// `operand_index` in its own operand list. Removing a `Use` from a
/// value's use-list is conceptually O(1) in the original intrusive
/// design; here it is a `Vec::swap_remove` against the side table kept
/// in `Module::uses` (see `entity.rs`'s module doc for why).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Use {
    pub user: InstRef,
    pub operand_index: u32,
}

/// Visibility/semantics of a top-level symbol (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Linkage {
    Internal,
    Inline,
    External,
    GlobalCtor,
    GlobalDtor,
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Linkage::Internal => "internal",
            Linkage::Inline => "inline",
            Linkage::External => "external",
            Linkage::GlobalCtor => "global_ctor",
            Linkage::GlobalDtor => "global_dtor",
        };
        write!(f, "{s}")
    }
}

/// A compile-time constant value (§3). `ConstStr` carries its own pointer
/// type explicitly (per §4.2's `get_string(bytes, char-ptr-type)`) rather
/// than deriving one, since the char type is a front-end policy choice.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Constant {
    ConstInt { value: u32, ty: Ty },
    ConstStr { bytes: Vec<u8>, ty: Ty },
    ConstStruct { fields: Vec<ConstRef>, ty: Ty },
    ConstArray { elems: Vec<ConstRef>, ty: Ty },
    ConstZero(Ty),
}

impl Constant {
    pub fn ty(&self) -> Ty {
        match self {
            Constant::ConstInt { ty, .. } => ty.clone(),
            Constant::ConstStr { ty, .. } => ty.clone(),
            Constant::ConstStruct { ty, .. } => ty.clone(),
            Constant::ConstArray { ty, .. } => ty.clone(),
            Constant::ConstZero(ty) => ty.clone(),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::ConstInt { value, ty } => write!(f, "constant {ty} {value}"),
            Constant::ConstStr { bytes, ty } => {
                write!(f, "constant {ty} \"{}\"", String::from_utf8_lossy(bytes).escape_default())
            }
            Constant::ConstStruct { fields, ty } => {
                write!(f, "constant {ty} {{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, "}}")
            }
            Constant::ConstArray { elems, ty } => {
                write!(f, "constant {ty} [")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
            Constant::ConstZero(ty) => write!(f, "constant {ty} zeroinitializer"),
        }
    }
}

/// A module-level global variable (§4.2's `create_global_var`).
///
/// Its primary type is `Pointer(trivial_type, mutable=false)` — a global
/// is always addressed through a pointer — while `original_ty` keeps the
/// pre-trivialization `Pointer(type)` view the builder needs when
/// deciding whether a store through it requires re-addressing.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GlobalVar {
    pub linkage: Linkage,
    pub is_mutable: bool,
    pub name: String,
    pub value_ty: Ty,
    pub ty: Ty,
    pub original_ty: Ty,
    pub init: Option<ValueId>,
}

impl fmt::Display for GlobalVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "global {} {} @{}: {}",
            self.linkage,
            if self.is_mutable { "mut" } else { "const" },
            self.name,
            self.value_ty
        )?;
        if let Some(init) = &self.init {
            write!(f, " = {init}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linkage_renders_as_spec_tokens() {
        assert_eq!(Linkage::Internal.to_string(), "internal");
        assert_eq!(Linkage::GlobalCtor.to_string(), "global_ctor");
    }

    #[test]
    fn const_int_displays_with_type() {
        let c = Constant::ConstInt { value: 2, ty: Ty::i32(true) };
        assert_eq!(c.to_string(), "constant i32 2");
    }
}
