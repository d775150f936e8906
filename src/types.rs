//! The type system consumed by the builder (§4.1).

use std::fmt;

/// Primitive kinds. `Void` carries no value and is never `is_basic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PrimKind {
    Void,
    Int8,
    Int32,
    Bool,
}

/// A type in the IR's tagged-variant type system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Ty {
    Prim { kind: PrimKind, signed: bool },
    Pointer { pointee: Box<Ty>, mutable: bool },
    Array { elem: Box<Ty>, length: u32 },
    Struct { fields: Vec<Ty> },
    Function { params: Vec<Ty>, ret: Box<Ty>, variadic: bool },
    Enum { underlying: Box<Ty> },
}

impl Ty {
    pub fn void() -> Ty {
        Ty::Prim { kind: PrimKind::Void, signed: false }
    }

    pub fn bool() -> Ty {
        Ty::Prim { kind: PrimKind::Bool, signed: false }
    }

    pub fn i8(signed: bool) -> Ty {
        Ty::Prim { kind: PrimKind::Int8, signed }
    }

    pub fn i32(signed: bool) -> Ty {
        Ty::Prim { kind: PrimKind::Int32, signed }
    }

    pub fn pointer(pointee: Ty, mutable: bool) -> Ty {
        Ty::Pointer { pointee: Box::new(pointee), mutable }
    }

    pub fn array(elem: Ty, length: u32) -> Ty {
        Ty::Array { elem: Box::new(elem), length }
    }

    pub fn struct_of(fields: Vec<Ty>) -> Ty {
        Ty::Struct { fields }
    }

    pub fn function(params: Vec<Ty>, ret: Ty, variadic: bool) -> Ty {
        Ty::Function { params, ret: Box::new(ret), variadic }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Ty::Prim { kind: PrimKind::Void, .. })
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Ty::Prim { kind: PrimKind::Int8 | PrimKind::Int32 | PrimKind::Bool, .. }
        ) || matches!(self, Ty::Enum { .. })
    }

    pub fn is_unsigned(&self) -> bool {
        match self {
            Ty::Prim { signed, .. } => !signed,
            Ty::Pointer { .. } => true,
            Ty::Enum { underlying } => underlying.is_unsigned(),
            _ => false,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Ty::Pointer { .. })
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Ty::Function { .. })
    }

    /// Prim excluding void: the types that can sit in a register.
    pub fn is_basic(&self) -> bool {
        matches!(self, Ty::Prim { kind, .. } if *kind != PrimKind::Void)
    }

    /// Storage size in bytes.
    pub fn size(&self) -> u32 {
        match self {
            Ty::Prim { kind: PrimKind::Void, .. } => 0,
            Ty::Prim { kind: PrimKind::Bool, .. } => 1,
            Ty::Prim { kind: PrimKind::Int8, .. } => 1,
            Ty::Prim { kind: PrimKind::Int32, .. } => 4,
            Ty::Pointer { .. } => 8,
            Ty::Array { elem, length } => elem.size() * length,
            Ty::Struct { fields } => fields.iter().map(Ty::size).sum(),
            Ty::Function { .. } => 8,
            Ty::Enum { underlying } => underlying.size(),
        }
    }

    pub fn align(&self) -> u32 {
        match self {
            Ty::Array { elem, .. } => elem.align(),
            Ty::Struct { fields } => fields.iter().map(Ty::align).max().unwrap_or(1),
            Ty::Enum { underlying } => underlying.align(),
            other => other.size().max(1),
        }
    }

    /// Element count for an array, field count for a struct.
    pub fn length(&self) -> Option<u32> {
        match self {
            Ty::Array { length, .. } => Some(*length),
            Ty::Struct { fields } => Some(fields.len() as u32),
            _ => None,
        }
    }

    /// The pointee for a pointer, the element type for an array.
    pub fn deref(&self) -> Option<&Ty> {
        match self {
            Ty::Pointer { pointee, .. } => Some(pointee),
            Ty::Array { elem, .. } => Some(elem),
            _ => None,
        }
    }

    pub fn args(&self) -> Option<&[Ty]> {
        match self {
            Ty::Function { params, .. } => Some(params),
            _ => None,
        }
    }

    pub fn return_ty(&self) -> Option<&Ty> {
        match self {
            Ty::Function { ret, .. } => Some(ret),
            _ => None,
        }
    }

    /// Strips reference/const attributes, leaving the SSA-typing view.
    /// Attributes do not exist as a `Ty` variant in this core (the
    /// front end's reference/const qualifiers never reach the builder as
    /// part of `Ty` — see `Value::original_type`), so for `Ty` itself
    /// trivialization is the identity function; it exists so callers can
    /// treat "trivial view" uniformly whether they hold a `Ty` or a
    /// `Value`.
    pub fn trivial(&self) -> Ty {
        self.clone()
    }

    /// Structural equality, ignoring attributes the SSA type view does
    /// not carry (mutability of a pointer is part of structure here,
    /// matching the spec's `Pointer(pointee, mutable)` variant).
    pub fn is_identical(a: &Ty, b: &Ty) -> bool {
        a == b
    }

    /// Can `src` be implicitly converted to `dst`?
    pub fn can_accept(dst: &Ty, src: &Ty) -> bool {
        if Ty::is_identical(dst, src) {
            return true;
        }
        match (dst, src) {
            // Integers widen and sign-convert; same-width cast is identity
            // (already handled above), narrowing is NOT implicit.
            (Ty::Prim { kind: dk, .. }, Ty::Prim { kind: sk, .. })
                if dk.rank() >= sk.rank() && *dk != PrimKind::Void && *sk != PrimKind::Void =>
            {
                true
            }
            // Array decays to pointer-to-element.
            (Ty::Pointer { pointee, .. }, Ty::Array { elem, .. }) => Ty::is_identical(pointee, elem),
            // Pointers match when pointees are identical or one side is void*.
            (Ty::Pointer { pointee: dp, .. }, Ty::Pointer { pointee: sp, .. }) => {
                dp.is_void() || sp.is_void() || Ty::is_identical(dp, sp)
            }
            _ => false,
        }
    }

    /// Can `src` be explicitly cast to `dst`? A superset of `can_accept`:
    /// additionally permits int<->pointer and narrowing integer casts.
    pub fn can_cast_to(dst: &Ty, src: &Ty) -> bool {
        if Ty::can_accept(dst, src) {
            return true;
        }
        match (dst, src) {
            (Ty::Prim { kind: dk, .. }, Ty::Prim { kind: sk, .. })
                if *dk != PrimKind::Void && *sk != PrimKind::Void =>
            {
                true
            }
            (Ty::Pointer { .. }, Ty::Prim { kind: PrimKind::Int32, .. }) => true,
            (Ty::Prim { kind: PrimKind::Int32, .. }, Ty::Pointer { .. }) => true,
            _ => false,
        }
    }
}

impl PrimKind {
    /// Widening rank: void is never comparable, bool < int8 < int32.
    fn rank(self) -> u8 {
        match self {
            PrimKind::Void => 0,
            PrimKind::Bool => 1,
            PrimKind::Int8 => 2,
            PrimKind::Int32 => 3,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Prim { kind: PrimKind::Void, .. } => write!(f, "void"),
            Ty::Prim { kind: PrimKind::Bool, .. } => write!(f, "i1"),
            Ty::Prim { kind: PrimKind::Int8, signed } => {
                write!(f, "{}", if *signed { "i8" } else { "u8" })
            }
            Ty::Prim { kind: PrimKind::Int32, signed } => {
                write!(f, "{}", if *signed { "i32" } else { "u32" })
            }
            Ty::Pointer { pointee, .. } => write!(f, "{pointee}*"),
            Ty::Array { elem, length } => write!(f, "[{elem} x {length}]"),
            Ty::Struct { fields } => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, "}}")
            }
            Ty::Function { params, ret, variadic } => {
                write!(f, "(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                if *variadic {
                    write!(f, ", ...")?;
                }
                write!(f, ") -> {ret}")
            }
            Ty::Enum { underlying } => write!(f, "enum({underlying})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_widening_is_implicit() {
        assert!(Ty::can_accept(&Ty::i32(true), &Ty::i8(true)));
        assert!(!Ty::can_accept(&Ty::i8(true), &Ty::i32(true)));
    }

    #[test]
    fn same_width_cast_is_identity() {
        assert!(Ty::can_accept(&Ty::i32(true), &Ty::i32(true)));
        // Sign-only change at the same width is accepted (sign-convert).
        assert!(Ty::can_accept(&Ty::i32(false), &Ty::i32(true)));
    }

    #[test]
    fn array_decays_to_pointer() {
        let arr = Ty::array(Ty::i32(true), 4);
        let ptr = Ty::pointer(Ty::i32(true), false);
        assert!(Ty::can_accept(&ptr, &arr));
    }

    #[test]
    fn void_pointer_matches_anything() {
        let void_ptr = Ty::pointer(Ty::void(), false);
        let int_ptr = Ty::pointer(Ty::i32(true), false);
        assert!(Ty::can_accept(&void_ptr, &int_ptr));
        assert!(Ty::can_accept(&int_ptr, &void_ptr));
    }

    #[test]
    fn cast_allows_int_pointer_conversion() {
        let int_ptr = Ty::pointer(Ty::i32(true), false);
        assert!(!Ty::can_accept(&int_ptr, &Ty::i32(true)));
        assert!(Ty::can_cast_to(&int_ptr, &Ty::i32(true)));
    }

    #[test]
    fn narrowing_requires_explicit_cast() {
        assert!(!Ty::can_accept(&Ty::i8(true), &Ty::i32(true)));
        assert!(Ty::can_cast_to(&Ty::i8(true), &Ty::i32(true)));
    }

    #[test]
    fn struct_size_sums_fields() {
        let s = Ty::struct_of(vec![Ty::i32(true), Ty::i8(true)]);
        assert_eq!(s.size(), 5);
    }
}
