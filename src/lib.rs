//! SSA intermediate representation for a small C-subset compiler's
//! middle end: the builder that constructs it during lowering, the
//! analyses LICM needs (parent scanner, dominance, loop info), the pass
//! manager, the LICM transform itself, and a textual code-generator
//! backend for snapshot tests.

pub mod analysis;
pub mod codegen;
pub mod diagnostics;
pub mod entity;
pub mod error;
pub mod function;
pub mod instruction;
pub mod licm;
pub mod module;
pub mod pass;
pub mod types;
pub mod value;

pub use codegen::{CodeGenVisitor, TextualBackend};
pub use entity::{BlockRef, ConstRef, FuncRef, GlobalRef, InstRef, ValueId};
pub use error::{IrError, IrResult};
pub use function::Function;
pub use instruction::{AccessKind, BinaryOp, Block, InstKind, Instruction, UnaryOp};
pub use licm::Licm;
pub use module::Module;
pub use pass::{register_all_passes, AnalysisCache, OptimizationLevel, Pass, PassContext, PassInfo, PassKind, PassManager, Stage};
pub use types::{PrimKind, Ty};
pub use value::{Constant, GlobalVar, Linkage, Use};
