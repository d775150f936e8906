//! Pure readers of IR (§4.3): a parent-block scanner, dominance, and
//! natural-loop detection. None of these mutate the module; each is
//! recomputed on demand by the pass manager whenever a transform pass
//! reports a change (§5's invalidate-by-convention rule).

pub mod dominance;
pub mod loop_info;
pub mod parent;

pub use dominance::Dominance;
pub use loop_info::{LoopInfo, LoopForest};
pub use parent::ParentMap;
