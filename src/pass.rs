//! Pass registry and fixed-point driver (§4.4).
//!
//! Passes are registered up front through `register_all_passes` (§9's
//! explicit-registration design note, chosen over static-constructor
//! side effects to avoid initialization-order pitfalls) and re-run as a
//! group until a full sweep reports no change, bounded so pathological
//! inputs terminate instead of looping forever (§9 open question).

use std::any::Any;
use std::collections::HashMap;

use crate::entity::{BlockRef, FuncRef};
use crate::error::{IrError, IrResult};
use crate::module::Module;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptimizationLevel {
    O0 = 0,
    O1 = 1,
    O2 = 2,
    O3 = 3,
}

impl OptimizationLevel {
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => OptimizationLevel::O0,
            1 => OptimizationLevel::O1,
            2 => OptimizationLevel::O2,
            _ => OptimizationLevel::O3,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn should_run_pass(self, min_opt_level: u8) -> bool {
        self.as_u8() >= min_opt_level
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Module,
    Function,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PreOpt,
    Opt,
    PostOpt,
}

/// On-demand, per-function analysis cache (§4.4: "required analyses are
/// computed on demand and looked up by name"). A pass asks for an
/// analysis by name through `PassContext::get_pass`; the first request
/// for a given `(name, function)` pair computes and stores it, every
/// later request in the same sweep reuses it, and `invalidate` drops
/// everything cached for a function once some pass reports it changed
/// that function.
#[derive(Default)]
pub struct AnalysisCache {
    entries: HashMap<(&'static str, FuncRef), Box<dyn Any>>,
}

impl AnalysisCache {
    /// Looks up (or computes and caches) the named analysis for `func`.
    /// Panics if `T` does not match what `name` actually produces —
    /// a caller bug, not a runtime condition a front end can trigger.
    pub fn get_pass<T: 'static>(&mut self, module: &Module, func: FuncRef, name: &'static str) -> &T {
        self.entries
            .entry((name, func))
            .or_insert_with(|| compute_analysis(module, func, name))
            .downcast_ref::<T>()
            .unwrap_or_else(|| panic!("analysis '{name}' requested at the wrong type"))
    }

    pub fn invalidate(&mut self, func: FuncRef) {
        self.entries.retain(|&(_, f), _| f != func);
    }
}

fn compute_analysis(module: &Module, func: FuncRef, name: &str) -> Box<dyn Any> {
    match name {
        "dominance" => Box::new(crate::analysis::Dominance::compute(module, func)),
        "loop-info" => {
            let dom = crate::analysis::Dominance::compute(module, func);
            Box::new(crate::analysis::LoopForest::compute(module, func, &dom))
        }
        other => panic!("unknown analysis '{other}'"),
    }
}

/// The module a pass mutates, paired with the analysis cache it reads
/// through. Bundling the two lets `Pass` methods request an analysis
/// without the pass manager threading it through every call by hand.
pub struct PassContext<'a> {
    pub module: &'a mut Module,
    pub analyses: &'a mut AnalysisCache,
}

impl PassContext<'_> {
    pub fn get_pass<T: 'static>(&mut self, func: FuncRef, name: &'static str) -> &T {
        self.analyses.get_pass(self.module, func, name)
    }
}

/// A single transform or analysis. Every entry point defaults to
/// "does nothing, reports no change" so a pass only overrides the kind
/// of node it actually cares about.
pub trait Pass {
    fn name(&self) -> &'static str;

    fn run_on_module(&mut self, _ctx: &mut PassContext) -> bool {
        false
    }

    fn run_on_function(&mut self, _ctx: &mut PassContext, _func: FuncRef) -> bool {
        false
    }

    fn run_on_block(&mut self, _ctx: &mut PassContext, _block: BlockRef) -> bool {
        false
    }
}

/// Static registration record (§4.4): name, factory, granularity,
/// minimum optimization level, pipeline stage, and the analyses it
/// consumes (by name — looked up on demand through `PassContext::get_pass`
/// by whichever pass needs them, rather than threaded through this
/// record).
pub struct PassInfo {
    pub name: &'static str,
    pub factory: fn() -> Box<dyn Pass>,
    pub kind: PassKind,
    pub min_opt_level: u8,
    pub stage: Stage,
    pub required_analyses: &'static [&'static str],
}

pub struct PassManager {
    passes: Vec<PassInfo>,
    opt_level: OptimizationLevel,
    analyses: AnalysisCache,
}

impl PassManager {
    pub fn new(opt_level: OptimizationLevel) -> Self {
        PassManager { passes: Vec::new(), opt_level, analyses: AnalysisCache::default() }
    }

    pub fn register(&mut self, info: PassInfo) {
        self.passes.push(info);
    }

    pub fn registered(&self) -> impl Iterator<Item = &PassInfo> {
        self.passes.iter()
    }

    /// Runs every registered pass whose `min_opt_level` the current
    /// level satisfies, repeating the whole list until a sweep makes no
    /// change. Pass ordering within a sweep is registration order, so
    /// identical input IR always yields identical output IR.
    pub fn run_passes(&mut self, module: &mut Module) -> IrResult<()> {
        let bound = (instructions_in_module(module) * 4).max(4);
        let mut iterations = 0usize;
        loop {
            let mut changed = false;
            for info in &self.passes {
                if !self.opt_level.should_run_pass(info.min_opt_level) {
                    continue;
                }
                let mut pass = (info.factory)();
                let mut ctx = PassContext { module: &mut *module, analyses: &mut self.analyses };
                changed |= run_one(&mut ctx, info.kind, pass.as_mut());
            }
            iterations += 1;
            if !changed {
                return Ok(());
            }
            if iterations >= bound {
                crate::diagnostics::emit(
                    crate::diagnostics::Severity::Warning,
                    &format!("pass manager did not converge after {iterations} iterations"),
                );
                return Err(IrError::NonConvergent { pass: "fixpoint".to_string(), bound });
            }
        }
    }
}

fn run_one(ctx: &mut PassContext, kind: PassKind, pass: &mut dyn Pass) -> bool {
    let mut changed = false;
    match kind {
        PassKind::Module => changed |= pass.run_on_module(ctx),
        PassKind::Function => {
            for i in 0..ctx.module.functions.len() {
                let f = FuncRef::new(i);
                if ctx.module.func(f).is_declaration() {
                    continue;
                }
                let did_change = pass.run_on_function(ctx, f);
                if did_change {
                    ctx.analyses.invalidate(f);
                }
                changed |= did_change;
            }
        }
        PassKind::Block => {
            for i in 0..ctx.module.functions.len() {
                let f = FuncRef::new(i);
                let blocks: Vec<_> = ctx.module.func(f).blocks_in_order().map(|(b, _)| b).collect();
                for b in blocks {
                    let did_change = pass.run_on_block(ctx, b);
                    if did_change {
                        ctx.analyses.invalidate(f);
                    }
                    changed |= did_change;
                }
            }
        }
    }
    changed
}

fn instructions_in_module(module: &Module) -> usize {
    module.functions.iter().map(|f| f.instructions.len()).sum()
}

/// Registers the pass set this crate ships. Front ends that want a
/// smaller pipeline build a `PassManager` directly and call `register`
/// themselves instead of using this convenience entry point.
pub fn register_all_passes(pm: &mut PassManager) {
    pm.register(PassInfo {
        name: "licm",
        factory: || Box::new(crate::licm::Licm::default()),
        kind: PassKind::Function,
        min_opt_level: 1,
        stage: Stage::Opt,
        required_analyses: &["dominance", "loop-info"],
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Ty;
    use crate::value::Linkage;

    #[test]
    fn empty_pipeline_converges_immediately() {
        let mut m = Module::new("t");
        let ty = Ty::function(vec![], Ty::void(), false);
        let f = m.create_function(Linkage::Internal, "f", ty);
        let b = m.create_block(f, None);
        m.set_insert_point(b);
        m.create_return(None);

        let mut pm = PassManager::new(OptimizationLevel::O2);
        assert!(pm.run_passes(&mut m).is_ok());
    }

    #[test]
    fn licm_on_loop_free_function_reports_no_change() {
        let mut m = Module::new("t");
        let ty = Ty::function(vec![], Ty::void(), false);
        let f = m.create_function(Linkage::Internal, "f", ty);
        let b = m.create_block(f, None);
        m.set_insert_point(b);
        m.create_return(None);

        let mut pm = PassManager::new(OptimizationLevel::O1);
        register_all_passes(&mut pm);
        assert!(pm.run_passes(&mut m).is_ok());
    }

    #[test]
    fn analysis_cache_reuses_a_computed_dominance_until_invalidated() {
        let mut m = Module::new("t");
        let ty = Ty::function(vec![], Ty::void(), false);
        let f = m.create_function(Linkage::Internal, "f", ty);
        let b = m.create_block(f, None);
        m.set_insert_point(b);
        m.create_return(None);

        let mut cache = AnalysisCache::default();
        let first = cache.get_pass::<crate::analysis::Dominance>(&m, f, "dominance") as *const _;
        let second = cache.get_pass::<crate::analysis::Dominance>(&m, f, "dominance") as *const _;
        assert_eq!(first, second, "a second lookup before invalidation must reuse the cached analysis");

        cache.invalidate(f);
        let third = cache.get_pass::<crate::analysis::Dominance>(&m, f, "dominance") as *const _;
        assert_ne!(first, third, "invalidation must force the next lookup to recompute");
    }
}
