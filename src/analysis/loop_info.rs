//! Natural-loop detection and pre-header creation (§4.3, §4.5's
//! "loop-norm" dependency is folded in here since pre-header synthesis
//! is the one mutation loop-info itself needs to stay useful to LICM).

use std::collections::{HashSet, VecDeque};

use crate::analysis::Dominance;
use crate::entity::{BlockRef, FuncRef, InstRef, ValueId};
use crate::instruction::InstKind;
use crate::module::Module;

/// One natural loop: a header, its body (including the header), the
/// back-edge sources (`tail`), and a pre-header once one has been
/// synthesized.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub header: BlockRef,
    pub body: HashSet<BlockRef>,
    pub tail: Vec<BlockRef>,
    pub preheader: Option<BlockRef>,
}

impl LoopInfo {
    pub fn contains(&self, block: BlockRef) -> bool {
        self.body.contains(&block)
    }
}

/// All loops of one function, innermost first so LICM always hoists
/// into the nearest available pre-header (§4.5).
#[derive(Debug, Clone, Default)]
pub struct LoopForest {
    pub loops: Vec<LoopInfo>,
}

impl LoopForest {
    pub fn compute(module: &Module, func: FuncRef, dom: &Dominance) -> Self {
        let f = module.func(func);
        let mut by_header: Vec<(BlockRef, HashSet<BlockRef>, Vec<BlockRef>)> = Vec::new();

        for (block_ref, _) in f.blocks_in_order() {
            for succ in module.successors(block_ref) {
                if dom.is_reachable(block_ref) && dom.dominates(succ, block_ref) {
                    // (block_ref -> succ) is a back edge; succ is a loop header.
                    let body = natural_loop_body(module, succ, block_ref);
                    match by_header.iter_mut().find(|(h, _, _)| *h == succ) {
                        Some((_, existing_body, tails)) => {
                            existing_body.extend(body);
                            tails.push(block_ref);
                        }
                        None => by_header.push((succ, body, vec![block_ref])),
                    }
                }
            }
        }

        let mut loops: Vec<LoopInfo> =
            by_header.into_iter().map(|(header, body, tail)| LoopInfo { header, body, tail, preheader: None }).collect();
        // Innermost first: a loop nested inside another has a strictly
        // smaller body, so sorting by body size approximates nesting
        // order without building an explicit loop-nest tree.
        loops.sort_by_key(|l| l.body.len());
        LoopForest { loops }
    }

    pub fn innermost_containing(&self, block: BlockRef) -> Option<&LoopInfo> {
        self.loops.iter().find(|l| l.contains(block))
    }
}

/// Blocks that can reach `tail` without passing through `header`,
/// plus `header` itself (the glossary's natural-loop definition).
fn natural_loop_body(module: &Module, header: BlockRef, tail: BlockRef) -> HashSet<BlockRef> {
    let mut body = HashSet::new();
    body.insert(header);
    if tail == header {
        return body;
    }
    let preds = predecessor_index(module, header.func);
    let mut queue = VecDeque::new();
    queue.push_back(tail);
    body.insert(tail);
    while let Some(block) = queue.pop_front() {
        for &pred in preds.get(&block).into_iter().flatten() {
            if body.insert(pred) {
                queue.push_back(pred);
            }
        }
    }
    body
}

fn predecessor_index(module: &Module, func: FuncRef) -> std::collections::HashMap<BlockRef, Vec<BlockRef>> {
    let mut preds: std::collections::HashMap<BlockRef, Vec<BlockRef>> = std::collections::HashMap::new();
    let f = module.func(func);
    for (block_ref, _) in f.blocks_in_order() {
        for succ in module.successors(block_ref) {
            preds.entry(succ).or_default().push(block_ref);
        }
    }
    preds
}

/// Synthesizes (or returns the existing) pre-header for `loop_info`: a
/// block with `header` as its sole successor, to which every
/// loop-external predecessor of `header` is redirected. Back-edges from
/// `loop_info.tail` keep jumping straight to `header`.
pub fn ensure_preheader(module: &mut Module, func: FuncRef, loop_info: &mut LoopInfo) -> BlockRef {
    if let Some(ph) = loop_info.preheader {
        return ph;
    }
    let header = loop_info.header;
    let external_preds: Vec<BlockRef> =
        module.func(func).block(header).predecessors.iter().copied().filter(|p| !loop_info.tail.contains(p)).collect();

    let preheader = module.create_block(func, Some(format!("preheader.L{}", header.index())));
    module.set_insert_point(preheader);
    module.create_jump(header);

    for &pred in &external_preds {
        redirect_terminator(module, pred, header, preheader);
        module.func_mut(func).block_mut(header).predecessors.retain(|&p| p != pred);
    }
    redirect_phi_operands(module, func, header, &external_preds, preheader);
    module.func_mut(func).block_mut(preheader).predecessors.extend(external_preds.iter().copied());

    loop_info.preheader = Some(preheader);
    preheader
}

/// Every `Phi` in `header` carries one `PhiOperand` per predecessor (§3
/// invariant 5); redirecting a predecessor to `preheader` must retarget
/// its `PhiOperand`s to match, or the phi's operand-to-predecessor
/// correspondence goes stale the moment the header has an incoming value
/// from outside the loop.
fn redirect_phi_operands(module: &mut Module, func: FuncRef, header: BlockRef, redirected: &[BlockRef], preheader: BlockRef) {
    let operand_refs: Vec<InstRef> = module
        .func(func)
        .block(header)
        .instructions
        .iter()
        .copied()
        .filter(|&r| matches!(module.func(func).inst(r).kind, InstKind::Phi))
        .flat_map(|phi| {
            module
                .func(func)
                .inst(phi)
                .operands
                .iter()
                .filter_map(|&op| match op {
                    ValueId::Inst(r) => Some(r),
                    _ => None,
                })
                .collect::<Vec<_>>()
        })
        .collect();

    for opref in operand_refs {
        let inst = module.func_mut(func).inst_mut(opref);
        if let InstKind::PhiOperand { block } = &mut inst.kind {
            if redirected.contains(block) {
                *block = preheader;
                inst.parent = preheader;
            }
        }
    }
}

fn redirect_terminator(module: &mut Module, block: BlockRef, from: BlockRef, to: BlockRef) {
    let func = block.func;
    let Some(&last) = module.func(func).block(block).instructions.last() else { return };
    let inst = module.func_mut(func).inst_mut(last);
    match &mut inst.kind {
        InstKind::Jump { target } if *target == from => *target = to,
        InstKind::Branch { then_block, else_block } => {
            if *then_block == from {
                *then_block = to;
            }
            if *else_block == from {
                *else_block = to;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Ty;
    use crate::value::Linkage;

    fn build_simple_loop(m: &mut Module) -> (FuncRef, BlockRef, BlockRef, BlockRef, BlockRef) {
        let ty = Ty::function(vec![], Ty::void(), false);
        let f = m.create_function(Linkage::Internal, "f", ty);
        let entry = m.create_block(f, None);
        let header = m.create_block(f, None);
        let body = m.create_block(f, None);
        let exit = m.create_block(f, None);

        m.set_insert_point(entry);
        m.create_jump(header);
        m.set_insert_point(header);
        let cond = m.get_bool(true);
        m.create_branch(cond, body, exit);
        m.set_insert_point(body);
        m.create_jump(header);
        m.set_insert_point(exit);
        m.create_return(None);
        (f, entry, header, body, exit)
    }

    #[test]
    fn detects_single_natural_loop() {
        let mut m = Module::new("t");
        let (f, _entry, header, body, exit) = build_simple_loop(&mut m);
        let dom = Dominance::compute(&m, f);
        let forest = LoopForest::compute(&m, f, &dom);
        assert_eq!(forest.loops.len(), 1);
        let l = &forest.loops[0];
        assert_eq!(l.header, header);
        assert!(l.contains(header) && l.contains(body));
        assert!(!l.contains(exit));
    }

    #[test]
    fn preheader_redirects_external_predecessor_only() {
        let mut m = Module::new("t");
        let (f, entry, header, body, _exit) = build_simple_loop(&mut m);
        let dom = Dominance::compute(&m, f);
        let mut forest = LoopForest::compute(&m, f, &dom);
        let preheader = ensure_preheader(&mut m, f, &mut forest.loops[0]);

        let entry_last = *m.func(f).block(entry).instructions.last().unwrap();
        assert!(matches!(m.func(f).inst(entry_last).kind, InstKind::Jump { target } if target == preheader));

        let body_last = *m.func(f).block(body).instructions.last().unwrap();
        assert!(matches!(m.func(f).inst(body_last).kind, InstKind::Jump { target } if target == header));
    }

    #[test]
    fn preheader_redirects_phi_operand_blocks_too() {
        let mut m = Module::new("t");
        let ty = Ty::function(vec![Ty::i32(true)], Ty::void(), false);
        let f = m.create_function(Linkage::Internal, "f", ty);
        let entry = m.create_block(f, None);
        let header = m.create_block(f, None);
        let body = m.create_block(f, None);
        let exit = m.create_block(f, None);

        m.set_insert_point(entry);
        let n = m.create_arg_ref(f, 0);
        let zero = m.get_int32(0);
        m.create_jump(header);

        m.set_insert_point(header);
        let phi = m.create_phi(Ty::i32(true));
        let ValueId::Inst(phi_ref) = phi else { unreachable!() };
        let cond = m.create_lt(phi, n);
        m.create_branch(cond, body, exit);

        m.set_insert_point(body);
        let one = m.get_int32(1);
        let next = m.create_add(phi, one);
        m.create_jump(header);

        m.add_incoming(phi_ref, entry, zero);
        m.add_incoming(phi_ref, body, next);

        m.set_insert_point(exit);
        m.create_return(None);

        let dom = Dominance::compute(&m, f);
        let mut forest = LoopForest::compute(&m, f, &dom);
        let preheader = ensure_preheader(&mut m, f, &mut forest.loops[0]);

        let phi_operand_blocks: Vec<BlockRef> = m
            .func(f)
            .inst(phi_ref)
            .operands
            .iter()
            .map(|&op| {
                let ValueId::Inst(r) = op else { panic!("phi operand must be an instruction") };
                match m.func(f).inst(r).kind {
                    InstKind::PhiOperand { block } => block,
                    _ => panic!("phi operand must carry PhiOperand kind"),
                }
            })
            .collect();

        assert!(phi_operand_blocks.contains(&preheader), "the entry-edge operand must now point at the synthesized preheader");
        assert!(phi_operand_blocks.contains(&body), "the back-edge operand must still point at the loop body");
        assert!(!phi_operand_blocks.contains(&entry), "no operand should still reference the original external predecessor");
    }
}
