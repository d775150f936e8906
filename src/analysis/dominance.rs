//! Dominance tree (§4.3): the standard iterative (Cooper/Harvey/Kennedy)
//! fixed-point algorithm over a reverse-postorder block numbering.

use std::collections::HashMap;

use crate::entity::{BlockRef, FuncRef};
use crate::module::Module;

#[derive(Debug, Clone)]
pub struct Dominance {
    entry: BlockRef,
    /// Immediate dominator of every reachable block except `entry`.
    idom: HashMap<BlockRef, BlockRef>,
    rpo_index: HashMap<BlockRef, usize>,
}

impl Dominance {
    pub fn compute(module: &Module, func: FuncRef) -> Self {
        let entry = module.func(func).entry.expect("dominance requires a non-declaration function");
        let rpo = reverse_postorder(module, entry);
        let rpo_index: HashMap<BlockRef, usize> = rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();
        let preds = predecessor_map(module, func);

        let mut idom: HashMap<BlockRef, BlockRef> = HashMap::new();
        idom.insert(entry, entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockRef> = None;
                for &pred in preds.get(&block).into_iter().flatten() {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(cur) => intersect(&idom, &rpo_index, cur, pred),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom.get(&block) != Some(&new_idom) {
                        idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        Dominance { entry, idom, rpo_index }
    }

    /// Does `a` dominate `b`? Every block dominates itself.
    pub fn dominates(&self, a: BlockRef, b: BlockRef) -> bool {
        if a == b {
            return true;
        }
        let mut cur = b;
        while cur != self.entry {
            let Some(&next) = self.idom.get(&cur) else { return false };
            if next == a {
                return true;
            }
            if next == cur {
                break;
            }
            cur = next;
        }
        false
    }

    pub fn immediate_dominator(&self, b: BlockRef) -> Option<BlockRef> {
        if b == self.entry {
            None
        } else {
            self.idom.get(&b).copied()
        }
    }

    pub fn is_reachable(&self, b: BlockRef) -> bool {
        b == self.entry || self.idom.contains_key(&b)
    }
}

fn intersect(idom: &HashMap<BlockRef, BlockRef>, rpo_index: &HashMap<BlockRef, usize>, mut a: BlockRef, mut b: BlockRef) -> BlockRef {
    while a != b {
        while rpo_index[&a] > rpo_index[&b] {
            a = idom[&a];
        }
        while rpo_index[&b] > rpo_index[&a] {
            b = idom[&b];
        }
    }
    a
}

fn predecessor_map(module: &Module, func: FuncRef) -> HashMap<BlockRef, Vec<BlockRef>> {
    let mut preds: HashMap<BlockRef, Vec<BlockRef>> = HashMap::new();
    let f = module.func(func);
    for (block_ref, _) in f.blocks_in_order() {
        for succ in module.successors(block_ref) {
            preds.entry(succ).or_default().push(block_ref);
        }
    }
    preds
}

fn reverse_postorder(module: &Module, entry: BlockRef) -> Vec<BlockRef> {
    let mut visited = std::collections::HashSet::new();
    let mut postorder = Vec::new();
    let mut stack = vec![(entry, false)];
    while let Some((block, processed)) = stack.pop() {
        if processed {
            postorder.push(block);
            continue;
        }
        if !visited.insert(block) {
            continue;
        }
        stack.push((block, true));
        for succ in module.successors(block) {
            if !visited.contains(&succ) {
                stack.push((succ, false));
            }
        }
    }
    postorder.reverse();
    postorder
}
