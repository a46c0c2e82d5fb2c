//! Post-Dominator Analysis
//!
//! Immediate post-dominators via the Cooper-Harvey-Kennedy iterative scheme
//! run over the reversed control flow graph, with a virtual root joining all
//! procedure exits. Control-dependence computation and the per-loop
//! post-dominator cache both read from here.

use crate::ir::{BlockId, Opcode, Procedure};

/// Post-dominator tree of one procedure.
#[derive(Debug, Clone)]
pub struct PostDominators {
    /// Immediate post-dominator per block; `None` for blocks whose only
    /// post-dominator is the virtual root (exits) or that never reach an
    /// exit.
    ipdom: Vec<Option<BlockId>>,
}

impl PostDominators {
    pub fn compute(proc: &Procedure) -> Self {
        let n = proc.blocks.len();
        let root = n; // virtual root joining every exit
        let preds = proc.predecessors();

        // Successors in the reversed CFG: root -> each exit block,
        // block -> its CFG predecessors.
        let exit_blocks: Vec<usize> = (0..n)
            .filter(|&b| {
                match proc.terminator(BlockId(b as u32)) {
                    Some(t) => proc.inst(t).opcode == Opcode::Ret,
                    None => true, // unterminated blocks end the walk too
                }
            })
            .collect();
        let rev_succs = |v: usize| -> Vec<usize> {
            if v == root {
                exit_blocks.clone()
            } else {
                preds[v].iter().map(|b| b.0 as usize).collect()
            }
        };
        // Predecessors in the reversed CFG: the CFG successors of v, plus
        // the root for exit blocks.
        let mut rpreds: Vec<Vec<usize>> = vec![Vec::new(); n + 1];
        for b in 0..n {
            for succ in proc.successors(BlockId(b as u32)) {
                rpreds[b].push(succ.0 as usize);
            }
        }
        for &e in &exit_blocks {
            rpreds[e].push(root);
        }

        // Reverse postorder over the reversed CFG.
        let mut postorder: Vec<usize> = Vec::with_capacity(n + 1);
        let mut visited = vec![false; n + 1];
        let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
        visited[root] = true;
        while let Some(&(v, pos)) = frames.last() {
            let succs = rev_succs(v);
            if pos < succs.len() {
                frames.last_mut().expect("frame stack underflow").1 = pos + 1;
                let w = succs[pos];
                if !visited[w] {
                    visited[w] = true;
                    frames.push((w, 0));
                }
            } else {
                postorder.push(v);
                frames.pop();
            }
        }
        let mut order_of = vec![usize::MAX; n + 1];
        for (i, &v) in postorder.iter().enumerate() {
            order_of[v] = i;
        }
        let rpo: Vec<usize> = postorder.iter().rev().copied().collect();

        let mut idom: Vec<Option<usize>> = vec![None; n + 1];
        idom[root] = Some(root);
        let intersect = |idom: &[Option<usize>], order_of: &[usize], mut a: usize, mut b: usize| {
            while a != b {
                while order_of[a] < order_of[b] {
                    a = idom[a].expect("intersect walked past the root");
                }
                while order_of[b] < order_of[a] {
                    b = idom[b].expect("intersect walked past the root");
                }
            }
            a
        };
        let mut changed = true;
        while changed {
            changed = false;
            for &v in rpo.iter().filter(|&&v| v != root) {
                let mut new_idom: Option<usize> = None;
                for &p in &rpreds[v] {
                    if order_of[p] == usize::MAX || idom[p].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => intersect(&idom, &order_of, p, cur),
                    });
                }
                if new_idom.is_some() && idom[v] != new_idom {
                    idom[v] = new_idom;
                    changed = true;
                }
            }
        }

        let ipdom = (0..n)
            .map(|b| match idom[b] {
                Some(d) if d != root && d != b => Some(BlockId(d as u32)),
                _ => None,
            })
            .collect();
        Self { ipdom }
    }

    /// Immediate post-dominator of `block`.
    #[inline]
    pub fn ipdom(&self, block: BlockId) -> Option<BlockId> {
        self.ipdom.get(block.0 as usize).copied().flatten()
    }

    /// Whether `a` post-dominates `b` (reflexively).
    pub fn postdominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.ipdom(cur) {
                Some(next) => cur = next,
                None => return false,
            }
        }
    }

    /// Blocks control-dependent on the branch terminating `block`: for each
    /// successor edge, every block on the post-dominator chain from the
    /// successor up to (but excluding) `block`'s own immediate
    /// post-dominator (Ferrante-Ottenstein-Warren).
    pub fn control_dependent_blocks(&self, proc: &Procedure, block: BlockId) -> Vec<BlockId> {
        let stop = self.ipdom(block);
        let mut out: Vec<BlockId> = Vec::new();
        for succ in proc.successors(block) {
            let mut cur = Some(succ);
            while let Some(b) = cur {
                if Some(b) == stop {
                    break;
                }
                if !out.contains(&b) {
                    out.push(b);
                }
                cur = self.ipdom(b);
            }
        }
        out
    }
}
