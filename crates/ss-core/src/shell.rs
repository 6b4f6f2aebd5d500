//! A doubly-linked progression of resolution shells.
//!
//! Ported from the `list` struct in `sidesplitter.h`. The original is a
//! heap-allocated linked list walked by raw `prv`/`nxt` pointers; here it is
//! a flat `Vec<Shell>` with `prv`/`nxt` as indices, giving the same
//! neighbour structure without pointer chasing.

/// One resolution shell with its per-shell statistics.
#[derive(Debug, Clone, Copy)]
pub struct Shell {
    /// Lower frequency bound of this shell, cycles/voxel.
    pub res: f64,
    /// Shell width; the next shell starts at `res + stp`.
    pub stp: f64,
    /// Fourier Shell Correlation between the two halves inside this shell.
    pub fsc: f64,
    /// `sqrt(|2*fsc/(1+fsc)|)`, the single-map correctness weight.
    pub crf: f64,
    /// Shell RMSD proxy (`sqrt(mean power)` inside the mask), set in Pass 1.
    pub pwr: f64,
    /// Per-shell noise statistic (psnr in Pass 1, noise ceiling in Pass 2).
    pub max: f64,
    pub prv: Option<usize>,
    pub nxt: Option<usize>,
}

impl Shell {
    fn head() -> Self {
        Shell { res: 0.0, stp: 0.025, fsc: 0.0, crf: 0.0, pwr: 0.0, max: 0.0, prv: None, nxt: None }
    }
}

/// The append-only progression Pass 1 builds and Pass 2 walks backward.
#[derive(Debug, Clone)]
pub struct ShellList {
    nodes: Vec<Shell>,
}

impl Default for ShellList {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellList {
    /// A fresh list containing only `head` (`res=0, stp=0.025`).
    pub fn new() -> Self {
        ShellList { nodes: vec![Shell::head()] }
    }

    pub fn head_index(&self) -> usize {
        0
    }

    pub fn tail_index(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn get(&self, idx: usize) -> &Shell {
        &self.nodes[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Shell {
        &mut self.nodes[idx]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Append a new shell after the current tail, with
    /// `res = tail.res + tail.stp`, `stp = p * res / 64` (never negative).
    pub fn extend(&mut self, p: f64) -> usize {
        let tail = self.tail_index();
        let (res, stp) = {
            let t = &self.nodes[tail];
            let res = t.res + t.stp;
            let stp = (p * res / 64.0).max(0.0);
            (res, stp)
        };
        let new_idx = self.nodes.len();
        self.nodes.push(Shell {
            res,
            stp,
            fsc: 0.0,
            crf: 0.0,
            pwr: 0.0,
            max: 0.0,
            prv: Some(tail),
            nxt: None,
        });
        self.nodes[tail].nxt = Some(new_idx);
        new_idx
    }

    /// Iterate shell indices head-to-tail (Pass 1 order).
    pub fn forward_indices(&self) -> impl Iterator<Item = usize> + '_ {
        0..self.nodes.len()
    }

    /// Iterate shell indices tail-to-head (Pass 2 order).
    pub fn backward_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).rev()
    }

    /// Check well-formedness: every non-head node has
    /// `res == prv.res + prv.stp`, `stp > 0` (head excepted, `stp` fixed at
    /// `0.025`), and `prv.nxt == node` / `node.prv.nxt == node`.
    #[cfg(test)]
    pub fn is_well_formed(&self) -> bool {
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Some(prv) = node.prv {
                let prv_node = &self.nodes[prv];
                if (node.res - (prv_node.res + prv_node.stp)).abs() > 1e-9 {
                    return false;
                }
                if prv_node.nxt != Some(idx) {
                    return false;
                }
            } else if idx != 0 {
                return false;
            }
            if node.stp <= 0.0 && idx != 0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_defaults() {
        let list = ShellList::new();
        let head = list.get(list.head_index());
        assert_eq!(head.res, 0.0);
        assert_eq!(head.stp, 0.025);
        assert!(head.prv.is_none());
    }

    #[test]
    fn extend_chains_links_and_res() {
        let mut list = ShellList::new();
        let a = list.extend(1.0);
        let b = list.extend(0.5);
        assert_eq!(list.get(a).prv, Some(0));
        assert_eq!(list.get(0).nxt, Some(a));
        assert_eq!(list.get(b).prv, Some(a));
        let expect_res_a = 0.0 + 0.025;
        assert!((list.get(a).res - expect_res_a).abs() < 1e-12);
        assert!(list.is_well_formed());
    }

    #[test]
    fn extend_never_negative_step() {
        let mut list = ShellList::new();
        let a = list.extend(-5.0);
        assert!(list.get(a).stp >= 0.0);
    }

    #[test]
    fn backward_indices_reverse_of_forward() {
        let mut list = ShellList::new();
        list.extend(1.0);
        list.extend(1.0);
        let fwd: Vec<_> = list.forward_indices().collect();
        let mut bwd: Vec<_> = list.backward_indices().collect();
        bwd.reverse();
        assert_eq!(fwd, bwd);
    }
}
