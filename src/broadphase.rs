use emt_common::Vec2;

/// Sort-and-sweep along x. Nuclei are sorted by x once per query; pairs
/// further apart than the cutoff in x are never compared.
///
/// Buffers are kept between calls to avoid reallocating every substep.
#[derive(Debug, Default, Clone)]
pub struct SweepAndPrune {
    order: Vec<usize>,
    pairs: Vec<(usize, usize)>,
}

impl SweepAndPrune {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every pair `(i, j)` with `i < j` whose distance is below
    /// `cutoff`. Pair order depends only on the positions, never on
    /// allocation or scheduling.
    pub fn pairs_within(&mut self, positions: &[Vec2], cutoff: f64) -> &[(usize, usize)] {
        self.order.clear();
        self.order.extend(0..positions.len());
        // Ties broken by index to keep the sweep deterministic.
        self.order.sort_unstable_by(|&a, &b| {
            positions[a].x.total_cmp(&positions[b].x).then(a.cmp(&b))
        });

        self.pairs.clear();
        let cutoff_sq = cutoff * cutoff;
        for (k, &i) in self.order.iter().enumerate() {
            let pi = positions[i];
            for &j in &self.order[k + 1..] {
                let pj = positions[j];
                if pj.x - pi.x > cutoff {
                    break;
                }
                if pi.distance_squared(pj) < cutoff_sq {
                    self.pairs.push((i.min(j), i.max(j)));
                }
            }
        }
        &self.pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force(positions: &[Vec2], cutoff: f64) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for i in 0..positions.len() {
            for j in i + 1..positions.len() {
                if positions[i].distance(positions[j]) < cutoff {
                    out.push((i, j));
                }
            }
        }
        out
    }

    #[test]
    fn matches_brute_force() {
        let positions: Vec<Vec2> = (0..60)
            .map(|i| {
                let f = i as f64;
                Vec2::new((f * 0.37).sin() * 6.0, (f * 1.3).cos() * 2.0)
            })
            .collect();
        let mut sweep = SweepAndPrune::new();
        let mut found = sweep.pairs_within(&positions, 1.0).to_vec();
        found.sort_unstable();
        assert_eq!(found, brute_force(&positions, 1.0));
    }

    #[test]
    fn empty_and_single_inputs() {
        let mut sweep = SweepAndPrune::new();
        assert!(sweep.pairs_within(&[], 1.0).is_empty());
        assert!(sweep.pairs_within(&[Vec2::zero()], 1.0).is_empty());
        let same = [Vec2::zero(), Vec2::zero()];
        assert_eq!(sweep.pairs_within(&same, 1.0), &[(0, 1)]);
    }
}
