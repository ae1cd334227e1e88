use emt_common::Parameters;
use serde::{Deserialize, Serialize};

/// Step constants derived from the parameters, used on every substep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // Time
    pub dt: f64,
    pub n_substeps: u32,
    pub dt_sub: f64,
    pub total_steps: u64,
    /// Steps between recorded snapshots, `None` when recording is off.
    pub snapshot_every: Option<u64>,

    // Motion
    pub inv_mu: f64,
    /// Standard deviation of the per-substep nucleus displacement, `sqrt(2 D dt_sub)`.
    pub noise_std: f64,

    // Broad phase
    /// Largest distance at which two nuclei can interact.
    pub interaction_cutoff: f64,
}

impl SimParams {
    pub fn from_params(params: &Parameters) -> Self {
        let g = &params.general;
        let p = &params.cell_prop;
        let dt_sub = g.dt / g.n_substeps.max(1) as f64;
        let total_steps = (g.t_end / g.dt - 1e-9).ceil().max(0.0) as u64;
        let snapshot_every = if g.snapshot_interval > 0.0 {
            Some(((g.snapshot_interval / g.dt).round() as u64).max(1))
        } else {
            None
        };

        SimParams {
            dt: g.dt,
            n_substeps: g.n_substeps.max(1),
            dt_sub,
            total_steps,
            snapshot_every,
            inv_mu: 1.0 / g.mu,
            noise_std: (2.0 * p.diffusion * dt_sub).sqrt(),
            interaction_cutoff: 2.0 * p.r_soft.max(p.r_hard),
        }
    }
}
