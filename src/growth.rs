//! Epoch-boundary structural plasticity: firing-rate statistics, the logistic
//! radius-growth law, receptive-field overlap geometry, and the rewire batch.
//!
//! The engine owns the append-only growth trace (radii, rates and outgrowth,
//! one row per epoch, plus network spike counts per 10 ms bin). Rows are never
//! rewritten; the trace reproduces a full growth history from any checkpoint.

use itertools::iproduct;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::config::{GrowthParams, SimulationConfig};
use crate::error::SimError;
use crate::layout::PoolLayout;
use crate::neuron::{Dynamics, NeuronBank};
use crate::synapse::{SynapseBank, SynapseKind};
use crate::SYNAPSE_STRENGTH_ADJUSTMENT;

/// Minimum number of neurons to parallelize the pairwise geometry pass.
pub const MIN_NEURONS_PAR: usize = 64;

/// What one growth pass did to the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GrowthSummary {
    pub created: usize,
    pub removed: usize,
    /// Removals postponed because a delivery was still in flight.
    pub deferred: usize,
    /// Creations skipped because the source neuron hit the synapse cap.
    pub skipped: usize,
}

/// Logistic growth law: positive below the target rate, negative above it,
/// zero at the target. `max_rate = target_rate / epsilon` is the saturation
/// scale of the rate axis.
fn logistic_outgrowth(rate: f64, params: &GrowthParams) -> f64 {
    let z = (params.epsilon - rate / params.max_rate()) / params.beta;
    1.0 - 2.0 / (1.0 + z.exp())
}

/// Area of the lens shared by two circles of radii `r1`, `r2` whose centers
/// are `dist` apart. Zero when the connection frontiers do not meet; the full
/// smaller circle when one contains the other.
fn overlap_area(dist: f64, r1: f64, r2: f64) -> f64 {
    if dist - (r1 + r2) >= 0.0 {
        return 0.0;
    }
    let (r_min, r_max) = if r1 < r2 { (r1, r2) } else { (r2, r1) };
    if dist + r_min <= r_max {
        return std::f64::consts::PI * r_min * r_min;
    }
    let cos1 = ((r1 * r1 + dist * dist - r2 * r2) / (2.0 * r1 * dist)).clamp(-1.0, 1.0);
    let cos2 = ((r2 * r2 + dist * dist - r1 * r1) / (2.0 * r2 * dist)).clamp(-1.0, 1.0);
    let ang1 = 2.0 * cos1.acos();
    let ang2 = 2.0 * cos2.acos();
    0.5 * r1 * r1 * (ang1 - ang1.sin()) + 0.5 * r2 * r2 * (ang2 - ang2.sin())
}

/// Recomputes connection radii from accumulated firing statistics at each
/// epoch boundary and issues the matching synapse creations and removals.
#[derive(Debug, Clone)]
pub struct GrowthEngine {
    params: GrowthParams,
    epoch_duration: f64,
    min_overlap_area: f64,
    max_firing_rate: f64,
    ticks_per_bin: u64,
    radii: DVector<f64>,
    rates: DVector<f64>,
    outgrowth: DVector<f64>,
    area: DMatrix<f64>,
    radii_history: Vec<Vec<f64>>,
    rates_history: Vec<Vec<f64>>,
    outgrowth_history: Vec<Vec<f64>>,
    // Network-wide spike counts per 10 ms bin, across the whole run.
    spikes_history: Vec<u32>,
}

impl GrowthEngine {
    pub fn new(config: &SimulationConfig) -> Self {
        let n = config.num_neurons();
        let expected_bins = (config.num_epochs as u64
            * config.ticks_per_epoch()
            / config.ticks_per_history_bin()) as usize;
        GrowthEngine {
            params: config.growth,
            epoch_duration: config.epoch_duration,
            min_overlap_area: config.min_overlap_area,
            max_firing_rate: config.max_firing_rate,
            ticks_per_bin: config.ticks_per_history_bin(),
            radii: DVector::from_element(n, config.growth.start_radius),
            rates: DVector::zeros(n),
            outgrowth: DVector::zeros(n),
            area: DMatrix::zeros(n, n),
            radii_history: Vec::new(),
            rates_history: Vec::new(),
            outgrowth_history: Vec::new(),
            spikes_history: Vec::with_capacity(expected_bins),
        }
    }

    /// Accumulate `count` spikes emitted at `tick` into the 10 ms activity
    /// history.
    pub fn record_spikes(&mut self, tick: u64, count: usize) {
        let bin = (tick / self.ticks_per_bin) as usize;
        if bin >= self.spikes_history.len() {
            self.spikes_history.resize(bin + 1, 0);
        }
        self.spikes_history[bin] += count as u32;
    }

    /// One growth pass, run once per epoch after `ticks_per_epoch` ticks.
    ///
    /// Order is fixed: rate update, outgrowth, radius update, geometry,
    /// rewire in canonical pair order, history append. The history rows are
    /// appended only after the rewire batch, so a failed pass leaves the
    /// trace untouched.
    pub fn grow<D: Dynamics>(
        &mut self,
        layout: &PoolLayout,
        neurons: &mut NeuronBank<D>,
        synapses: &mut SynapseBank,
    ) -> Result<GrowthSummary, SimError> {
        let n = layout.num_neurons();

        for i in 0..n {
            self.rates[i] = neurons.neuron(i).epoch_spikes() as f64 / self.epoch_duration;
            debug_assert!(self.rates[i].is_finite());
            if self.rates[i] > self.max_firing_rate {
                log::warn!(
                    "neuron {} fired at {:.1} spikes/s, above the configured maximum {:.1}",
                    i,
                    self.rates[i],
                    self.max_firing_rate
                );
            }
        }
        neurons.reset_epoch_spikes();

        self.advance_radii();
        self.compute_geometry(layout);
        let summary = self.rewire(layout, synapses)?;

        self.radii_history.push(self.radii.iter().copied().collect());
        self.rates_history.push(self.rates.iter().copied().collect());
        self.outgrowth_history
            .push(self.outgrowth.iter().copied().collect());

        log::info!(
            "growth pass {}: {} synapses ({} created, {} removed, {} deferred, {} skipped at cap)",
            self.radii_history.len(),
            synapses.num_synapses(),
            summary.created,
            summary.removed,
            summary.deferred,
            summary.skipped,
        );
        Ok(summary)
    }

    /// Outgrowth and radius update; radii never fall below `min_radius`.
    fn advance_radii(&mut self) {
        for i in 0..self.rates.len() {
            self.outgrowth[i] = logistic_outgrowth(self.rates[i], &self.params);
            self.radii[i] = (self.radii[i] + self.outgrowth[i]).max(self.params.min_radius);
        }
    }

    /// Recompute the receptive-field overlap areas from the cached distances
    /// and the current radii. Pure per-pair work, parallelized on large pools.
    fn compute_geometry(&mut self, layout: &PoolLayout) {
        let n = self.radii.len();
        let dist = layout.distances();
        let radii = &self.radii;

        let row = |i: usize| -> Vec<f64> {
            (0..n)
                .map(|j| {
                    if i == j {
                        0.0
                    } else {
                        overlap_area(dist[(i, j)], radii[i], radii[j])
                    }
                })
                .collect()
        };

        let rows: Vec<Vec<f64>> = if n >= MIN_NEURONS_PAR {
            (0..n).into_par_iter().map(row).collect()
        } else {
            (0..n).map(row).collect()
        };
        self.area = DMatrix::from_fn(n, n, |i, j| rows[i][j]);
    }

    /// Walk every ordered pair in canonical increasing order and reconcile the
    /// topology with the overlap areas: create where fields newly overlap,
    /// refresh weights where they still do, remove where the overlap is gone.
    /// Cap hits are recorded and skipped, first-come in canonical order.
    fn rewire(
        &mut self,
        layout: &PoolLayout,
        synapses: &mut SynapseBank,
    ) -> Result<GrowthSummary, SimError> {
        let n = self.radii.len();
        let mut summary = GrowthSummary::default();

        for (i, j) in iproduct!(0..n, 0..n) {
            if i == j {
                continue;
            }
            let area = self.area[(i, j)];
            if synapses.contains(i, j) {
                if area <= 0.0 {
                    if synapses.remove(i, j) {
                        summary.removed += 1;
                    } else {
                        summary.deferred += 1;
                    }
                } else {
                    synapses.set_weight(i, j, SYNAPSE_STRENGTH_ADJUSTMENT * area);
                }
            } else if area > self.min_overlap_area {
                let kind = SynapseKind::of(layout.neuron_type(i), layout.neuron_type(j));
                match synapses.create(i, j, kind, SYNAPSE_STRENGTH_ADJUSTMENT * area) {
                    Ok(()) => summary.created += 1,
                    Err(SimError::SynapseCapacity { neuron, cap }) => {
                        log::warn!(
                            "skipping synapse {} -> {}: neuron {} is at the cap of {}",
                            i,
                            j,
                            neuron,
                            cap
                        );
                        summary.skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        synapses.canonicalize();
        Ok(summary)
    }

    pub fn radii(&self) -> &DVector<f64> {
        &self.radii
    }

    pub fn rates(&self) -> &DVector<f64> {
        &self.rates
    }

    /// Number of completed growth passes.
    pub fn epochs_recorded(&self) -> usize {
        self.radii_history.len()
    }

    pub fn radii_history(&self) -> &[Vec<f64>] {
        &self.radii_history
    }

    pub fn rates_history(&self) -> &[Vec<f64>] {
        &self.rates_history
    }

    pub fn outgrowth_history(&self) -> &[Vec<f64>] {
        &self.outgrowth_history
    }

    /// Network spike counts per 10 ms bin since the start of the run.
    pub fn spikes_history(&self) -> &[u32] {
        &self.spikes_history
    }

    /// Histogram of the 10 ms spike counts: entry `k` is the number of bins in
    /// which the network emitted exactly `k` spikes.
    pub fn burstiness_histogram(&self) -> Vec<usize> {
        let max = self.spikes_history.iter().copied().max().unwrap_or(0) as usize;
        let mut hist = vec![0usize; max + 1];
        for &count in &self.spikes_history {
            hist[count as usize] += 1;
        }
        hist
    }

    /// Replace the growth state wholesale (checkpoint restore). Fails without
    /// modifying anything if the shapes are inconsistent.
    pub(crate) fn restore(
        &mut self,
        radii: Vec<f64>,
        rates: Vec<f64>,
        radii_history: Vec<Vec<f64>>,
        rates_history: Vec<Vec<f64>>,
        outgrowth_history: Vec<Vec<f64>>,
        spikes_history: Vec<u32>,
    ) -> Result<(), SimError> {
        let n = self.radii.len();
        if radii.len() != n || rates.len() != n {
            return Err(SimError::InvalidCheckpoint(format!(
                "growth state describes {} neurons, expected {}",
                radii.len().max(rates.len()),
                n
            )));
        }
        let epochs = radii_history.len();
        if rates_history.len() != epochs || outgrowth_history.len() != epochs {
            return Err(SimError::InvalidCheckpoint(
                "growth histories have mismatched lengths".to_string(),
            ));
        }
        if radii_history
            .iter()
            .chain(rates_history.iter())
            .chain(outgrowth_history.iter())
            .any(|row| row.len() != n)
        {
            return Err(SimError::InvalidCheckpoint(
                "growth history row width does not match the pool".to_string(),
            ));
        }

        self.radii = DVector::from_vec(radii);
        self.rates = DVector::from_vec(rates);
        self.outgrowth = DVector::zeros(n);
        self.radii_history = radii_history;
        self.rates_history = rates_history;
        self.outgrowth_history = outgrowth_history;
        self.spikes_history = spikes_history;
        Ok(())
    }
}
