//! Simulation parameters: pool geometry, neuron parameter ranges, growth and
//! scheduling constants, and the random seed.
//!
//! The whole configuration is validated at once: every problem is collected
//! and reported in a single [`SimError::InvalidConfiguration`], so a bad
//! parameter file fails fast without any partial construction.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::SimError;
use crate::{DELAY_QUEUE_LENGTH, SPIKE_HISTORY_BIN};

/// Relative tolerance when checking that an epoch spans a whole number of ticks.
const TICK_GRID_TOLERANCE: f64 = 1e-6;

/// Pool dimensions. `z` defaults to 1, giving a 2-D sheet of neurons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolDims {
    pub x: usize,
    pub y: usize,
    #[serde(default = "default_z")]
    pub z: usize,
}

fn default_z() -> usize {
    1
}

impl PoolDims {
    pub fn num_neurons(&self) -> usize {
        self.x * self.y * self.z
    }
}

/// Parameters of the logistic radius-growth law.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrowthParams {
    pub epsilon: f64,
    pub beta: f64,
    /// Recognized for compatibility with existing parameter sets; the radius
    /// update applies the outgrowth directly and does not scale it by `rho`.
    pub rho: f64,
    /// Target firing rate in spikes per second.
    pub target_rate: f64,
    /// Radii never shrink below this, so even rapidly-firing neurons keep
    /// connecting to neurons within their receptive field.
    pub min_radius: f64,
    /// Initial radius for every neuron, so receptive fields start overlapping
    /// without a long warm-up.
    pub start_radius: f64,
}

impl GrowthParams {
    /// The rate at which outgrowth saturates, `target_rate / epsilon`.
    pub fn max_rate(&self) -> f64 {
        self.target_rate / self.epsilon
    }
}

/// Explicit neuron placement, overriding the random fractions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FixedLayout {
    /// Indices of endogenously-active (starter) neurons.
    pub endogenously_active: Vec<usize>,
    /// Indices of inhibitory neurons.
    pub inhibitory: Vec<usize>,
}

/// Full parameter set consumed by [`crate::simulator::Simulator::build`].
///
/// Voltage and current ranges are `(min, max)` pairs; each neuron draws its
/// own value uniformly from the range at creation time, in index order, from
/// the single seeded stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub pool: PoolDims,
    /// Fraction of neurons that are excitatory (the rest are inhibitory).
    pub frac_excitatory: f64,
    /// Fraction of neurons that are endogenously active, drawn from the
    /// excitatory population.
    pub frac_starter: f64,
    /// Injected background current range (A).
    pub i_inject: (f64, f64),
    /// Noise current standard-deviation range (A).
    pub i_noise: (f64, f64),
    /// Firing threshold range (V).
    pub v_thresh: (f64, f64),
    /// Resting potential range (V).
    pub v_resting: (f64, f64),
    /// Post-spike reset potential range (V).
    pub v_reset: (f64, f64),
    /// Initial membrane potential range (V).
    pub v_init: (f64, f64),
    /// Firing threshold range for endogenously-active neurons (V).
    pub starter_v_thresh: (f64, f64),
    /// Reset potential range for endogenously-active neurons (V).
    pub starter_v_reset: (f64, f64),
    /// Membrane resistance (Ohm); the membrane time constant is `Rm * Cm`.
    #[serde(default = "default_membrane_resistance")]
    pub membrane_resistance: f64,
    /// Membrane capacitance (F).
    #[serde(default = "default_membrane_capacitance")]
    pub membrane_capacitance: f64,
    pub growth: GrowthParams,
    /// Duration of one epoch in seconds; growth runs at each epoch boundary.
    pub epoch_duration: f64,
    pub num_epochs: usize,
    /// Upper bound on plausible firing rates (spikes/s), used for sanity
    /// checks on the per-epoch rate estimates.
    pub max_firing_rate: f64,
    /// Cap on the number of outgoing synapses per neuron.
    pub max_synapses_per_neuron: usize,
    /// Integration time step in seconds.
    #[serde(default = "default_delta_t")]
    pub delta_t: f64,
    /// Absolute refractory period in seconds.
    #[serde(default = "default_refractory_period")]
    pub refractory_period: f64,
    /// Synaptic transmission delay in seconds; must fit the delay queue.
    #[serde(default = "default_synapse_delay")]
    pub synapse_delay: f64,
    /// Minimum receptive-field overlap area that triggers synapse creation.
    #[serde(default)]
    pub min_overlap_area: f64,
    /// Seed for the random stream; the whole trajectory is reproducible for a
    /// fixed seed and configuration.
    pub seed: u64,
    /// Optional explicit layout; when present, the fractions are ignored.
    #[serde(default)]
    pub fixed_layout: Option<FixedLayout>,
}

fn default_membrane_resistance() -> f64 {
    1.0e6
}

fn default_membrane_capacitance() -> f64 {
    3.0e-8
}

fn default_delta_t() -> f64 {
    1.0e-4
}

fn default_refractory_period() -> f64 {
    3.0e-3
}

fn default_synapse_delay() -> f64 {
    1.0e-3
}

impl SimulationConfig {
    /// A configuration for an `x` by `y` pool with the classic parameter set
    /// of the growth model. Intended as a starting point to tweak.
    pub fn with_pool(x: usize, y: usize) -> Self {
        SimulationConfig {
            pool: PoolDims { x, y, z: 1 },
            frac_excitatory: 0.98,
            frac_starter: 0.10,
            i_inject: (13.5e-9, 13.5e-9),
            i_noise: (1.0e-9, 1.5e-9),
            v_thresh: (15.0e-3, 15.0e-3),
            v_resting: (0.0, 0.0),
            v_reset: (13.5e-3, 13.5e-3),
            v_init: (13.0e-3, 13.0e-3),
            starter_v_thresh: (13.565e-3, 13.655e-3),
            starter_v_reset: (13.0e-3, 13.0e-3),
            membrane_resistance: default_membrane_resistance(),
            membrane_capacitance: default_membrane_capacitance(),
            growth: GrowthParams {
                epsilon: 0.60,
                beta: 0.10,
                rho: 1.0e-4,
                target_rate: 1.9,
                min_radius: 0.1,
                start_radius: 0.4,
            },
            epoch_duration: 1.0,
            num_epochs: 1,
            max_firing_rate: 200.0,
            max_synapses_per_neuron: 200,
            delta_t: default_delta_t(),
            refractory_period: default_refractory_period(),
            synapse_delay: default_synapse_delay(),
            min_overlap_area: 0.0,
            seed: 1,
            fixed_layout: None,
        }
    }

    pub fn num_neurons(&self) -> usize {
        self.pool.num_neurons()
    }

    /// Number of ticks in one epoch. Only meaningful on a validated config.
    pub fn ticks_per_epoch(&self) -> u64 {
        (self.epoch_duration / self.delta_t).round() as u64
    }

    /// Refractory period expressed in ticks.
    pub fn refractory_ticks(&self) -> u32 {
        (self.refractory_period / self.delta_t).round() as u32
    }

    /// Synaptic delay expressed in ticks, at least one.
    pub fn delay_ticks(&self) -> u32 {
        ((self.synapse_delay / self.delta_t).round() as u32).max(1)
    }

    /// Number of ticks per 10 ms activity-history bin, at least one.
    pub fn ticks_per_history_bin(&self) -> u64 {
        ((SPIKE_HISTORY_BIN / self.delta_t).round() as u64).max(1)
    }

    /// Check the whole configuration, collecting every problem into a single
    /// [`SimError::InvalidConfiguration`].
    pub fn validate(&self) -> Result<(), SimError> {
        let mut issues = Vec::new();

        if self.pool.x == 0 || self.pool.y == 0 || self.pool.z == 0 {
            issues.push("pool dimensions must all be positive".to_string());
        }
        if self.num_neurons() < 2 {
            issues.push("pool must contain at least two neurons".to_string());
        }

        if !(0.0..=1.0).contains(&self.frac_excitatory) {
            issues.push("frac_excitatory must be within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.frac_starter) {
            issues.push("frac_starter must be within [0, 1]".to_string());
        }
        if self.frac_starter > self.frac_excitatory {
            issues.push(
                "frac_starter cannot exceed frac_excitatory: starters are drawn from the excitatory population"
                    .to_string(),
            );
        }

        for (name, range) in [
            ("i_inject", self.i_inject),
            ("i_noise", self.i_noise),
            ("v_thresh", self.v_thresh),
            ("v_resting", self.v_resting),
            ("v_reset", self.v_reset),
            ("v_init", self.v_init),
            ("starter_v_thresh", self.starter_v_thresh),
            ("starter_v_reset", self.starter_v_reset),
        ] {
            let (min, max) = range;
            if !(min.is_finite() && max.is_finite()) || min > max {
                issues.push(format!("{} must be a finite (min, max) range", name));
            }
        }
        if self.i_noise.0 < 0.0 {
            issues.push("i_noise standard deviation cannot be negative".to_string());
        }

        if self.membrane_resistance <= 0.0 || self.membrane_capacitance <= 0.0 {
            issues.push("membrane resistance and capacitance must be positive".to_string());
        }

        if self.growth.epsilon <= 0.0 {
            issues.push("growth epsilon must be positive".to_string());
        }
        if self.growth.beta <= 0.0 {
            issues.push("growth beta must be positive".to_string());
        }
        if self.growth.rho < 0.0 {
            issues.push("growth rho cannot be negative".to_string());
        }
        if self.growth.target_rate <= 0.0 {
            issues.push("growth target_rate must be positive".to_string());
        }
        if self.growth.min_radius <= 0.0 {
            issues.push("growth min_radius must be positive".to_string());
        }
        if self.growth.start_radius < self.growth.min_radius {
            issues.push("growth start_radius cannot be below min_radius".to_string());
        }
        if self.min_overlap_area < 0.0 {
            issues.push("min_overlap_area cannot be negative".to_string());
        }

        if self.num_epochs == 0 {
            issues.push("num_epochs must be at least one".to_string());
        }
        if self.max_firing_rate <= 0.0 {
            issues.push("max_firing_rate must be positive".to_string());
        }
        if self.max_synapses_per_neuron == 0 {
            issues.push("max_synapses_per_neuron must be at least one".to_string());
        }

        if self.delta_t <= 0.0 || !self.delta_t.is_finite() {
            issues.push("delta_t must be positive and finite".to_string());
        } else {
            if self.epoch_duration <= 0.0 {
                issues.push("epoch_duration must be positive".to_string());
            } else {
                // The tick grid is exact: an epoch must span a whole number of
                // ticks, and at least the delay-queue width so every pending
                // delivery scheduled in one epoch can drain before the next
                // boundary batch.
                let ticks = self.epoch_duration / self.delta_t;
                if (ticks - ticks.round()).abs() > TICK_GRID_TOLERANCE * ticks.round().max(1.0) {
                    issues.push(format!(
                        "epoch_duration ({} s) is not a whole number of ticks at delta_t = {} s",
                        self.epoch_duration, self.delta_t
                    ));
                } else if self.ticks_per_epoch() < DELAY_QUEUE_LENGTH as u64 {
                    issues.push(format!(
                        "epoch must span at least {} ticks (the delay-queue width)",
                        DELAY_QUEUE_LENGTH
                    ));
                }
            }
            if self.refractory_period < 0.0 {
                issues.push("refractory_period cannot be negative".to_string());
            }
            if self.synapse_delay <= 0.0 {
                issues.push("synapse_delay must be positive".to_string());
            } else if (self.synapse_delay / self.delta_t).round() as u64
                >= DELAY_QUEUE_LENGTH as u64
            {
                issues.push(format!(
                    "synapse_delay ({} s) does not fit the {}-slot delay queue at delta_t = {} s",
                    self.synapse_delay, DELAY_QUEUE_LENGTH, self.delta_t
                ));
            }
        }

        if let Some(layout) = &self.fixed_layout {
            let n = self.num_neurons();
            let mut seen = vec![false; n];
            for (name, indices) in [
                ("endogenously_active", &layout.endogenously_active),
                ("inhibitory", &layout.inhibitory),
            ] {
                for &i in indices {
                    if i >= n {
                        issues.push(format!("fixed_layout.{} index {} is out of bounds", name, i));
                    } else if seen[i] {
                        issues.push(format!(
                            "fixed_layout assigns neuron {} more than one role",
                            i
                        ));
                    } else {
                        seen[i] = true;
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(SimError::InvalidConfiguration(issues))
        }
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), SimError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<SimulationConfig, SimError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: SimulationConfig = serde_json::from_reader(reader)?;
        Ok(config)
    }
}
