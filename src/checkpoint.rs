//! Full-state snapshots at epoch boundaries.
//!
//! A checkpoint captures everything the simulation will touch again: tick and
//! epoch counters, per-neuron dynamic state, the live synapses with their
//! delay queues, the growth state with its append-only histories, and the
//! position of the random stream. Restoring and continuing is bit-identical
//! to an uninterrupted run with the same seed and configuration.

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::config::SimulationConfig;
use crate::error::SimError;
use crate::neuron::Neuron;
use crate::simulator::{SimulationClock, Simulator, SimulatorState};
use crate::synapse::Synapse;

/// Bumped whenever the serialized layout changes; restoring a checkpoint
/// written by a different version fails.
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    version: u32,
    tick: u64,
    epoch: usize,
    neurons: Vec<Neuron>,
    // Synaptic charge already delivered for the next tick's neuron pass.
    summation_bins: Vec<f64>,
    synapses: Vec<Synapse>,
    radii: Vec<f64>,
    rates: Vec<f64>,
    radii_history: Vec<Vec<f64>>,
    rates_history: Vec<Vec<f64>>,
    outgrowth_history: Vec<Vec<f64>>,
    spikes_history: Vec<u32>,
    rng: ChaCha8Rng,
}

impl Checkpoint {
    /// Snapshot a simulation. Only meaningful at an epoch boundary, which is
    /// the only observable state a [`Simulator`] exposes.
    pub fn capture(sim: &Simulator) -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            tick: sim.tick(),
            epoch: sim.epoch(),
            neurons: sim.neurons.neurons().to_vec(),
            summation_bins: sim.neurons.bins().to_vec(),
            synapses: sim.synapses.snapshot(),
            radii: sim.growth.radii().iter().copied().collect(),
            rates: sim.growth.rates().iter().copied().collect(),
            radii_history: sim.growth.radii_history().to_vec(),
            rates_history: sim.growth.rates_history().to_vec(),
            outgrowth_history: sim.growth.outgrowth_history().to_vec(),
            spikes_history: sim.growth.spikes_history().to_vec(),
            rng: sim.rng.clone(),
        }
    }

    /// Rebuild a simulator from this checkpoint and the configuration the
    /// original run was built from. Any inconsistency fails with
    /// [`SimError::InvalidCheckpoint`] and nothing is partially applied.
    pub fn restore(&self, config: &SimulationConfig) -> Result<Simulator, SimError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(SimError::InvalidCheckpoint(format!(
                "checkpoint version {} is not supported (expected {})",
                self.version, CHECKPOINT_VERSION
            )));
        }

        // Rebuilding from the seed reproduces the layout and the neuron
        // parameter draws; the checkpoint then overwrites the dynamic state
        // and the stream position.
        let mut sim = Simulator::build(config.clone())?;

        if self.epoch > config.num_epochs {
            return Err(SimError::InvalidCheckpoint(format!(
                "checkpoint is at epoch {} but the configuration has only {}",
                self.epoch, config.num_epochs
            )));
        }
        if self.tick != self.epoch as u64 * config.ticks_per_epoch() {
            return Err(SimError::InvalidCheckpoint(format!(
                "tick {} is not the boundary of epoch {}",
                self.tick, self.epoch
            )));
        }
        if self.radii_history.len() != self.epoch {
            return Err(SimError::InvalidCheckpoint(format!(
                "history holds {} epochs but the checkpoint is at epoch {}",
                self.radii_history.len(),
                self.epoch
            )));
        }

        sim.neurons
            .restore_neurons(self.neurons.clone(), self.summation_bins.clone())?;
        sim.synapses.restore(self.synapses.clone())?;
        sim.growth.restore(
            self.radii.clone(),
            self.rates.clone(),
            self.radii_history.clone(),
            self.rates_history.clone(),
            self.outgrowth_history.clone(),
            self.spikes_history.clone(),
        )?;
        sim.rng = self.rng.clone();
        sim.clock = SimulationClock::at(self.tick);
        sim.epoch = self.epoch;
        sim.state = if self.epoch == config.num_epochs {
            SimulatorState::Finished
        } else if self.epoch > 0 {
            SimulatorState::Running
        } else {
            SimulatorState::Idle
        };
        Ok(sim)
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), SimError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Checkpoint, SimError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let checkpoint: Checkpoint = serde_json::from_reader(reader)?;
        Ok(checkpoint)
    }
}
