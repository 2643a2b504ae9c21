//! Final-state report: simulated time, growth histories, burstiness, and a
//! connectivity snapshot.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::SimError;
use crate::layout::NeuronType;
use crate::simulator::Simulator;

/// One live synapse in the final connectivity snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub source: usize,
    pub target: usize,
    pub weight: f64,
}

/// Everything an analysis of a finished run needs, in plain vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub simulated_seconds: f64,
    pub epochs_completed: usize,
    pub neuron_types: Vec<NeuronType>,
    pub final_radii: Vec<f64>,
    pub final_rates: Vec<f64>,
    pub radii_history: Vec<Vec<f64>>,
    pub rates_history: Vec<Vec<f64>>,
    pub outgrowth_history: Vec<Vec<f64>>,
    /// Network spike counts per 10 ms bin.
    pub spikes_history: Vec<u32>,
    /// Histogram of the 10 ms spike counts.
    pub burstiness: Vec<usize>,
    /// Live synapses in canonical (source, target) order.
    pub connectivity: Vec<ConnectionRecord>,
}

impl Report {
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), SimError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

impl Simulator {
    /// Assemble the final-state report. Callable at any epoch boundary; the
    /// snapshot reflects the state as of the last completed epoch.
    pub fn report(&self) -> Report {
        let growth = self.growth();
        Report {
            simulated_seconds: self.simulated_seconds(),
            epochs_completed: self.epoch(),
            neuron_types: self.layout().types().to_vec(),
            final_radii: growth.radii().iter().copied().collect(),
            final_rates: growth.rates().iter().copied().collect(),
            radii_history: growth.radii_history().to_vec(),
            rates_history: growth.rates_history().to_vec(),
            outgrowth_history: growth.outgrowth_history().to_vec(),
            spikes_history: growth.spikes_history().to_vec(),
            burstiness: growth.burstiness_histogram(),
            connectivity: self
                .synapses()
                .snapshot()
                .into_iter()
                .map(|s| ConnectionRecord {
                    source: s.source(),
                    target: s.target(),
                    weight: s.weight(),
                })
                .collect(),
        }
    }
}
