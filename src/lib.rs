//! This crate simulates networks of leaky-integrate-and-fire neurons whose
//! synaptic connectivity grows and prunes itself over successive epochs,
//! modeling activity-dependent structural plasticity.
//!
//! A simulation alternates between two time scales: a fine-grained per-tick
//! integration loop (membrane voltages, delayed synaptic deliveries) and a
//! coarse-grained growth pass at each epoch boundary, which turns accumulated
//! firing statistics into new connection radii and rewires synapses from the
//! overlap of receptive fields. The whole trajectory is deterministic for a
//! fixed seed and configuration.
//!
//! # Running a Simulation
//!
//! ```rust
//! use grownet::config::SimulationConfig;
//! use grownet::simulator::Simulator;
//!
//! // A 3x3 pool with short epochs, reproducible for the given seed.
//! let mut config = SimulationConfig::with_pool(3, 3);
//! config.epoch_duration = 0.01;
//! config.num_epochs = 2;
//! config.seed = 42;
//!
//! let mut sim = Simulator::build(config).unwrap();
//! sim.run().unwrap();
//!
//! let report = sim.report();
//! assert_eq!(report.epochs_completed, 2);
//! assert_eq!(report.radii_history.len(), 2);
//! ```
//!
//! # Checkpointing
//!
//! Snapshots are only taken at epoch boundaries; restoring one and continuing
//! is indistinguishable from an uninterrupted run.
//!
//! ```rust
//! use grownet::checkpoint::Checkpoint;
//! use grownet::config::SimulationConfig;
//! use grownet::simulator::Simulator;
//!
//! let mut config = SimulationConfig::with_pool(2, 2);
//! config.epoch_duration = 0.01;
//! config.num_epochs = 2;
//!
//! let mut sim = Simulator::build(config.clone()).unwrap();
//! sim.run_epoch().unwrap();
//!
//! let checkpoint = Checkpoint::capture(&sim);
//! let mut resumed = checkpoint.restore(&config).unwrap();
//! resumed.run().unwrap();
//!
//! sim.run().unwrap();
//! assert_eq!(resumed.report(), sim.report());
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod growth;
pub mod layout;
pub mod neuron;
pub mod report;
pub mod simulator;
pub mod synapse;

/// Width of the per-synapse circular delay queue, in ticks. A synapse delay
/// must fit the queue at the configured time step.
pub const DELAY_QUEUE_LENGTH: u32 = 32;
/// Scale factor from receptive-field overlap area to synapse weight magnitude.
pub const SYNAPSE_STRENGTH_ADJUSTMENT: f64 = 1.0e-8;
/// Width of one activity-history bin, in seconds.
pub const SPIKE_HISTORY_BIN: f64 = 0.01;
