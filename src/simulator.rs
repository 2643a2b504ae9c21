//! The simulation driver: owns the clock, the seeded stream, and the banks,
//! and runs the per-tick loop for each epoch before handing over to the
//! growth engine at every epoch boundary.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::SimulationConfig;
use crate::error::SimError;
use crate::growth::{GrowthEngine, GrowthSummary};
use crate::layout::PoolLayout;
use crate::neuron::NeuronBank;
use crate::synapse::SynapseBank;

/// Scheduler lifecycle. The only legal path is
/// `Idle -> Running -> Finished`; stepping a finished simulation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorState {
    Idle,
    Running,
    Finished,
}

/// Monotonic tick counter, advanced only by the simulator. Epoch `k` starts
/// at exactly `k * ticks_per_epoch`; the tick grid never drifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationClock {
    tick: u64,
}

impl SimulationClock {
    fn new() -> Self {
        SimulationClock { tick: 0 }
    }

    /// A clock resumed at a checkpointed tick.
    pub(crate) fn at(tick: u64) -> Self {
        SimulationClock { tick }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    fn advance(&mut self) {
        self.tick += 1;
    }
}

/// A complete simulation: pool layout, neuron and synapse banks, growth
/// engine, and the single seeded random stream. Everything the run touches is
/// deterministic for a fixed seed and configuration.
pub struct Simulator {
    pub(crate) config: SimulationConfig,
    pub(crate) layout: PoolLayout,
    pub(crate) neurons: NeuronBank,
    pub(crate) synapses: SynapseBank,
    pub(crate) growth: GrowthEngine,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) clock: SimulationClock,
    pub(crate) epoch: usize,
    pub(crate) state: SimulatorState,
    fired: Vec<usize>,
}

impl Simulator {
    /// Validate the configuration and build the whole network. The seeded
    /// stream is consumed in a fixed order (layout, then neuron parameters),
    /// so identical configurations always produce identical networks.
    pub fn build(config: SimulationConfig) -> Result<Self, SimError> {
        config.validate()?;

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let layout = PoolLayout::build(&config, &mut rng)?;
        let neurons = NeuronBank::create_all(&config, &layout, &mut rng)?;
        let synapses = SynapseBank::new(
            config.num_neurons(),
            config.delta_t,
            config.delay_ticks(),
            config.max_synapses_per_neuron,
        );
        let growth = GrowthEngine::new(&config);

        log::info!(
            "built pool of {} neurons ({} epochs of {} ticks at dt = {} s)",
            config.num_neurons(),
            config.num_epochs,
            config.ticks_per_epoch(),
            config.delta_t,
        );

        Ok(Simulator {
            config,
            layout,
            neurons,
            synapses,
            growth,
            rng,
            clock: SimulationClock::new(),
            epoch: 0,
            state: SimulatorState::Idle,
            fired: Vec::new(),
        })
    }

    /// Run every remaining epoch, then transition to `Finished`.
    pub fn run(&mut self) -> Result<(), SimError> {
        if self.state == SimulatorState::Finished {
            return Err(SimError::InvalidLifecycle(
                "run called on a finished simulation".to_string(),
            ));
        }
        while self.epoch < self.config.num_epochs {
            self.run_epoch()?;
        }
        Ok(())
    }

    /// Advance one full epoch: `ticks_per_epoch` ticks of neuron-then-synapse
    /// stepping, then one growth pass at the boundary.
    pub fn run_epoch(&mut self) -> Result<GrowthSummary, SimError> {
        if self.state == SimulatorState::Finished {
            return Err(SimError::InvalidLifecycle(
                "cannot step a finished simulation".to_string(),
            ));
        }
        self.state = SimulatorState::Running;

        let ticks = self.config.ticks_per_epoch();
        for k in 0..ticks {
            if k % 10_000 == 0 {
                log::debug!(
                    "epoch {}/{}: simulated time {:.4} s",
                    self.epoch + 1,
                    self.config.num_epochs,
                    self.clock.tick() as f64 * self.config.delta_t,
                );
            }
            self.advance_tick();
        }

        let summary = self
            .growth
            .grow(&self.layout, &mut self.neurons, &mut self.synapses)?;
        self.epoch += 1;
        if self.epoch == self.config.num_epochs {
            self.state = SimulatorState::Finished;
            log::info!(
                "simulation finished: {} epochs, {:.2} s simulated",
                self.epoch,
                self.simulated_seconds(),
            );
        }
        Ok(summary)
    }

    /// One tick. The neuron pass drains the summation bins and fires; spikes
    /// fan out to the delay queues; the synapse pass then fills the bins that
    /// the next tick's neuron pass will read. The passes never interleave.
    fn advance_tick(&mut self) {
        let tick = self.clock.tick();
        self.neurons.step(&mut self.rng, &mut self.fired);
        if !self.fired.is_empty() {
            self.growth.record_spikes(tick, self.fired.len());
            for &source in &self.fired {
                self.synapses.notify(source, tick);
            }
        }
        self.synapses.step(tick, self.neurons.bins_mut());
        self.clock.advance();
    }

    pub fn state(&self) -> SimulatorState {
        self.state
    }

    /// Completed epochs.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn tick(&self) -> u64 {
        self.clock.tick()
    }

    /// Total simulated time in seconds.
    pub fn simulated_seconds(&self) -> f64 {
        self.clock.tick() as f64 * self.config.delta_t
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn layout(&self) -> &PoolLayout {
        &self.layout
    }

    pub fn neurons(&self) -> &NeuronBank {
        &self.neurons
    }

    pub fn synapses(&self) -> &SynapseBank {
        &self.synapses
    }

    pub fn growth(&self) -> &GrowthEngine {
        &self.growth
    }
}
