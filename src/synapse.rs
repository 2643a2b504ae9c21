//! Synapse storage and dynamics: bit-packed delay queues, post-synaptic
//! response decay, and the growth-phase create/remove operations.
//!
//! Synapses live in an index-recycling arena so creation and removal between
//! epochs never invalidate the indices of surviving synapses. Between epochs
//! the arena is kept in canonical `(source, target)` order, which fixes the
//! floating-point summation order of deliveries and makes restored runs
//! bit-identical to uninterrupted ones.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::layout::NeuronType;
use crate::DELAY_QUEUE_LENGTH;

/// Synapse class from the (source, target) neuron types; the first letter is
/// the source side. Inhibitory-source synapses carry negative weights and a
/// slower post-synaptic decay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SynapseKind {
    EE,
    EI,
    IE,
    II,
}

impl SynapseKind {
    pub fn of(source: NeuronType, target: NeuronType) -> Self {
        match (source.is_inhibitory(), target.is_inhibitory()) {
            (false, false) => SynapseKind::EE,
            (false, true) => SynapseKind::EI,
            (true, false) => SynapseKind::IE,
            (true, true) => SynapseKind::II,
        }
    }

    /// Sign applied to the weight magnitude, fixed for the synapse's life.
    pub fn sign(&self) -> f64 {
        match self {
            SynapseKind::EE | SynapseKind::EI => 1.0,
            SynapseKind::IE | SynapseKind::II => -1.0,
        }
    }

    /// Post-synaptic response time constant in seconds.
    pub fn tau(&self) -> f64 {
        match self {
            SynapseKind::EE | SynapseKind::EI => 3.0e-3,
            SynapseKind::IE | SynapseKind::II => 6.0e-3,
        }
    }
}

/// A single synapse. The delay queue is a fixed-width circular bitset: bit
/// `(tick + delay) % DELAY_QUEUE_LENGTH` marks a pending delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synapse {
    source: usize,
    target: usize,
    kind: SynapseKind,
    weight: f64,
    psr: f64,
    decay: f64,
    delay: u32,
    delay_queue: u32,
}

impl Synapse {
    pub fn source(&self) -> usize {
        self.source
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn kind(&self) -> SynapseKind {
        self.kind
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn delay(&self) -> u32 {
        self.delay
    }

    fn has_pending_delivery(&self) -> bool {
        self.delay_queue != 0
    }
}

/// Arena of synapses with per-source fan-out lists and a one-synapse-per-pair
/// index. Creation and removal happen only between epochs, driven by the
/// growth engine.
#[derive(Debug, Clone)]
pub struct SynapseBank {
    slots: Vec<Option<Synapse>>,
    free: Vec<usize>,
    outgoing: Vec<Vec<usize>>,
    pair_index: HashMap<(usize, usize), usize>,
    delay_ticks: u32,
    delta_t: f64,
    cap: usize,
}

impl SynapseBank {
    pub fn new(num_neurons: usize, delta_t: f64, delay_ticks: u32, cap: usize) -> Self {
        SynapseBank {
            slots: Vec::new(),
            free: Vec::new(),
            outgoing: vec![Vec::new(); num_neurons],
            pair_index: HashMap::new(),
            delay_ticks,
            delta_t,
            cap,
        }
    }

    pub fn num_synapses(&self) -> usize {
        self.pair_index.len()
    }

    pub fn contains(&self, source: usize, target: usize) -> bool {
        self.pair_index.contains_key(&(source, target))
    }

    pub fn outgoing_count(&self, neuron: usize) -> usize {
        self.outgoing[neuron].len()
    }

    /// Live synapses in arena order (canonical between epochs).
    pub fn iter(&self) -> impl Iterator<Item = &Synapse> + '_ {
        self.slots.iter().flatten()
    }

    /// Schedule a pending delivery on every synapse rooted at `source`, to
    /// arrive `delay` ticks after `tick`.
    pub fn notify(&mut self, source: usize, tick: u64) {
        for &slot in &self.outgoing[source] {
            if let Some(synapse) = self.slots[slot].as_mut() {
                let pos = (tick + synapse.delay as u64) % DELAY_QUEUE_LENGTH as u64;
                synapse.delay_queue |= 1 << pos;
            }
        }
    }

    /// Advance every synapse by one tick: consume this tick's delay-queue bit
    /// (exactly once), decay the post-synaptic response, and add it to the
    /// target's summation bin.
    pub fn step(&mut self, tick: u64, bins: &mut [f64]) {
        let bit = 1u32 << (tick % DELAY_QUEUE_LENGTH as u64) as u32;
        for synapse in self.slots.iter_mut().flatten() {
            if synapse.delay_queue & bit != 0 {
                synapse.delay_queue &= !bit;
                synapse.psr += synapse.weight;
            }
            synapse.psr *= synapse.decay;
            bins[synapse.target] += synapse.psr;
        }
    }

    /// Create a synapse with the given weight magnitude; the sign comes from
    /// the kind. Growth-phase only.
    pub fn create(
        &mut self,
        source: usize,
        target: usize,
        kind: SynapseKind,
        magnitude: f64,
    ) -> Result<(), SimError> {
        if self.contains(source, target) {
            return Err(SimError::InvalidLifecycle(format!(
                "synapse {} -> {} already exists",
                source, target
            )));
        }
        if self.outgoing[source].len() >= self.cap {
            return Err(SimError::SynapseCapacity {
                neuron: source,
                cap: self.cap,
            });
        }

        let synapse = Synapse {
            source,
            target,
            kind,
            weight: kind.sign() * magnitude,
            psr: 0.0,
            decay: (-self.delta_t / kind.tau()).exp(),
            delay: self.delay_ticks,
            delay_queue: 0,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(synapse);
                slot
            }
            None => {
                self.slots.push(Some(synapse));
                self.slots.len() - 1
            }
        };
        self.outgoing[source].push(slot);
        self.pair_index.insert((source, target), slot);
        Ok(())
    }

    /// Refresh the weight magnitude of an existing synapse; the stored sign is
    /// preserved. Growth-phase only.
    pub fn set_weight(&mut self, source: usize, target: usize, magnitude: f64) {
        if let Some(&slot) = self.pair_index.get(&(source, target)) {
            if let Some(synapse) = self.slots[slot].as_mut() {
                synapse.weight = synapse.kind.sign() * magnitude;
            }
        }
    }

    /// Remove the synapse for the pair, unless it still has deliveries in
    /// flight, in which case removal is deferred to a later boundary. Returns
    /// `true` if the synapse was removed.
    pub fn remove(&mut self, source: usize, target: usize) -> bool {
        let Some(&slot) = self.pair_index.get(&(source, target)) else {
            return false;
        };
        if self
            .slots[slot]
            .as_ref()
            .is_some_and(|s| s.has_pending_delivery())
        {
            return false;
        }
        self.pair_index.remove(&(source, target));
        self.outgoing[source].retain(|&s| s != slot);
        self.slots[slot] = None;
        self.free.push(slot);
        true
    }

    /// Re-pack the arena into canonical `(source, target)` order. Called once
    /// per epoch boundary after the rewire batch, so delivery summation order
    /// is a function of the live topology alone.
    pub fn canonicalize(&mut self) {
        let mut live: Vec<Synapse> = self.slots.drain(..).flatten().collect();
        live.sort_by_key(|s| (s.source, s.target));

        self.free.clear();
        self.pair_index.clear();
        for out in self.outgoing.iter_mut() {
            out.clear();
        }
        for (slot, synapse) in live.iter().enumerate() {
            self.pair_index.insert((synapse.source, synapse.target), slot);
            self.outgoing[synapse.source].push(slot);
        }
        self.slots = live.into_iter().map(Some).collect();
    }

    /// Clones of all live synapses in canonical order, for checkpoints and
    /// reports.
    pub fn snapshot(&self) -> Vec<Synapse> {
        let mut synapses: Vec<Synapse> = self.iter().cloned().collect();
        synapses.sort_by_key(|s| (s.source, s.target));
        synapses
    }

    /// Rebuild the bank from a snapshot (checkpoint restore). Fails without
    /// modifying anything if the snapshot is inconsistent.
    pub(crate) fn restore(&mut self, snapshot: Vec<Synapse>) -> Result<(), SimError> {
        let n = self.outgoing.len();
        let mut pairs = HashMap::new();
        let mut counts = vec![0usize; n];
        for synapse in &snapshot {
            if synapse.source >= n || synapse.target >= n {
                return Err(SimError::InvalidCheckpoint(format!(
                    "synapse {} -> {} is out of bounds for a pool of {}",
                    synapse.source, synapse.target, n
                )));
            }
            if pairs.insert((synapse.source, synapse.target), ()).is_some() {
                return Err(SimError::InvalidCheckpoint(format!(
                    "duplicate synapse {} -> {}",
                    synapse.source, synapse.target
                )));
            }
            counts[synapse.source] += 1;
        }
        if let Some(neuron) = counts.iter().position(|&c| c > self.cap) {
            return Err(SimError::InvalidCheckpoint(format!(
                "neuron {} has more outgoing synapses than the cap {}",
                neuron, self.cap
            )));
        }

        self.slots = snapshot.into_iter().map(Some).collect();
        self.free.clear();
        // canonicalize() rebuilds the pair index and fan-out lists.
        self.canonicalize();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank(num_neurons: usize, cap: usize) -> SynapseBank {
        // delta_t 0.1 ms, delay 5 ticks
        SynapseBank::new(num_neurons, 1.0e-4, 5, cap)
    }

    #[test]
    fn test_kind_of_types_and_signs() {
        use NeuronType::*;
        assert_eq!(SynapseKind::of(Excitatory, Inhibitory), SynapseKind::EI);
        assert_eq!(SynapseKind::of(Inhibitory, Excitatory), SynapseKind::IE);
        assert_eq!(SynapseKind::of(Inhibitory, Inhibitory), SynapseKind::II);
        assert_eq!(SynapseKind::of(EndogenouslyActive, Excitatory), SynapseKind::EE);
        assert_eq!(SynapseKind::EE.sign(), 1.0);
        assert_eq!(SynapseKind::IE.sign(), -1.0);
    }

    #[test]
    fn test_delivery_happens_exactly_once_at_tick_plus_delay() {
        let mut bank = bank(2, 10);
        bank.create(0, 1, SynapseKind::EE, 1.0).unwrap();
        bank.notify(0, 0);

        let mut bins = vec![0.0; 2];
        for tick in 0..5 {
            bank.step(tick, &mut bins);
            assert_eq!(bins[1], 0.0, "no charge before the delay elapses");
        }
        bank.step(5, &mut bins);
        let decay = (-1.0e-4_f64 / SynapseKind::EE.tau()).exp();
        assert!((bins[1] - decay).abs() < 1e-15);

        // Afterwards the response only decays; the bit must not fire again.
        let mut previous = bins[1];
        for tick in 6..70 {
            bins[1] = 0.0;
            bank.step(tick, &mut bins);
            assert!(bins[1] < previous);
            previous = bins[1];
        }
    }

    #[test]
    fn test_delay_queue_wraps_around() {
        let mut bank = bank(2, 10);
        bank.create(0, 1, SynapseKind::EE, 1.0).unwrap();
        let mut bins = vec![0.0; 2];

        // Fire close to the wrap point of the 32-slot queue.
        for tick in 0..30 {
            bank.step(tick, &mut bins);
        }
        bins[1] = 0.0;
        bank.notify(0, 30);
        for tick in 30..35 {
            bank.step(tick, &mut bins);
            assert_eq!(bins[1], 0.0);
            bins[1] = 0.0;
        }
        bank.step(35, &mut bins);
        assert!(bins[1] > 0.0);
    }

    #[test]
    fn test_inhibitory_synapse_delivers_negative_charge() {
        let mut bank = bank(2, 10);
        bank.create(0, 1, SynapseKind::IE, 1.0).unwrap();
        bank.notify(0, 0);
        let mut bins = vec![0.0; 2];
        for tick in 0..=5 {
            bank.step(tick, &mut bins);
        }
        assert!(bins[1] < 0.0);
    }

    #[test]
    fn test_capacity_is_enforced_per_source() {
        let mut bank = bank(3, 1);
        bank.create(0, 1, SynapseKind::EE, 1.0).unwrap();
        assert_eq!(
            bank.create(0, 2, SynapseKind::EE, 1.0),
            Err(SimError::SynapseCapacity { neuron: 0, cap: 1 })
        );
        // Other sources are unaffected.
        bank.create(1, 2, SynapseKind::EE, 1.0).unwrap();
    }

    #[test]
    fn test_one_synapse_per_ordered_pair() {
        let mut bank = bank(2, 10);
        bank.create(0, 1, SynapseKind::EE, 1.0).unwrap();
        assert!(bank.create(0, 1, SynapseKind::EE, 2.0).is_err());
        // The reverse direction is a distinct pair.
        bank.create(1, 0, SynapseKind::EE, 1.0).unwrap();
        assert_eq!(bank.num_synapses(), 2);
    }

    #[test]
    fn test_removal_is_deferred_while_deliveries_are_pending() {
        let mut bank = bank(2, 10);
        bank.create(0, 1, SynapseKind::EE, 1.0).unwrap();
        bank.notify(0, 0);
        assert!(!bank.remove(0, 1), "pending delivery must defer removal");
        assert!(bank.contains(0, 1));

        let mut bins = vec![0.0; 2];
        for tick in 0..=5 {
            bank.step(tick, &mut bins);
        }
        assert!(bank.remove(0, 1));
        assert!(!bank.contains(0, 1));
        assert_eq!(bank.num_synapses(), 0);
    }

    #[test]
    fn test_removed_slots_are_recycled() {
        let mut bank = bank(4, 10);
        bank.create(0, 1, SynapseKind::EE, 1.0).unwrap();
        bank.create(1, 2, SynapseKind::EE, 1.0).unwrap();
        assert!(bank.remove(0, 1));
        bank.create(2, 3, SynapseKind::EE, 1.0).unwrap();
        assert_eq!(bank.slots.len(), 2, "freed slot must be reused");
        assert_eq!(bank.num_synapses(), 2);
    }

    #[test]
    fn test_canonicalize_orders_by_pair() {
        let mut bank = bank(3, 10);
        bank.create(2, 0, SynapseKind::EE, 1.0).unwrap();
        bank.create(0, 1, SynapseKind::EE, 1.0).unwrap();
        bank.create(1, 2, SynapseKind::EE, 1.0).unwrap();
        bank.remove(0, 1);
        bank.create(0, 2, SynapseKind::EE, 1.0).unwrap();
        bank.canonicalize();

        let order: Vec<(usize, usize)> =
            bank.iter().map(|s| (s.source(), s.target())).collect();
        assert_eq!(order, vec![(0, 2), (1, 2), (2, 0)]);
        // Index structures stay consistent after re-packing.
        assert!(bank.contains(2, 0));
        assert_eq!(bank.outgoing_count(0), 1);
        let mut bins = vec![0.0; 3];
        bank.notify(2, 0);
        for tick in 0..=5 {
            bank.step(tick, &mut bins);
        }
        assert!(bins[0] > 0.0);
    }

    #[test]
    fn test_restore_rejects_duplicates_and_out_of_bounds() {
        let mut source = bank(3, 10);
        source.create(0, 1, SynapseKind::EE, 1.0).unwrap();
        source.create(1, 2, SynapseKind::EE, 1.0).unwrap();
        let snapshot = source.snapshot();

        let mut target = bank(3, 10);
        target.restore(snapshot.clone()).unwrap();
        assert_eq!(target.num_synapses(), 2);
        assert!(target.contains(0, 1));

        let mut doubled = snapshot.clone();
        doubled.push(snapshot[0].clone());
        assert!(bank(3, 10).restore(doubled).is_err());

        let mut small = bank(2, 10);
        assert!(small.restore(snapshot).is_err());
    }
}
