//! Neuron placement: grid coordinates, neuron types, and the cached
//! inter-neuron distance matrix.

use nalgebra::DMatrix;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::error::SimError;

/// The three neuron classes of the model.
///
/// Endogenously-active (starter) neurons are excitatory neurons with lowered
/// thresholds that seed the initial network activity; their synaptic sign is
/// excitatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeuronType {
    Excitatory,
    Inhibitory,
    EndogenouslyActive,
}

impl NeuronType {
    /// Whether spikes from this neuron inhibit their targets.
    pub fn is_inhibitory(&self) -> bool {
        matches!(self, NeuronType::Inhibitory)
    }
}

/// Immutable placement of the neuron pool: index to coordinate, index to type,
/// and the pairwise Euclidean distances (computed once; only radii change
/// across epochs).
#[derive(Debug, Clone, PartialEq)]
pub struct PoolLayout {
    dims: (usize, usize, usize),
    coords: Vec<[f64; 3]>,
    types: Vec<NeuronType>,
    dist: DMatrix<f64>,
}

impl PoolLayout {
    /// Place every neuron on the grid and assign types, either from the
    /// configured fixed layout or by drawing from the type fractions with the
    /// seeded stream. The configuration must already be validated.
    pub fn build<R: Rng>(config: &SimulationConfig, rng: &mut R) -> Result<Self, SimError> {
        let n = config.num_neurons();
        let (x, y, z) = (config.pool.x, config.pool.y, config.pool.z);

        // Index i maps to (i % x, (i / x) % y, i / (x * y)), row-major like the
        // original pool, with unit grid spacing.
        let coords: Vec<[f64; 3]> = (0..n)
            .map(|i| [(i % x) as f64, ((i / x) % y) as f64, (i / (x * y)) as f64])
            .collect();

        let types = match &config.fixed_layout {
            Some(layout) => {
                let mut types = vec![NeuronType::Excitatory; n];
                for &i in &layout.inhibitory {
                    types[i] = NeuronType::Inhibitory;
                }
                for &i in &layout.endogenously_active {
                    types[i] = NeuronType::EndogenouslyActive;
                }
                types
            }
            None => Self::random_types(config, n, rng)?,
        };

        let mut dist = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                let (a, b) = (&coords[i], &coords[j]);
                dist[(i, j)] = ((a[0] - b[0]).powi(2)
                    + (a[1] - b[1]).powi(2)
                    + (a[2] - b[2]).powi(2))
                .sqrt();
            }
        }

        Ok(PoolLayout {
            dims: (x, y, z),
            coords,
            types,
            dist,
        })
    }

    /// Random type map: inhibitory neurons first, then starters among the
    /// remaining excitatory ones, both drawn without replacement in a single
    /// shuffle of the index space.
    fn random_types<R: Rng>(
        config: &SimulationConfig,
        n: usize,
        rng: &mut R,
    ) -> Result<Vec<NeuronType>, SimError> {
        let num_inhibitory = ((1.0 - config.frac_excitatory) * n as f64).round() as usize;
        let num_starter = (config.frac_starter * n as f64).round() as usize;
        if num_inhibitory + num_starter > n {
            return Err(SimError::InvalidConfiguration(vec![format!(
                "type fractions assign {} inhibitory and {} starter neurons to a pool of {}",
                num_inhibitory, num_starter, n
            )]));
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);

        let mut types = vec![NeuronType::Excitatory; n];
        for &i in order.iter().take(num_inhibitory) {
            types[i] = NeuronType::Inhibitory;
        }
        for &i in order.iter().skip(num_inhibitory).take(num_starter) {
            types[i] = NeuronType::EndogenouslyActive;
        }
        Ok(types)
    }

    pub fn num_neurons(&self) -> usize {
        self.types.len()
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    pub fn coord(&self, i: usize) -> [f64; 3] {
        self.coords[i]
    }

    pub fn neuron_type(&self, i: usize) -> NeuronType {
        self.types[i]
    }

    pub fn types(&self) -> &[NeuronType] {
        &self.types
    }

    /// Euclidean distance between neurons `i` and `j`.
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        self.dist[(i, j)]
    }

    pub fn distances(&self) -> &DMatrix<f64> {
        &self.dist
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FixedLayout;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_fixed_layout_types() {
        let mut config = SimulationConfig::with_pool(2, 2);
        config.fixed_layout = Some(FixedLayout {
            endogenously_active: vec![0],
            inhibitory: vec![1],
        });
        let mut rng = StdRng::seed_from_u64(42);
        let layout = PoolLayout::build(&config, &mut rng).unwrap();
        assert_eq!(
            layout.types(),
            &[
                NeuronType::EndogenouslyActive,
                NeuronType::Inhibitory,
                NeuronType::Excitatory,
                NeuronType::Excitatory,
            ]
        );
    }

    #[test]
    fn test_grid_coordinates_and_distances() {
        let config = SimulationConfig::with_pool(3, 2);
        let mut rng = StdRng::seed_from_u64(42);
        let layout = PoolLayout::build(&config, &mut rng).unwrap();
        assert_eq!(layout.coord(0), [0.0, 0.0, 0.0]);
        assert_eq!(layout.coord(2), [2.0, 0.0, 0.0]);
        assert_eq!(layout.coord(4), [1.0, 1.0, 0.0]);
        assert_eq!(layout.distance(0, 2), 2.0);
        assert_eq!(layout.distance(0, 4), 2.0_f64.sqrt());
        assert_eq!(layout.distance(3, 3), 0.0);
        assert_eq!(layout.distance(1, 5), layout.distance(5, 1));
    }

    #[test]
    fn test_random_fractions_produce_expected_counts() {
        let mut config = SimulationConfig::with_pool(10, 10);
        config.frac_excitatory = 0.9;
        config.frac_starter = 0.1;
        let mut rng = StdRng::seed_from_u64(42);
        let layout = PoolLayout::build(&config, &mut rng).unwrap();
        let inhibitory = layout.types().iter().filter(|t| t.is_inhibitory()).count();
        let starters = layout
            .types()
            .iter()
            .filter(|t| **t == NeuronType::EndogenouslyActive)
            .count();
        assert_eq!(inhibitory, 10);
        assert_eq!(starters, 10);
    }

    #[test]
    fn test_same_seed_same_layout() {
        let config = SimulationConfig::with_pool(8, 8);
        let mut rng1 = StdRng::seed_from_u64(7);
        let mut rng2 = StdRng::seed_from_u64(7);
        let layout1 = PoolLayout::build(&config, &mut rng1).unwrap();
        let layout2 = PoolLayout::build(&config, &mut rng2).unwrap();
        assert_eq!(layout1, layout2);
    }
}
