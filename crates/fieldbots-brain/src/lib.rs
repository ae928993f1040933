//! Neural substrate for fieldbots agents: a spatially organized neuron field
//! whose wiring follows from neuron placement, plus the recombination
//! primitives that evolve placements and genes across generations.

pub mod field;
pub mod genetics;

pub use field::{GenomeParseError, Neuron, NeuronField, NeuronRole, TopologyMismatch};
pub use genetics::{BREED_MUTATION_CHANCE, DRIFT_MUTATION_CHANCE};
