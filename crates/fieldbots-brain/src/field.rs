//! The spatial neuron field: placement on a toroidal square, proximity
//! wiring, slot-ordered activation, and the genome text codec.

use std::fmt::Write as _;

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::genetics;

/// Inner edge of the connection annulus, in field units. Also excludes
/// self-connection at distance zero.
pub const MIN_RANGE: f32 = 0.05;
/// Outer edge of the connection annulus, in field units.
pub const MAX_RANGE: f32 = 1.0;
/// Gain applied inside the activation sigmoid. The sign convention is
/// inverted: positive aggregate drive pushes a neuron's value toward zero.
pub const SIGMOID_MULTIPLIER: f32 = 5.0;

/// Terminator line of the genome text format.
const GENOME_SENTINEL: &str = "~";

/// How a neuron participates in external binding.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum NeuronRole {
    /// Ordinary field neuron: proximity-wired inputs, sigmoid activation.
    #[default]
    Interior,
    /// Bound sensor channel; its value is written from outside each tick and
    /// it carries no weighted connections.
    Input,
    /// Bound motor channel; computed like an interior neuron, read from
    /// outside, never forwarded specially.
    Output,
}

/// A single neuron: a named point on the toroidal field with a signed output
/// factor and the weighted connections derived from its neighborhood.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neuron {
    name: String,
    position: [f32; 2],
    role: NeuronRole,
    output_factor: f32,
    value: f32,
    connections: Vec<(usize, f32)>,
}

impl Neuron {
    fn with_genes(name: String, position: [f32; 2], output_factor: f32) -> Self {
        Self {
            name,
            position,
            role: NeuronRole::Interior,
            output_factor,
            value: 0.0,
            connections: Vec::new(),
        }
    }

    fn random(name: String, side_length: f32, rng: &mut dyn RngCore) -> Self {
        let position = [
            side_length * rng.random::<f32>(),
            side_length * rng.random::<f32>(),
        ];
        // output factors start at exactly +/-1 and only become continuous
        // through later recombination
        let output_factor = if rng.random::<f32>() > 0.5 { 1.0 } else { -1.0 };
        Self::with_genes(name, position, output_factor)
    }

    /// Name of the neuron (bound channels are renamed at binding time).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position on the toroidal field.
    #[must_use]
    pub const fn position(&self) -> [f32; 2] {
        self.position
    }

    /// Current binding role.
    #[must_use]
    pub const fn role(&self) -> NeuronRole {
        self.role
    }

    /// Signed output gene in `[-1, 1]`.
    #[must_use]
    pub const fn output_factor(&self) -> f32 {
        self.output_factor
    }

    /// Activation value in `[0, 1]`.
    #[must_use]
    pub const fn value(&self) -> f32 {
        self.value
    }

    /// Incoming `(source slot, weight)` pairs.
    #[must_use]
    pub fn connections(&self) -> &[(usize, f32)] {
        &self.connections
    }

    /// Value as seen by downstream neurons.
    fn output(&self) -> f32 {
        self.value * self.output_factor
    }

    fn genome_line(&self) -> String {
        format!(
            "{};{};{}",
            serde_json::json!(self.name),
            serde_json::json!(self.position),
            serde_json::json!(self.output_factor),
        )
    }
}

/// Errors raised while parsing genome text.
#[derive(Debug, Error)]
pub enum GenomeParseError {
    /// A neuron line did not split into exactly three `;`-separated fields.
    #[error("genome line {line} has {count} fields, expected 3")]
    FieldCount { line: usize, count: usize },
    /// A field failed to decode as its expected JSON value.
    #[error("genome line {line}, {field} field: {source}")]
    Field {
        line: usize,
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    /// The text ended without the `~` terminator line.
    #[error("genome text is missing its terminator line")]
    MissingSentinel,
    /// The text terminated before declaring any neurons.
    #[error("genome text contains no neurons")]
    Empty,
}

/// Breeding precondition failure: the two parent fields do not hold the same
/// number of neurons, so slot-wise recombination is undefined.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("neuron counts differ between parents: {dominant} vs {recessive}")]
pub struct TopologyMismatch {
    pub dominant: usize,
    pub recessive: usize,
}

/// An ordered, fixed-size field of neurons on a torus of side
/// `sqrt(neuron_count)`.
///
/// Slot order is significant: the first K slots bind input channels in call
/// order and the last M slots bind output channels counted from the back.
/// [`NeuronField::configure`] must run after any structural change and
/// before the first activation; it clears bindings, so callers rebind their
/// channels afterwards in the same order every time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeuronField {
    neurons: Vec<Neuron>,
    side_length: f32,
    input_count: usize,
    output_count: usize,
}

impl NeuronField {
    /// Builds a field of `neuron_count` randomly placed neurons and wires it.
    #[must_use]
    pub fn new(neuron_count: usize, rng: &mut dyn RngCore) -> Self {
        let side_length = (neuron_count as f32).sqrt();
        let neurons = (0..neuron_count)
            .map(|slot| Neuron::random(format!("Neuron {slot}"), side_length, rng))
            .collect();
        let mut field = Self {
            neurons,
            side_length,
            input_count: 0,
            output_count: 0,
        };
        field.configure();
        field
    }

    /// Number of neurons in the field.
    #[must_use]
    pub fn len(&self) -> usize {
        self.neurons.len()
    }

    /// Returns true for a field with no neurons.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.neurons.is_empty()
    }

    /// Side of the toroidal coordinate square.
    #[must_use]
    pub const fn side_length(&self) -> f32 {
        self.side_length
    }

    /// Number of bound input channels.
    #[must_use]
    pub const fn input_count(&self) -> usize {
        self.input_count
    }

    /// Number of bound output channels.
    #[must_use]
    pub const fn output_count(&self) -> usize {
        self.output_count
    }

    /// Read access to a neuron by slot.
    #[must_use]
    pub fn neuron(&self, slot: usize) -> Option<&Neuron> {
        self.neurons.get(slot)
    }

    /// All neurons in slot order, for inspection and drawing collaborators.
    #[must_use]
    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    /// Recomputes the side length and rebuilds every neuron's connection
    /// list from current positions. Clears roles and channel bindings.
    pub fn configure(&mut self) {
        self.side_length = (self.neurons.len() as f32).sqrt();
        self.input_count = 0;
        self.output_count = 0;
        for slot in 0..self.neurons.len() {
            let own = self.neurons[slot].position;
            let mut connections = Vec::new();
            for (source, other) in self.neurons.iter().enumerate() {
                let dx = Self::axis_distance(own[0], other.position[0], self.side_length);
                let dy = Self::axis_distance(own[1], other.position[1], self.side_length);
                let distance = (dx * dx + dy * dy).sqrt();
                if (MIN_RANGE..=MAX_RANGE).contains(&distance) {
                    let weight = 1.0 - (distance - MIN_RANGE) / (MAX_RANGE - MIN_RANGE);
                    connections.push((source, weight));
                }
            }
            let neuron = &mut self.neurons[slot];
            neuron.role = NeuronRole::Interior;
            neuron.connections = connections;
        }
    }

    /// Shortest separation along one axis of the torus.
    fn axis_distance(a: f32, b: f32, side_length: f32) -> f32 {
        let direct = (b - a).abs();
        direct.min(side_length - direct)
    }

    /// Binds the next input channel, returning its slot. Input slots are
    /// assigned front to back in call order; the neuron takes the channel
    /// name and drops its weighted connections.
    pub fn bind_input(&mut self, name: &str) -> usize {
        let slot = self.input_count;
        assert!(
            slot < self.neurons.len() - self.output_count,
            "no free slot for input channel {name}"
        );
        let neuron = &mut self.neurons[slot];
        neuron.name = name.to_string();
        neuron.role = NeuronRole::Input;
        neuron.connections.clear();
        self.input_count += 1;
        slot
    }

    /// Binds the next output channel, returning its slot. Output slots are
    /// assigned back to front in call order.
    pub fn bind_output(&mut self, name: &str) -> usize {
        self.output_count += 1;
        assert!(
            self.neurons.len() >= self.input_count + self.output_count,
            "no free slot for output channel {name}"
        );
        let slot = self.neurons.len() - self.output_count;
        let neuron = &mut self.neurons[slot];
        neuron.name = name.to_string();
        neuron.role = NeuronRole::Output;
        slot
    }

    /// Runs one activation pass in slot order.
    ///
    /// This is deliberately not a simultaneous update: each neuron reads
    /// whatever values its sources hold at the moment it is evaluated, so
    /// intra-pass ordering is part of the model. Input neurons copy their
    /// channel value, connectionless neurons hold their previous value, and
    /// everything else runs the inverted-sign sigmoid over its weighted sum.
    pub fn think(&mut self, inputs: &[f32]) {
        debug_assert_eq!(inputs.len(), self.input_count, "sensor arity mismatch");
        for slot in 0..self.neurons.len() {
            if self.neurons[slot].role == NeuronRole::Input {
                self.neurons[slot].value = inputs.get(slot).copied().unwrap_or(0.0);
                continue;
            }
            if self.neurons[slot].connections.is_empty() {
                continue;
            }
            let mut total = 0.0_f32;
            for k in 0..self.neurons[slot].connections.len() {
                let (source, weight) = self.neurons[slot].connections[k];
                total += self.neurons[source].output() * weight;
            }
            self.neurons[slot].value = 1.0 / (1.0 + (total * SIGMOID_MULTIPLIER).exp());
        }
    }

    /// Value of the `k`-th bound output channel (0-based in binding order).
    #[must_use]
    pub fn output_value(&self, k: usize) -> f32 {
        let slot = self.neurons.len() - 1 - k;
        self.neurons[slot].value
    }

    /// Slot-wise recombination against a recessive parent, producing a
    /// configured but unbound child field.
    ///
    /// Coordinates combine on the torus, output factors blend in `[-1, 1]`.
    /// Parents with different neuron counts are rejected rather than
    /// truncated.
    pub fn crossover(
        &self,
        recessive: &Self,
        rng: &mut dyn RngCore,
        chance: f32,
    ) -> Result<Self, TopologyMismatch> {
        if self.neurons.len() != recessive.neurons.len() {
            return Err(TopologyMismatch {
                dominant: self.neurons.len(),
                recessive: recessive.neurons.len(),
            });
        }

        let mut neurons = Vec::with_capacity(self.neurons.len());
        for (own, theirs) in self.neurons.iter().zip(&recessive.neurons) {
            let position = [
                genetics::combine_wrap(
                    rng,
                    chance,
                    own.position[0],
                    theirs.position[0],
                    0.0,
                    self.side_length,
                ),
                genetics::combine_wrap(
                    rng,
                    chance,
                    own.position[1],
                    theirs.position[1],
                    0.0,
                    self.side_length,
                ),
            ];
            let output_factor = genetics::combine_blend(
                rng,
                chance,
                own.output_factor,
                theirs.output_factor,
                -1.0,
                1.0,
            );
            neurons.push(Neuron::with_genes(own.name.clone(), position, output_factor));
        }

        let mut child = Self {
            neurons,
            side_length: self.side_length,
            input_count: 0,
            output_count: 0,
        };
        child.configure();
        Ok(child)
    }

    /// Drifts every neuron coordinate in place: each axis runs through the
    /// toroidal combinator against itself, so nothing moves unless a
    /// mutation fires. Wiring is stale afterwards; reconfigure and rebind
    /// before the next activation.
    pub fn drift(&mut self, rng: &mut dyn RngCore, chance: f32) {
        let side_length = self.side_length;
        for neuron in &mut self.neurons {
            for axis in 0..2 {
                let current = neuron.position[axis];
                neuron.position[axis] =
                    genetics::combine_wrap(rng, chance, current, current, 0.0, side_length);
            }
        }
    }

    /// Serializes the field as genome text: one `name;position;factor` line
    /// per neuron, fields JSON-encoded, terminated by a `~` sentinel line.
    #[must_use]
    pub fn to_genome_text(&self) -> String {
        let mut text = String::new();
        for neuron in &self.neurons {
            let _ = writeln!(text, "{}", neuron.genome_line());
        }
        text.push_str(GENOME_SENTINEL);
        text
    }

    /// Parses genome text, restoring neurons in file order (preserving slot
    /// semantics) and wiring the result. Fails fast on any malformed line.
    pub fn from_genome_text(text: &str) -> Result<Self, GenomeParseError> {
        let mut neurons = Vec::new();
        let mut terminated = false;
        for (index, line) in text.lines().enumerate() {
            if line == GENOME_SENTINEL {
                terminated = true;
                break;
            }
            let fields: Vec<&str> = line.split(';').collect();
            if fields.len() != 3 {
                return Err(GenomeParseError::FieldCount {
                    line: index + 1,
                    count: fields.len(),
                });
            }
            let name: String =
                serde_json::from_str(fields[0]).map_err(|source| GenomeParseError::Field {
                    line: index + 1,
                    field: "name",
                    source,
                })?;
            let position: [f32; 2] =
                serde_json::from_str(fields[1]).map_err(|source| GenomeParseError::Field {
                    line: index + 1,
                    field: "position",
                    source,
                })?;
            let output_factor: f32 =
                serde_json::from_str(fields[2]).map_err(|source| GenomeParseError::Field {
                    line: index + 1,
                    field: "output factor",
                    source,
                })?;
            neurons.push(Neuron::with_genes(name, position, output_factor));
        }
        if !terminated {
            return Err(GenomeParseError::MissingSentinel);
        }
        if neurons.is_empty() {
            return Err(GenomeParseError::Empty);
        }

        let mut field = Self {
            neurons,
            side_length: 0.0,
            input_count: 0,
            output_count: 0,
        };
        field.configure();
        Ok(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    const NEVER: f32 = -1.0;

    /// Hand-built field from explicit genes; side length follows the count.
    fn field_from(positions: &[[f32; 2]], factors: &[f32]) -> NeuronField {
        let mut text = String::new();
        for (i, (position, factor)) in positions.iter().zip(factors).enumerate() {
            text.push_str(&format!(
                "\"Neuron {i}\";[{},{}];{}\n",
                position[0], position[1], factor
            ));
        }
        text.push('~');
        NeuronField::from_genome_text(&text).expect("hand-built genome parses")
    }

    #[test]
    fn random_field_wires_itself() {
        let mut rng = SmallRng::seed_from_u64(0xF1E1D);
        let field = NeuronField::new(81, &mut rng);
        assert_eq!(field.len(), 81);
        assert_relative_eq!(field.side_length(), 9.0);
        for neuron in field.neurons() {
            for &(source, weight) in neuron.connections() {
                assert!(source < field.len());
                assert!((0.0..=1.0).contains(&weight));
            }
        }
    }

    #[test]
    fn weights_hit_annulus_endpoints() {
        // neuron 1 sits a hair inside MIN_RANGE of neuron 0, neuron 2 a hair
        // inside MAX_RANGE; neuron 3 is beyond reach in the far corner
        let field = field_from(
            &[[0.0, 0.0], [0.050001, 0.0], [0.0, 0.999999], [1.0, 1.0]],
            &[1.0, 1.0, 1.0, 1.0],
        );
        let connections = field.neuron(0).expect("slot 0").connections();
        let near = connections
            .iter()
            .find(|(source, _)| *source == 1)
            .expect("min-range link");
        assert_relative_eq!(near.1, 1.0, epsilon = 1e-4);
        let far = connections
            .iter()
            .find(|(source, _)| *source == 2)
            .expect("max-range link");
        assert!(far.1.abs() < 1e-4, "weight at max range: {}", far.1);
        assert!(
            !connections.iter().any(|(source, _)| *source == 3),
            "corner neuron is outside the annulus"
        );
    }

    #[test]
    fn wiring_wraps_around_the_torus() {
        // 0.1 and 1.9 are 0.2 apart across the wrap on a side-2 field
        let field = field_from(
            &[[0.1, 0.0], [1.9, 0.0], [1.0, 1.0], [0.5, 1.5]],
            &[1.0, 1.0, 1.0, 1.0],
        );
        let connections = field.neuron(0).expect("slot 0").connections();
        let wrapped = connections
            .iter()
            .find(|(source, _)| *source == 1)
            .expect("wrapped link");
        let expected = 1.0 - (0.2 - MIN_RANGE) / (MAX_RANGE - MIN_RANGE);
        assert_relative_eq!(wrapped.1, expected, epsilon = 1e-5);
    }

    #[test]
    fn inputs_feed_the_field_and_sigmoid_inverts() {
        let mut field = field_from(
            &[[0.0, 0.0], [0.5, 0.0], [1.2, 1.2], [1.7, 1.7]],
            &[1.0, 1.0, 1.0, 1.0],
        );
        let slot = field.bind_input("drive");
        assert_eq!(slot, 0);
        field.think(&[1.0]);
        assert_relative_eq!(field.neuron(0).expect("input").value(), 1.0);
        // slot 1 saw positive drive through a positive factor, so the
        // inverted sigmoid lands below one half
        let driven = field.neuron(1).expect("driven").value();
        assert!(driven < 0.5, "expected suppression, got {driven}");
    }

    #[test]
    fn connectionless_neuron_holds_its_value() {
        // side-3 field; slot 8 sits beyond MAX_RANGE of everything else
        let positions = [
            [0.0, 0.0],
            [0.5, 0.0],
            [0.0, 0.5],
            [0.5, 0.5],
            [0.25, 0.25],
            [0.1, 0.4],
            [0.4, 0.1],
            [0.3, 0.3],
            [1.5, 1.5],
        ];
        let mut field = field_from(&positions, &[1.0; 9]);
        assert!(field.neuron(8).expect("slot 8").connections().is_empty());
        field.bind_input("drive");
        field.think(&[0.75]);
        field.think(&[0.25]);
        assert_relative_eq!(field.neuron(8).expect("isolated").value(), 0.0);
    }

    #[test]
    fn output_binding_counts_from_the_back() {
        let mut rng = SmallRng::seed_from_u64(77);
        let mut field = NeuronField::new(16, &mut rng);
        assert_eq!(field.bind_output("turn"), 15);
        assert_eq!(field.bind_output("speed"), 14);
        assert_eq!(field.bind_input("energy"), 0);
        assert_eq!(field.input_count(), 1);
        assert_eq!(field.output_count(), 2);
    }

    #[test]
    fn genome_round_trip_is_idempotent() {
        let mut rng = SmallRng::seed_from_u64(0xB0B);
        let field = NeuronField::new(81, &mut rng);
        let first = field.to_genome_text();
        let reloaded = NeuronField::from_genome_text(&first).expect("round trip");
        let second = reloaded.to_genome_text();
        assert_eq!(first, second);
        assert_eq!(reloaded.len(), field.len());
    }

    #[test]
    fn malformed_genomes_fail_fast() {
        assert!(matches!(
            NeuronField::from_genome_text("\"n\";[0,0]\n~"),
            Err(GenomeParseError::FieldCount { line: 1, count: 2 })
        ));
        assert!(matches!(
            NeuronField::from_genome_text("\"n\";[0,0];not-json\n~"),
            Err(GenomeParseError::Field { line: 1, .. })
        ));
        assert!(matches!(
            NeuronField::from_genome_text("\"n\";[0.5,0.5];1.0\n"),
            Err(GenomeParseError::MissingSentinel)
        ));
        assert!(matches!(
            NeuronField::from_genome_text("~"),
            Err(GenomeParseError::Empty)
        ));
    }

    #[test]
    fn crossover_rejects_mismatched_parents() {
        let mut rng = SmallRng::seed_from_u64(5);
        let small = NeuronField::new(16, &mut rng);
        let large = NeuronField::new(25, &mut rng);
        let err = small
            .crossover(&large, &mut rng, NEVER)
            .expect_err("mismatch");
        assert_eq!(
            err,
            TopologyMismatch {
                dominant: 16,
                recessive: 25
            }
        );
    }

    #[test]
    fn crossover_of_identical_parents_is_identity() {
        let mut rng = SmallRng::seed_from_u64(6);
        let parent = NeuronField::new(36, &mut rng);
        let child = parent
            .crossover(&parent.clone(), &mut rng, NEVER)
            .expect("same arity");
        for (slot, neuron) in child.neurons().iter().enumerate() {
            let source = parent.neuron(slot).expect("slot");
            assert_relative_eq!(neuron.position()[0], source.position()[0]);
            assert_relative_eq!(neuron.position()[1], source.position()[1]);
            assert_relative_eq!(neuron.output_factor(), source.output_factor());
        }
    }

    #[test]
    fn crossover_pulls_toward_recessive() {
        let dominant = field_from(
            &[[0.2, 0.2], [1.0, 1.0], [1.5, 0.5], [0.5, 1.5]],
            &[1.0, 1.0, 1.0, 1.0],
        );
        let recessive = field_from(
            &[[0.4, 0.2], [1.0, 1.0], [1.5, 0.5], [0.5, 1.5]],
            &[-1.0, 1.0, 1.0, 1.0],
        );
        let mut rng = SmallRng::seed_from_u64(7);
        let child = dominant
            .crossover(&recessive, &mut rng, NEVER)
            .expect("same arity");
        let moved = child.neuron(0).expect("slot 0");
        assert!(moved.position()[0] > 0.2 && moved.position()[0] < 0.4);
        assert!(moved.output_factor() < 1.0);
    }

    #[test]
    fn drift_without_mutation_is_identity() {
        let mut rng = SmallRng::seed_from_u64(8);
        let mut field = NeuronField::new(49, &mut rng);
        let before: Vec<[f32; 2]> = field.neurons().iter().map(|n| n.position()).collect();
        field.drift(&mut rng, NEVER);
        for (neuron, original) in field.neurons().iter().zip(before) {
            assert_relative_eq!(neuron.position()[0], original[0]);
            assert_relative_eq!(neuron.position()[1], original[1]);
        }
    }
}
