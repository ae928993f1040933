//! Core simulation for fieldbots: embodied agents steered by a spatial
//! neuron field, shaped over generations by an energy economy and color-keyed
//! breeding. The canonical execution is a single thread stepping ticks;
//! within a tick agents run in population order and offspring appended
//! mid-tick are visible to the agents processed after them.

use std::collections::VecDeque;
use std::f32::consts::{PI, TAU};
use std::fmt;
use std::time::Instant;

use fieldbots_brain::{genetics, NeuronField, TopologyMismatch};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};
use thiserror::Error;
use tracing::{debug, info, warn};

new_key_type! {
    /// Generational handle identifying a live agent.
    pub struct AgentId;
}

/// Number of motor channels bound to the back of every field.
pub const MOTOR_CHANNELS: usize = 3;

/// Errors raised while constructing or seeding a world.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// A seeded field cannot hold the configured sensor and motor channels.
    #[error("seeded field too small: {neurons} neurons cannot bind {required} channels")]
    FieldTooSmall { neurons: usize, required: usize },
}

/// Errors raised by the breeding protocol. Ineligibility is not an error (it
/// is a silent no-op); only structurally impossible pairings surface here.
#[derive(Debug, Error)]
pub enum BreedError {
    /// The pair's neuron counts differ; slot-wise recombination is rejected
    /// rather than truncated.
    #[error("breeding pair rejected: {0}")]
    ArityMismatch(#[from] TopologyMismatch),
}

/// Static configuration for a fieldbots world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldBotsConfig {
    /// Width of the world in world units.
    pub world_width: f32,
    /// Height of the world in world units.
    pub world_height: f32,
    /// Live agents per square world unit used to derive the population cap.
    pub bot_density: f32,
    /// Hard ceiling on the population regardless of area.
    pub max_population_cap: usize,
    /// Rewards per square world unit.
    pub reward_density: f32,
    /// Neurons per freshly grown field.
    pub neuron_count: usize,
    /// Number of vision segments per eye.
    pub eye_resolution: usize,
    /// Field of view centered on the heading, radians.
    pub fov_angle: f32,
    /// Maximum distance at which anything registers on the eye.
    pub max_view_distance: f32,
    /// Baseline top speed, world units per second.
    pub max_speed: f32,
    /// Baseline top turn rate, radians per second.
    pub max_turn_speed: f32,
    /// Baseline energy reserve for fresh agents.
    pub max_energy_reserve: f32,
    /// Body radius of every agent.
    pub agent_radius: f32,
    /// Energy drained per simulated second regardless of motion.
    pub base_energy_rate: f32,
    /// Energy drained per unit of commanded speed per second.
    pub movement_energy_rate: f32,
    /// Energy lost each time a world boundary clamps the position.
    pub boundary_damage: f32,
    /// Seconds that must pass between successful meals.
    pub eat_delay: f32,
    /// Meals only happen while the eat motor reads at or below this value.
    pub eat_threshold: f32,
    /// Energy paid on every consumption attempt, successful or not.
    pub eat_attempt_cost: f32,
    /// Energy granted by a successful meal, capped at the agent's limit.
    pub meal_energy_boost: f32,
    /// Amount the energy ceiling drops after each meal.
    pub senescence_penalty: f32,
    /// The ceiling stops dropping once it falls below this value.
    pub senescence_floor: f32,
    /// Breeding points granted per successful meal.
    pub breeding_points_per_meal: u32,
    /// Minimum energy required to be willing to breed.
    pub min_energy_to_breed: f32,
    /// Seconds that must pass between an agent's children.
    pub min_breed_delay: f32,
    /// Energy each parent pays when a child is produced.
    pub breeding_energy_cost: f32,
    /// Full width of the per-channel color band for the species check.
    pub species_color_tolerance: f32,
    /// Mutation probability along the breeding path.
    pub breed_mutation_chance: f32,
    /// Mutation probability for in-place field drift.
    pub drift_mutation_chance: f32,
    /// Radius of every reward.
    pub reward_radius: f32,
    /// Margin kept between rewards and the world edge.
    pub reward_border: f32,
    /// Meals a reward yields before relocating.
    pub reward_slices: u32,
    /// Color rewards present to eyes.
    pub reward_color: [f32; 3],
    /// Population size at or below which a fresh species is spawned.
    pub repopulation_threshold: usize,
    /// Number of agents in each repopulation wave.
    pub repopulation_batch: usize,
    /// Reward count an agent needs to qualify as a founder.
    pub founder_min_rewards: u32,
    /// Simulated seconds per real second for the wall-clock driver.
    pub time_factor: f32,
    /// Upper bound on a single simulated step, preventing runaway catch-up.
    pub max_sim_step: f32,
    /// Maximum number of recent tick summaries retained in memory.
    pub history_capacity: usize,
    /// Optional RNG seed for reproducible worlds.
    pub rng_seed: Option<u64>,
}

impl Default for FieldBotsConfig {
    fn default() -> Self {
        Self {
            world_width: 200.0,
            world_height: 200.0,
            bot_density: 0.05,
            max_population_cap: 100,
            reward_density: 1.0 / 1500.0,
            neuron_count: 81,
            eye_resolution: 5,
            fov_angle: PI / 2.0,
            max_view_distance: 40.0,
            max_speed: 3.0,
            max_turn_speed: PI / 1.5,
            max_energy_reserve: 100.0,
            agent_radius: 0.5,
            base_energy_rate: 0.9,
            movement_energy_rate: 0.05,
            boundary_damage: 8.0,
            eat_delay: 7.0,
            eat_threshold: 0.8,
            eat_attempt_cost: 0.001,
            meal_energy_boost: 30.0,
            senescence_penalty: 2.0,
            senescence_floor: 30.0,
            breeding_points_per_meal: 2,
            min_energy_to_breed: 10.0,
            min_breed_delay: 10.0,
            breeding_energy_cost: 2.5,
            species_color_tolerance: 5.0 / 255.0,
            breed_mutation_chance: genetics::BREED_MUTATION_CHANCE,
            drift_mutation_chance: genetics::DRIFT_MUTATION_CHANCE,
            reward_radius: 1.0,
            reward_border: 2.0,
            reward_slices: 10,
            reward_color: [0.9, 0.0, 0.0],
            repopulation_threshold: 20,
            repopulation_batch: 10,
            founder_min_rewards: 3,
            time_factor: 1.0,
            max_sim_step: 1.0,
            history_capacity: 256,
            rng_seed: None,
        }
    }
}

impl FieldBotsConfig {
    /// Number of sensor channels every field must bind: four body senses
    /// plus four channels per eye segment.
    #[must_use]
    pub const fn input_channels(&self) -> usize {
        4 + 4 * self.eye_resolution
    }

    /// Derived population cap.
    #[must_use]
    pub fn max_population(&self) -> usize {
        let by_area = (self.world_width * self.world_height * self.bot_density) as usize;
        by_area.min(self.max_population_cap)
    }

    /// Derived reward count.
    #[must_use]
    pub fn reward_count(&self) -> usize {
        (self.world_width * self.world_height * self.reward_density) as usize
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), WorldError> {
        if self.world_width <= 0.0 || self.world_height <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "world dimensions must be positive",
            ));
        }
        if self.eye_resolution == 0 {
            return Err(WorldError::InvalidConfig(
                "eye_resolution must be at least one segment",
            ));
        }
        if !(0.0..=TAU).contains(&self.fov_angle) || self.fov_angle == 0.0 {
            return Err(WorldError::InvalidConfig(
                "fov_angle must lie in (0, 2*pi]",
            ));
        }
        if self.max_view_distance <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "max_view_distance must be positive",
            ));
        }
        if self.neuron_count < self.input_channels() + MOTOR_CHANNELS {
            return Err(WorldError::InvalidConfig(
                "neuron_count cannot hold the sensor and motor channels",
            ));
        }
        if self.max_speed < 0.0 || self.max_turn_speed < 0.0 {
            return Err(WorldError::InvalidConfig(
                "speed limits must be non-negative",
            ));
        }
        if self.max_energy_reserve <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "max_energy_reserve must be positive",
            ));
        }
        if self.agent_radius <= 0.0 || self.reward_radius <= 0.0 {
            return Err(WorldError::InvalidConfig("radii must be positive"));
        }
        if self.base_energy_rate < 0.0
            || self.movement_energy_rate < 0.0
            || self.boundary_damage < 0.0
            || self.eat_attempt_cost < 0.0
            || self.meal_energy_boost < 0.0
            || self.senescence_penalty < 0.0
            || self.senescence_floor < 0.0
            || self.breeding_energy_cost < 0.0
            || self.min_energy_to_breed < 0.0
            || self.min_breed_delay < 0.0
            || self.eat_delay < 0.0
            || self.species_color_tolerance < 0.0
            || self.reward_border < 0.0
        {
            return Err(WorldError::InvalidConfig(
                "energy, breeding, and reward parameters must be non-negative",
            ));
        }
        if !(0.0..=1.0).contains(&self.eat_threshold) {
            return Err(WorldError::InvalidConfig(
                "eat_threshold must lie in [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.breed_mutation_chance)
            || !(0.0..=1.0).contains(&self.drift_mutation_chance)
        {
            return Err(WorldError::InvalidConfig(
                "mutation chances must lie in [0, 1]",
            ));
        }
        if self.bot_density <= 0.0 || self.reward_density < 0.0 {
            return Err(WorldError::InvalidConfig(
                "densities must be positive (rewards may be zero)",
            ));
        }
        if self.max_population() == 0 {
            return Err(WorldError::InvalidConfig(
                "derived population cap must be at least one",
            ));
        }
        if self.reward_slices == 0 {
            return Err(WorldError::InvalidConfig(
                "rewards need at least one slice",
            ));
        }
        if self.time_factor <= 0.0 || self.max_sim_step <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "time_factor and max_sim_step must be positive",
            ));
        }
        if self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG, seeding from entropy when no seed is set.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random()),
        }
    }
}

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Axis-aligned 2D position.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Heritable traits plus lineage metadata, the part of an agent that
/// persists to its attribute sheet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attributes {
    pub name: String,
    pub generation: u32,
    pub family_history: String,
    pub max_speed: f32,
    pub max_turn_speed: f32,
    pub color: [f32; 3],
    pub max_energy_reserve: f32,
}

impl Attributes {
    /// Fresh randomly colored attributes at the configured baselines.
    #[must_use]
    pub fn random(name: String, config: &FieldBotsConfig, rng: &mut SmallRng) -> Self {
        Self {
            name,
            generation: 0,
            family_history: String::new(),
            max_speed: config.max_speed,
            max_turn_speed: config.max_turn_speed,
            color: [rng.random(), rng.random(), rng.random()],
            max_energy_reserve: config.max_energy_reserve,
        }
    }

    /// The lineage string extended with this agent's own entry.
    #[must_use]
    pub fn lineage_entry(&self) -> String {
        format!(
            "{} ~> (N:{} G:{})",
            self.family_history, self.name, self.generation
        )
    }

    /// Species test: every channel must sit within half the tolerance band.
    #[must_use]
    pub fn same_species(&self, other: &Self, tolerance: f32) -> bool {
        self.color
            .iter()
            .zip(&other.color)
            .all(|(own, theirs)| (own - theirs).abs() <= tolerance / 2.0)
    }

    /// Additive jitter applied when seeding species variants.
    pub fn jitter(&mut self, rng: &mut SmallRng) {
        self.max_speed += (rng.random::<f32>() - 0.5) * 0.3;
        self.max_turn_speed += (rng.random::<f32>() - 0.5) * 0.3;
        self.max_energy_reserve += (rng.random::<f32>() - 0.5) * 0.3;
        for channel in &mut self.color {
            *channel = (*channel + (rng.random::<f32>() - 0.5) * 0.1).clamp(0.0, 1.0);
        }
    }
}

/// One wedge of an eye's field of view.
#[derive(Debug, Clone)]
pub struct EyeSegment {
    start_angle: f32,
    end_angle: f32,
    signal: f32,
    color: [f32; 3],
}

impl EyeSegment {
    fn new(start_angle: f32, end_angle: f32) -> Self {
        Self {
            start_angle,
            end_angle,
            signal: 0.0,
            color: [0.0; 3],
        }
    }

    fn clear(&mut self) {
        self.signal = 0.0;
        self.color = [0.0; 3];
    }

    /// Proximity signal: zero when empty, approaching one as the nearest
    /// entity closes in.
    #[must_use]
    pub const fn signal(&self) -> f32 {
        self.signal
    }

    /// Color of the nearest entity seen this tick.
    #[must_use]
    pub const fn color(&self) -> [f32; 3] {
        self.color
    }
}

/// Fixed angular sensor: equal-width segments spanning a field of view
/// centered on the owner's heading.
#[derive(Debug, Clone)]
pub struct Eye {
    segments: Vec<EyeSegment>,
    fov: f32,
    max_view_distance: f32,
    left_edge: f32,
}

impl Eye {
    fn new(fov: f32, max_view_distance: f32, resolution: usize) -> Self {
        let segment_angle = fov / resolution as f32;
        let segments = (0..resolution)
            .map(|index| {
                EyeSegment::new(index as f32 * segment_angle, (index + 1) as f32 * segment_angle)
            })
            .collect();
        Self {
            segments,
            fov,
            max_view_distance,
            left_edge: 0.0,
        }
    }

    /// Per-segment snapshot for sensors and drawing collaborators.
    #[must_use]
    pub fn segments(&self) -> &[EyeSegment] {
        &self.segments
    }

    /// Zeroes every segment and re-anchors the view on the given heading.
    fn reset(&mut self, heading: f32) {
        for segment in &mut self.segments {
            segment.clear();
        }
        self.left_edge = (heading - self.fov / 2.0).rem_euclid(TAU);
    }

    /// Registers another entity. Closer entities overwrite a segment's
    /// current holder; the comparison is `<=`, so an equally close later
    /// entity takes the segment.
    fn observe(&mut self, own: Position, other: Position, color: [f32; 3]) {
        let dx = other.x - own.x;
        // screen-down y flipped into the anti-clockwise angle convention
        let dy = own.y - other.y;
        let distance = (dx * dx + dy * dy).sqrt();
        if distance > self.max_view_distance {
            return;
        }
        let bearing = dy.atan2(dx);
        let offset = (bearing - self.left_edge).rem_euclid(TAU);
        if offset > self.fov {
            return;
        }
        for segment in &mut self.segments {
            if offset >= segment.start_angle && offset < segment.end_angle {
                let signal = 1.0 - distance / self.max_view_distance;
                if segment.signal <= signal {
                    segment.signal = signal;
                    segment.color = color;
                }
                break;
            }
        }
    }
}

/// A point resource agents feed on. Slices deplete per meal; an exhausted
/// reward relocates and refills.
#[derive(Debug, Clone)]
pub struct Reward {
    position: Position,
    slices: u32,
    radius: f32,
    color: [f32; 3],
}

impl Reward {
    fn new(config: &FieldBotsConfig, rng: &mut SmallRng) -> Self {
        let mut reward = Self {
            position: Position::default(),
            slices: config.reward_slices,
            radius: config.reward_radius,
            color: config.reward_color,
        };
        reward.relocate(config, rng);
        reward
    }

    fn relocate(&mut self, config: &FieldBotsConfig, rng: &mut SmallRng) {
        let margin = config.reward_border + self.radius;
        self.position.x = rng.random::<f32>() * (config.world_width - 2.0 * margin) + margin;
        self.position.y = rng.random::<f32>() * (config.world_height - 2.0 * margin) + margin;
    }

    /// Consumption callback: removes a slice, relocating and refilling once
    /// the last one is gone.
    fn consumed(&mut self, config: &FieldBotsConfig, rng: &mut SmallRng) {
        self.slices = self.slices.saturating_sub(1);
        if self.slices == 0 {
            self.relocate(config, rng);
            self.slices = config.reward_slices;
        }
    }

    /// Current location.
    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    /// Remaining meals before relocation.
    #[must_use]
    pub const fn slices(&self) -> u32 {
        self.slices
    }

    /// Body radius.
    #[must_use]
    pub const fn radius(&self) -> f32 {
        self.radius
    }

    /// Color presented to eyes.
    #[must_use]
    pub const fn color(&self) -> [f32; 3] {
        self.color
    }
}

/// An embodied agent: heritable attributes, runtime energy economy, an eye,
/// and the neuron field that steers it.
#[derive(Debug, Clone)]
pub struct Agent {
    attributes: Attributes,
    position: Position,
    heading: f32,
    energy: f32,
    energy_limit: f32,
    breeding_points: u32,
    rewards_collected: u32,
    since_last_child: f32,
    since_last_meal: f32,
    age: f32,
    dead: bool,
    sensors: Vec<f32>,
    eye: Eye,
    field: NeuronField,
}

impl Agent {
    /// Builds an agent around a field, binding sensor and motor channels.
    /// Energy and its ceiling start at the attribute reserve.
    fn new(
        attributes: Attributes,
        field: NeuronField,
        config: &FieldBotsConfig,
        position: Position,
        heading: f32,
    ) -> Self {
        let eye = Eye::new(
            config.fov_angle,
            config.max_view_distance,
            config.eye_resolution,
        );
        let energy = attributes.max_energy_reserve;
        let mut agent = Self {
            energy,
            energy_limit: energy,
            attributes,
            position,
            heading: heading.rem_euclid(TAU),
            breeding_points: 0,
            rewards_collected: 0,
            since_last_child: 0.0,
            since_last_meal: 0.0,
            age: 0.0,
            dead: false,
            sensors: Vec::with_capacity(config.input_channels()),
            eye,
            field,
        };
        agent.bind_channels();
        agent
    }

    /// Rewires the field and binds channels in the agent's canonical order.
    /// The order is fixed for the agent's lifetime: four body senses, then
    /// four channels per eye segment, then the three motors.
    fn bind_channels(&mut self) {
        self.field.configure();
        self.field.bind_input("energy");
        self.field.bind_input("heading");
        self.field.bind_input("pos_x");
        self.field.bind_input("pos_y");
        for index in 0..self.eye.segments().len() {
            self.field.bind_input(&format!("eye{index}_range"));
            self.field.bind_input(&format!("eye{index}_red"));
            self.field.bind_input(&format!("eye{index}_green"));
            self.field.bind_input(&format!("eye{index}_blue"));
        }
        self.field.bind_output("turn");
        self.field.bind_output("speed");
        self.field.bind_output("eat");
    }

    fn advance_timers(&mut self, dt: f32) {
        self.age += dt;
        self.since_last_child += dt;
        self.since_last_meal += dt;
    }

    fn refresh_sensors(&mut self, world_width: f32, world_height: f32) {
        self.sensors.clear();
        self.sensors.push(self.energy / self.energy_limit);
        self.sensors.push((self.heading % PI) / PI);
        self.sensors.push(self.position.x / world_width);
        self.sensors.push(self.position.y / world_height);
        for segment in self.eye.segments() {
            self.sensors.push(segment.signal());
            let [r, g, b] = segment.color();
            self.sensors.push(r);
            self.sensors.push(g);
            self.sensors.push(b);
        }
    }

    fn think(&mut self) {
        self.field.think(&self.sensors);
    }

    /// Turn command mapped from the unit interval onto `[-1, 1]`.
    fn turn_factor(&self) -> f32 {
        self.field.output_value(0) * 2.0 - 1.0
    }

    /// Speed command mapped from the unit interval onto `[-1, 1]`.
    fn speed_factor(&self) -> f32 {
        self.field.output_value(1) * 2.0 - 1.0
    }

    /// Raw eat motor in `[0, 1]`; meals require it at or below the
    /// configured threshold.
    fn eat_intent(&self) -> f32 {
        self.field.output_value(2)
    }

    /// Turns, then translates along the new heading. Y displacement is
    /// inverted relative to the angle convention (screen-down axis).
    fn apply_motors(&mut self, dt: f32) {
        self.heading = (self.heading + self.turn_factor() * self.attributes.max_turn_speed * dt)
            .rem_euclid(TAU);
        let displacement = self.speed_factor() * self.attributes.max_speed * dt;
        self.position.x += self.heading.cos() * displacement;
        self.position.y -= self.heading.sin() * displacement;
    }

    /// Clamps the position to the world, charging boundary damage for every
    /// violated side and repositioning two radii inside it.
    fn enforce_bounds(&mut self, config: &FieldBotsConfig) {
        let radius = config.agent_radius;
        if self.position.x > config.world_width - radius {
            self.energy -= config.boundary_damage;
            self.position.x = config.world_width - radius * 2.0;
        }
        if self.position.y > config.world_height - radius {
            self.energy -= config.boundary_damage;
            self.position.y = config.world_height - radius * 2.0;
        }
        if self.position.x < radius {
            self.energy -= config.boundary_damage;
            self.position.x = radius * 2.0;
        }
        if self.position.y < radius {
            self.energy -= config.boundary_damage;
            self.position.y = radius * 2.0;
        }
    }

    /// Metabolic drain, ceiling clamp, and the death check.
    fn settle_energy(&mut self, dt: f32, config: &FieldBotsConfig) {
        let movement = self.attributes.max_speed
            * self.speed_factor().abs()
            * config.movement_energy_rate
            * dt;
        let base = config.base_energy_rate * dt;
        self.energy -= movement + base;
        self.dead = self.energy <= 0.0;
        if self.energy > self.energy_limit {
            self.energy = self.energy_limit;
        }
    }

    fn willing_to_breed(&self, config: &FieldBotsConfig) -> bool {
        self.breeding_points >= 1
            && self.energy >= config.min_energy_to_breed
            && self.since_last_child >= config.min_breed_delay
    }

    /// Heritable traits and lineage metadata.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Current location.
    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    /// Heading in radians, anti-clockwise from the x axis.
    #[must_use]
    pub const fn heading(&self) -> f32 {
        self.heading
    }

    /// Current energy level.
    #[must_use]
    pub const fn energy(&self) -> f32 {
        self.energy
    }

    /// Senescence-reduced energy ceiling.
    #[must_use]
    pub const fn energy_limit(&self) -> f32 {
        self.energy_limit
    }

    /// Lifetime rewards collected.
    #[must_use]
    pub const fn rewards_collected(&self) -> u32 {
        self.rewards_collected
    }

    /// Unspent breeding points.
    #[must_use]
    pub const fn breeding_points(&self) -> u32 {
        self.breeding_points
    }

    /// Simulated seconds lived.
    #[must_use]
    pub const fn age(&self) -> f32 {
        self.age
    }

    /// Whether the agent has run out of energy.
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        self.dead
    }

    /// The agent's eye, exposing the per-segment snapshot.
    #[must_use]
    pub fn eye(&self) -> &Eye {
        &self.eye
    }

    /// The neuron field steering this agent.
    #[must_use]
    pub fn field(&self) -> &NeuronField {
        &self.field
    }
}

/// Dense, order-preserving agent store with generational handles.
///
/// Population order is observable: agents are processed front to back each
/// tick, children append at the tail mid-tick, and removal shifts rather
/// than swaps so survivors keep their relative order.
#[derive(Debug, Default)]
pub struct AgentArena {
    index: SlotMap<AgentId, usize>,
    ids: Vec<AgentId>,
    agents: Vec<Agent>,
}

impl AgentArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Returns true when no agents are alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Whether the handle still refers to a live agent.
    #[must_use]
    pub fn contains(&self, id: AgentId) -> bool {
        self.index.contains_key(id)
    }

    /// Current population index of a handle.
    #[must_use]
    pub fn index_of(&self, id: AgentId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Handle of the agent at a population index.
    #[must_use]
    pub fn id_at(&self, position: usize) -> Option<AgentId> {
        self.ids.get(position).copied()
    }

    /// Read access by handle.
    #[must_use]
    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        self.index.get(id).map(|&position| &self.agents[position])
    }

    /// Read access by population index.
    #[must_use]
    pub fn agent_at(&self, position: usize) -> &Agent {
        &self.agents[position]
    }

    fn agent_at_mut(&mut self, position: usize) -> &mut Agent {
        &mut self.agents[position]
    }

    /// Disjoint mutable access to two distinct population indices.
    fn pair_mut(&mut self, first: usize, second: usize) -> (&mut Agent, &mut Agent) {
        assert_ne!(first, second, "pair_mut needs distinct agents");
        if first < second {
            let (left, right) = self.agents.split_at_mut(second);
            (&mut left[first], &mut right[0])
        } else {
            let (left, right) = self.agents.split_at_mut(first);
            (&mut right[0], &mut left[second])
        }
    }

    /// Appends an agent at the tail, returning its handle.
    fn insert(&mut self, agent: Agent) -> AgentId {
        let position = self.agents.len();
        let id = self.index.insert(position);
        self.ids.push(id);
        self.agents.push(agent);
        id
    }

    /// Removes an agent, preserving the relative order of the survivors.
    fn remove(&mut self, id: AgentId) -> Option<Agent> {
        let position = self.index.remove(id)?;
        self.ids.remove(position);
        let agent = self.agents.remove(position);
        for shifted in position..self.ids.len() {
            self.index[self.ids[shifted]] = shifted;
        }
        Some(agent)
    }

    /// Iterates agents in population order.
    pub fn iter(&self) -> impl Iterator<Item = (AgentId, &Agent)> + '_ {
        self.ids.iter().copied().zip(self.agents.iter())
    }
}

/// Events emitted after processing a world tick.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickEvents {
    pub tick: Tick,
    pub births: usize,
    pub deaths: usize,
    pub repopulated: usize,
}

/// Aggregate statistics recorded for each tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickSummary {
    pub tick: Tick,
    pub sim_time: f64,
    pub agent_count: usize,
    pub births: usize,
    pub deaths: usize,
    pub total_energy: f32,
    pub average_energy: f32,
    pub best_rewards: u32,
}

/// Snapshot of an agent good enough to seed a future run: its heritable
/// attributes, serialized genome, and the reward count that earned the spot.
#[derive(Debug, Clone, PartialEq)]
pub struct Founder {
    pub attributes: Attributes,
    pub genome: String,
    pub rewards: u32,
}

/// The complete simulation state: configuration, RNG, population, rewards,
/// and bookkeeping. Owned by a driver; nothing here is process-global.
pub struct WorldState {
    config: FieldBotsConfig,
    tick: Tick,
    sim_time: f64,
    rng: SmallRng,
    agents: AgentArena,
    rewards: Vec<Reward>,
    total_spawned: u64,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldState")
            .field("tick", &self.tick)
            .field("sim_time", &self.sim_time)
            .field("agent_count", &self.agents.len())
            .field("reward_count", &self.rewards.len())
            .finish()
    }
}

impl WorldState {
    /// Instantiate a world from a validated configuration, seeding rewards.
    pub fn new(config: FieldBotsConfig) -> Result<Self, WorldError> {
        config.validate()?;
        let mut rng = config.seeded_rng();
        let rewards = (0..config.reward_count())
            .map(|_| Reward::new(&config, &mut rng))
            .collect();
        Ok(Self {
            config,
            tick: Tick::zero(),
            sim_time: 0.0,
            rng,
            agents: AgentArena::new(),
            rewards,
            total_spawned: 0,
            history: VecDeque::new(),
        })
    }

    /// Immutable access to the configuration.
    #[must_use]
    pub fn config(&self) -> &FieldBotsConfig {
        &self.config
    }

    /// Ticks processed so far.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Simulated seconds elapsed.
    #[must_use]
    pub const fn sim_time(&self) -> f64 {
        self.sim_time
    }

    /// The live population.
    #[must_use]
    pub fn agents(&self) -> &AgentArena {
        &self.agents
    }

    /// The reward layout.
    #[must_use]
    pub fn rewards(&self) -> &[Reward] {
        &self.rewards
    }

    /// Recent tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    fn next_name(&self) -> String {
        format!("bot{}", self.total_spawned)
    }

    fn insert_agent(&mut self, agent: Agent) -> AgentId {
        self.total_spawned += 1;
        self.agents.insert(agent)
    }

    fn center_spawn_position(&mut self) -> Position {
        let spread_x = self.config.world_width * 0.2;
        let spread_y = self.config.world_height * 0.2;
        Position::new(
            self.config.world_width / 2.0 + spread_x * (self.rng.random::<f32>() * 2.0 - 1.0),
            self.config.world_height / 2.0 + spread_y * (self.rng.random::<f32>() * 2.0 - 1.0),
        )
    }

    /// Spawns a fresh random agent near the world center. Silently refuses
    /// at capacity.
    pub fn spawn_random_agent(&mut self) -> Option<AgentId> {
        if self.agents.len() >= self.config.max_population() {
            debug!("population at capacity, spawn refused");
            return None;
        }
        let attributes = Attributes::random(self.next_name(), &self.config, &mut self.rng);
        let field = NeuronField::new(self.config.neuron_count, &mut self.rng);
        let position = self.center_spawn_position();
        let heading = self.rng.random::<f32>() * TAU;
        let agent = Agent::new(attributes, field, &self.config, position, heading);
        Some(self.insert_agent(agent))
    }

    /// Spawns an agent from persisted genes. `mutate` applies the seeding
    /// jitter: attribute nudges plus coordinate drift before wiring.
    /// Refuses silently at capacity; rejects fields too small for the
    /// configured channels.
    pub fn spawn_seeded(
        &mut self,
        mut attributes: Attributes,
        mut field: NeuronField,
        mutate: bool,
    ) -> Result<Option<AgentId>, WorldError> {
        let required = self.config.input_channels() + MOTOR_CHANNELS;
        if field.len() < required {
            return Err(WorldError::FieldTooSmall {
                neurons: field.len(),
                required,
            });
        }
        if self.agents.len() >= self.config.max_population() {
            debug!("population at capacity, seeded spawn refused");
            return Ok(None);
        }
        attributes.name = self.next_name();
        if mutate {
            attributes.jitter(&mut self.rng);
            field.drift(&mut self.rng, self.config.drift_mutation_chance);
        }
        let position = self.center_spawn_position();
        let heading = self.rng.random::<f32>() * TAU;
        let agent = Agent::new(attributes, field, &self.config, position, heading);
        Ok(Some(self.insert_agent(agent)))
    }

    /// Attempts a meal from one reward: the agent must be within one unit of
    /// touching, off meal cooldown, and its eat motor at or below the
    /// threshold. Every attempt costs a sliver of energy.
    fn try_eat(&mut self, position: usize, reward_index: usize) {
        let config = &self.config;
        let reward_position = self.rewards[reward_index].position;
        let agent = self.agents.agent_at_mut(position);

        let distance = agent.position.distance(reward_position);
        if distance <= config.agent_radius + 1.0
            && agent.since_last_meal >= config.eat_delay
            && agent.eat_intent() <= config.eat_threshold
        {
            agent.energy = (agent.energy + config.meal_energy_boost).min(agent.energy_limit);
            if agent.energy_limit >= config.senescence_floor {
                agent.energy_limit -= config.senescence_penalty;
            }
            agent.rewards_collected += 1;
            agent.breeding_points += config.breeding_points_per_meal;
            agent.since_last_meal = 0.0;
            debug!(agent = %agent.attributes.name, "took a nibble");
            self.rewards[reward_index].consumed(&self.config, &mut self.rng);
        }
        self.agents.agent_at_mut(position).energy -= self.config.eat_attempt_cost;
    }

    /// The breeding protocol between the agent at `position` and the one at
    /// `partner`. Any unmet eligibility, species, or capacity condition is a
    /// silent no-op; mismatched neuron counts are an error.
    fn try_breed(
        &mut self,
        position: usize,
        partner: usize,
    ) -> Result<Option<AgentId>, BreedError> {
        if self.agents.len() >= self.config.max_population() {
            return Ok(None);
        }
        let child_name = self.next_name();

        let config = &self.config;
        let rng = &mut self.rng;
        let (first, second) = self.agents.pair_mut(position, partner);

        if !first.willing_to_breed(config) || !second.willing_to_breed(config) {
            return Ok(None);
        }
        if !first
            .attributes
            .same_species(&second.attributes, config.species_color_tolerance)
        {
            return Ok(None);
        }
        if first.field.len() != second.field.len() {
            return Err(BreedError::ArityMismatch(TopologyMismatch {
                dominant: first.field.len(),
                recessive: second.field.len(),
            }));
        }

        first.since_last_child = 0.0;
        second.since_last_child = 0.0;
        first.breeding_points -= 1;
        second.breeding_points -= 1;
        first.energy -= config.breeding_energy_cost;
        second.energy -= config.breeding_energy_cost;

        // strictly greater reward count dominates; ties go to the partner
        let (dominant, recessive) = if first.rewards_collected > second.rewards_collected {
            (first, second)
        } else {
            (second, first)
        };

        let child_field =
            dominant
                .field
                .crossover(&recessive.field, rng, config.breed_mutation_chance)?;

        let mut attributes = dominant.attributes.clone();
        attributes.name = child_name;
        attributes.generation = dominant.attributes.generation + 1;
        attributes.family_history = attributes.lineage_entry();
        for channel in 0..3 {
            attributes.color[channel] = genetics::combine_blend(
                rng,
                config.breed_mutation_chance,
                dominant.attributes.color[channel],
                recessive.attributes.color[channel],
                0.0,
                1.0,
            );
        }
        attributes.max_speed =
            dominant.attributes.max_speed + (rng.random::<f32>() * 0.1 - 0.05);
        attributes.max_turn_speed =
            dominant.attributes.max_turn_speed + (rng.random::<f32>() * 0.1 - 0.05);
        attributes.max_energy_reserve =
            dominant.attributes.max_energy_reserve + (rng.random::<f32>() * 0.1 - 0.05);

        info!(
            dominant = %dominant.attributes.name,
            recessive = %recessive.attributes.name,
            child = %attributes.name,
            generation = attributes.generation,
            "mated"
        );

        let heading = rng.random::<f32>() * TAU;
        let child = Agent::new(attributes, child_field, config, dominant.position, heading);
        Ok(Some(self.insert_agent(child)))
    }

    /// Runs the full per-agent sequence for one agent: timers, perception
    /// with consumption and breeding, the forward pass, motion, bounds, and
    /// metabolism. Returns the number of children produced.
    fn advance_agent(&mut self, position: usize, dt: f32) -> usize {
        {
            let agent = self.agents.agent_at_mut(position);
            agent.advance_timers(dt);
            let heading = agent.heading;
            agent.eye.reset(heading);
        }

        // rewards first, matching the seeding order of the scan
        for reward_index in 0..self.rewards.len() {
            {
                let reward_position = self.rewards[reward_index].position;
                let reward_color = self.rewards[reward_index].color;
                let agent = self.agents.agent_at_mut(position);
                let own = agent.position;
                agent.eye.observe(own, reward_position, reward_color);
            }
            self.try_eat(position, reward_index);
        }

        // then every other live agent, including children appended earlier
        // this tick
        let mut births = 0;
        let mut partner = 0;
        while partner < self.agents.len() {
            if partner != position && !self.agents.agent_at(partner).dead {
                {
                    let other = self.agents.agent_at(partner);
                    let other_position = other.position;
                    let other_color = other.attributes.color;
                    let agent = self.agents.agent_at_mut(position);
                    let own = agent.position;
                    agent.eye.observe(own, other_position, other_color);
                }
                match self.try_breed(position, partner) {
                    Ok(Some(_)) => births += 1,
                    Ok(None) => {}
                    Err(error) => {
                        warn!(%error, "skipped breeding pair");
                    }
                }
            }
            partner += 1;
        }

        let world_width = self.config.world_width;
        let world_height = self.config.world_height;
        let agent = self.agents.agent_at_mut(position);
        agent.refresh_sensors(world_width, world_height);
        agent.think();
        agent.apply_motors(dt);
        agent.enforce_bounds(&self.config);
        agent.settle_energy(dt, &self.config);

        births
    }

    /// Removes every agent marked dead, preserving survivor order.
    fn sweep_dead(&mut self) -> usize {
        let dead: Vec<AgentId> = self
            .agents
            .iter()
            .filter(|(_, agent)| agent.dead)
            .map(|(id, _)| id)
            .collect();
        for id in &dead {
            if let Some(agent) = self.agents.remove(*id) {
                info!(
                    agent = %agent.attributes.name,
                    age = agent.age,
                    rewards = agent.rewards_collected,
                    "died"
                );
            }
        }
        dead.len()
    }

    /// When the population collapses to the threshold, spawns a batch of
    /// agents sharing one fresh random species template, each with its own
    /// newly grown field.
    fn repopulate(&mut self) -> usize {
        if self.agents.len() > self.config.repopulation_threshold {
            return 0;
        }
        let template = Attributes::random(String::new(), &self.config, &mut self.rng);
        let mut spawned = 0;
        for _ in 0..self.config.repopulation_batch {
            if self.agents.len() >= self.config.max_population() {
                break;
            }
            let mut attributes = template.clone();
            attributes.name = self.next_name();
            let field = NeuronField::new(self.config.neuron_count, &mut self.rng);
            let position = self.center_spawn_position();
            let heading = self.rng.random::<f32>() * TAU;
            let agent = Agent::new(attributes, field, &self.config, position, heading);
            self.insert_agent(agent);
            spawned += 1;
        }
        if spawned > 0 {
            info!(count = spawned, "repopulated with a fresh species");
        }
        spawned
    }

    fn record_summary(&mut self, tick: Tick, births: usize, deaths: usize) {
        let agent_count = self.agents.len();
        let total_energy: f32 = self.agents.iter().map(|(_, agent)| agent.energy).sum();
        let average_energy = if agent_count > 0 {
            total_energy / agent_count as f32
        } else {
            0.0
        };
        let best_rewards = self
            .agents
            .iter()
            .map(|(_, agent)| agent.rewards_collected)
            .max()
            .unwrap_or(0);
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(TickSummary {
            tick,
            sim_time: self.sim_time,
            agent_count,
            births,
            deaths,
            total_energy,
            average_energy,
            best_rewards,
        });
    }

    /// Executes one tick over `dt` simulated seconds: every live agent in
    /// population order (children appended mid-tick get their turn the same
    /// tick), then the death sweep and repopulation.
    pub fn step(&mut self, dt: f32) -> TickEvents {
        let next_tick = self.tick.next();
        self.sim_time += f64::from(dt);

        let mut births = 0;
        let mut position = 0;
        while position < self.agents.len() {
            if !self.agents.agent_at(position).dead {
                births += self.advance_agent(position, dt);
            }
            position += 1;
        }

        let deaths = self.sweep_dead();
        let repopulated = self.repopulate();
        self.record_summary(next_tick, births, deaths);
        self.tick = next_tick;

        TickEvents {
            tick: next_tick,
            births,
            deaths,
            repopulated,
        }
    }

    /// Selects the founding stock for a next run: agents clearing the reward
    /// bar, deduplicated by species keeping the highest reward count.
    #[must_use]
    pub fn founders(&self) -> Vec<Founder> {
        let tolerance = self.config.species_color_tolerance;
        let mut best: Vec<Founder> = Vec::new();
        for (_, agent) in self.agents.iter() {
            if agent.rewards_collected < self.config.founder_min_rewards {
                continue;
            }
            let candidate = Founder {
                attributes: agent.attributes.clone(),
                genome: agent.field.to_genome_text(),
                rewards: agent.rewards_collected,
            };
            match best
                .iter_mut()
                .find(|founder| founder.attributes.same_species(&candidate.attributes, tolerance))
            {
                Some(existing) => {
                    if candidate.rewards >= existing.rewards {
                        *existing = candidate;
                    }
                }
                None => best.push(candidate),
            }
        }
        best
    }
}

/// Wall-clock driver stepping a world in real time. Each tick's simulated
/// duration is elapsed real time scaled by the configured factor and clamped
/// to the maximum step, so a stalled process cannot trigger runaway catch-up.
#[derive(Debug)]
pub struct Simulation {
    world: WorldState,
    last_instant: Option<Instant>,
}

impl Simulation {
    /// Wraps a world for real-time driving.
    #[must_use]
    pub fn new(world: WorldState) -> Self {
        Self {
            world,
            last_instant: None,
        }
    }

    /// The driven world.
    #[must_use]
    pub fn world(&self) -> &WorldState {
        &self.world
    }

    /// Mutable access for seeding between runs.
    pub fn world_mut(&mut self) -> &mut WorldState {
        &mut self.world
    }

    /// Simulated duration of the next tick. The first call reads zero.
    fn tick_interval(&mut self) -> f32 {
        let now = Instant::now();
        let elapsed = self
            .last_instant
            .map_or(0.0, |last| now.duration_since(last).as_secs_f32());
        self.last_instant = Some(now);
        (elapsed * self.world.config.time_factor).min(self.world.config.max_sim_step)
    }

    /// Runs one tick using the wall-clock mapping.
    pub fn advance(&mut self) -> TickEvents {
        let dt = self.tick_interval();
        self.world.step(dt)
    }

    /// Drives ticks until the given amount of simulated time has passed,
    /// returning the number of ticks executed.
    pub fn run_for(&mut self, sim_seconds: f64) -> u64 {
        let deadline = self.world.sim_time + sim_seconds;
        let mut ticks = 0;
        while self.world.sim_time < deadline {
            self.advance();
            ticks += 1;
        }
        ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Config tuned for deterministic unit tests: no repopulation noise, no
    /// breeding mutation, fixed seed.
    fn test_config() -> FieldBotsConfig {
        FieldBotsConfig {
            neuron_count: 36,
            repopulation_batch: 0,
            breed_mutation_chance: 0.0,
            drift_mutation_chance: 0.0,
            rng_seed: Some(0x5EED),
            ..FieldBotsConfig::default()
        }
    }

    /// Genome text for an integer lattice on a side-`n` torus. Every neuron
    /// links only to its four axis neighbors at exactly MAX_RANGE, so all
    /// weights are zero and every interior value settles at one half; motor
    /// factors read as zero and the eat motor as one half.
    fn lattice_genome(n: usize) -> String {
        let mut text = String::new();
        for i in 0..n * n {
            let x = (i % n) as f32;
            let y = (i / n) as f32;
            text.push_str(&format!("\"Neuron {i}\";[{x},{y}];1.0\n"));
        }
        text.push('~');
        text
    }

    fn lattice_field(n: usize) -> NeuronField {
        NeuronField::from_genome_text(&lattice_genome(n)).expect("lattice genome parses")
    }

    fn seeded_world(config: FieldBotsConfig) -> WorldState {
        WorldState::new(config).expect("valid test config")
    }

    #[test]
    fn config_rejects_undersized_fields() {
        let config = FieldBotsConfig {
            neuron_count: 10,
            ..FieldBotsConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(WorldError::InvalidConfig(_))
        ));
    }

    #[test]
    fn config_derives_population_and_rewards() {
        let config = FieldBotsConfig::default();
        assert_eq!(config.max_population(), 100);
        assert_eq!(config.reward_count(), 26);
        assert_eq!(config.input_channels(), 24);
    }

    #[test]
    fn arena_preserves_population_order_across_removal() {
        let config = test_config();
        let mut world = seeded_world(config);
        let a = world.spawn_random_agent().expect("spawn a");
        let b = world.spawn_random_agent().expect("spawn b");
        let c = world.spawn_random_agent().expect("spawn c");
        assert_eq!(world.agents.index_of(b), Some(1));

        world.agents.remove(b).expect("remove b");
        assert_eq!(world.agents.len(), 2);
        assert_eq!(world.agents.index_of(a), Some(0));
        assert_eq!(world.agents.index_of(c), Some(1));
        assert!(!world.agents.contains(b));
        assert_eq!(world.agents.id_at(1), Some(c));
    }

    #[test]
    fn species_check_uses_half_tolerance_band() {
        let config = test_config();
        let mut world = seeded_world(config);
        let mut base = Attributes::random("a".into(), &world.config, &mut world.rng);
        base.color = [0.5, 0.5, 0.5];
        let mut near = base.clone();
        near.color[2] = 0.5 + 2.0 / 255.0;
        let mut far = base.clone();
        far.color[2] = 0.5 + 10.0 / 255.0;

        let tolerance = world.config.species_color_tolerance;
        assert!(base.same_species(&near, tolerance));
        assert!(!base.same_species(&far, tolerance));
    }

    #[test]
    fn eye_keeps_the_nearer_entity_per_segment() {
        let mut eye = Eye::new(PI / 2.0, 40.0, 5);
        eye.reset(0.0);
        let own = Position::new(0.0, 0.0);
        // both entities sit dead ahead, in the middle segment
        eye.observe(own, Position::new(30.0, 0.0), [0.1, 0.2, 0.3]);
        eye.observe(own, Position::new(5.0, 0.0), [0.7, 0.8, 0.9]);

        let middle = &eye.segments()[2];
        assert_relative_eq!(middle.signal(), 1.0 - 5.0 / 40.0);
        assert_eq!(middle.color(), [0.7, 0.8, 0.9]);

        // re-observing the farther entity must not steal the segment back
        eye.observe(own, Position::new(30.0, 0.0), [0.1, 0.2, 0.3]);
        assert_relative_eq!(eye.segments()[2].signal(), 0.875);
    }

    #[test]
    fn eye_ignores_entities_outside_view() {
        let mut eye = Eye::new(PI / 2.0, 40.0, 5);
        eye.reset(0.0);
        let own = Position::new(0.0, 0.0);
        // behind the agent
        eye.observe(own, Position::new(-10.0, 0.0), [1.0, 1.0, 1.0]);
        // beyond the view distance
        eye.observe(own, Position::new(50.0, 0.0), [1.0, 1.0, 1.0]);
        assert!(eye.segments().iter().all(|segment| segment.signal() == 0.0));
    }

    #[test]
    fn eye_respects_the_inverted_y_axis() {
        let mut eye = Eye::new(PI / 2.0, 40.0, 5);
        eye.reset(0.0);
        let own = Position::new(0.0, 10.0);
        // smaller y is *up*, which reads as anti-clockwise of the heading;
        // segment offsets grow anti-clockwise from the clockwise view edge,
        // so an up-and-ahead entity lands in a late segment
        eye.observe(own, Position::new(10.0, 5.0), [1.0, 0.0, 0.0]);
        let hit: Vec<usize> = eye
            .segments()
            .iter()
            .enumerate()
            .filter(|(_, segment)| segment.signal() > 0.0)
            .map(|(index, _)| index)
            .collect();
        assert_eq!(hit, vec![3]);
    }

    #[test]
    fn meal_boosts_energy_and_reduces_ceiling() {
        let mut config = test_config();
        // exactly one reward in the world
        config.reward_density = 1.2 / (200.0 * 200.0);
        let mut world = seeded_world(config);
        assert_eq!(world.rewards.len(), 1);

        let id = world
            .spawn_seeded(
                Attributes::random("seed".into(), &world.config.clone(), &mut world.rng.clone()),
                lattice_field(6),
                false,
            )
            .expect("field large enough")
            .expect("capacity available");
        let position = world.agents.index_of(id).expect("live agent");
        {
            let agent = world.agents.agent_at_mut(position);
            agent.since_last_meal = 10.0;
            let at = agent.position;
            world.rewards[0].position = at;
        }

        world.step(0.0);

        let agent = world.agents.get(id).expect("agent survives");
        assert_eq!(agent.rewards_collected(), 1);
        assert_eq!(agent.breeding_points(), 2);
        assert_relative_eq!(agent.energy_limit(), 98.0);
        // boosted to the old ceiling, then clamped down to the reduced one
        assert_relative_eq!(agent.energy(), 98.0);
        assert_relative_eq!(agent.since_last_meal, 0.0);
        assert_eq!(world.rewards[0].slices(), 9);
    }

    #[test]
    fn meal_attempts_cost_energy_even_when_refused() {
        let mut config = test_config();
        config.reward_density = 1.2 / (200.0 * 200.0);
        let mut world = seeded_world(config);
        let id = world
            .spawn_seeded(
                Attributes::random("seed".into(), &world.config.clone(), &mut world.rng.clone()),
                lattice_field(6),
                false,
            )
            .expect("field large enough")
            .expect("capacity available");
        let position = world.agents.index_of(id).expect("live agent");
        // still on cooldown: since_last_meal stays zero
        let far = Position::new(5.0, 5.0);
        world.rewards[0].position = far;
        let before = world.agents.agent_at(position).energy();

        world.step(0.0);

        let after = world.agents.get(id).expect("agent survives").energy();
        assert_relative_eq!(before - after, 0.001, epsilon = 1e-6);
    }

    #[test]
    fn breeding_produces_one_child_per_eligible_pair() {
        let mut config = test_config();
        // no rewards: keeps eat-attempt costs out of the energy assertions
        config.reward_density = 0.0;
        let mut world = seeded_world(config);
        let first = world.spawn_random_agent().expect("first parent");
        let second = world.spawn_random_agent().expect("second parent");

        let colors = [[0.5, 0.5, 0.5], [0.5, 0.5, 0.5 + 2.0 / 255.0]];
        for (index, id) in [first, second].into_iter().enumerate() {
            let position = world.agents.index_of(id).expect("live agent");
            let agent = world.agents.agent_at_mut(position);
            agent.attributes.color = colors[index];
            agent.attributes.generation = if index == 0 { 4 } else { 2 };
            agent.breeding_points = 1;
            agent.since_last_child = 11.0;
            agent.rewards_collected = if index == 0 { 3 } else { 1 };
        }

        let events = world.step(0.0);
        assert_eq!(events.births, 1);
        assert_eq!(world.agents.len(), 3);

        let child = world.agents.agent_at(2);
        // the first parent collected more rewards, so it dominates
        assert_eq!(child.attributes().generation, 5);
        assert_eq!(child.rewards_collected(), 0);
        assert!(child
            .attributes()
            .family_history
            .contains(&child.attributes().name));
        for channel in 0..3 {
            let low = colors[0][channel].min(colors[1][channel]);
            let high = colors[0][channel].max(colors[1][channel]);
            let value = child.attributes().color[channel];
            assert!((low..=high).contains(&value), "channel {channel}: {value}");
        }
        assert_relative_eq!(child.energy(), child.attributes().max_energy_reserve);
        assert_relative_eq!(child.energy(), child.energy_limit());

        // both parents paid: a point, energy, and a reset child timer
        for id in [first, second] {
            let parent = world.agents.get(id).expect("parent survives");
            assert_eq!(parent.breeding_points(), 0);
            assert!(parent.energy() < parent.attributes().max_energy_reserve);
        }
    }

    #[test]
    fn breeding_requires_shared_species() {
        let config = test_config();
        let mut world = seeded_world(config);
        let first = world.spawn_random_agent().expect("first");
        let second = world.spawn_random_agent().expect("second");
        for (index, id) in [first, second].into_iter().enumerate() {
            let position = world.agents.index_of(id).expect("live agent");
            let agent = world.agents.agent_at_mut(position);
            agent.attributes.color = if index == 0 {
                [0.1, 0.1, 0.1]
            } else {
                [0.9, 0.9, 0.9]
            };
            agent.breeding_points = 1;
            agent.since_last_child = 11.0;
        }

        let events = world.step(0.0);
        assert_eq!(events.births, 0);
        assert_eq!(world.agents.len(), 2);
    }

    #[test]
    fn breeding_rejects_mismatched_fields() {
        let mut config = test_config();
        config.neuron_count = 36;
        let mut world = seeded_world(config);
        let first = world.spawn_random_agent().expect("first");
        let second_field = lattice_field(7);
        let second = world
            .spawn_seeded(
                Attributes::random("x".into(), &world.config.clone(), &mut world.rng.clone()),
                second_field,
                false,
            )
            .expect("large enough")
            .expect("capacity");
        for id in [first, second] {
            let position = world.agents.index_of(id).expect("live agent");
            let agent = world.agents.agent_at_mut(position);
            agent.attributes.color = [0.5, 0.5, 0.5];
            agent.breeding_points = 1;
            agent.since_last_child = 11.0;
        }

        let position = world.agents.index_of(first).expect("live");
        let partner = world.agents.index_of(second).expect("live");
        let result = world.try_breed(position, partner);
        assert!(matches!(result, Err(BreedError::ArityMismatch(_))));
        // the guard fires before any cost is paid
        assert_eq!(
            world.agents.get(first).expect("first").breeding_points(),
            1
        );
    }

    #[test]
    fn seeding_rejects_tiny_fields() {
        let config = test_config();
        let mut world = seeded_world(config);
        let attributes =
            Attributes::random("x".into(), &world.config.clone(), &mut world.rng.clone());
        let result = world.spawn_seeded(attributes, lattice_field(5), false);
        assert!(matches!(
            result,
            Err(WorldError::FieldTooSmall {
                neurons: 25,
                required: 27
            })
        ));
    }

    #[test]
    fn starved_agents_leave_by_end_of_tick() {
        let config = test_config();
        let mut world = seeded_world(config);
        let id = world.spawn_random_agent().expect("spawn");
        let position = world.agents.index_of(id).expect("live agent");
        world.agents.agent_at_mut(position).energy = 0.5;

        let events = world.step(1.0);
        assert_eq!(events.deaths, 1);
        assert!(!world.agents.contains(id));
        assert_eq!(world.agents.len(), 0);
    }

    #[test]
    fn energy_never_exceeds_the_limit_after_a_tick() {
        let mut config = test_config();
        config.reward_density = 1.2 / (200.0 * 200.0);
        let mut world = seeded_world(config);
        let id = world
            .spawn_seeded(
                Attributes::random("seed".into(), &world.config.clone(), &mut world.rng.clone()),
                lattice_field(6),
                false,
            )
            .expect("large enough")
            .expect("capacity");
        let position = world.agents.index_of(id).expect("live agent");
        {
            let agent = world.agents.agent_at_mut(position);
            agent.since_last_meal = 10.0;
            let at = agent.position;
            world.rewards[0].position = at;
        }
        for _ in 0..40 {
            world.step(0.25);
            for (_, agent) in world.agents.iter() {
                assert!(agent.energy() <= agent.energy_limit() + f32::EPSILON);
            }
        }
    }

    #[test]
    fn boundary_clamp_charges_damage() {
        let config = test_config();
        let mut world = seeded_world(config);
        let id = world
            .spawn_seeded(
                Attributes::random("seed".into(), &world.config.clone(), &mut world.rng.clone()),
                lattice_field(6),
                false,
            )
            .expect("large enough")
            .expect("capacity");
        let position = world.agents.index_of(id).expect("live agent");
        {
            let agent = world.agents.agent_at_mut(position);
            agent.position = Position::new(205.0, 100.0);
        }

        world.step(0.0);

        let agent = world.agents.get(id).expect("alive");
        let radius = world.config.agent_radius;
        assert_relative_eq!(agent.position().x, 200.0 - radius * 2.0);
        // one boundary hit plus the per-reward attempt cost
        let expected = 100.0 - 8.0 - 0.001 * world.rewards.len() as f32;
        assert_relative_eq!(agent.energy(), expected, epsilon = 1e-4);
    }

    #[test]
    fn empty_world_repopulates_with_one_species() {
        let mut config = test_config();
        config.repopulation_batch = 10;
        let mut world = seeded_world(config);

        let events = world.step(0.1);
        assert_eq!(events.repopulated, 10);
        assert_eq!(world.agents.len(), 10);

        let tolerance = world.config.species_color_tolerance;
        let reference = world.agents.agent_at(0).attributes().clone();
        for (_, agent) in world.agents.iter() {
            assert!(agent.attributes().same_species(&reference, tolerance));
        }
    }

    #[test]
    fn founders_deduplicate_by_species() {
        let config = test_config();
        let mut world = seeded_world(config);
        let specs: [([f32; 3], u32); 4] = [
            ([0.5, 0.5, 0.5], 5),
            ([0.5, 0.5, 0.5], 4),
            ([0.9, 0.1, 0.1], 3),
            ([0.1, 0.9, 0.1], 2),
        ];
        for (color, rewards) in specs {
            let id = world.spawn_random_agent().expect("spawn");
            let position = world.agents.index_of(id).expect("live agent");
            let agent = world.agents.agent_at_mut(position);
            agent.attributes.color = color;
            agent.rewards_collected = rewards;
        }

        let founders = world.founders();
        assert_eq!(founders.len(), 2);
        assert_eq!(founders[0].rewards, 5);
        assert_eq!(founders[1].rewards, 3);
    }

    #[test]
    fn summaries_land_in_bounded_history() {
        let mut config = test_config();
        config.history_capacity = 4;
        let mut world = seeded_world(config);
        world.spawn_random_agent().expect("spawn");
        for _ in 0..10 {
            world.step(0.05);
        }
        let summaries: Vec<&TickSummary> = world.history().collect();
        assert_eq!(summaries.len(), 4);
        assert_eq!(summaries[3].tick, Tick(10));
        assert_eq!(summaries[3].agent_count, world.agents.len());
    }
}
