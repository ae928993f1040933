//! Plain-text persistence for fieldbots.
//!
//! Three line-oriented formats cross this boundary: genome files (one
//! JSON-field line per neuron, `~`-terminated), attribute sheets (fixed-order
//! prefixed lines with a hex `#rrggbb` colour), and the species roster (a
//! comma-separated list of colour tokens keying genome/attribute file pairs).
//! Every I/O or parse failure is fatal to the calling operation and
//! propagates as a [`StorageError`].

use std::fs;
use std::path::Path;

use fieldbots_brain::{GenomeParseError, NeuronField};
use fieldbots_core::{Attributes, Founder, WorldError, WorldState};
use thiserror::Error;
use tracing::info;

const ROSTER_FILE: &str = "starting_species.txt";
const BRAIN_DIR: &str = "brains";
const ATTRIBUTE_DIR: &str = "attributes";

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid genome file: {0}")]
    Genome(#[from] GenomeParseError),
    #[error(transparent)]
    World(#[from] WorldError),
    /// An attribute sheet line was missing or carried the wrong prefix.
    #[error("attribute sheet is missing its `{prefix}` line")]
    MissingAttribute { prefix: &'static str },
    /// An attribute sheet value failed numeric parsing.
    #[error("attribute sheet `{prefix}` value `{value}` is not a number")]
    InvalidNumber {
        prefix: &'static str,
        value: String,
    },
    /// A colour token was not a `#rrggbb` value.
    #[error("colour token `{0}` is not a #rrggbb value")]
    InvalidColour(String),
}

/// Renders a colour as its `#rrggbb` token.
#[must_use]
pub fn color_to_hex(color: [f32; 3]) -> String {
    format!(
        "#{:02x}{:02x}{:02x}",
        (color[0] * 255.0).round() as u8,
        (color[1] * 255.0).round() as u8,
        (color[2] * 255.0).round() as u8,
    )
}

/// Parses a `#rrggbb` token back into channel floats.
pub fn hex_to_color(token: &str) -> Result<[f32; 3], StorageError> {
    let invalid = || StorageError::InvalidColour(token.to_string());
    let digits = token.strip_prefix('#').ok_or_else(invalid)?;
    if digits.len() != 6 || !digits.is_ascii() {
        return Err(invalid());
    }
    let mut color = [0.0; 3];
    for (channel, slot) in color.iter_mut().enumerate() {
        let byte = u8::from_str_radix(&digits[channel * 2..channel * 2 + 2], 16)
            .map_err(|_| invalid())?;
        *slot = f32::from(byte) / 255.0;
    }
    Ok(color)
}

/// Writes a field's genome text to disk.
pub fn save_genome(path: &Path, field: &NeuronField) -> Result<(), StorageError> {
    fs::write(path, field.to_genome_text())?;
    Ok(())
}

/// Reads and wires a field from a genome file.
pub fn load_genome(path: &Path) -> Result<NeuronField, StorageError> {
    let text = fs::read_to_string(path)?;
    Ok(NeuronField::from_genome_text(&text)?)
}

/// Writes an attribute sheet in its fixed line order.
pub fn save_attributes(path: &Path, attributes: &Attributes) -> Result<(), StorageError> {
    let sheet = format!(
        "Name: {}\nGeneration: {}\nFamily History: {}\nMax Speed: {}\nMax Turn Speed: {}\nColour: {}\nEnergy Reserve: {}",
        attributes.name,
        attributes.generation,
        attributes.family_history,
        attributes.max_speed,
        attributes.max_turn_speed,
        color_to_hex(attributes.color),
        attributes.max_energy_reserve,
    );
    fs::write(path, sheet)?;
    Ok(())
}

fn take_field<'a>(
    lines: &mut std::str::Lines<'a>,
    prefix: &'static str,
) -> Result<&'a str, StorageError> {
    lines
        .next()
        .and_then(|line| line.trim().strip_prefix(prefix))
        .map(str::trim)
        .ok_or(StorageError::MissingAttribute { prefix })
}

fn parse_number<T: std::str::FromStr>(
    prefix: &'static str,
    value: &str,
) -> Result<T, StorageError> {
    value.parse().map_err(|_| StorageError::InvalidNumber {
        prefix,
        value: value.to_string(),
    })
}

/// Reads an attribute sheet, trimming each line and its prefix.
pub fn load_attributes(path: &Path) -> Result<Attributes, StorageError> {
    let sheet = fs::read_to_string(path)?;
    let mut lines = sheet.lines();

    let name = take_field(&mut lines, "Name:")?.to_string();
    let generation = parse_number("Generation:", take_field(&mut lines, "Generation:")?)?;
    let family_history = take_field(&mut lines, "Family History:")?.to_string();
    let max_speed = parse_number("Max Speed:", take_field(&mut lines, "Max Speed:")?)?;
    let max_turn_speed = parse_number(
        "Max Turn Speed:",
        take_field(&mut lines, "Max Turn Speed:")?,
    )?;
    let color = hex_to_color(take_field(&mut lines, "Colour:")?)?;
    let max_energy_reserve = parse_number(
        "Energy Reserve:",
        take_field(&mut lines, "Energy Reserve:")?,
    )?;

    Ok(Attributes {
        name,
        generation,
        family_history,
        max_speed,
        max_turn_speed,
        color,
        max_energy_reserve,
    })
}

/// Writes the species roster: one comma-terminated colour token per species.
pub fn save_roster(path: &Path, tokens: &[String]) -> Result<(), StorageError> {
    let mut roster = String::new();
    for token in tokens {
        roster.push_str(token);
        roster.push(',');
    }
    fs::write(path, roster)?;
    Ok(())
}

/// Reads the species roster, ignoring empty trailing tokens.
pub fn load_roster(path: &Path) -> Result<Vec<String>, StorageError> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect())
}

/// Persists a run's founding stock under `dir`: per species one genome file
/// and one attribute sheet keyed by colour token, plus the roster naming
/// them. Returns the written tokens. Writes nothing when no agent qualified.
pub fn save_founders(dir: &Path, founders: &[Founder]) -> Result<Vec<String>, StorageError> {
    if founders.is_empty() {
        return Ok(Vec::new());
    }
    fs::create_dir_all(dir.join(BRAIN_DIR))?;
    fs::create_dir_all(dir.join(ATTRIBUTE_DIR))?;

    let mut tokens = Vec::with_capacity(founders.len());
    for founder in founders {
        let token = color_to_hex(founder.attributes.color);
        fs::write(
            dir.join(BRAIN_DIR).join(format!("{token}starter_brain.txt")),
            &founder.genome,
        )?;
        save_attributes(
            &dir.join(ATTRIBUTE_DIR)
                .join(format!("{token}starter_attributes.txt")),
            &founder.attributes,
        )?;
        tokens.push(token);
    }
    save_roster(&dir.join(ROSTER_FILE), &tokens)?;
    info!(species = tokens.len(), "saved founder species");
    Ok(tokens)
}

/// Seeds a world from the roster under `dir`: for each listed species, loads
/// its genome/attribute pair and spawns `per_species` agents. The back half
/// of every batch gets seeding jitter (attribute nudges plus field drift).
/// Returns the number of agents actually spawned; capacity refusals are
/// silent, everything else is fatal.
pub fn seed_population(
    dir: &Path,
    world: &mut WorldState,
    per_species: usize,
) -> Result<usize, StorageError> {
    let roster = load_roster(&dir.join(ROSTER_FILE))?;
    let mut spawned = 0;
    for token in &roster {
        let field = load_genome(
            &dir.join(BRAIN_DIR).join(format!("{token}starter_brain.txt")),
        )?;
        let attributes = load_attributes(
            &dir.join(ATTRIBUTE_DIR)
                .join(format!("{token}starter_attributes.txt")),
        )?;
        for index in 0..per_species {
            let mutate = index as f32 >= per_species as f32 * 0.5;
            if world
                .spawn_seeded(attributes.clone(), field.clone(), mutate)?
                .is_some()
            {
                spawned += 1;
            }
        }
    }
    info!(spawned, species = roster.len(), "seeded population from roster");
    Ok(spawned)
}
