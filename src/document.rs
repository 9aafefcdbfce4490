//! Schema-driven synthesis of random JSON documents.
//!
//! A `Schema` describes the shape of one record; a `DocumentGenerator`
//! turns it into a stream of documents that depends only on the schema and
//! the seed, so two generators with identical inputs yield identical
//! output.

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Options for the pseudo-random generators.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// The seed used by the pseudo-random engine.
    pub seed: u64,
}

/// The shape of one synthesised record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Bool,
    Uint64,
    Float64,
    Str { len: usize },
    Array { item: Box<FieldKind>, len: usize },
    Object { fields: Vec<Field> },
}

impl Schema {
    /// A schema with a single field.
    pub fn single(name: &str, kind: FieldKind) -> Self {
        Self {
            fields: vec![Field {
                name: name.to_string(),
                kind,
            }],
        }
    }
}

impl Default for Schema {
    fn default() -> Self {
        Schema::single("test", FieldKind::Uint64)
    }
}

/// Yields one JSON document per call.
pub trait ValueProducer {
    fn produce(&mut self) -> Value;
}

/// Deterministic generator of schema-shaped documents.
pub struct DocumentGenerator {
    schema: Schema,
    rng: StdRng,
}

impl DocumentGenerator {
    pub fn new(schema: Schema, seed: u64) -> Self {
        Self {
            schema,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ValueProducer for DocumentGenerator {
    fn produce(&mut self) -> Value {
        object_value(&self.schema.fields, &mut self.rng)
    }
}

fn object_value(fields: &[Field], rng: &mut StdRng) -> Value {
    let mut map = Map::with_capacity(fields.len());
    for field in fields {
        map.insert(field.name.clone(), generate_value(&field.kind, rng));
    }
    Value::Object(map)
}

fn generate_value(kind: &FieldKind, rng: &mut StdRng) -> Value {
    match kind {
        FieldKind::Bool => Value::Bool(rng.gen()),
        FieldKind::Uint64 => Value::from(rng.gen::<u64>()),
        // Uniform in [0, 1): always finite, always representable.
        FieldKind::Float64 => Value::from(rng.gen::<f64>()),
        FieldKind::Str { len } => {
            let s: String = (0..*len).map(|_| char::from(rng.sample(Alphanumeric))).collect();
            Value::String(s)
        }
        FieldKind::Array { item, len } => {
            Value::Array((0..*len).map(|_| generate_value(item, rng)).collect())
        }
        FieldKind::Object { fields } => object_value(fields, rng),
    }
}
