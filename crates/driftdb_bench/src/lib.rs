//! Benchmark utilities.

use driftdb_codec::Value;
use driftdb_core::{DocumentKey, Mutation, ObjectValue};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generates `count` random document keys in `collection`.
pub fn random_keys(collection: &str, count: usize) -> Vec<DocumentKey> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let id: String = (&mut rng).sample_iter(&Alphanumeric).take(12).map(char::from).collect();
            DocumentKey::from_string(&format!("{collection}/{id}")).expect("valid key")
        })
        .collect()
}

/// Generates a random field value of roughly `size` bytes.
pub fn random_value(size: usize) -> Value {
    let mut rng = rand::thread_rng();
    match rng.gen_range(0..3) {
        0 => Value::Integer(rng.gen()),
        1 => Value::Double(rng.gen_range(-1.0e6..1.0e6)),
        _ => Value::String((&mut rng).sample_iter(&Alphanumeric).take(size).map(char::from).collect()),
    }
}

/// Generates document data with `fields` random fields.
pub fn random_data(fields: usize) -> ObjectValue {
    ObjectValue::from_entries((0..fields).map(|i| (format!("f{i}"), random_value(16))))
}

/// Generates one set mutation per key.
pub fn set_mutations(keys: &[DocumentKey], fields: usize) -> Vec<Mutation> {
    keys.iter()
        .map(|key| Mutation::set(key.clone(), random_data(fields)))
        .collect()
}
