//! Partition selection.

use serde_json::Value;

/// Pluggable strategy mapping a partition key to a partition.
///
/// The returned value may fall outside `0..partition_count`; callers reduce it
/// modulo the partition count.
pub trait PartitionSelector: Send + Sync {
    fn select_partition(&self, key: &Value, partition_count: u32) -> i32;
}

/// Hash-based selector: `abs(stable_hash(key))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPartitionSelector;

impl PartitionSelector for DefaultPartitionSelector {
    fn select_partition(&self, key: &Value, _partition_count: u32) -> i32 {
        let hash = stable_hash(key);
        // abs(i32::MIN) overflows
        if hash == i32::MIN { 0 } else { hash.abs() }
    }
}

/// Value-based hash that is identical in every process and on every platform.
///
/// Integers in `i32` range hash to themselves; wider integers and floats fold
/// their 64 bits into 32.
///
/// Producers and consumers compute partitions independently, so this must
/// never depend on per-process state such as a randomly seeded hasher.
pub fn stable_hash(key: &Value) -> i32 {
    match key {
        Value::Null => 0,
        Value::Bool(true) => 1231,
        Value::Bool(false) => 1237,
        Value::String(s) => string_hash(s),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                i32::try_from(v).unwrap_or_else(|_| fold_long(v))
            } else if let Some(v) = n.as_u64() {
                fold_long(v as i64)
            } else {
                fold_long(n.as_f64().unwrap_or_default().to_bits() as i64)
            }
        }
        // serde_json maps are ordered, so the compact encoding is canonical
        Value::Array(_) | Value::Object(_) => string_hash(&key.to_string()),
    }
}

fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

fn fold_long(v: i64) -> i32 {
    (v ^ ((v as u64) >> 32) as i64) as i32
}
