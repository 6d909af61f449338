//! Index-row envelope: `{ timestamp_ms, data_key_suffix, data_copy? }` (spec §6), encoded with
//! `RecordCodec` the same way entity values are.

use entorm_core::codec::{self, FieldSchema};
use entorm_core::{Error, Result, ScalarKind, Value};

const FIELD_TIMESTAMP: u32 = 1;
const FIELD_DATA_KEY_SUFFIX: u32 = 2;
const FIELD_DATA_COPY: u32 = 3;

fn schema() -> Vec<FieldSchema> {
    vec![
        FieldSchema::scalar(FIELD_TIMESTAMP, ScalarKind::Timestamp),
        FieldSchema::scalar(FIELD_DATA_KEY_SUFFIX, ScalarKind::Bytes),
        FieldSchema::scalar(FIELD_DATA_COPY, ScalarKind::Bytes),
    ]
}

/// One index row's value: when the referenced data row was last known live, the primary-key
/// suffix that names it, and an optional inlined snapshot of its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEnvelope {
    pub timestamp_ms: u64,
    pub data_key_suffix: Vec<u8>,
    pub data_copy: Option<Vec<u8>>,
}

impl IndexEnvelope {
    pub fn encode(&self) -> Vec<u8> {
        let mut fields = vec![
            (FIELD_TIMESTAMP, Value::Timestamp(self.timestamp_ms as i64)),
            (FIELD_DATA_KEY_SUFFIX, Value::Bytes(self.data_key_suffix.clone())),
        ];
        if let Some(copy) = &self.data_copy {
            fields.push((FIELD_DATA_COPY, Value::Bytes(copy.clone())));
        }
        codec::encode(&fields)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let fields = codec::decode(bytes, &schema())?;
        let timestamp_ms = match fields.iter().find(|(id, _)| *id == FIELD_TIMESTAMP).map(|(_, v)| v) {
            Some(Value::Timestamp(ms)) => *ms as u64,
            _ => return Err(Error::Runtime("index envelope missing timestamp_ms".to_string())),
        };
        let data_key_suffix = match fields.iter().find(|(id, _)| *id == FIELD_DATA_KEY_SUFFIX).map(|(_, v)| v) {
            Some(Value::Bytes(b)) => b.clone(),
            _ => return Err(Error::Runtime("index envelope missing data_key_suffix".to_string())),
        };
        let data_copy = match fields.iter().find(|(id, _)| *id == FIELD_DATA_COPY).map(|(_, v)| v) {
            Some(Value::Bytes(b)) => Some(b.clone()),
            _ => None,
        };
        Ok(IndexEnvelope { timestamp_ms, data_key_suffix, data_copy })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_without_data_copy() {
        let envelope = IndexEnvelope { timestamp_ms: 1_700_000_000_000, data_key_suffix: vec![1, 2, 3], data_copy: None };
        let decoded = IndexEnvelope::decode(&envelope.encode()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn round_trips_with_data_copy() {
        let envelope = IndexEnvelope { timestamp_ms: 42, data_key_suffix: vec![9], data_copy: Some(vec![1, 2, 3, 4]) };
        let decoded = IndexEnvelope::decode(&envelope.encode()).unwrap();
        assert_eq!(decoded, envelope);
    }
}
