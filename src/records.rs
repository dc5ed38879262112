use redb::ReadableTable;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Open key/value metadata attached to collections and records.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Header size: 4 bytes dimension.
const HEADER_SIZE: usize = 4;

/// A stored document together with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: Metadata,
    /// The owning collection's uuid.
    pub collection_id: String,
}

/// The non-vector half of a record, stored as JSON.
#[derive(Debug, Serialize, Deserialize)]
struct RecordRow {
    collection_id: String,
    content: String,
    metadata: Metadata,
}

/// Records of one collection share the `"{uuid}:"` key prefix, so a
/// collection is a contiguous key range.
pub(crate) fn record_key(collection_id: &str, id: &str) -> String {
    format!("{collection_id}:{id}")
}

/// Half-open key range covering every record of a collection.
pub(crate) fn collection_range(collection_id: &str) -> (String, String) {
    // ';' sorts right after ':'
    (format!("{collection_id}:"), format!("{collection_id};"))
}

/// Encode a vector as a 4-byte dimension header followed by native-endian
/// f32 components (little-endian on every supported target).
pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes =
        Vec::with_capacity(HEADER_SIZE + std::mem::size_of_val(vector));
    bytes.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(vector));
    bytes
}

/// Decode a vector written by [`encode_vector`]. Returns `None` when the
/// header and payload length disagree.
pub(crate) fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    let header: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
    let dimension = u32::from_le_bytes(header) as usize;
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != dimension * 4 {
        return None;
    }

    // redb gives no alignment guarantee for values.
    let data = match bytemuck::try_cast_slice::<u8, f32>(payload) {
        Ok(floats) => floats.to_vec(),
        Err(_) => payload
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    };
    Some(data)
}

pub(crate) fn encode_row(record: &VectorRecord) -> Result<Vec<u8>> {
    let row = RecordRow {
        collection_id: record.collection_id.clone(),
        content: record.content.clone(),
        metadata: record.metadata.clone(),
    };
    Ok(serde_json::to_vec(&row)?)
}

fn decode_record(id: &str, row: &[u8], vector: &[u8]) -> Result<VectorRecord> {
    let row: RecordRow = serde_json::from_slice(row)?;
    let vector = decode_vector(vector).ok_or_else(|| {
        Error::Store(format!("corrupt vector payload for record {id}"))
    })?;
    Ok(VectorRecord {
        id: id.to_string(),
        vector,
        content: row.content,
        metadata: row.metadata,
        collection_id: row.collection_id,
    })
}

/// Load every record of a collection in key (id) order.
pub(crate) fn scan_collection<R, V>(
    records: &R,
    vectors: &V,
    collection_id: &str,
) -> Result<Vec<VectorRecord>>
where
    R: ReadableTable<&'static str, &'static [u8]>,
    V: ReadableTable<&'static str, &'static [u8]>,
{
    let (start, end) = collection_range(collection_id);
    let prefix_len = start.len();

    let mut result = Vec::new();
    for entry in records.range(start.as_str()..end.as_str())? {
        let (key, row) = entry?;
        let key = key.value();
        let id = &key[prefix_len..];
        let Some(vector) = vectors.get(key)? else {
            return Err(Error::Store(format!("record {id} has no vector")));
        };
        result.push(decode_record(id, row.value(), vector.value())?);
    }
    Ok(result)
}

/// Load the requested records, preserving input order and skipping ids
/// that are not stored.
pub(crate) fn load_records<R, V>(
    records: &R,
    vectors: &V,
    collection_id: &str,
    ids: &[String],
) -> Result<Vec<VectorRecord>>
where
    R: ReadableTable<&'static str, &'static [u8]>,
    V: ReadableTable<&'static str, &'static [u8]>,
{
    let mut result = Vec::with_capacity(ids.len());
    for id in ids {
        let key = record_key(collection_id, id);
        let (Some(row), Some(vector)) =
            (records.get(key.as_str())?, vectors.get(key.as_str())?)
        else {
            continue;
        };
        result.push(decode_record(id, row.value(), vector.value())?);
    }
    Ok(result)
}

/// Collect the keys of every record of a collection.
pub(crate) fn collection_keys<R>(
    records: &R,
    collection_id: &str,
) -> Result<Vec<String>>
where
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let (start, end) = collection_range(collection_id);
    let mut keys = Vec::new();
    for entry in records.range(start.as_str()..end.as_str())? {
        let (key, _) = entry?;
        keys.push(key.value().to_string());
    }
    Ok(keys)
}
