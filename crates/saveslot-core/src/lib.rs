use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

pub const ID_FIELD: &str = "id";
pub const TYPE_TAG_FIELD: &str = "type_tag";
pub const DIGEST_FIELD: &str = "integrity_digest";
pub const PAYLOAD_FIELD: &str = "payload";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CodecError {
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("unknown record type tag: {0}")]
    UnknownType(String),
}

/// A concrete record variant: any serde-able, default-constructible payload
/// shape declared under a stable type tag.
///
/// `Default` matters: decoding starts from a default instance and overlays the
/// stored fields, so files written before a field existed still decode.
pub trait TaggedPayload:
    Serialize + DeserializeOwned + Default + Clone + fmt::Debug + Send + Sync + 'static
{
    const TYPE_TAG: &'static str;
}

/// Object-safe view of a payload, the only shape the store ever handles.
/// Implemented for every [`TaggedPayload`] via a blanket impl.
pub trait RecordPayload: fmt::Debug + Send + Sync {
    fn type_tag(&self) -> &'static str;

    /// Encode the payload fields as a JSON value.
    ///
    /// # Errors
    /// Returns [`CodecError::InvalidRecord`] when the payload cannot be
    /// represented as JSON.
    fn to_value(&self) -> Result<Value, CodecError>;

    fn as_any(&self) -> &dyn Any;

    fn clone_payload(&self) -> Box<dyn RecordPayload>;
}

impl<T: TaggedPayload> RecordPayload for T {
    fn type_tag(&self) -> &'static str {
        T::TYPE_TAG
    }

    fn to_value(&self) -> Result<Value, CodecError> {
        serde_json::to_value(self)
            .map_err(|err| CodecError::InvalidRecord(format!("unencodable payload: {err}")))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_payload(&self) -> Box<dyn RecordPayload> {
        Box::new(self.clone())
    }
}

/// The unit of persistence: an id, a type tag fixed at construction, an
/// optional integrity digest, and the variant payload.
#[derive(Debug)]
pub struct SaveRecord {
    id: String,
    type_tag: String,
    integrity_digest: Option<String>,
    payload: Box<dyn RecordPayload>,
}

impl Clone for SaveRecord {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            type_tag: self.type_tag.clone(),
            integrity_digest: self.integrity_digest.clone(),
            payload: self.payload.clone_payload(),
        }
    }
}

impl SaveRecord {
    /// Build a record from a typed payload. The type tag is taken from the
    /// payload here, once, and never recomputed afterwards.
    pub fn new<T: TaggedPayload>(id: impl Into<String>, payload: T) -> Self {
        Self {
            id: id.into(),
            type_tag: T::TYPE_TAG.to_owned(),
            integrity_digest: None,
            payload: Box::new(payload),
        }
    }

    /// Reassemble a record from already-resolved parts. Used by the codec on
    /// decode, where the tag comes from the stored encoding.
    #[must_use]
    pub fn from_parts(
        id: String,
        type_tag: String,
        integrity_digest: Option<String>,
        payload: Box<dyn RecordPayload>,
    ) -> Self {
        Self { id, type_tag, integrity_digest, payload }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    #[must_use]
    pub fn integrity_digest(&self) -> Option<&str> {
        self.integrity_digest.as_deref()
    }

    #[must_use]
    pub fn payload(&self) -> &dyn RecordPayload {
        self.payload.as_ref()
    }

    /// Downcast the payload to a concrete variant. A wrong-type cast is a
    /// normal `None`, never a panic.
    #[must_use]
    pub fn payload_as<T: TaggedPayload>(&self) -> Option<&T> {
        self.payload.as_any().downcast_ref::<T>()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn set_integrity_digest(&mut self, digest: Option<String>) {
        self.integrity_digest = digest;
    }
}

pub mod integrity {
    use sha2::{Digest, Sha256};

    /// Hex-encoded SHA-256 of the given bytes. Stateless; callers decide what
    /// goes in (in particular, an encoding with the digest field cleared).
    #[must_use]
    pub fn digest(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }
}

type DecodeFn = fn(Value) -> Result<Box<dyn RecordPayload>, CodecError>;

fn decode_into_default<T: TaggedPayload>(
    stored: Value,
) -> Result<Box<dyn RecordPayload>, CodecError> {
    // Allocate a default instance and overlay the stored fields, so absent
    // payload fields keep their defaults instead of failing the decode.
    let base = serde_json::to_value(T::default())
        .map_err(|err| CodecError::InvalidRecord(format!("unencodable default: {err}")))?;
    let merged = match (base, stored) {
        (Value::Object(mut base_obj), Value::Object(overlay)) => {
            for (key, value) in overlay {
                base_obj.insert(key, value);
            }
            Value::Object(base_obj)
        }
        (_, stored) => stored,
    };
    let payload: T = serde_json::from_value(merged)
        .map_err(|err| CodecError::InvalidRecord(format!("bad payload fields: {err}")))?;
    Ok(Box::new(payload))
}

/// Tag registry plus wire format: converts between a [`SaveRecord`] and its
/// self-describing JSON encoding, resolving the concrete variant from the
/// embedded type tag at decode time.
#[derive(Default)]
pub struct RecordCodec {
    decoders: HashMap<String, DecodeFn>,
}

impl RecordCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a variant under its declared type tag.
    pub fn register<T: TaggedPayload>(&mut self) {
        self.register_as::<T>(T::TYPE_TAG);
    }

    /// Register a variant under an explicit tag. Re-registering an existing
    /// tag replaces the previous mapping, last write wins.
    pub fn register_as<T: TaggedPayload>(&mut self, tag: &str) {
        self.decoders.insert(tag.to_owned(), decode_into_default::<T>);
    }

    #[must_use]
    pub fn is_registered(&self, tag: &str) -> bool {
        self.decoders.contains_key(tag)
    }

    /// Encode a record as pretty JSON embedding its type tag, so a later
    /// decode needs no advance knowledge of the variant.
    ///
    /// # Errors
    /// Returns [`CodecError::InvalidRecord`] when the payload cannot be
    /// encoded.
    pub fn encode(&self, record: &SaveRecord) -> Result<Vec<u8>, CodecError> {
        let mut obj = Map::new();
        obj.insert(ID_FIELD.to_owned(), Value::String(record.id().to_owned()));
        obj.insert(TYPE_TAG_FIELD.to_owned(), Value::String(record.type_tag().to_owned()));
        if let Some(digest) = record.integrity_digest() {
            obj.insert(DIGEST_FIELD.to_owned(), Value::String(digest.to_owned()));
        }
        obj.insert(PAYLOAD_FIELD.to_owned(), record.payload().to_value()?);
        serde_json::to_vec_pretty(&Value::Object(obj))
            .map_err(|err| CodecError::InvalidRecord(format!("unencodable record: {err}")))
    }

    /// Decode a stored encoding back into a record of the correct variant.
    ///
    /// # Errors
    /// Returns [`CodecError::InvalidRecord`] for malformed bytes or a
    /// missing/empty type tag, and [`CodecError::UnknownType`] when the tag
    /// has no registered variant.
    pub fn decode(&self, bytes: &[u8]) -> Result<SaveRecord, CodecError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|err| CodecError::InvalidRecord(format!("malformed JSON: {err}")))?;
        let Value::Object(obj) = value else {
            return Err(CodecError::InvalidRecord("encoding is not a JSON object".to_owned()));
        };

        let tag = obj.get(TYPE_TAG_FIELD).and_then(Value::as_str).unwrap_or_default();
        if tag.is_empty() {
            return Err(CodecError::InvalidRecord("type tag is missing or empty".to_owned()));
        }
        let decode = self
            .decoders
            .get(tag)
            .ok_or_else(|| CodecError::UnknownType(tag.to_owned()))?;

        let stored_payload = obj
            .get(PAYLOAD_FIELD)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let payload = decode(stored_payload)?;

        let id = obj
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let integrity_digest = obj
            .get(DIGEST_FIELD)
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);

        Ok(SaveRecord::from_parts(id, tag.to_owned(), integrity_digest, payload))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct PlayerFixture {
        health: u32,
        mana: u32,
        is_premium: bool,
    }

    impl TaggedPayload for PlayerFixture {
        const TYPE_TAG: &'static str = "player";
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct CheckpointFixture {
        label: String,
    }

    impl TaggedPayload for CheckpointFixture {
        const TYPE_TAG: &'static str = "checkpoint";
    }

    fn codec_with_fixtures() -> RecordCodec {
        let mut codec = RecordCodec::new();
        codec.register::<PlayerFixture>();
        codec.register::<CheckpointFixture>();
        codec
    }

    #[test]
    fn round_trip_preserves_all_fields() -> Result<(), CodecError> {
        let codec = codec_with_fixtures();
        let mut record = SaveRecord::new(
            "DataA",
            PlayerFixture { health: 100, mana: 150, is_premium: true },
        );
        record.set_integrity_digest(Some("cafe".to_owned()));

        let decoded = codec.decode(&codec.encode(&record)?)?;

        assert_eq!(decoded.id(), "DataA");
        assert_eq!(decoded.type_tag(), "player");
        assert_eq!(decoded.integrity_digest(), Some("cafe"));
        assert_eq!(
            decoded.payload_as::<PlayerFixture>(),
            Some(&PlayerFixture { health: 100, mana: 150, is_premium: true })
        );
        Ok(())
    }

    #[test]
    fn type_tag_is_fixed_at_construction() {
        let record = SaveRecord::new("a", CheckpointFixture { label: "l1".to_owned() });
        assert_eq!(record.type_tag(), CheckpointFixture::TYPE_TAG);
    }

    #[test]
    fn decode_resolves_variant_from_embedded_tag() -> Result<(), CodecError> {
        let codec = codec_with_fixtures();
        let record = SaveRecord::new("cp", CheckpointFixture { label: "boss".to_owned() });

        let decoded = codec.decode(&codec.encode(&record)?)?;

        assert!(decoded.payload_as::<CheckpointFixture>().is_some());
        assert!(decoded.payload_as::<PlayerFixture>().is_none());
        Ok(())
    }

    #[test]
    fn missing_tag_is_invalid_record() {
        let codec = codec_with_fixtures();
        let bytes = br#"{"id":"x","payload":{"health":1}}"#;
        assert!(matches!(codec.decode(bytes), Err(CodecError::InvalidRecord(_))));
    }

    #[test]
    fn empty_tag_is_invalid_record() {
        let codec = codec_with_fixtures();
        let bytes = br#"{"id":"x","type_tag":"","payload":{}}"#;
        assert!(matches!(codec.decode(bytes), Err(CodecError::InvalidRecord(_))));
    }

    #[test]
    fn unregistered_tag_is_unknown_type() {
        let codec = codec_with_fixtures();
        let bytes = br#"{"id":"x","type_tag":"ghost","payload":{}}"#;
        assert!(matches!(
            codec.decode(bytes),
            Err(CodecError::UnknownType(tag)) if tag == "ghost"
        ));
    }

    #[test]
    fn malformed_bytes_are_invalid_record() {
        let codec = codec_with_fixtures();
        assert!(matches!(codec.decode(b"not json"), Err(CodecError::InvalidRecord(_))));
    }

    #[test]
    fn absent_payload_fields_take_variant_defaults() -> Result<(), CodecError> {
        let codec = codec_with_fixtures();
        let bytes = br#"{"id":"old","type_tag":"player","payload":{"health":7}}"#;

        let decoded = codec.decode(bytes)?;

        assert_eq!(
            decoded.payload_as::<PlayerFixture>(),
            Some(&PlayerFixture { health: 7, mana: 0, is_premium: false })
        );
        Ok(())
    }

    #[test]
    fn reregistering_a_tag_replaces_the_mapping() -> Result<(), CodecError> {
        let mut codec = codec_with_fixtures();
        codec.register_as::<CheckpointFixture>("player");

        let bytes = br#"{"id":"x","type_tag":"player","payload":{"label":"swapped"}}"#;
        let decoded = codec.decode(bytes)?;

        assert!(decoded.payload_as::<CheckpointFixture>().is_some());
        Ok(())
    }

    #[test]
    fn cloned_record_is_independent() {
        let record = SaveRecord::new("a", PlayerFixture { health: 1, mana: 2, is_premium: false });
        let mut copy = record.clone();
        copy.set_id("b");
        assert_eq!(record.id(), "a");
        assert_eq!(copy.id(), "b");
    }

    #[test]
    fn digest_matches_known_sha256_vector() {
        assert_eq!(
            integrity::digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn digest_is_stable_for_equal_input() {
        assert_eq!(integrity::digest(b"slot"), integrity::digest(b"slot"));
        assert_ne!(integrity::digest(b"slot"), integrity::digest(b"slot2"));
    }
}
