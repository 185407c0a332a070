//! Pluggable payload codecs keyed by packet-type tag.
//!
//! An interceptor turns a structured value into payload bytes and back for
//! one packet-type tag. The registry is a pure lookup table: it holds no
//! connection or buffer state and is safe to share read-mostly across
//! sessions. Encode a value into a [`Packet`](crate::packet::Packet) payload
//! before sending, decode it inside a packet handler; the session read loop
//! itself stays payload-agnostic.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::packet::PacketType;

/// Interceptor errors
#[derive(Error, Debug)]
pub enum InterceptorError {
    /// No interceptor registered for the requested tag
    #[error("no interceptor registered for type {0}")]
    NoInterceptor(u8),

    /// The underlying codec rejected the value
    #[error("payload encode failed")]
    Encode(#[source] serde_json::Error),

    /// The underlying codec rejected the bytes
    #[error("payload decode failed")]
    Decode(#[source] serde_json::Error),
}

/// A codec bound to one packet-type tag.
///
/// Implementations must be stateless with respect to connections; one
/// instance serves every session that shares the registry.
pub trait Interceptor: Send + Sync {
    /// Serialize a structured value into payload bytes.
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, InterceptorError>;

    /// Deserialize payload bytes back into a structured value.
    fn deserialize(&self, bytes: &[u8]) -> Result<Value, InterceptorError>;
}

/// Tag-keyed registry of payload codecs.
///
/// At most one interceptor per tag; registering again for the same tag
/// replaces the earlier entry.
#[derive(Default)]
pub struct InterceptorRegistry {
    entries: RwLock<HashMap<u8, Arc<dyn Interceptor>>>,
}

impl InterceptorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an interceptor for a tag, replacing any earlier registration.
    pub fn register(&self, tag: PacketType, interceptor: Arc<dyn Interceptor>) {
        let mut entries = self.entries.write().expect("interceptor registry poisoned");
        if entries.insert(tag.as_u8(), interceptor).is_some() {
            debug!("replaced interceptor for type {}", tag.as_u8());
        }
    }

    /// Whether a tag has a registered interceptor.
    pub fn contains(&self, tag: PacketType) -> bool {
        self.entries
            .read()
            .expect("interceptor registry poisoned")
            .contains_key(&tag.as_u8())
    }

    /// Encode a structured value into payload bytes for a tag.
    pub fn encode(&self, tag: PacketType, value: &Value) -> Result<Vec<u8>, InterceptorError> {
        self.lookup(tag)?.serialize(value)
    }

    /// Decode payload bytes for a tag back into a structured value.
    pub fn decode(&self, tag: PacketType, bytes: &[u8]) -> Result<Value, InterceptorError> {
        self.lookup(tag)?.deserialize(bytes)
    }

    fn lookup(&self, tag: PacketType) -> Result<Arc<dyn Interceptor>, InterceptorError> {
        self.entries
            .read()
            .expect("interceptor registry poisoned")
            .get(&tag.as_u8())
            .cloned()
            .ok_or(InterceptorError::NoInterceptor(tag.as_u8()))
    }
}

/// Baseline JSON codec for [`PacketType::Json`] payloads.
#[derive(Debug, Default)]
pub struct JsonInterceptor;

impl Interceptor for JsonInterceptor {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, InterceptorError> {
        serde_json::to_vec(value).map_err(InterceptorError::Encode)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, InterceptorError> {
        serde_json::from_slice(bytes).map_err(InterceptorError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_roundtrip() {
        let registry = InterceptorRegistry::new();
        registry.register(PacketType::Json, Arc::new(JsonInterceptor));

        let value = json!({"a": 1});
        let bytes = registry.encode(PacketType::Json, &value).unwrap();
        let decoded = registry.decode(PacketType::Json, &bytes).unwrap();

        assert_eq!(decoded, value);
    }

    #[test]
    fn test_missing_interceptor() {
        let registry = InterceptorRegistry::new();
        let result = registry.encode(PacketType::Json, &json!(null));
        assert!(matches!(result, Err(InterceptorError::NoInterceptor(5))));

        let result = registry.decode(PacketType::Extension(9), b"{}");
        assert!(matches!(result, Err(InterceptorError::NoInterceptor(9))));
    }

    #[test]
    fn test_decode_error_on_garbage() {
        let registry = InterceptorRegistry::new();
        registry.register(PacketType::Json, Arc::new(JsonInterceptor));

        let result = registry.decode(PacketType::Json, b"not json");
        assert!(matches!(result, Err(InterceptorError::Decode(_))));
    }

    #[test]
    fn test_register_overwrites() {
        struct Upper;
        impl Interceptor for Upper {
            fn serialize(&self, value: &Value) -> Result<Vec<u8>, InterceptorError> {
                Ok(value.to_string().to_uppercase().into_bytes())
            }
            fn deserialize(&self, bytes: &[u8]) -> Result<Value, InterceptorError> {
                serde_json::from_slice(&bytes.to_ascii_lowercase())
                    .map_err(InterceptorError::Decode)
            }
        }

        let registry = InterceptorRegistry::new();
        registry.register(PacketType::Json, Arc::new(JsonInterceptor));
        registry.register(PacketType::Json, Arc::new(Upper));

        let bytes = registry.encode(PacketType::Json, &serde_json::json!(true)).unwrap();
        assert_eq!(bytes, b"TRUE");
    }

    #[test]
    fn test_registry_shared_across_threads() {
        let registry = Arc::new(InterceptorRegistry::new());
        registry.register(PacketType::Json, Arc::new(JsonInterceptor));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let value = json!({ "n": i });
                    let bytes = registry.encode(PacketType::Json, &value).unwrap();
                    assert_eq!(registry.decode(PacketType::Json, &bytes).unwrap(), value);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
