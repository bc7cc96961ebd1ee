//! Keyed byte payloads of Kubernetes secrets

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use kube::{api::DynamicObject, ResourceExt};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Decoded secret payload
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// True for core/v1 Secret objects
pub fn is_secret(obj: &DynamicObject) -> bool {
    obj.types
        .as_ref()
        .is_some_and(|t| t.api_version == "v1" && t.kind == "Secret")
}

/// Decode the `data` payload of a secret.
///
/// A secret without data decodes to an empty map. Anything that is not a
/// secret, or carries values that are not base64 strings, is an error.
pub fn secret_data(obj: &DynamicObject) -> Result<SecretData> {
    if !is_secret(obj) {
        return Err(Error::validation(format!("object {} is not a Secret", obj.name_any())));
    }
    let Some(raw) = obj.data.get("data") else {
        return Ok(SecretData::new());
    };
    let map = match raw {
        Value::Null => return Ok(SecretData::new()),
        Value::Object(map) => map,
        _ => {
            return Err(Error::validation(format!(
                "secret {} has a non-object data field",
                obj.name_any()
            )))
        }
    };

    map.iter()
        .map(|(key, value)| {
            let encoded = value.as_str().ok_or_else(|| {
                Error::validation(format!("secret {} key '{}' is not a string", obj.name_any(), key))
            })?;
            let bytes = STANDARD.decode(encoded).map_err(|e| {
                Error::validation(format!("secret {} key '{}' is not base64: {}", obj.name_any(), key, e))
            })?;
            Ok((key.clone(), bytes))
        })
        .collect()
}

/// Get a UTF-8 value from decoded secret data
pub fn secret_string(data: &SecretData, secret: &str, key: &str) -> Result<String> {
    let bytes = data
        .get(key)
        .ok_or_else(|| Error::not_found(format!("key '{}' in secret '{}'", key, secret)))?;
    String::from_utf8(bytes.clone())
        .map_err(|e| Error::validation(format!("Invalid UTF-8 in secret key '{}': {}", key, e)))
}

/// Encode a payload into the wire form of a secret's `data` field
pub fn encode_secret_data<'a>(entries: impl IntoIterator<Item = (&'a String, &'a Vec<u8>)>) -> Value {
    let map: Map<String, Value> = entries
        .into_iter()
        .map(|(k, v)| (k.clone(), Value::String(STANDARD.encode(v))))
        .collect();
    Value::Object(map)
}
