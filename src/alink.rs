//! JSON envelopes exchanged on the system topics.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::request_id::RequestId;

pub const ALINK_VERSION: &str = "1.0";
pub const SDK_LANGUAGE: &str = "Rust";
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Outbound request `{id, version, params, method}`.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub id: String,
    pub version: &'static str,
    pub params: &'a Value,
    pub method: &'a str,
}

impl<'a> Request<'a> {
    pub fn new(id: RequestId, method: &'a str, params: &'a Value) -> Self {
        Self {
            id: id.to_string(),
            version: ALINK_VERSION,
            params,
            method,
        }
    }
}

/// Reply sent back for a cloud-initiated request `{id, code, data}`.
#[derive(Debug, Serialize)]
pub struct Reply<'a> {
    pub id: &'a str,
    pub code: i32,
    pub data: &'a Value,
}

/// Cloud-initiated request: property set or service call.
#[derive(Debug, Deserialize)]
pub struct Downlink {
    #[serde(default, deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub method: Option<String>,
}

/// Reply to a device-initiated request, as passed to the ack callbacks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Ack {
    #[serde(rename = "id", default, deserialize_with = "id_string")]
    pub request_id: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub message: String,
}

/// The cloud sends ids as strings, some brokers echo them as numbers.
fn id_string<'de, D: serde::Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::String(id) => id,
        Value::Number(id) => id.to_string(),
        _ => String::new(),
    })
}

pub const PROPERTY_POST_METHOD: &str = "thing.event.property.post";

pub fn event_post_method(event: &str) -> String {
    alloc::format!("thing.event.{event}.post")
}

pub const DEVICE_INFO_UPDATE_METHOD: &str = "thing.deviceinfo.update";
pub const DEVICE_INFO_DELETE_METHOD: &str = "thing.deviceinfo.delete";

/// `{attrKey, attrValue}` entries for a tag update.
pub fn tag_entries(tags: &[(&str, &str)]) -> Value {
    Value::Array(
        tags.iter()
            .map(|(key, value)| json!({"attrKey": key, "attrValue": value}))
            .collect(),
    )
}

/// `{attrKey}` entries for a tag removal.
pub fn tag_keys(keys: &[&str]) -> Value {
    Value::Array(keys.iter().map(|key| json!({"attrKey": key})).collect())
}

/// SYSTEM-domain attributes uploaded right after connect.
pub fn interface_info(info: &str) -> Value {
    let attrs: Vec<Value> = [
        ("SYS_SDK_LANGUAGE", SDK_LANGUAGE),
        ("SYS_LP_SDK_VERSION", SDK_VERSION),
        ("SYS_SDK_IF_INFO", info),
    ]
    .into_iter()
    .map(|(key, value)| json!({"domain": "SYSTEM", "attrKey": key, "attrValue": value}))
    .collect();
    Value::Array(attrs)
}

pub fn shadow_update(reported: &Value, version: u64) -> Value {
    json!({"state": {"reported": reported}, "method": "update", "version": version})
}

pub fn shadow_get() -> Value {
    json!({"method": "get"})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_shape() {
        let params = json!({"temp": 21});
        let body = serde_json::to_value(Request::new(12, PROPERTY_POST_METHOD, &params)).unwrap();
        assert_eq!(
            body,
            json!({"id": "12", "version": "1.0", "params": {"temp": 21}, "method": "thing.event.property.post"})
        );
    }

    #[test]
    fn ack_accepts_numeric_and_missing_fields() {
        let ack: Ack = serde_json::from_str(r#"{"id":7,"code":200}"#).unwrap();
        assert_eq!(ack.request_id, "7");
        assert_eq!(ack.code, 200);
        assert_eq!(ack.data, Value::Null);
        assert!(ack.message.is_empty());
    }

    #[test]
    fn interface_info_lists_system_attributes() {
        let info = interface_info("eth0");
        assert_eq!(info[2]["attrKey"], "SYS_SDK_IF_INFO");
        assert_eq!(info[2]["attrValue"], "eth0");
        assert_eq!(info[0]["domain"], "SYSTEM");
    }

    #[test]
    fn shadow_bodies() {
        let update = shadow_update(&json!({"on": true}), 4);
        assert_eq!(update["state"]["reported"]["on"], true);
        assert_eq!(update["version"], 4);
        assert_eq!(shadow_get(), json!({"method": "get"}));
    }
}
