//! Connect credentials and dynamic device registration.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Deserialize;
use sha1::Sha1;
use sha2::Sha256;

use crate::config::DeviceIdentity;
use crate::error::RegistrationError;

const NONCE_LEN: usize = 15;

fn hex_mac<M: Mac + KeyInit>(key: &[u8], message: &str) -> String {
    // HMAC accepts keys of any length, so this never takes the error branch.
    match <M as Mac>::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(message.as_bytes());
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

/// Username, password and client id for one MQTT connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttCredentials {
    pub client_id: String,
    pub username: String,
    pub password: String,
}

impl MqttCredentials {
    /// Signs a connect request with the device secret (`hmacsha1`).
    pub fn sign(identity: &DeviceIdentity, device_secret: &str, tls: bool, timestamp: u64) -> Self {
        let pk = &identity.product_key;
        let dn = &identity.device_name;
        let secure_mode = if tls { 2 } else { 3 };
        let client_id = alloc::format!(
            "{pk}&{dn}|securemode={secure_mode},signmethod=hmacsha1,ext=1,timestamp={timestamp}|"
        );
        let content =
            alloc::format!("clientId{pk}&{dn}deviceName{dn}productKey{pk}timestamp{timestamp}");
        Self {
            client_id,
            username: alloc::format!("{dn}&{pk}"),
            password: hex_mac::<Hmac<Sha1>>(device_secret.as_bytes(), &content),
        }
    }
}

/// The HTTPS exchange behind dynamic registration.
///
/// The client only builds the request and interprets the reply; the
/// application supplies the HTTP stack.
#[allow(async_fn_in_trait)]
pub trait Registrar {
    /// POSTs an `application/x-www-form-urlencoded` body and returns the response body.
    async fn post_form(
        &self,
        url: &str,
        body: &str,
        ca_cert: Option<&str>,
    ) -> Result<Vec<u8>, RegistrationError>;
}

/// Registrar for devices provisioned with a device secret.
pub struct NoRegistrar;

impl Registrar for NoRegistrar {
    async fn post_form(&self, _: &str, _: &str, _: Option<&str>) -> Result<Vec<u8>, RegistrationError> {
        Err(RegistrationError::Unsupported)
    }
}

/// A signed dynamic registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub url: String,
    pub body: String,
    pub sign: String,
}

impl RegistrationRequest {
    pub fn new(identity: &DeviceIdentity, nonce: &str) -> Self {
        let pk = &identity.product_key;
        let dn = &identity.device_name;
        let sign = hex_mac::<Hmac<Sha256>>(
            identity.product_secret.as_bytes(),
            &alloc::format!("deviceName{dn}productKey{pk}random{nonce}"),
        );
        let mut body = String::new();
        for (i, (key, value)) in [
            ("productKey", pk.as_str()),
            ("deviceName", dn.as_str()),
            ("random", nonce),
            ("sign", sign.as_str()),
            ("signMethod", "HmacSHA256"),
        ]
        .into_iter()
        .enumerate()
        {
            if i > 0 {
                body.push('&');
            }
            body.push_str(key);
            body.push('=');
            form_encode(&mut body, value);
        }
        Self {
            url: alloc::format!("https://iot-auth.{}.aliyuncs.com/auth/register/device", identity.host),
            body,
            sign,
        }
    }
}

fn form_encode(out: &mut String, value: &str) {
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(byte))
            }
            b' ' => out.push('+'),
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
}

/// Random alphanumeric nonce for a registration request.
pub fn registration_nonce(rng: &mut impl Rng) -> String {
    (0..NONCE_LEN)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}

#[derive(Deserialize)]
struct RegistrationReply {
    code: i64,
    #[serde(default)]
    data: Option<RegistrationData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationData {
    device_secret: Option<String>,
}

/// Extracts the device secret from a registration reply.
pub fn parse_registration_reply(body: &[u8]) -> Result<String, RegistrationError> {
    let reply: RegistrationReply =
        serde_json::from_slice(body).map_err(|_| RegistrationError::MalformedReply)?;
    if reply.code != 200 {
        return Err(RegistrationError::Refused(reply.code));
    }
    reply
        .data
        .and_then(|data| data.device_secret)
        .filter(|secret| !secret.is_empty())
        .ok_or(RegistrationError::MalformedReply)
}
