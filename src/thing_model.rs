//! Thing Model descriptor.
//!
//! The document declares events and services; the property sets are derived
//! from the well-known `post` event and the `set`/`get` services.

use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;

use serde::Deserialize;

use crate::error::ValidationError;

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    events: Vec<Declaration>,
    #[serde(default)]
    services: Vec<Declaration>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Declaration {
    identifier: String,
    #[serde(default)]
    input_data: Vec<DataSpec>,
    #[serde(default)]
    output_data: Vec<DataSpec>,
}

#[derive(Debug, Deserialize)]
struct DataSpec {
    identifier: String,
}

/// Parsed Thing Model, immutable after load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThingModel {
    /// Properties the cloud may read.
    pub get_properties: BTreeSet<String>,
    /// Properties the cloud may write.
    pub set_properties: BTreeSet<String>,
    /// Properties the device reports.
    pub post_properties: BTreeSet<String>,
    pub events: BTreeSet<String>,
    pub services: BTreeSet<String>,
}

impl ThingModel {
    pub fn parse(document: &[u8]) -> Result<Self, ValidationError> {
        let doc: Document =
            serde_json::from_slice(document).map_err(|_| ValidationError::MalformedThingModel)?;

        let mut model = ThingModel::default();
        for event in doc.events {
            if event.identifier == "post" {
                model
                    .post_properties
                    .extend(event.output_data.into_iter().map(|d| d.identifier));
            } else {
                model.events.insert(event.identifier);
            }
        }
        for service in doc.services {
            match service.identifier.as_str() {
                "set" => model
                    .set_properties
                    .extend(service.input_data.into_iter().map(|d| d.identifier)),
                "get" => model
                    .get_properties
                    .extend(service.output_data.into_iter().map(|d| d.identifier)),
                _ => {
                    model.services.insert(service.identifier);
                }
            }
        }
        Ok(model)
    }
}
