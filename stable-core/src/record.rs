//! The scheduling record persisted on StatefulSets.
//!
//! The record is stored as JSON under the `statefulset-stable.scheduling.sigs.k8s.io/record`
//! annotation, in the form `{"Records":{"web-0":"node1"}}`. The capitalized `Records` field
//! name is part of the persisted format and must be preserved.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::StableError;
use crate::ANNOTATION_STATEFULSET_STABLE_RECORD;

/// A mapping of replica (pod) names to the name of the node they were first bound to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinityRecord {
    #[serde(rename = "Records", alias = "records", default, deserialize_with = "null_as_empty")]
    pub records: BTreeMap<String, String>,
}

impl AffinityRecord {
    /// Decode the scheduling record of the given StatefulSet.
    ///
    /// An absent annotation, or an empty annotation value, yields an empty record.
    pub fn decode(statefulset: &StatefulSet) -> Result<Self, StableError> {
        let raw = statefulset
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(ANNOTATION_STATEFULSET_STABLE_RECORD));
        match raw {
            Some(raw) => Self::decode_str(raw),
            None => Ok(Self::default()),
        }
    }

    /// Decode a raw annotation value.
    pub fn decode_str(raw: &str) -> Result<Self, StableError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        // The Go encoding of a nil record pointer is `null`.
        let record: Option<Self> = serde_json::from_str(raw).map_err(StableError::MalformedRecord)?;
        Ok(record.unwrap_or_default())
    }

    /// Encode this record as an annotation value.
    pub fn encode(&self) -> Result<String, StableError> {
        serde_json::to_string(self).map_err(StableError::Encode)
    }

    /// The recorded node of the given replica, if any.
    pub fn node_for(&self, replica: &str) -> Option<&str> {
        self.records.get(replica).map(String::as_str)
    }

    /// Record the node of the given replica unless it already has one.
    ///
    /// Returns `true` if the record was changed. Existing entries are never overwritten.
    pub fn insert_if_absent(&mut self, replica: &str, node: &str) -> bool {
        if self.records.contains_key(replica) {
            return false;
        }
        self.records.insert(replica.to_string(), node.to_string());
        true
    }

    /// Write this record into the annotations of the given StatefulSet.
    pub fn apply_to(&self, statefulset: &mut StatefulSet) -> Result<(), StableError> {
        let encoded = self.encode()?;
        statefulset
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(ANNOTATION_STATEFULSET_STABLE_RECORD.into(), encoded);
        Ok(())
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(val: D) -> Result<BTreeMap<String, String>, D::Error> {
    let map: Option<BTreeMap<String, String>> = Deserialize::deserialize(val)?;
    Ok(map.unwrap_or_default())
}
