//! Payloads exchanged over the MQTT broker.
//!
//! Field names are PascalCase on the wire so that existing dashboards and
//! device firmware keep decoding them.

use std::fmt;

use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// A sampled sensor value published on `.../temperature` or `.../moisture`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Measurement {
    /// Latest reading.
    pub measurement: i64,
    /// Fallback used by consumers when no fresh reading exists.
    pub default_value: i64,
}

/// Commanded state of a fan or a sprinkler, received on `.../fan` or `.../sprinkler`.
///
/// Encoded as `{"On": bool}`. Decoding accepts the key in any case and reads
/// a missing key, a `null` value or a `null` payload as off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActuatorState {
    pub on: bool,
}

impl<'de> Deserialize<'de> for ActuatorState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_option(ActuatorStateVisitor)
    }
}

struct ActuatorStateVisitor;

impl<'de> Visitor<'de> for ActuatorStateVisitor {
    type Value = ActuatorState;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object with an `On` field")
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(ActuatorState::default())
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(ActuatorState::default())
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut state = ActuatorState::default();
        while let Some(key) = map.next_key::<String>()? {
            if key.eq_ignore_ascii_case("on") {
                if let Some(on) = map.next_value::<Option<bool>>()? {
                    state.on = on;
                }
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(state)
    }
}

impl Measurement {
    pub fn new(measurement: i64, default_value: i64) -> Self {
        Self {
            measurement,
            default_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_wire_format() {
        let json = serde_json::to_string(&Measurement::new(21, 20)).unwrap();
        assert_eq!(json, r#"{"Measurement":21,"DefaultValue":20}"#);
    }

    #[test]
    fn test_actuator_state_decodes_on() {
        let state: ActuatorState = serde_json::from_str(r#"{"On": true}"#).unwrap();
        assert!(state.on);
    }

    #[test]
    fn test_actuator_state_field_is_case_insensitive() {
        for payload in [r#"{"on": true}"#, r#"{"ON":true}"#, r#"{"oN": true, "Room": "r1"}"#] {
            let state: ActuatorState = serde_json::from_str(payload).unwrap();
            assert!(state.on, "{}", payload);
        }
    }

    #[test]
    fn test_actuator_state_missing_or_null_is_off() {
        for payload in ["{}", "null", r#"{"On": null}"#, r#"{"Speed": 3}"#] {
            let state: ActuatorState = serde_json::from_str(payload).unwrap();
            assert!(!state.on, "{}", payload);
        }
    }

    #[test]
    fn test_actuator_state_encodes_pascal_case() {
        let json = serde_json::to_string(&ActuatorState { on: true }).unwrap();
        assert_eq!(json, r#"{"On":true}"#);
    }

    #[test]
    fn test_actuator_state_rejects_non_bool() {
        let result = serde_json::from_str::<ActuatorState>(r#"{"on": "yes"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_actuator_state_rejects_garbage() {
        assert!(serde_json::from_slice::<ActuatorState>(b"not json").is_err());
    }
}
