//! Sensor registry and downstream target.
//!
//! The registry is filled once at startup and only read afterwards. The
//! downstream target is replaced whole by `/init` and read as a snapshot by
//! the poll loop and the delivery client.

use crate::models::{DownstreamConfig, SensorDefinition};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

pub struct ValueStore {
    sensors: BTreeMap<String, SensorDefinition>,
    default_sensor: Option<String>,
    downstream: RwLock<Option<DownstreamConfig>>,
}

impl ValueStore {
    pub fn new(sensors: Vec<SensorDefinition>, default_sensor: Option<String>) -> Self {
        Self {
            sensors: sensors.into_iter().map(|s| (s.name.clone(), s)).collect(),
            default_sensor,
            downstream: RwLock::new(None),
        }
    }

    pub fn get_sensor(&self, name: &str) -> Option<&SensorDefinition> {
        self.sensors.get(name)
    }

    pub fn sensors(&self) -> impl Iterator<Item = &SensorDefinition> {
        self.sensors.values()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Sensor served on the un-prefixed `/status` and `/value` routes: the
    /// configured default, or the only registered sensor.
    pub fn default_sensor(&self) -> Option<&SensorDefinition> {
        match self.default_sensor {
            Some(ref name) => self.get_sensor(name),
            None if self.sensors.len() == 1 => self.sensors.values().next(),
            None => None,
        }
    }

    pub fn set_downstream_config(&self, config: DownstreamConfig) {
        *self
            .downstream
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(config);
    }

    /// Consistent copy of the current target, if one was set.
    pub fn downstream_config(&self) -> Option<DownstreamConfig> {
        self.downstream
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProcessingMode, SensorParams};

    fn sensor(name: &str) -> SensorDefinition {
        SensorDefinition::validated(name, 60, ProcessingMode::Latest, 0, SensorParams::default())
            .unwrap()
    }

    fn target(token: &str) -> DownstreamConfig {
        DownstreamConfig {
            server_uri: "hub:8080".to_string(),
            measurements_endpoint: "/m".to_string(),
            init_ack_endpoint: "/a".to_string(),
            id_token: token.to_string(),
        }
    }

    #[test]
    fn test_lookup_by_name() {
        let store = ValueStore::new(vec![sensor("a"), sensor("b")], None);
        assert_eq!(store.len(), 2);
        assert!(!store.is_empty());
        assert!(ValueStore::new(vec![], None).is_empty());
        assert!(store.get_sensor("a").is_some());
        assert!(store.get_sensor("missing").is_none());
    }

    #[test]
    fn test_default_sensor_resolution() {
        let single = ValueStore::new(vec![sensor("only")], None);
        assert_eq!(single.default_sensor().map(|s| s.name.as_str()), Some("only"));

        let several = ValueStore::new(vec![sensor("a"), sensor("b")], None);
        assert!(several.default_sensor().is_none());

        let configured = ValueStore::new(vec![sensor("a"), sensor("b")], Some("b".to_string()));
        assert_eq!(configured.default_sensor().map(|s| s.name.as_str()), Some("b"));
    }

    #[test]
    fn test_downstream_replaced_whole() {
        let store = ValueStore::new(vec![], None);
        assert!(store.downstream_config().is_none());

        store.set_downstream_config(target("first"));
        let snapshot = store.downstream_config().unwrap();
        store.set_downstream_config(target("second"));

        assert_eq!(snapshot.id_token, "first");
        assert_eq!(store.downstream_config().unwrap().id_token, "second");
    }
}
