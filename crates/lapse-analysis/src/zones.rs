//! Named analysis zones.
//!
//! An ordered map of zone name to rectangle, defined on the
//! coordinates of the *transformed* frame. Insertion order is
//! significant: it is the column order of the result table.

use indexmap::IndexMap;
use lapse_pipeline::Zone;
use serde_json::Value;

use crate::error::AnalysisError;

/// Ordered `name -> rectangle` map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Zones {
    zones: IndexMap<String, Zone>,
}

impl Zones {
    /// An empty zone set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a zone, keeping insertion order for new names.
    pub fn insert(&mut self, name: impl Into<String>, zone: Zone) {
        self.zones.insert(name.into(), zone);
    }

    /// Whether no zones are defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Number of zones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Zone names in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.zones.keys().cloned().collect()
    }

    /// Look up a zone by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Zone> {
        self.zones.get(name).copied()
    }

    /// Iterate `(name, zone)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Zone)> {
        self.zones.iter().map(|(name, zone)| (name.as_str(), *zone))
    }

    /// Remove every zone.
    pub fn clear(&mut self) {
        self.zones.clear();
    }

    /// Serialize to a JSON object (`name -> [x, y, w, h]`), preserving
    /// order.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, zone) in &self.zones {
            // Zone serialization cannot fail.
            if let Ok(value) = serde_json::to_value(zone) {
                map.insert(name.clone(), value);
            }
        }
        Value::Object(map)
    }

    /// Restore from the JSON object produced by
    /// [`to_value`](Self::to_value).
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidParameter`] when the value is
    /// not an object of `[x, y, w, h]` rectangles.
    pub fn from_value(value: &Value) -> Result<Self, AnalysisError> {
        let Value::Object(map) = value else {
            return Err(AnalysisError::InvalidParameter {
                key: "zones".to_owned(),
                reason: "expected an object mapping names to rectangles".to_owned(),
            });
        };
        let mut zones = Self::new();
        for (name, entry) in map {
            let zone: Zone =
                serde_json::from_value(entry.clone()).map_err(|_| {
                    AnalysisError::InvalidParameter {
                        key: format!("zones.{name}"),
                        reason: "expected [x, y, width, height]".to_owned(),
                    }
                })?;
            zones.insert(name.clone(), zone);
        }
        Ok(zones)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_is_preserved() {
        let mut zones = Zones::new();
        zones.insert("zone 2", Zone::new(0, 0, 1, 1));
        zones.insert("zone 10", Zone::new(1, 1, 2, 2));
        zones.insert("zone 1", Zone::new(2, 2, 3, 3));
        assert_eq!(zones.names(), vec!["zone 2", "zone 10", "zone 1"]);
    }

    #[test]
    fn value_round_trip_keeps_order() {
        let mut zones = Zones::new();
        zones.insert("b", Zone::new(0, 0, 4, 4));
        zones.insert("a", Zone::new(4, 4, 4, 4));
        let restored = Zones::from_value(&zones.to_value()).unwrap();
        assert_eq!(restored, zones);
        assert_eq!(restored.names(), vec!["b", "a"]);
    }

    #[test]
    fn from_value_rejects_malformed() {
        assert!(Zones::from_value(&serde_json::json!([1, 2])).is_err());
        assert!(Zones::from_value(&serde_json::json!({"z": [1, 2]})).is_err());
    }
}
