//! Component table: which status fields of a component are properties and how
//! they are written back.

use std::collections::HashMap;

use crate::error::{ComlinkError, Result};
use crate::message::{DiscoveredProperty, Identifier};
use crate::value::DataType;

/// RPC method and parameter used to change a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSpec {
    pub method: &'static str,
    pub param: &'static str,
}

/// One status field exposed as a property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Dotted path inside the component status object
    pub path: &'static str,
    pub property: &'static str,
    pub data_type: DataType,
    pub format: &'static [&'static str],
    pub write: Option<WriteSpec>,
}

impl FieldSpec {
    fn read(path: &'static str, property: &'static str, data_type: DataType) -> Self {
        Self {
            path,
            property,
            data_type,
            format: &[],
            write: None,
        }
    }

    fn settable(mut self, method: &'static str, param: &'static str) -> Self {
        self.write = Some(WriteSpec { method, param });
        self
    }

    fn with_format(mut self, format: &'static [&'static str]) -> Self {
        self.format = format;
        self
    }

    pub fn format(&self) -> Vec<String> {
        self.format.iter().map(|item| item.to_string()).collect()
    }

    /// Look the field up in a component status object
    pub fn lookup<'a>(&self, status: &'a serde_json::Value) -> Option<&'a serde_json::Value> {
        self.path
            .split('.')
            .try_fold(status, |value, key| value.get(key))
    }

    pub fn describe(&self) -> Result<DiscoveredProperty> {
        let mut property = DiscoveredProperty::new(Identifier::new(self.property)?);
        property.data_type = Some(self.data_type);
        property.settable = Some(self.write.is_some());
        property.queryable = Some(true);
        if !self.format.is_empty() {
            property.format = Some(self.format());
        }
        Ok(property)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSpec {
    pub component: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl ComponentSpec {
    pub fn field(&self, property: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.property == property)
    }
}

const COVER_STATES: &[&str] = &["open", "closed", "opening", "closing", "stopped", "calibrating"];

/// Known components of a device generation
#[derive(Debug, Clone, Default)]
pub struct ComponentTable {
    components: HashMap<&'static str, ComponentSpec>,
    ignored: Vec<&'static str>,
}

impl ComponentTable {
    /// Gen2 (Plus/Pro) devices
    pub fn gen2() -> Self {
        let mut table = Self {
            components: HashMap::new(),
            ignored: vec!["sys", "wifi", "cloud", "mqtt", "ble", "eth", "ws", "bthome", "knx"],
        };
        table.insert(ComponentSpec {
            component: "switch",
            fields: vec![
                FieldSpec::read("output", "output", DataType::Bool).settable("Switch.Set", "on"),
                FieldSpec::read("apower", "power", DataType::Float32),
                FieldSpec::read("voltage", "voltage", DataType::Float32),
                FieldSpec::read("current", "current", DataType::Float32),
                FieldSpec::read("aenergy.total", "energy", DataType::Float32),
                FieldSpec::read("temperature.tC", "temperature", DataType::Float32),
            ],
        });
        table.insert(ComponentSpec {
            component: "light",
            fields: vec![
                FieldSpec::read("output", "output", DataType::Bool).settable("Light.Set", "on"),
                FieldSpec::read("brightness", "brightness", DataType::Uint8)
                    .settable("Light.Set", "brightness"),
            ],
        });
        table.insert(ComponentSpec {
            component: "cover",
            fields: vec![
                FieldSpec::read("state", "state", DataType::Enum).with_format(COVER_STATES),
                FieldSpec::read("current_pos", "position", DataType::Uint8)
                    .settable("Cover.GoToPosition", "pos"),
                FieldSpec::read("apower", "power", DataType::Float32),
            ],
        });
        table.insert(ComponentSpec {
            component: "input",
            fields: vec![FieldSpec::read("state", "state", DataType::Bool)],
        });
        table.insert(ComponentSpec {
            component: "temperature",
            fields: vec![
                FieldSpec::read("tC", "celsius", DataType::Float32),
                FieldSpec::read("tF", "fahrenheit", DataType::Float32),
            ],
        });
        table.insert(ComponentSpec {
            component: "humidity",
            fields: vec![FieldSpec::read("rh", "humidity", DataType::Float32)],
        });
        table
    }

    pub fn insert(&mut self, spec: ComponentSpec) {
        self.components.insert(spec.component, spec);
    }

    pub fn component(&self, name: &str) -> Option<&ComponentSpec> {
        self.components.get(name)
    }

    /// Infrastructure components carrying no device properties
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored.contains(&name)
    }
}

/// `switch:0` → (`switch`, 0)
pub fn split_component_key(key: &str) -> Option<(&str, u32)> {
    let (component, index) = key.split_once(':')?;
    Some((component, index.parse().ok()?))
}

/// Channel identifier of a component instance
pub fn channel_identifier(component: &str, index: u32) -> Result<Identifier> {
    Identifier::new(format!("{component}_{index}"))
        .map_err(|e| ComlinkError::malformed(e.to_string()))
}

/// `switch_0` → (`switch`, 0)
pub fn split_channel(channel: &Identifier) -> Option<(&str, u32)> {
    let (component, index) = channel.as_str().rsplit_once('_')?;
    Some((component, index.parse().ok()?))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gen2_table() {
        let table = ComponentTable::gen2();
        let switch = table.component("switch").unwrap();
        let output = switch.field("output").unwrap();
        assert_eq!(output.write.unwrap().method, "Switch.Set");
        assert!(switch.field("power").unwrap().write.is_none());
        assert!(table.is_ignored("wifi"));
        assert!(table.component("pm1").is_none());
    }

    #[test]
    fn test_nested_lookup() {
        let table = ComponentTable::gen2();
        let field = table.component("switch").unwrap().field("temperature").unwrap();
        let status = json!({"id": 0, "temperature": {"tC": 41.5, "tF": 106.7}});
        assert_eq!(field.lookup(&status), Some(&json!(41.5)));
        assert_eq!(field.lookup(&json!({"id": 0})), None);
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(split_component_key("switch:1"), Some(("switch", 1)));
        assert_eq!(split_component_key("sys"), None);
        let channel = channel_identifier("cover", 0).unwrap();
        assert_eq!(channel.as_str(), "cover_0");
        assert_eq!(split_channel(&channel), Some(("cover", 0)));
    }
}
