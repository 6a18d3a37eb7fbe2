//! Topic grammar table
//!
//! Each rule pairs a [`TopicKind`] with a regular expression; the first rule
//! that matches wins. Attribute names are checked against the known set after
//! the syntactic match so unknown attributes classify as unsupported rather
//! than malformed.

use regex::Regex;

use crate::error::{ComlinkError, Result};
use crate::message::PropertyAddress;

const ID: &str = "[a-z0-9][a-z0-9_-]*";

const DEVICE_ATTRIBUTES: &[&str] = &["name", "properties", "channels", "controls", "extensions"];
const DEVICE_ATTRIBUTE_GROUPS: &[&str] = &["hw/", "fw/"];
const CHANNEL_ATTRIBUTES: &[&str] = &["name", "properties", "controls"];
const PROPERTY_ATTRIBUTES: &[&str] = &["name", "settable", "queryable", "data-type", "format", "unit"];

/// Shape of a recognised topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// `/fb/v1/<device>/$state`
    DeviceState,
    /// `/fb/v1/<device>/$<attribute>`
    DeviceAttribute,
    /// `/fb/v1/<device>/$property/<property>[/set]`
    DeviceProperty,
    /// `/fb/v1/<device>/$property/<property>/$<attribute>`
    DevicePropertyAttribute,
    /// `/fb/v1/<device>/$channel/<channel>/$<attribute>`
    ChannelAttribute,
    /// `/fb/v1/<device>/$channel/<channel>/$property/<property>[/set]`
    ChannelProperty,
    /// `/fb/v1/<device>/$channel/<channel>/$property/<property>/$<attribute>`
    ChannelPropertyAttribute,
    /// `/fb/v1/<device>/<channel>/<property>[/set]`
    ShortProperty,
}

/// Named parts of a matched topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub kind: TopicKind,
    pub device: String,
    pub channel: Option<String>,
    pub property: Option<String>,
    pub attribute: Option<String>,
    /// Topic ends with `/set`
    pub set: bool,
}

/// Regex table for one protocol version
#[derive(Debug, Clone)]
pub struct TopicGrammar {
    version: String,
    prefix: Regex,
    rules: Vec<(TopicKind, Regex)>,
}

impl TopicGrammar {
    /// FastyBird MQTT convention v1
    pub fn v1() -> Result<Self> {
        let rules = [
            (TopicKind::DeviceState, format!(r"^/fb/v1/(?P<device>{ID})/\$state$")),
            (
                TopicKind::ChannelPropertyAttribute,
                format!(
                    r"^/fb/v1/(?P<device>{ID})/\$channel/(?P<channel>{ID})/\$property/(?P<property>{ID})/\$(?P<attribute>[a-z-]+)$"
                ),
            ),
            (
                TopicKind::ChannelProperty,
                format!(
                    r"^/fb/v1/(?P<device>{ID})/\$channel/(?P<channel>{ID})/\$property/(?P<property>{ID})(?P<set>/set)?$"
                ),
            ),
            (
                TopicKind::ChannelAttribute,
                format!(r"^/fb/v1/(?P<device>{ID})/\$channel/(?P<channel>{ID})/\$(?P<attribute>[a-z-]+)$"),
            ),
            (
                TopicKind::DevicePropertyAttribute,
                format!(
                    r"^/fb/v1/(?P<device>{ID})/\$property/(?P<property>{ID})/\$(?P<attribute>[a-z-]+)$"
                ),
            ),
            (
                TopicKind::DeviceProperty,
                format!(r"^/fb/v1/(?P<device>{ID})/\$property/(?P<property>{ID})(?P<set>/set)?$"),
            ),
            (
                TopicKind::DeviceAttribute,
                format!(r"^/fb/v1/(?P<device>{ID})/\$(?P<attribute>[a-z0-9/_-]+)$"),
            ),
            (
                TopicKind::ShortProperty,
                format!(r"^/fb/v1/(?P<device>{ID})/(?P<channel>{ID})/(?P<property>{ID})(?P<set>/set)?$"),
            ),
        ];

        let rules = rules
            .into_iter()
            .map(|(kind, pattern)| compile(&pattern).map(|rule| (kind, rule)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            version: "v1".to_string(),
            prefix: compile(r"^/fb/(?P<version>v[0-9]+)/")?,
            rules,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Wildcard subscription covering every topic of this version
    pub fn subscription(&self) -> String {
        format!("/fb/{}/#", self.version)
    }

    pub fn parse(&self, topic: &str) -> Result<ParsedTopic> {
        let Some(prefix) = self.prefix.captures(topic) else {
            return Err(ComlinkError::malformed(format!(
                "'{topic}' is not a FastyBird topic"
            )));
        };
        if prefix.name("version").map(|m| m.as_str()) != Some(self.version.as_str()) {
            return Err(ComlinkError::unsupported(format!(
                "protocol version of '{topic}'"
            )));
        }

        for (kind, rule) in &self.rules {
            let Some(caps) = rule.captures(topic) else {
                continue;
            };
            let part = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
            let parsed = ParsedTopic {
                kind: *kind,
                device: part("device").unwrap_or_default(),
                channel: part("channel"),
                property: part("property"),
                attribute: part("attribute"),
                set: caps.name("set").is_some(),
            };
            check_attribute(&parsed, topic)?;
            return Ok(parsed);
        }

        Err(ComlinkError::malformed(format!("unknown topic shape '{topic}'")))
    }

    /// Topic a property value is published on
    pub fn property_topic(&self, address: &PropertyAddress, short_form: bool) -> String {
        match (&address.channel, short_form) {
            (Some(channel), true) => format!(
                "/fb/{}/{}/{}/{}",
                self.version, address.device, channel, address.property
            ),
            (Some(channel), false) => format!(
                "/fb/{}/{}/$channel/{}/$property/{}",
                self.version, address.device, channel, address.property
            ),
            (None, _) => format!(
                "/fb/{}/{}/$property/{}",
                self.version, address.device, address.property
            ),
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| ComlinkError::validation(format!("topic rule '{pattern}': {e}")))
}

fn check_attribute(parsed: &ParsedTopic, topic: &str) -> Result<()> {
    let Some(attribute) = parsed.attribute.as_deref() else {
        return Ok(());
    };
    let known = match parsed.kind {
        TopicKind::DeviceAttribute => {
            DEVICE_ATTRIBUTES.contains(&attribute)
                || DEVICE_ATTRIBUTE_GROUPS.iter().any(|group| {
                    attribute
                        .strip_prefix(group)
                        .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
                })
        },
        TopicKind::ChannelAttribute => CHANNEL_ATTRIBUTES.contains(&attribute),
        TopicKind::DevicePropertyAttribute | TopicKind::ChannelPropertyAttribute => {
            PROPERTY_ATTRIBUTES.contains(&attribute)
        },
        _ => true,
    };
    if known {
        Ok(())
    } else {
        Err(ComlinkError::unsupported(format!(
            "attribute '${attribute}' in '{topic}'"
        )))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn grammar() -> TopicGrammar {
        TopicGrammar::v1().unwrap()
    }

    #[test]
    fn test_topic_shapes() {
        let g = grammar();

        let t = g.parse("/fb/v1/thermostat/$state").unwrap();
        assert_eq!(t.kind, TopicKind::DeviceState);
        assert_eq!(t.device, "thermostat");

        let t = g.parse("/fb/v1/thermostat/$hw/manufacturer").unwrap();
        assert_eq!(t.kind, TopicKind::DeviceAttribute);
        assert_eq!(t.attribute.as_deref(), Some("hw/manufacturer"));

        let t = g.parse("/fb/v1/thermostat/$property/uptime").unwrap();
        assert_eq!(t.kind, TopicKind::DeviceProperty);
        assert!(!t.set);

        let t = g
            .parse("/fb/v1/thermostat/$channel/sensor/$property/temperature/set")
            .unwrap();
        assert_eq!(t.kind, TopicKind::ChannelProperty);
        assert_eq!(t.channel.as_deref(), Some("sensor"));
        assert_eq!(t.property.as_deref(), Some("temperature"));
        assert!(t.set);

        let t = g
            .parse("/fb/v1/thermostat/$channel/sensor/$property/temperature/$data-type")
            .unwrap();
        assert_eq!(t.kind, TopicKind::ChannelPropertyAttribute);
        assert_eq!(t.attribute.as_deref(), Some("data-type"));

        let t = g.parse("/fb/v1/lamp/relay/switch").unwrap();
        assert_eq!(t.kind, TopicKind::ShortProperty);
        assert_eq!(t.channel.as_deref(), Some("relay"));
        assert_eq!(t.property.as_deref(), Some("switch"));
    }

    #[test]
    fn test_classification() {
        let g = grammar();
        assert!(matches!(
            g.parse("/home/lamp/state"),
            Err(ComlinkError::MalformedInput(_))
        ));
        assert!(matches!(
            g.parse("/fb/v2/lamp/$state"),
            Err(ComlinkError::UnsupportedType(_))
        ));
        assert!(matches!(
            g.parse("/fb/v1/lamp/$color"),
            Err(ComlinkError::UnsupportedType(_))
        ));
        assert!(matches!(
            g.parse("/fb/v1/Lamp/$state"),
            Err(ComlinkError::MalformedInput(_))
        ));
        assert!(matches!(
            g.parse("/fb/v1/lamp/a/b/c/d"),
            Err(ComlinkError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_property_topics() {
        let g = grammar();
        let address = PropertyAddress::channel_property("lamp", "relay", "switch").unwrap();
        assert_eq!(
            g.property_topic(&address, false),
            "/fb/v1/lamp/$channel/relay/$property/switch"
        );
        assert_eq!(g.property_topic(&address, true), "/fb/v1/lamp/relay/switch");
        let address = PropertyAddress::device_property("lamp", "uptime").unwrap();
        assert_eq!(g.property_topic(&address, true), "/fb/v1/lamp/$property/uptime");
        assert_eq!(g.subscription(), "/fb/v1/#");
    }
}
