//! Agent description sent at session start

use crate::opamp::{AgentDescription, KeyValue};

pub const SERVICE_NAME: &str = "signoz-otel-collector";

/// Build the description for this host
pub fn agent_description(version: &str, capabilities: &[String]) -> AgentDescription {
    let mut non_identifying = vec![
        KeyValue::string("os.family", std::env::consts::OS),
        KeyValue::string("host.name", hostname()),
    ];
    non_identifying.extend(
        capabilities
            .iter()
            .filter(|c| !c.trim().is_empty())
            .map(|c| KeyValue::bool(format!("capabilities.{}", c.trim()), true)),
    );

    AgentDescription {
        identifying_attributes: vec![
            KeyValue::string("service.name", SERVICE_NAME),
            KeyValue::string("service.version", version),
        ],
        non_identifying_attributes: non_identifying,
    }
}

fn hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opamp::any_value::Value;

    fn find<'a>(attrs: &'a [KeyValue], key: &str) -> Option<&'a Value> {
        attrs
            .iter()
            .find(|kv| kv.key == key)
            .and_then(|kv| kv.value.as_ref())
            .and_then(|v| v.value.as_ref())
    }

    #[test]
    fn test_description() {
        let desc = agent_description("0.3.0", &["lbexporter".to_string(), " ".to_string()]);
        assert_eq!(
            find(&desc.identifying_attributes, "service.name"),
            Some(&Value::StringValue(SERVICE_NAME.into()))
        );
        assert_eq!(
            find(&desc.identifying_attributes, "service.version"),
            Some(&Value::StringValue("0.3.0".into()))
        );
        assert_eq!(
            find(&desc.non_identifying_attributes, "capabilities.lbexporter"),
            Some(&Value::BoolValue(true))
        );
        assert!(find(&desc.non_identifying_attributes, "os.family").is_some());
        assert!(find(&desc.non_identifying_attributes, "host.name").is_some());
        assert_eq!(desc.non_identifying_attributes.len(), 3);
    }
}
