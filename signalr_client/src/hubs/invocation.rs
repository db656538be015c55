//! Hub wire envelopes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound: the server calling a client-side event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HubInvocation {
    pub hub: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    /// A patch merged into the proxy state before handlers run.
    #[serde(default)]
    pub state: Option<HashMap<String, Value>>,
}

/// Outbound: the client calling a server-side hub method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HubServerInvocation {
    pub hub: String,
    pub action: String,
    pub data: Vec<Value>,
    pub state: HashMap<String, Value>,
}

/// One entry of the `connectionData` list sent at start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HubRegistration {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_invocation_reads_pascal_case_fields() {
        let invocation: HubInvocation = serde_json::from_value(json!({
            "Hub": "demo",
            "Method": "notify",
            "Args": [42, "x"],
            "State": {"x": 1}
        }))
        .unwrap();
        assert_eq!(invocation.hub, "demo");
        assert_eq!(invocation.args, vec![json!(42), json!("x")]);
        assert_eq!(invocation.state.unwrap()["x"], json!(1));
    }

    #[test]
    fn missing_args_and_null_state_are_tolerated() {
        let invocation: HubInvocation =
            serde_json::from_value(json!({"Hub": "demo", "Method": "ping", "State": null})).unwrap();
        assert!(invocation.args.is_empty());
        assert!(invocation.state.is_none());
    }

    #[test]
    fn outbound_invocation_writes_hub_action_data_state() {
        let invocation = HubServerInvocation {
            hub: "chat".into(),
            action: "send".into(),
            data: vec![json!("hi")],
            state: HashMap::from([("room".to_string(), json!("lobby"))]),
        };
        assert_eq!(
            serde_json::to_value(&invocation).unwrap(),
            json!({"Hub": "chat", "Action": "send", "Data": ["hi"], "State": {"room": "lobby"}})
        );
    }
}
