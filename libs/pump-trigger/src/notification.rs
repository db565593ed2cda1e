use serde::{Deserialize, Serialize};

/// Alerting notification (webhook channel Cloud Monitoring).
///
/// Все поля опциональны: от уведомления нужен только
/// `incident.resource.labels.subscription_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notification {
    pub incident: Incident,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Incident {
    pub incident_id: String,
    pub resource_id: String,
    pub resource_name: String,
    pub resource: IncidentResource,
    pub started_at: Option<i64>,
    pub policy_name: String,
    pub condition_name: String,
    pub url: String,
    pub state: String,
    pub ended_at: Option<i64>,
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub labels: ResourceLabels,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLabels {
    pub subscription_id: String,
}

impl Notification {
    pub fn subscription_id(&self) -> &str {
        &self.incident.resource.labels.subscription_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_alerting_payload() {
        let raw = r#"{
            "incident": {
                "incident_id": "0.abc",
                "resource_id": "",
                "resource_name": "pump-sub",
                "resource": {"type": "pubsub_subscription", "labels": {"subscription_id": "pump-sub"}},
                "started_at": 1546300800,
                "policy_name": "backlog",
                "condition_name": "undelivered > 100",
                "url": "https://console.cloud.google.com/monitoring",
                "state": "open",
                "ended_at": null,
                "summary": "backlog is above threshold"
            },
            "version": "1.2"
        }"#;
        let notif: Notification = serde_json::from_str(raw).unwrap();
        assert_eq!(notif.subscription_id(), "pump-sub");
        assert_eq!(notif.incident.resource.kind, "pubsub_subscription");
        assert_eq!(notif.incident.started_at, Some(1546300800));
        assert_eq!(notif.incident.ended_at, None);
        assert_eq!(notif.version, "1.2");
    }

    #[test]
    fn missing_fields_default() {
        let notif: Notification = serde_json::from_str("{}").unwrap();
        assert_eq!(notif.subscription_id(), "");
    }

    #[test]
    fn wrong_shape_is_rejected() {
        assert!(serde_json::from_str::<Notification>(r#"{"incident": "x"}"#).is_err());
        assert!(serde_json::from_str::<Notification>("[]").is_err());
    }
}
