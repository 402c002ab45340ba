use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

use crate::api::RouterError;
use crate::envelope::{identifier_string, DeviceIdentity};

const EXPECTED_MESSAGE_TYPE: &str = "Event";

/// Legacy device-type rename, applied to the header and to each event's
/// `metadata.device_type`. Parsed from `legacy:canonical`, an empty string
/// disables it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceTypeOverride {
    rule: Option<(String, String)>,
}

impl DeviceTypeOverride {
    pub fn new(legacy: impl Into<String>, canonical: impl Into<String>) -> Self {
        Self {
            rule: Some((legacy.into().to_lowercase(), canonical.into())),
        }
    }

    pub fn disabled() -> Self {
        Self { rule: None }
    }

    /// Returns the replacement when `device_type` is the legacy value.
    pub fn rewrite(&self, device_type: &str) -> Option<&str> {
        match &self.rule {
            Some((legacy, canonical)) if legacy == device_type => Some(canonical.as_str()),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
#[error("device type override must look like legacy:canonical")]
pub struct ParseDeviceTypeOverrideError;

impl FromStr for DeviceTypeOverride {
    type Err = ParseDeviceTypeOverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::disabled());
        }

        match s.split_once(':') {
            Some((legacy, canonical)) if !legacy.trim().is_empty() && !canonical.trim().is_empty() => {
                Ok(Self::new(legacy.trim(), canonical.trim()))
            }
            _ => Err(ParseDeviceTypeOverrideError),
        }
    }
}

/// Checks device identity and message kind, in that order.
///
/// Lower-cases `device_type` in place, then applies the override.
pub fn validate_header(
    header: &mut Value,
    device_type_override: &DeviceTypeOverride,
) -> Result<DeviceIdentity, RouterError> {
    let device_id = header
        .get("device_id")
        .and_then(identifier_string)
        .ok_or(RouterError::MissingDeviceId)?;

    let mut device_type = header
        .get("device_type")
        .and_then(Value::as_str)
        .ok_or(RouterError::MissingDeviceType)?
        .to_lowercase();

    match header.get("message_type") {
        Some(Value::String(kind)) if kind == EXPECTED_MESSAGE_TYPE => {}
        Some(Value::String(kind)) => return Err(RouterError::UnsupportedMessageType(kind.clone())),
        Some(other) => return Err(RouterError::UnsupportedMessageType(other.to_string())),
        None => return Err(RouterError::UnsupportedMessageType("undefined".to_string())),
    }

    if let Some(canonical) = device_type_override.rewrite(&device_type) {
        device_type = canonical.to_string();
    }

    let asset_id = header.get("AssetId").filter(|id| !id.is_null()).cloned();

    if let Some(fields) = header.as_object_mut() {
        fields.insert("device_type".to_string(), Value::String(device_type.clone()));
    }

    Ok(DeviceIdentity {
        device_id,
        device_type,
        asset_id,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn shim() -> DeviceTypeOverride {
        DeviceTypeOverride::new("fm1", "vam")
    }

    #[test]
    fn accepts_and_normalizes_device_type() {
        let mut header = json!({"device_id": "d1", "device_type": "VAM", "message_type": "Event", "AssetId": 12});
        let identity = validate_header(&mut header, &shim()).expect("valid header");

        assert_eq!(
            identity,
            DeviceIdentity {
                device_id: "d1".to_string(),
                device_type: "vam".to_string(),
                asset_id: Some(json!(12)),
            }
        );
        assert_eq!(header["device_type"], json!("vam"));
    }

    #[test]
    fn applies_device_type_override() {
        let mut header = json!({"device_id": 9, "device_type": "FM1", "message_type": "Event"});
        let identity = validate_header(&mut header, &shim()).expect("valid header");
        assert_eq!(identity.device_id, "9");
        assert_eq!(identity.device_type, "vam");
        assert_eq!(header["device_type"], json!("vam"));

        let mut header = json!({"device_id": 9, "device_type": "FM1", "message_type": "Event"});
        let identity =
            validate_header(&mut header, &DeviceTypeOverride::disabled()).expect("valid header");
        assert_eq!(identity.device_type, "fm1");
    }

    #[test]
    fn missing_device_id() {
        for mut header in [
            json!({"device_id": null, "device_type": "vam", "message_type": "Event"}),
            json!({"device_type": "vam", "message_type": "Event"}),
            json!("not an object"),
        ] {
            assert!(matches!(
                validate_header(&mut header, &shim()),
                Err(RouterError::MissingDeviceId)
            ));
        }
    }

    #[test]
    fn missing_or_non_string_device_type() {
        for mut header in [
            json!({"device_id": "d1", "message_type": "Event"}),
            json!({"device_id": "d1", "device_type": 3, "message_type": "Event"}),
        ] {
            assert!(matches!(
                validate_header(&mut header, &shim()),
                Err(RouterError::MissingDeviceType)
            ));
        }
    }

    #[test]
    fn checks_run_in_order() {
        let mut header = json!({"device_id": null, "device_type": null, "message_type": "Command"});
        assert!(matches!(
            validate_header(&mut header, &shim()),
            Err(RouterError::MissingDeviceId)
        ));
    }

    #[test]
    fn rejects_other_message_types() {
        let mut header = json!({"device_id": "d1", "device_type": "vam", "message_type": "Command"});
        match validate_header(&mut header, &shim()) {
            Err(RouterError::UnsupportedMessageType(kind)) => assert_eq!(kind, "Command"),
            other => panic!("unexpected result {other:?}"),
        }

        let mut header = json!({"device_id": "d1", "device_type": "vam", "message_type": "event"});
        assert!(matches!(
            validate_header(&mut header, &shim()),
            Err(RouterError::UnsupportedMessageType(_))
        ));
    }

    #[test]
    fn parses_override_rule() {
        assert_eq!("fm1:vam".parse::<DeviceTypeOverride>().unwrap(), shim());
        assert_eq!(" FM1 : vam ".parse::<DeviceTypeOverride>().unwrap(), shim());
        assert_eq!(
            "".parse::<DeviceTypeOverride>().unwrap(),
            DeviceTypeOverride::disabled()
        );
        assert!("fm1".parse::<DeviceTypeOverride>().is_err());
        assert!(":vam".parse::<DeviceTypeOverride>().is_err());
    }

    #[test]
    fn rewrite_only_matches_legacy_value() {
        assert_eq!(shim().rewrite("fm1"), Some("vam"));
        assert_eq!(shim().rewrite("vam"), None);
        assert_eq!(DeviceTypeOverride::disabled().rewrite("fm1"), None);
    }
}
