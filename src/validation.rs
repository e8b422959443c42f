//! User metadata schema and its validator.
//!
//! Every leaf is nullish (absent or `null`). The two sub-records are optional but must be
//! objects when present. Unknown keys are dropped. Validation reports every offending field
//! at once, keyed by dotted path, rather than stopping at the first.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emails: Option<Vec<String>>,
    /// Free-form; any JSON value is accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_data: Option<PersonalData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Preferences>,
}

/// Flattened validation failure: errors about the payload as a whole, and errors per field path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationErrors {
    #[serde(default)]
    pub form_errors: Vec<String>,
    #[serde(default)]
    pub field_errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool { self.form_errors.is_empty() && self.field_errors.is_empty() }

    fn field(&mut self, path: &str, msg: String) {
        self.field_errors.entry(path.to_string()).or_default().push(msg);
    }
}

impl Display for ValidationErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut parts: Vec<String> = self.form_errors.clone();
        for (path, msgs) in &self.field_errors {
            parts.push(format!("{}: {}", path, msgs.join(", ")));
        }
        if parts.is_empty() {
            write!(f, "invalid input")
        } else {
            write!(f, "invalid input: {}", parts.join("; "))
        }
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn expected(what: &str, got: &Value) -> String {
    format!("Expected {}, received {}", what, kind_of(got))
}

fn check_nullish_string(obj: &serde_json::Map<String, Value>, key: &str, path: &str, errs: &mut ValidationErrors) {
    match obj.get(key) {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(other) => errs.field(&format!("{}.{}", path, key), expected("string", other)),
    }
}

fn check_nullish_bool(obj: &serde_json::Map<String, Value>, key: &str, path: &str, errs: &mut ValidationErrors) {
    match obj.get(key) {
        None | Some(Value::Null) | Some(Value::Bool(_)) => {}
        Some(other) => errs.field(&format!("{}.{}", path, key), expected("boolean", other)),
    }
}

fn check_personal_data(v: &Value, errs: &mut ValidationErrors) {
    let Value::Object(obj) = v else {
        errs.field("personalData", expected("object", v));
        return;
    };
    check_nullish_string(obj, "name", "personalData", errs);
    match obj.get("emails") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                if !item.is_string() {
                    errs.field(&format!("personalData.emails.{}", i), expected("string", item));
                }
            }
        }
        Some(other) => errs.field("personalData.emails", expected("array", other)),
    }
    check_nullish_string(obj, "phoneNumber", "personalData", errs);
}

fn check_preferences(v: &Value, errs: &mut ValidationErrors) {
    let Value::Object(obj) = v else {
        errs.field("preferences", expected("object", v));
        return;
    };
    check_nullish_string(obj, "theme", "preferences", errs);
    check_nullish_bool(obj, "notifications", "preferences", errs);
    check_nullish_bool(obj, "consent", "preferences", errs);
}

/// Validate an untyped payload and produce the typed, unknown-key-free metadata.
pub fn validate_metadata(input: &Value) -> Result<UserMetadata, ValidationErrors> {
    let mut errs = ValidationErrors::default();
    let Value::Object(root) = input else {
        errs.form_errors.push(expected("object", input));
        return Err(errs);
    };
    if let Some(pd) = root.get("personalData") {
        check_personal_data(pd, &mut errs);
    }
    if let Some(prefs) = root.get("preferences") {
        check_preferences(prefs, &mut errs);
    }
    if !errs.is_empty() {
        return Err(errs);
    }
    serde_json::from_value(input.clone()).map_err(|e| {
        let mut errs = ValidationErrors::default();
        errs.form_errors.push(e.to_string());
        errs
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_full_payload() {
        let input = json!({
            "personalData": {
                "name": "Ada",
                "emails": ["ada@example.com", "ada@work.example"],
                "address": {"city": "London", "lines": ["12 Crescent"]},
                "phoneNumber": "+44 20 7946 0000"
            },
            "preferences": {"theme": "dark", "notifications": true, "consent": false}
        });
        let md = validate_metadata(&input).unwrap();
        assert_eq!(md.personal_data.as_ref().unwrap().name.as_deref(), Some("Ada"));
        assert_eq!(md.preferences.as_ref().unwrap().notifications, Some(true));
        assert_eq!(serde_json::to_value(&md).unwrap(), input);
    }

    #[test]
    fn empty_and_nullish_leaves_are_fine() {
        assert_eq!(validate_metadata(&json!({})).unwrap(), UserMetadata::default());
        let md = validate_metadata(&json!({"personalData": {"name": null, "emails": null}})).unwrap();
        assert_eq!(md.personal_data, Some(PersonalData::default()));
    }

    #[test]
    fn non_string_phone_number_is_rejected() {
        let errs = validate_metadata(&json!({"personalData": {"phoneNumber": 5551234}})).unwrap_err();
        assert_eq!(
            errs.field_errors.get("personalData.phoneNumber"),
            Some(&vec!["Expected string, received number".to_string()])
        );
        assert!(errs.form_errors.is_empty());
    }

    #[test]
    fn reports_every_offending_field() {
        let errs = validate_metadata(&json!({
            "personalData": {"name": 1, "emails": ["ok", false]},
            "preferences": {"theme": "light", "consent": "yes"}
        }))
        .unwrap_err();
        let keys: Vec<&str> = errs.field_errors.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["personalData.emails.1", "personalData.name", "preferences.consent"]);
    }

    #[test]
    fn sub_records_must_be_objects_when_present() {
        let errs = validate_metadata(&json!({"personalData": null, "preferences": []})).unwrap_err();
        assert_eq!(errs.field_errors["personalData"], vec!["Expected object, received null".to_string()]);
        assert_eq!(errs.field_errors["preferences"], vec!["Expected object, received array".to_string()]);
    }

    #[test]
    fn root_must_be_object() {
        let errs = validate_metadata(&json!("hello")).unwrap_err();
        assert_eq!(errs.form_errors, vec!["Expected object, received string".to_string()]);
        assert_eq!(errs.to_string(), "invalid input: Expected object, received string");
    }

    #[test]
    fn unknown_keys_are_dropped() {
        let md = validate_metadata(&json!({"preferences": {"theme": "dark", "font": "serif"}, "admin": true})).unwrap();
        assert_eq!(serde_json::to_value(&md).unwrap(), json!({"preferences": {"theme": "dark"}}));
    }
}
