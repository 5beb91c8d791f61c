//! Settings mappings and their typed projections
//!
//! A settings mapping is an open key/value bag shared by every feature that
//! attaches data to a definition. A [`SettingsRecord`] owns a known subset of
//! keys: projecting it lifts those keys out of the top level into a nested
//! section named after the record, leaving every other key where it was.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Ordered string-keyed JSON mapping attached to a definition
pub type SettingsMap = serde_json::Map<String, Value>;

/// A strongly typed settings record with a static manifest of its keys
///
/// `KEYS` must list the serialized name of every field; it replaces runtime
/// property discovery when stripping flat keys.
pub trait SettingsRecord: Serialize + DeserializeOwned + Default {
    /// Key the record is stored under once projected
    const SECTION: &'static str;

    /// Serialized names of every declared field
    const KEYS: &'static [&'static str];
}

/// Read a record from the flat keys layered over any existing nested section
///
/// Keys absent from both places take the record's defaults.
pub fn read_record<R: SettingsRecord>(settings: &SettingsMap) -> Result<R> {
    let mut view = nested_section::<R>(settings)?.cloned().unwrap_or_default();
    for key in R::KEYS {
        if let Some(value) = settings.get(*key) {
            view.insert((*key).to_string(), value.clone());
        }
    }
    Ok(serde_json::from_value(Value::Object(view))?)
}

/// Read a record from its nested section only
pub fn section<R: SettingsRecord>(settings: &SettingsMap) -> Result<R> {
    match nested_section::<R>(settings)? {
        Some(map) => Ok(serde_json::from_value(Value::Object(map.clone()))?),
        None => Ok(R::default()),
    }
}

/// Remove every declared key of `R` from the top level, present or not
pub fn strip_keys<R: SettingsRecord>(settings: &SettingsMap) -> SettingsMap {
    settings
        .iter()
        .filter(|(key, _)| !R::KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Merge the serialized record into the nested section
///
/// Keys inside the section that the record does not declare are kept.
pub fn attach<R: SettingsRecord>(settings: &SettingsMap, record: &R) -> Result<SettingsMap> {
    let serialized = match serde_json::to_value(record)? {
        Value::Object(map) => map,
        _ => {
            return Err(Error::Validation(format!(
                "settings record '{}' must serialize to an object",
                R::SECTION
            )))
        }
    };

    let mut out = settings.clone();
    let mut nested = nested_section::<R>(settings)?.cloned().unwrap_or_default();
    for (key, value) in serialized {
        nested.insert(key, value);
    }
    out.insert(R::SECTION.to_string(), Value::Object(nested));
    Ok(out)
}

/// Read, strip and re-attach in one pure step
///
/// Projecting an already projected mapping returns it unchanged.
pub fn project_into_section<R: SettingsRecord>(settings: &SettingsMap) -> Result<SettingsMap> {
    let record = read_record::<R>(settings)?;
    let stripped = strip_keys::<R>(settings);
    attach(&stripped, &record)
}

/// True when `R::KEYS` names exactly the fields `R` serializes
pub fn manifest_matches<R: SettingsRecord>() -> bool {
    let Ok(Value::Object(map)) = serde_json::to_value(R::default()) else {
        return false;
    };
    map.len() == R::KEYS.len() && R::KEYS.iter().all(|k| map.contains_key(*k))
}

fn nested_section<R: SettingsRecord>(settings: &SettingsMap) -> Result<Option<&SettingsMap>> {
    match settings.get(R::SECTION) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(Error::MalformedSection {
            section: R::SECTION.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default, rename_all = "PascalCase")]
    struct RecognizedSettings {
        foo: String,
        bar: i64,
    }

    impl SettingsRecord for RecognizedSettings {
        const SECTION: &'static str = "RecognizedSettings";
        const KEYS: &'static [&'static str] = &["Foo", "Bar"];
    }

    fn map(value: Value) -> SettingsMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_projection_keeps_unknown_keys() {
        let settings = map(json!({"Foo": "x", "Bar": 1, "Custom": "keep"}));
        let projected = project_into_section::<RecognizedSettings>(&settings).unwrap();

        assert_eq!(
            projected,
            map(json!({"Custom": "keep", "RecognizedSettings": {"Foo": "x", "Bar": 1}}))
        );
    }

    #[test]
    fn test_projection_is_idempotent() {
        let settings = map(json!({"Foo": "x", "Bar": 1, "Custom": "keep"}));
        let once = project_into_section::<RecognizedSettings>(&settings).unwrap();
        let twice = project_into_section::<RecognizedSettings>(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_absent_keys_take_defaults() {
        let settings = map(json!({"Foo": "only"}));
        let projected = project_into_section::<RecognizedSettings>(&settings).unwrap();
        assert_eq!(projected, map(json!({"RecognizedSettings": {"Foo": "only", "Bar": 0}})));
    }

    #[test]
    fn test_flat_keys_override_existing_section() {
        let settings = map(json!({
            "Bar": 7,
            "RecognizedSettings": {"Foo": "kept", "Bar": 1, "Extra": true}
        }));
        let projected = project_into_section::<RecognizedSettings>(&settings).unwrap();
        assert_eq!(
            projected,
            map(json!({"RecognizedSettings": {"Foo": "kept", "Bar": 7, "Extra": true}}))
        );
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let settings = map(json!({"Bar": "not a number"}));
        assert!(project_into_section::<RecognizedSettings>(&settings).is_err());

        let malformed = map(json!({"RecognizedSettings": 3}));
        assert!(matches!(
            project_into_section::<RecognizedSettings>(&malformed),
            Err(Error::MalformedSection { .. })
        ));
    }

    #[test]
    fn test_section_reads_nested_only() {
        let settings = map(json!({"Foo": "flat", "RecognizedSettings": {"Foo": "nested"}}));
        let record: RecognizedSettings = section(&settings).unwrap();
        assert_eq!(record.foo, "nested");
        assert_eq!(record.bar, 0);
    }

    #[test]
    fn test_manifest_matches() {
        assert!(manifest_matches::<RecognizedSettings>());
    }
}
