//! Settings projection transforms for content definitions
//!
//! Both transforms walk the stored document tree depth first and lift the
//! flat settings of each level into that level's typed section. Keys the
//! records do not declare stay where they are, and so does any document
//! member the definition model does not know about.

use cairn_core::settings::{project_into_section, SettingsMap, SettingsRecord};
use cairn_core::{
    doc_types, ContentPartFieldSettings, ContentPartSettings, ContentTypePartSettings, ContentTypeSettings, Error,
};
use serde_json::Value;

use crate::rewriter::DocumentTransform;

const SETTINGS: &str = "Settings";

/// Project the `Settings` member of one definition level
fn project_level<R: SettingsRecord>(node: &Value) -> cairn_core::Result<Value> {
    let Value::Object(map) = node else {
        return Err(Error::Validation(format!("expected a definition object, got {}", node)));
    };

    let settings = match map.get(SETTINGS) {
        Some(Value::Object(settings)) => settings.clone(),
        Some(Value::Null) | None => SettingsMap::new(),
        Some(_) => {
            return Err(Error::MalformedSection {
                section: SETTINGS.to_string(),
            })
        }
    };

    let mut out = map.clone();
    out.insert(SETTINGS.to_string(), Value::Object(project_into_section::<R>(&settings)?));
    Ok(Value::Object(out))
}

/// Project every element of the array member `children`
fn project_children<R: SettingsRecord>(node: Value, children: &str) -> cairn_core::Result<Value> {
    let Value::Object(mut map) = node else {
        return Ok(node);
    };

    match map.get(children) {
        Some(Value::Array(items)) => {
            let projected = items
                .iter()
                .map(project_level::<R>)
                .collect::<cairn_core::Result<Vec<_>>>()?;
            map.insert(children.to_string(), Value::Array(projected));
        }
        Some(Value::Null) | None => {}
        Some(_) => {
            return Err(Error::Validation(format!("'{}' must be an array", children)));
        }
    }
    Ok(Value::Object(map))
}

/// Lifts type settings and type-part settings into their sections
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeSettingsTransform;

impl DocumentTransform for TypeSettingsTransform {
    fn type_id(&self) -> &str {
        doc_types::CONTENT_TYPE_DEFINITION
    }

    fn transform(&self, content: &Value) -> cairn_core::Result<Value> {
        let projected = project_level::<ContentTypeSettings>(content)?;
        project_children::<ContentTypePartSettings>(projected, "Parts")
    }

    fn name(&self) -> &str {
        "TypeSettingsTransform"
    }
}

/// Lifts part settings and field settings into their sections
#[derive(Debug, Clone, Copy, Default)]
pub struct PartSettingsTransform;

impl DocumentTransform for PartSettingsTransform {
    fn type_id(&self) -> &str {
        doc_types::CONTENT_PART_DEFINITION
    }

    fn transform(&self, content: &Value) -> cairn_core::Result<Value> {
        let projected = project_level::<ContentPartSettings>(content)?;
        project_children::<ContentPartFieldSettings>(projected, "Fields")
    }

    fn name(&self) -> &str {
        "PartSettingsTransform"
    }
}
