//! Content type, part and field definitions
//!
//! Definitions are immutable snapshots. Changes go through the builders,
//! which consume a snapshot and hand back a new one.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::settings::{self, SettingsMap, SettingsRecord};

/// Settings owned by a content type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ContentTypeSettings {
    pub creatable: bool,
    pub listable: bool,
    pub draftable: bool,
    pub versionable: bool,
    pub securable: bool,
    pub stereotype: Option<String>,
}

impl SettingsRecord for ContentTypeSettings {
    const SECTION: &'static str = "ContentTypeSettings";
    const KEYS: &'static [&'static str] = &[
        "Creatable",
        "Listable",
        "Draftable",
        "Versionable",
        "Securable",
        "Stereotype",
    ];
}

/// Settings of a part as attached to one content type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ContentTypePartSettings {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub position: Option<String>,
    pub display_mode: Option<String>,
    pub editor: Option<String>,
}

impl SettingsRecord for ContentTypePartSettings {
    const SECTION: &'static str = "ContentTypePartSettings";
    const KEYS: &'static [&'static str] = &["DisplayName", "Description", "Position", "DisplayMode", "Editor"];
}

/// Settings owned by a reusable part definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ContentPartSettings {
    pub attachable: bool,
    pub reusable: bool,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub default_position: Option<String>,
}

impl SettingsRecord for ContentPartSettings {
    const SECTION: &'static str = "ContentPartSettings";
    const KEYS: &'static [&'static str] = &["Attachable", "Reusable", "DisplayName", "Description", "DefaultPosition"];
}

/// Settings of a field inside a part definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ContentPartFieldSettings {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub editor: Option<String>,
    pub display_mode: Option<String>,
    pub position: Option<String>,
}

impl SettingsRecord for ContentPartFieldSettings {
    const SECTION: &'static str = "ContentPartFieldSettings";
    const KEYS: &'static [&'static str] = &["DisplayName", "Description", "Editor", "DisplayMode", "Position"];
}

/// A content type and the parts attached to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContentTypeDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub settings: SettingsMap,
    #[serde(default)]
    pub parts: Vec<ContentTypePartDefinition>,
}

impl ContentTypeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            settings: SettingsMap::new(),
            parts: Vec::new(),
        }
    }

    pub fn part(&self, name: &str) -> Option<&ContentTypePartDefinition> {
        self.parts.iter().find(|p| p.name == name)
    }

    /// Typed settings from the nested section
    pub fn settings_record<R: SettingsRecord>(&self) -> Result<R> {
        settings::section(&self.settings)
    }
}

/// A part as attached to a content type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContentTypePartDefinition {
    /// Name of the attachment (a type may attach the same part twice)
    pub name: String,
    /// Name of the part definition
    pub part_name: String,
    #[serde(default)]
    pub settings: SettingsMap,
}

impl ContentTypePartDefinition {
    pub fn new(name: impl Into<String>, part_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            part_name: part_name.into(),
            settings: SettingsMap::new(),
        }
    }
}

/// A reusable part and its fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContentPartDefinition {
    pub name: String,
    #[serde(default)]
    pub settings: SettingsMap,
    #[serde(default)]
    pub fields: Vec<ContentPartFieldDefinition>,
}

impl ContentPartDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: SettingsMap::new(),
            fields: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&ContentPartFieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn settings_record<R: SettingsRecord>(&self) -> Result<R> {
        settings::section(&self.settings)
    }
}

/// A field inside a part definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContentPartFieldDefinition {
    pub name: String,
    pub field_name: String,
    #[serde(default)]
    pub settings: SettingsMap,
}

impl ContentPartFieldDefinition {
    pub fn new(name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_name: field_name.into(),
            settings: SettingsMap::new(),
        }
    }
}

/// Builder producing a new [`ContentTypeDefinition`] snapshot
#[derive(Debug, Clone)]
pub struct ContentTypeDefinitionBuilder {
    current: ContentTypeDefinition,
}

impl ContentTypeDefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            current: ContentTypeDefinition::new(name),
        }
    }

    pub fn from_definition(definition: ContentTypeDefinition) -> Self {
        Self { current: definition }
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.current.display_name = display_name.into();
        self
    }

    /// Replace the whole settings mapping
    pub fn with_settings_map(mut self, settings: SettingsMap) -> Self {
        self.current.settings = settings;
        self
    }

    /// Serialize `record` into its nested section
    pub fn with_settings<R: SettingsRecord>(mut self, record: &R) -> Result<Self> {
        self.current.settings = settings::attach(&self.current.settings, record)?;
        Ok(self)
    }

    /// Alter an attached part, attaching it first when absent
    pub fn with_part<F>(mut self, name: &str, part_name: &str, alter: F) -> Result<Self>
    where
        F: FnOnce(ContentTypePartBuilder) -> Result<ContentTypePartBuilder>,
    {
        let position = self.current.parts.iter().position(|p| p.name == name);
        let existing = match position {
            Some(idx) => self.current.parts[idx].clone(),
            None => ContentTypePartDefinition::new(name, part_name),
        };
        let altered = alter(ContentTypePartBuilder { current: existing })?.build();
        match position {
            Some(idx) => self.current.parts[idx] = altered,
            None => self.current.parts.push(altered),
        }
        Ok(self)
    }

    pub fn remove_part(mut self, name: &str) -> Self {
        self.current.parts.retain(|p| p.name != name);
        self
    }

    pub fn build(self) -> ContentTypeDefinition {
        self.current
    }
}

/// Builder for one part attachment
#[derive(Debug, Clone)]
pub struct ContentTypePartBuilder {
    current: ContentTypePartDefinition,
}

impl ContentTypePartBuilder {
    pub fn from_definition(definition: ContentTypePartDefinition) -> Self {
        Self { current: definition }
    }

    pub fn with_settings_map(mut self, settings: SettingsMap) -> Self {
        self.current.settings = settings;
        self
    }

    pub fn with_settings<R: SettingsRecord>(mut self, record: &R) -> Result<Self> {
        self.current.settings = settings::attach(&self.current.settings, record)?;
        Ok(self)
    }

    pub fn build(self) -> ContentTypePartDefinition {
        self.current
    }
}

/// Builder producing a new [`ContentPartDefinition`] snapshot
#[derive(Debug, Clone)]
pub struct ContentPartDefinitionBuilder {
    current: ContentPartDefinition,
}

impl ContentPartDefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            current: ContentPartDefinition::new(name),
        }
    }

    pub fn from_definition(definition: ContentPartDefinition) -> Self {
        Self { current: definition }
    }

    pub fn with_settings_map(mut self, settings: SettingsMap) -> Self {
        self.current.settings = settings;
        self
    }

    pub fn with_settings<R: SettingsRecord>(mut self, record: &R) -> Result<Self> {
        self.current.settings = settings::attach(&self.current.settings, record)?;
        Ok(self)
    }

    /// Alter a field, adding it first when absent
    pub fn with_field<F>(mut self, name: &str, field_name: &str, alter: F) -> Result<Self>
    where
        F: FnOnce(ContentPartFieldBuilder) -> Result<ContentPartFieldBuilder>,
    {
        let position = self.current.fields.iter().position(|f| f.name == name);
        let existing = match position {
            Some(idx) => self.current.fields[idx].clone(),
            None => ContentPartFieldDefinition::new(name, field_name),
        };
        let altered = alter(ContentPartFieldBuilder { current: existing })?.build();
        match position {
            Some(idx) => self.current.fields[idx] = altered,
            None => self.current.fields.push(altered),
        }
        Ok(self)
    }

    pub fn remove_field(mut self, name: &str) -> Self {
        self.current.fields.retain(|f| f.name != name);
        self
    }

    pub fn build(self) -> ContentPartDefinition {
        self.current
    }
}

/// Builder for one field definition
#[derive(Debug, Clone)]
pub struct ContentPartFieldBuilder {
    current: ContentPartFieldDefinition,
}

impl ContentPartFieldBuilder {
    pub fn from_definition(definition: ContentPartFieldDefinition) -> Self {
        Self { current: definition }
    }

    pub fn with_settings_map(mut self, settings: SettingsMap) -> Self {
        self.current.settings = settings;
        self
    }

    pub fn with_settings<R: SettingsRecord>(mut self, record: &R) -> Result<Self> {
        self.current.settings = settings::attach(&self.current.settings, record)?;
        Ok(self)
    }

    pub fn build(self) -> ContentPartFieldDefinition {
        self.current
    }
}
