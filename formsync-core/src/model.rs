//! Plain view-model types handed to the rest of the application.
//!
//! These are values, never handles: the live replicated structure stays
//! inside the engine and only snapshots built from it leave.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Generates `as_str` / `parse` for a string-backed enum.
macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $name {
            /// Name used inside the shared document.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }

            /// Parse a document value; `None` for names this build does not know.
            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($wire => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ───────────────────────────────────────────────────────────────────
// Fields
// ───────────────────────────────────────────────────────────────────

/// Field variants a form page can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "TEXT_INPUT_FIELD")]
    TextInput,
    #[serde(rename = "TEXT_AREA_FIELD")]
    TextArea,
    #[serde(rename = "EMAIL_FIELD")]
    Email,
    #[serde(rename = "NUMBER_FIELD")]
    Number,
    #[serde(rename = "SELECT_FIELD")]
    Select,
    #[serde(rename = "RADIO_FIELD")]
    Radio,
    #[serde(rename = "CHECKBOX_FIELD")]
    Checkbox,
    #[serde(rename = "DATE_FIELD")]
    Date,
    #[serde(rename = "RICH_TEXT_FIELD")]
    RichText,
}

wire_enum!(FieldType {
    TextInput => "TEXT_INPUT_FIELD",
    TextArea => "TEXT_AREA_FIELD",
    Email => "EMAIL_FIELD",
    Number => "NUMBER_FIELD",
    Select => "SELECT_FIELD",
    Radio => "RADIO_FIELD",
    Checkbox => "CHECKBOX_FIELD",
    Date => "DATE_FIELD",
    RichText => "RICH_TEXT_FIELD",
});

impl FieldType {
    pub const ALL: [FieldType; 9] = [
        FieldType::TextInput,
        FieldType::TextArea,
        FieldType::Email,
        FieldType::Number,
        FieldType::Select,
        FieldType::Radio,
        FieldType::Checkbox,
        FieldType::Date,
        FieldType::RichText,
    ];

    /// Whether respondents fill this field in. Rich text is display-only.
    pub fn is_fillable(&self) -> bool {
        !matches!(self, FieldType::RichText)
    }

    /// Choice variants carry an option list.
    pub fn has_options(&self) -> bool {
        matches!(self, FieldType::Select | FieldType::Radio | FieldType::Checkbox)
    }

    /// Text variants whose validation bounds are character counts.
    pub fn uses_length_bounds(&self) -> bool {
        matches!(self, FieldType::TextInput | FieldType::TextArea | FieldType::Email)
    }

    /// Label a freshly added field starts with.
    pub fn default_label(&self) -> &'static str {
        match self {
            FieldType::TextInput => "Text Input",
            FieldType::TextArea => "Text Area",
            FieldType::Email => "Email",
            FieldType::Number => "Number",
            FieldType::Select => "Select",
            FieldType::Radio => "Radio",
            FieldType::Checkbox => "Checkbox",
            FieldType::Date => "Date",
            FieldType::RichText => "",
        }
    }
}

/// A field's pre-filled answer.
///
/// Checkbox fields always hold `Choices`; every other fillable variant holds
/// `Text` or `Empty`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    #[default]
    Empty,
    Text(String),
    Choices(Vec<String>),
}

impl DefaultValue {
    pub fn is_empty(&self) -> bool {
        match self {
            DefaultValue::Empty => true,
            DefaultValue::Text(text) => text.is_empty(),
            DefaultValue::Choices(choices) => choices.is_empty(),
        }
    }
}

/// Validation rules of a fillable field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Validation {
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_selections: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_selections: Option<u32>,
}

/// Attributes shared by every fillable variant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputField {
    pub label: String,
    pub default_value: DefaultValue,
    pub prefix: Option<String>,
    pub hint: Option<String>,
    pub placeholder: Option<String>,
    /// Only populated for choice variants.
    pub options: Vec<String>,
    /// Value bounds of number fields.
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Bounds of date fields, ISO-8601 dates.
    pub min_date: Option<String>,
    pub max_date: Option<String>,
    pub validation: Validation,
}

/// Variant-specific payload of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldBody {
    Input(InputField),
    RichText { content: String },
}

/// One field of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(flatten)]
    pub body: FieldBody,
}

impl Field {
    /// A field of `field_type` carrying the defaults editors start from.
    pub fn new(id: impl Into<String>, field_type: FieldType) -> Self {
        let body = if field_type.is_fillable() {
            let options = if field_type.has_options() {
                vec!["Option 1".to_string(), "Option 2".to_string()]
            } else {
                Vec::new()
            };
            let default_value = if field_type == FieldType::Checkbox {
                DefaultValue::Choices(Vec::new())
            } else {
                DefaultValue::Empty
            };
            FieldBody::Input(InputField {
                label: field_type.default_label().to_string(),
                default_value,
                options,
                ..InputField::default()
            })
        } else {
            FieldBody::RichText {
                content: String::new(),
            }
        };

        Self {
            id: id.into(),
            field_type,
            body,
        }
    }

    pub fn input(&self) -> Option<&InputField> {
        match &self.body {
            FieldBody::Input(input) => Some(input),
            FieldBody::RichText { .. } => None,
        }
    }

    pub fn input_mut(&mut self) -> Option<&mut InputField> {
        match &mut self.body {
            FieldBody::Input(input) => Some(input),
            FieldBody::RichText { .. } => None,
        }
    }

    /// Label of a fillable field; rich text has none.
    pub fn label(&self) -> Option<&str> {
        self.input().map(|input| input.label.as_str())
    }

    pub fn validation(&self) -> Option<&Validation> {
        self.input().map(|input| &input.validation)
    }

    /// Rich-text markup; `None` for fillable variants.
    pub fn content(&self) -> Option<&str> {
        match &self.body {
            FieldBody::RichText { content } => Some(content),
            FieldBody::Input(_) => None,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Pages
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub title: String,
    pub order: u32,
    pub fields: Vec<Field>,
}

impl Page {
    pub fn new(id: impl Into<String>, title: impl Into<String>, order: u32) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            order,
            fields: Vec::new(),
        }
    }

    pub fn field(&self, field_id: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.id == field_id)
    }

    pub fn field_ids(&self) -> Vec<&str> {
        self.fields.iter().map(|field| field.id.as_str()).collect()
    }
}

// ───────────────────────────────────────────────────────────────────
// Layout
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    Ocean,
    Forest,
    Sunset,
    Minimal,
}

wire_enum!(Theme {
    Light => "light",
    Dark => "dark",
    Ocean => "ocean",
    Forest => "forest",
    Sunset => "sunset",
    Minimal => "minimal",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Spacing {
    Compact,
    #[default]
    Normal,
    Relaxed,
}

wire_enum!(Spacing {
    Compact => "compact",
    Normal => "normal",
    Relaxed => "relaxed",
});

/// Arrangement of the form relative to its cover content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutCode {
    #[default]
    Classic,
    Split,
    Cover,
    Centered,
}

wire_enum!(LayoutCode {
    Classic => "classic",
    Split => "split",
    Cover => "cover",
    Centered => "centered",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageMode {
    #[default]
    Single,
    Multi,
}

wire_enum!(PageMode {
    Single => "single",
    Multi => "multi",
});

/// Visual layout of the whole form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Layout {
    pub theme: Theme,
    pub spacing: Spacing,
    pub layout_code: LayoutCode,
    /// Free-form HTML shown next to the form.
    pub content: String,
    pub text_color: Option<String>,
    pub custom_background_color: Option<String>,
    pub use_custom_background: bool,
    pub background_image_key: Option<String>,
    pub button_text: String,
    pub page_mode: PageMode,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            spacing: Spacing::default(),
            layout_code: LayoutCode::default(),
            content: String::new(),
            text_color: None,
            custom_background_color: None,
            use_custom_background: false,
            background_image_key: None,
            button_text: "Submit".to_string(),
            page_mode: PageMode::default(),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Snapshot
// ───────────────────────────────────────────────────────────────────

/// Read-only view model of one form schema.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSnapshot {
    pub pages: Vec<Page>,
    pub layout: Option<Layout>,
    pub is_shuffle_enabled: Option<bool>,
}

impl FormSnapshot {
    pub fn page(&self, page_id: &str) -> Option<&Page> {
        self.pages.iter().find(|page| page.id == page_id)
    }

    pub fn page_index(&self, page_id: &str) -> Option<usize> {
        self.pages.iter().position(|page| page.id == page_id)
    }

    pub fn field(&self, page_id: &str, field_id: &str) -> Option<&Field> {
        self.page(page_id).and_then(|page| page.field(field_id))
    }

    pub fn page_ids(&self) -> Vec<&str> {
        self.pages.iter().map(|page| page.id.as_str()).collect()
    }

    /// Serialize for hand-off to non-Rust layers.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
