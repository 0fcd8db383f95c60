//! Partial updates editors send for fields and the layout.

use crate::document::keys;
use crate::model::{DefaultValue, LayoutCode, PageMode, Spacing, Theme};
use crate::raw::{self, Patch, RawValue};

/// Field attributes to change. `None` leaves an attribute alone; for
/// optional attributes `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldUpdate {
    pub label: Option<String>,
    pub default_value: Option<DefaultValue>,
    pub prefix: Option<Option<String>>,
    pub hint: Option<Option<String>>,
    pub placeholder: Option<Option<String>>,
    pub options: Option<Vec<String>>,
    pub min: Option<Option<f64>>,
    pub max: Option<Option<f64>>,
    pub min_date: Option<Option<String>>,
    pub max_date: Option<Option<String>>,
    pub content: Option<String>,
    pub validation: Option<ValidationUpdate>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationUpdate {
    pub required: Option<bool>,
    pub min_length: Option<Option<u32>>,
    pub max_length: Option<Option<u32>>,
    pub min_selections: Option<Option<u32>>,
    pub max_selections: Option<Option<u32>>,
}

fn optional_text(value: &Option<String>) -> Option<RawValue> {
    value.as_ref().map(|text| RawValue::text(text.clone()))
}

fn without_blanks(items: &[String]) -> Vec<String> {
    items
        .iter()
        .filter(|item| !item.trim().is_empty())
        .cloned()
        .collect()
}

impl FieldUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn hint(mut self, hint: Option<String>) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn placeholder(mut self, placeholder: Option<String>) -> Self {
        self.placeholder = Some(placeholder);
        self
    }

    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.validation.get_or_insert_with(ValidationUpdate::default).required = Some(required);
        self
    }

    pub fn validation(mut self, validation: ValidationUpdate) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Writes for the field node itself. Blank option and default entries
    /// are dropped before they reach the document.
    pub fn field_patch(&self) -> Patch {
        let mut patch = Patch::new();
        let mut set = |key: &str, value: Option<RawValue>| patch.push((key.to_string(), value));

        if let Some(label) = &self.label {
            set(keys::LABEL, Some(RawValue::text(label.clone())));
        }
        if let Some(value) = &self.default_value {
            let value = match value {
                DefaultValue::Choices(choices) => DefaultValue::Choices(without_blanks(choices)),
                other => other.clone(),
            };
            set(keys::DEFAULT_VALUE, raw::default_value_to_raw(&value));
        }
        let texts = [
            (keys::PREFIX, &self.prefix),
            (keys::HINT, &self.hint),
            (keys::PLACEHOLDER, &self.placeholder),
            (keys::MIN_DATE, &self.min_date),
            (keys::MAX_DATE, &self.max_date),
        ];
        for (key, value) in texts {
            if let Some(value) = value {
                set(key, optional_text(value));
            }
        }
        if let Some(options) = &self.options {
            set(keys::OPTIONS, Some(RawValue::strings(without_blanks(options))));
        }
        for (key, value) in [(keys::MIN, self.min), (keys::MAX, self.max)] {
            if let Some(value) = value {
                set(key, value.map(RawValue::Number));
            }
        }
        if let Some(content) = &self.content {
            set(keys::CONTENT, Some(RawValue::text(content.clone())));
        }
        patch
    }

    /// Writes for the nested validation node.
    pub fn validation_patch(&self) -> Patch {
        self.validation
            .as_ref()
            .map(ValidationUpdate::patch)
            .unwrap_or_default()
    }
}

impl ValidationUpdate {
    pub fn patch(&self) -> Patch {
        let mut patch = Patch::new();
        if let Some(required) = self.required {
            patch.push((keys::REQUIRED.to_string(), Some(RawValue::Bool(required))));
        }
        let bounds = [
            (keys::MIN_LENGTH, self.min_length),
            (keys::MAX_LENGTH, self.max_length),
            (keys::MIN_SELECTIONS, self.min_selections),
            (keys::MAX_SELECTIONS, self.max_selections),
        ];
        for (key, bound) in bounds {
            if let Some(bound) = bound {
                patch.push((key.to_string(), bound.map(|b| RawValue::Number(f64::from(b)))));
            }
        }
        patch
    }
}

/// Layout attributes to change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutUpdate {
    pub theme: Option<Theme>,
    pub spacing: Option<Spacing>,
    pub layout_code: Option<LayoutCode>,
    pub content: Option<String>,
    pub text_color: Option<Option<String>>,
    pub custom_background_color: Option<Option<String>>,
    pub use_custom_background: Option<bool>,
    pub background_image_key: Option<Option<String>>,
    pub button_text: Option<String>,
    pub page_mode: Option<PageMode>,
}

impl LayoutUpdate {
    pub fn patch(&self) -> Patch {
        let mut patch = Patch::new();
        let enums = [
            (keys::THEME, self.theme.map(|v| v.as_str())),
            (keys::SPACING, self.spacing.map(|v| v.as_str())),
            (keys::LAYOUT_CODE, self.layout_code.map(|v| v.as_str())),
            (keys::PAGE_MODE, self.page_mode.map(|v| v.as_str())),
        ];
        for (key, value) in enums {
            if let Some(value) = value {
                patch.push((key.to_string(), Some(RawValue::text(value))));
            }
        }
        if let Some(content) = &self.content {
            patch.push((keys::CONTENT.to_string(), Some(RawValue::text(content.clone()))));
        }
        if let Some(text) = &self.button_text {
            patch.push((keys::BUTTON_TEXT.to_string(), Some(RawValue::text(text.clone()))));
        }
        if let Some(flag) = self.use_custom_background {
            patch.push((keys::USE_CUSTOM_BACKGROUND.to_string(), Some(RawValue::Bool(flag))));
        }
        let texts = [
            (keys::TEXT_COLOR, &self.text_color),
            (keys::CUSTOM_BACKGROUND_COLOR, &self.custom_background_color),
            (keys::BACKGROUND_IMAGE_KEY, &self.background_image_key),
        ];
        for (key, value) in texts {
            if let Some(value) = value {
                patch.push((key.to_string(), optional_text(value)));
            }
        }
        patch
    }
}
