//! Decoding of raw document nodes into the canonical model.
//!
//! Documents written by older editors differ in two ways: bounds may sit
//! as flat `min`/`max` keys on the field instead of in the `validation`
//! node, and checkbox defaults may be a plain list or a comma-separated
//! string. Both are resolved here and nowhere else.

use log::{debug, warn};

use crate::document::keys;
use crate::model::{
    DefaultValue, Field, FieldBody, FieldType, FormSnapshot, InputField, Layout, LayoutCode, Page,
    PageMode, Spacing, Theme, Validation,
};
use crate::raw::{RawNode, RawValue};

pub fn normalize_snapshot(root: &RawNode) -> FormSnapshot {
    let pages = match root.get(keys::PAGES) {
        Some(RawValue::Nodes(nodes)) => nodes
            .iter()
            .enumerate()
            .filter_map(|(index, node)| normalize_page(node, index))
            .collect(),
        _ => Vec::new(),
    };

    FormSnapshot {
        pages,
        layout: root.get(keys::LAYOUT).and_then(RawValue::as_node).map(normalize_layout),
        is_shuffle_enabled: root.get(keys::IS_SHUFFLE_ENABLED).and_then(RawValue::as_bool),
    }
}

/// `index` stands in for a missing `order`.
pub fn normalize_page(node: &RawNode, index: usize) -> Option<Page> {
    let Some(id) = non_empty(node, keys::ID) else {
        warn!("Skipping page at index {} without an id", index);
        return None;
    };

    let order = node
        .get(keys::ORDER)
        .and_then(RawValue::as_f64)
        .and_then(to_count)
        .unwrap_or(index as u32);

    let fields = match node.get(keys::FIELDS) {
        Some(RawValue::Nodes(nodes)) => nodes.iter().filter_map(normalize_field).collect(),
        _ => Vec::new(),
    };

    Some(Page {
        id,
        title: text(node, keys::TITLE).unwrap_or_default(),
        order,
        fields,
    })
}

pub fn normalize_field(node: &RawNode) -> Option<Field> {
    let Some(id) = non_empty(node, keys::ID) else {
        warn!("Skipping field without an id");
        return None;
    };
    let type_name = text(node, keys::TYPE).unwrap_or_default();
    let Some(field_type) = FieldType::parse(&type_name) else {
        warn!("Skipping field {} with unknown type '{}'", id, type_name);
        return None;
    };

    if !field_type.is_fillable() {
        return Some(Field {
            id,
            field_type,
            body: FieldBody::RichText {
                content: text(node, keys::CONTENT).unwrap_or_default(),
            },
        });
    }

    let flat_min = node.get(keys::MIN).and_then(RawValue::as_f64);
    let flat_max = node.get(keys::MAX).and_then(RawValue::as_f64);

    let mut validation = node
        .get(keys::VALIDATION)
        .and_then(RawValue::as_node)
        .map(normalize_validation)
        .unwrap_or_default();

    // The validation node wins; flat keys only fill gaps.
    let (mut min, mut max) = (None, None);
    match field_type {
        FieldType::Number => {
            min = flat_min;
            max = flat_max;
        }
        FieldType::Checkbox => {
            validation.min_selections = validation.min_selections.or(flat_min.and_then(to_count));
            validation.max_selections = validation.max_selections.or(flat_max.and_then(to_count));
        }
        t if t.uses_length_bounds() => {
            validation.min_length = validation.min_length.or(flat_min.and_then(to_count));
            validation.max_length = validation.max_length.or(flat_max.and_then(to_count));
        }
        _ => {}
    }

    let default_value = match node.get(keys::DEFAULT_VALUE) {
        _ if field_type == FieldType::Checkbox => {
            DefaultValue::Choices(choices(node.get(keys::DEFAULT_VALUE)))
        }
        Some(value) => scalar_default(value),
        None => DefaultValue::Empty,
    };

    let options = match node.get(keys::OPTIONS) {
        Some(RawValue::List(items)) => items.iter().filter_map(display_text).collect(),
        _ => Vec::new(),
    };

    Some(Field {
        id,
        field_type,
        body: FieldBody::Input(InputField {
            label: text(node, keys::LABEL).unwrap_or_default(),
            default_value,
            prefix: non_empty(node, keys::PREFIX),
            hint: non_empty(node, keys::HINT),
            placeholder: non_empty(node, keys::PLACEHOLDER),
            options,
            min,
            max,
            min_date: non_empty(node, keys::MIN_DATE),
            max_date: non_empty(node, keys::MAX_DATE),
            validation,
        }),
    })
}

pub fn normalize_validation(node: &RawNode) -> Validation {
    let count = |key: &str| node.get(key).and_then(RawValue::as_f64).and_then(to_count);
    Validation {
        required: node.get(keys::REQUIRED).and_then(RawValue::as_bool).unwrap_or(false),
        min_length: count(keys::MIN_LENGTH),
        max_length: count(keys::MAX_LENGTH),
        min_selections: count(keys::MIN_SELECTIONS),
        max_selections: count(keys::MAX_SELECTIONS),
    }
}

pub fn normalize_layout(node: &RawNode) -> Layout {
    let defaults = Layout::default();
    Layout {
        theme: enum_value(node, keys::THEME, Theme::parse),
        spacing: enum_value(node, keys::SPACING, Spacing::parse),
        layout_code: enum_value(node, keys::LAYOUT_CODE, LayoutCode::parse),
        content: text(node, keys::CONTENT).unwrap_or_default(),
        text_color: non_empty(node, keys::TEXT_COLOR),
        custom_background_color: non_empty(node, keys::CUSTOM_BACKGROUND_COLOR),
        use_custom_background: node
            .get(keys::USE_CUSTOM_BACKGROUND)
            .and_then(RawValue::as_bool)
            .unwrap_or(false),
        background_image_key: non_empty(node, keys::BACKGROUND_IMAGE_KEY),
        button_text: text(node, keys::BUTTON_TEXT).unwrap_or(defaults.button_text),
        page_mode: enum_value(node, keys::PAGE_MODE, PageMode::parse),
    }
}

fn enum_value<E: Default>(node: &RawNode, key: &str, parse: fn(&str) -> Option<E>) -> E {
    match text(node, key) {
        Some(name) => parse(&name).unwrap_or_else(|| {
            debug!("Unknown {} '{}', using default", key, name);
            E::default()
        }),
        None => E::default(),
    }
}

fn text(node: &RawNode, key: &str) -> Option<String> {
    node.get(key).and_then(RawValue::as_str).map(str::to_string)
}

fn non_empty(node: &RawNode, key: &str) -> Option<String> {
    text(node, key).filter(|value| !value.is_empty())
}

fn to_count(value: f64) -> Option<u32> {
    (value.is_finite() && value >= 0.0 && value <= f64::from(u32::MAX)).then(|| value.round() as u32)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn display_text(value: &RawValue) -> Option<String> {
    match value {
        RawValue::Text(text) => Some(text.clone()),
        RawValue::Number(number) => Some(format_number(*number)),
        RawValue::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn choices(value: Option<&RawValue>) -> Vec<String> {
    match value {
        Some(RawValue::List(items)) => items
            .iter()
            .filter_map(display_text)
            .filter(|choice| !choice.trim().is_empty())
            .collect(),
        Some(RawValue::Text(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|choice| !choice.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn scalar_default(value: &RawValue) -> DefaultValue {
    let text = match value {
        RawValue::List(items) => items.iter().filter_map(display_text).collect::<Vec<_>>().join(", "),
        other => display_text(other).unwrap_or_default(),
    };
    if text.is_empty() {
        DefaultValue::Empty
    } else {
        DefaultValue::Text(text)
    }
}
