//! Untyped mirror of the shared document.
//!
//! Reading goes `yrs` → [`RawValue`] → (normalize) → model. Writing goes
//! model → [`RawValue`] → `yrs`. Keeping this layer untyped lets legacy
//! encodings survive until the single normalization step.

use std::collections::BTreeMap;
use std::sync::Arc;

use yrs::{Any, Array, ArrayPrelim, ArrayRef, Map, MapPrelim, MapRef, Out, ReadTxn, TransactionMut};

use crate::document::keys;
use crate::model::{DefaultValue, Field, FieldBody, Page, Validation};

/// A node's entries, sorted by key so every walk is deterministic.
pub type RawNode = BTreeMap<String, RawValue>;

/// Key/value writes applied to one node. `None` removes the key.
pub type Patch = Vec<(String, Option<RawValue>)>;

#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    /// Embedded list of plain values (options, checkbox defaults).
    List(Vec<RawValue>),
    /// Shared sequence of nested nodes (pages, fields).
    Nodes(Vec<RawNode>),
    /// Shared nested node (layout, validation).
    Map(RawNode),
}

impl RawValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RawValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Number(value) if value.is_finite() => Some(*value),
            // Older editors wrote numeric inputs as strings.
            RawValue::Text(text) => text.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&RawNode> {
        match self {
            RawValue::Map(node) => Some(node),
            _ => None,
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        RawValue::Text(value.into())
    }

    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RawValue::List(items.into_iter().map(|s| RawValue::Text(s.into())).collect())
    }

    fn to_any(&self) -> Any {
        match self {
            RawValue::Null => Any::Null,
            RawValue::Bool(value) => Any::Bool(*value),
            RawValue::Number(value) => Any::Number(*value),
            RawValue::Text(text) => Any::String(Arc::from(text.as_str())),
            RawValue::List(items) => {
                let items: Vec<Any> = items.iter().map(RawValue::to_any).collect();
                Any::Array(Arc::from(items))
            }
            RawValue::Nodes(nodes) => {
                let items: Vec<Any> = nodes.iter().map(node_to_any).collect();
                Any::Array(Arc::from(items))
            }
            RawValue::Map(node) => node_to_any(node),
        }
    }
}

fn node_to_any(node: &RawNode) -> Any {
    let entries = node
        .iter()
        .map(|(key, value)| (key.clone(), value.to_any()))
        .collect::<std::collections::HashMap<_, _>>();
    Any::Map(Arc::new(entries))
}

fn from_any(any: &Any) -> RawValue {
    match any {
        Any::Bool(value) => RawValue::Bool(*value),
        Any::Number(value) => RawValue::Number(*value),
        Any::BigInt(value) => RawValue::Number(*value as f64),
        Any::String(text) => RawValue::Text(text.to_string()),
        Any::Array(items) => RawValue::List(items.iter().map(from_any).collect()),
        Any::Map(entries) => RawValue::Map(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), from_any(value)))
                .collect(),
        ),
        _ => RawValue::Null,
    }
}

// ───────────────────────────────────────────────────────────────────
// Reading
// ───────────────────────────────────────────────────────────────────

pub fn read_out<T: ReadTxn>(txn: &T, value: Out) -> RawValue {
    match value {
        Out::Any(any) => from_any(&any),
        Out::YMap(map) => RawValue::Map(read_node(txn, &map)),
        Out::YArray(array) => read_array(txn, &array),
        _ => RawValue::Null,
    }
}

fn read_array<T: ReadTxn>(txn: &T, array: &ArrayRef) -> RawValue {
    let items: Vec<RawValue> = array.iter(txn).map(|item| read_out(txn, item)).collect();
    if items.iter().all(|item| matches!(item, RawValue::Map(_))) {
        let nodes = items
            .into_iter()
            .filter_map(|item| match item {
                RawValue::Map(node) => Some(node),
                _ => None,
            })
            .collect();
        RawValue::Nodes(nodes)
    } else {
        RawValue::List(items)
    }
}

/// Read a shared map and everything below it.
pub fn read_node<T: ReadTxn>(txn: &T, map: &MapRef) -> RawNode {
    map.iter(txn)
        .map(|(key, value)| (key.to_string(), read_out(txn, value)))
        .collect()
}

// ───────────────────────────────────────────────────────────────────
// Writing
// ───────────────────────────────────────────────────────────────────

/// Write `value` under `key`, creating shared types for nodes and node lists.
pub fn write_value(txn: &mut TransactionMut, map: &MapRef, key: &str, value: &RawValue) {
    match value {
        RawValue::Map(node) => {
            let child = map.insert(txn, key, MapPrelim::default());
            fill_node(txn, &child, node);
        }
        RawValue::Nodes(nodes) => {
            let child = map.insert(txn, key, ArrayPrelim::default());
            for (index, node) in nodes.iter().enumerate() {
                insert_node(txn, &child, index as u32, node);
            }
        }
        scalar => {
            map.insert(txn, key, scalar.to_any());
        }
    }
}

/// Insert `node` as a new shared map at `index` of `array`.
pub fn insert_node(txn: &mut TransactionMut, array: &ArrayRef, index: u32, node: &RawNode) -> MapRef {
    let map = array.insert(txn, index, MapPrelim::default());
    fill_node(txn, &map, node);
    map
}

fn fill_node(txn: &mut TransactionMut, map: &MapRef, node: &RawNode) {
    for (key, value) in node {
        write_value(txn, map, key, value);
    }
}

/// Apply `patch` to `map` and return the patch that restores the old values.
pub fn apply_patch(txn: &mut TransactionMut, map: &MapRef, patch: &Patch) -> Patch {
    let mut previous = Vec::with_capacity(patch.len());
    for (key, value) in patch {
        let old = map.get(txn, key).map(|out| read_out(txn, out));
        match value {
            Some(value) => write_value(txn, map, key, value),
            None => {
                map.remove(txn, key);
            }
        }
        previous.push((key.clone(), old));
    }
    // Restoring in reverse keeps repeated keys correct.
    previous.reverse();
    previous
}

// ───────────────────────────────────────────────────────────────────
// Model → raw
// ───────────────────────────────────────────────────────────────────

pub fn validation_to_raw(validation: &Validation) -> RawNode {
    let mut node = RawNode::new();
    node.insert(keys::REQUIRED.into(), RawValue::Bool(validation.required));
    let bounds = [
        (keys::MIN_LENGTH, validation.min_length),
        (keys::MAX_LENGTH, validation.max_length),
        (keys::MIN_SELECTIONS, validation.min_selections),
        (keys::MAX_SELECTIONS, validation.max_selections),
    ];
    for (key, bound) in bounds {
        if let Some(bound) = bound {
            node.insert(key.into(), RawValue::Number(f64::from(bound)));
        }
    }
    node
}

pub fn default_value_to_raw(value: &DefaultValue) -> Option<RawValue> {
    match value {
        DefaultValue::Empty => None,
        DefaultValue::Text(text) => Some(RawValue::text(text.clone())),
        DefaultValue::Choices(choices) => Some(RawValue::strings(choices.iter().cloned())),
    }
}

pub fn field_to_raw(field: &Field) -> RawNode {
    let mut node = RawNode::new();
    node.insert(keys::ID.into(), RawValue::text(field.id.clone()));
    node.insert(keys::TYPE.into(), RawValue::text(field.field_type.as_str()));

    match &field.body {
        FieldBody::RichText { content } => {
            node.insert(keys::CONTENT.into(), RawValue::text(content.clone()));
        }
        FieldBody::Input(input) => {
            node.insert(keys::LABEL.into(), RawValue::text(input.label.clone()));
            if let Some(value) = default_value_to_raw(&input.default_value) {
                node.insert(keys::DEFAULT_VALUE.into(), value);
            }
            let optional_text = [
                (keys::PREFIX, &input.prefix),
                (keys::HINT, &input.hint),
                (keys::PLACEHOLDER, &input.placeholder),
                (keys::MIN_DATE, &input.min_date),
                (keys::MAX_DATE, &input.max_date),
            ];
            for (key, value) in optional_text {
                if let Some(value) = value {
                    node.insert(key.into(), RawValue::text(value.clone()));
                }
            }
            if field.field_type.has_options() || !input.options.is_empty() {
                node.insert(keys::OPTIONS.into(), RawValue::strings(input.options.iter().cloned()));
            }
            if let Some(min) = input.min {
                node.insert(keys::MIN.into(), RawValue::Number(min));
            }
            if let Some(max) = input.max {
                node.insert(keys::MAX.into(), RawValue::Number(max));
            }
            node.insert(keys::VALIDATION.into(), RawValue::Map(validation_to_raw(&input.validation)));
        }
    }
    node
}

pub fn page_to_raw(page: &Page) -> RawNode {
    let mut node = RawNode::new();
    node.insert(keys::ID.into(), RawValue::text(page.id.clone()));
    node.insert(keys::TITLE.into(), RawValue::text(page.title.clone()));
    node.insert(keys::ORDER.into(), RawValue::Number(f64::from(page.order)));
    node.insert(
        keys::FIELDS.into(),
        RawValue::Nodes(page.fields.iter().map(field_to_raw).collect()),
    );
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldType;
    use yrs::{Doc, Transact};

    #[test]
    fn test_nested_nodes_become_shared_types() {
        let doc = Doc::new();
        let root = doc.get_or_insert_map("root");
        let mut page = Page::new("p1", "Intro", 0);
        page.fields.push(Field::new("f1", FieldType::Radio));

        {
            let mut txn = doc.transact_mut();
            write_value(&mut txn, &root, "page", &RawValue::Map(page_to_raw(&page)));
        }

        let txn = doc.transact();
        let page_map = match root.get(&txn, "page") {
            Some(Out::YMap(map)) => map,
            other => panic!("expected shared map, got {other:?}"),
        };
        assert!(matches!(page_map.get(&txn, keys::FIELDS), Some(Out::YArray(_))));
        assert!(matches!(page_map.get(&txn, keys::TITLE), Some(Out::Any(Any::String(_)))));
        assert_eq!(read_node(&txn, &page_map), page_to_raw(&page));
    }

    #[test]
    fn test_empty_node_list_reads_back_as_nodes() {
        let doc = Doc::new();
        let root = doc.get_or_insert_map("root");
        {
            let mut txn = doc.transact_mut();
            write_value(&mut txn, &root, "fields", &RawValue::Nodes(Vec::new()));
        }
        let txn = doc.transact();
        assert_eq!(read_node(&txn, &root).get("fields"), Some(&RawValue::Nodes(Vec::new())));
    }

    #[test]
    fn test_apply_patch_returns_restoring_patch() {
        let doc = Doc::new();
        let root = doc.get_or_insert_map("root");
        let restore = {
            let mut txn = doc.transact_mut();
            root.insert(&mut txn, "label", "Name");
            apply_patch(
                &mut txn,
                &root,
                &vec![
                    ("label".to_string(), Some(RawValue::text("Full name"))),
                    ("hint".to_string(), Some(RawValue::text("First and last"))),
                ],
            )
        };
        assert_eq!(
            restore,
            vec![
                ("hint".to_string(), None),
                ("label".to_string(), Some(RawValue::text("Name"))),
            ]
        );

        {
            let mut txn = doc.transact_mut();
            apply_patch(&mut txn, &root, &restore);
        }
        let txn = doc.transact();
        let node = read_node(&txn, &root);
        assert_eq!(node.get("label"), Some(&RawValue::text("Name")));
        assert!(!node.contains_key("hint"));
    }

    #[test]
    fn test_numeric_strings_parse() {
        assert_eq!(RawValue::text(" 12 ").as_f64(), Some(12.0));
        assert_eq!(RawValue::text("abc").as_f64(), None);
        assert_eq!(RawValue::Number(f64::NAN).as_f64(), None);
    }
}
