//! Change listeners on every level of the shared document.
//!
//! ```text
//! root map ──► pages array ──► page map ──► fields array ──► field map ──► validation map
//!     └──► layout map
//! ```
//!
//! Callbacks never touch session state. They only record what changed in
//! a [`ChangeSet`]; after the transaction commits the session drains the
//! marks, re-arms the levels whose shape changed, and rebuilds the view
//! model once.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use formsync_core::document::{self, keys, FormDocument};
use yrs::{Array, ArrayRef, MapRef, Observable, Out, ReadTxn, Subscription};

/// What changed since the last drain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Marks {
    /// A top-level key was replaced.
    pub root: bool,
    /// Pages were inserted, removed or moved.
    pub pages: bool,
    /// Pages whose field sequence changed.
    pub fields: BTreeSet<String>,
    /// Fields whose validation node was created or replaced.
    pub validation: BTreeSet<(String, String)>,
    /// Leaf values changed somewhere.
    pub values: bool,
}

impl Marks {
    pub fn is_empty(&self) -> bool {
        !self.root && !self.pages && !self.values && self.fields.is_empty() && self.validation.is_empty()
    }

    /// Shape changed, so observers must be re-armed.
    pub fn is_structural(&self) -> bool {
        self.root || self.pages || !self.fields.is_empty() || !self.validation.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ChangeSet {
    marks: Mutex<Marks>,
}

impl ChangeSet {
    fn with<F: FnOnce(&mut Marks)>(&self, f: F) {
        match self.marks.lock() {
            Ok(mut marks) => f(&mut marks),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn mark_root(&self) {
        self.with(|m| m.root = true);
    }

    pub fn mark_pages(&self) {
        self.with(|m| m.pages = true);
    }

    pub fn mark_fields(&self, page_id: &str) {
        self.with(|m| {
            m.fields.insert(page_id.to_string());
        });
    }

    pub fn mark_validation(&self, page_id: &str, field_id: &str) {
        self.with(|m| {
            m.validation.insert((page_id.to_string(), field_id.to_string()));
        });
    }

    pub fn mark_value(&self) {
        self.with(|m| m.values = true);
    }

    /// Drain the marks. A second call before new changes returns empty marks.
    pub fn take(&self) -> Marks {
        let mut taken = Marks::default();
        self.with(|m| taken = std::mem::take(m));
        taken
    }

    pub fn is_dirty(&self) -> bool {
        let mut dirty = false;
        self.with(|m| dirty = !m.is_empty());
        dirty
    }
}

// ───────────────────────────────────────────────────────────────────
// Document shape, collected inside a read transaction
// ───────────────────────────────────────────────────────────────────

struct FieldShape {
    key: String,
    id: String,
    node: MapRef,
    validation: Option<MapRef>,
}

struct PageShape {
    key: String,
    id: String,
    node: MapRef,
    fields: Option<ArrayRef>,
    field_nodes: Vec<FieldShape>,
}

/// Map nodes of `array` keyed by id; repeated or missing ids get the
/// sequence index appended so every live node keeps its own entry.
fn keyed_maps<T: ReadTxn>(txn: &T, array: &ArrayRef) -> Vec<(String, String, MapRef)> {
    let mut seen = HashSet::new();
    array
        .iter(txn)
        .enumerate()
        .filter_map(|(index, item)| match item {
            Out::YMap(map) => Some((index, map)),
            _ => None,
        })
        .map(|(index, map)| {
            let id = document::node_id(txn, &map).unwrap_or_default();
            let key = if !id.is_empty() && seen.insert(id.clone()) {
                id.clone()
            } else {
                format!("{id}#{index}")
            };
            (key, id, map)
        })
        .collect()
}

fn read_fields<T: ReadTxn>(txn: &T, fields: &ArrayRef) -> Vec<FieldShape> {
    keyed_maps(txn, fields)
        .into_iter()
        .map(|(key, id, node)| FieldShape {
            validation: document::field_validation(txn, &node),
            key,
            id,
            node,
        })
        .collect()
}

fn read_pages<T: ReadTxn>(txn: &T, pages: &ArrayRef) -> Vec<PageShape> {
    keyed_maps(txn, pages)
        .into_iter()
        .map(|(key, id, node)| {
            let fields = document::page_fields(txn, &node);
            let field_nodes = fields.as_ref().map(|f| read_fields(txn, f)).unwrap_or_default();
            PageShape {
                key,
                id,
                node,
                fields,
                field_nodes,
            }
        })
        .collect()
}

// ───────────────────────────────────────────────────────────────────
// Observer tree
// ───────────────────────────────────────────────────────────────────

struct FieldObservers {
    id: String,
    // Held only to keep the subscription alive.
    _node: Subscription,
    validation: Option<Subscription>,
}

struct PageObservers {
    id: String,
    // Held only to keep the subscription alive.
    _node: Subscription,
    fields: Option<Subscription>,
    field_nodes: BTreeMap<String, FieldObservers>,
}

impl PageObservers {
    fn count(&self) -> usize {
        1 + usize::from(self.fields.is_some())
            + self
                .field_nodes
                .values()
                .map(|f| 1 + usize::from(f.validation.is_some()))
                .sum::<usize>()
    }

    fn clear_fields(&mut self) {
        self.field_nodes.clear();
        self.fields = None;
    }
}

/// Live subscriptions mirroring the current document shape.
pub struct ObserverTree {
    changes: Arc<ChangeSet>,
    root: Option<Subscription>,
    layout: Option<Subscription>,
    pages: Option<Subscription>,
    page_nodes: BTreeMap<String, PageObservers>,
}

impl ObserverTree {
    pub fn new(changes: Arc<ChangeSet>) -> Self {
        Self {
            changes,
            root: None,
            layout: None,
            pages: None,
            page_nodes: BTreeMap::new(),
        }
    }

    /// Subscribe to every node of `document`, replacing any previous set.
    pub fn attach(&mut self, document: &FormDocument) {
        self.teardown();

        let (layout, pages, page_shapes) = {
            let txn = document.transact();
            let pages = document.pages(&txn);
            let shapes = pages.as_ref().map(|p| read_pages(&txn, p)).unwrap_or_default();
            (document.layout(&txn), pages, shapes)
        };

        self.root = Some(self.observe_root(document.root()));
        self.layout = layout.map(|layout| self.observe_values(&layout));
        self.attach_pages(pages, page_shapes);
    }

    /// Re-subscribe the levels named by `marks`.
    pub fn rearm(&mut self, document: &FormDocument, marks: &Marks) {
        if marks.root {
            self.attach(document);
            return;
        }

        if marks.pages {
            let (pages, shapes) = {
                let txn = document.transact();
                let pages = document.pages(&txn);
                let shapes = pages.as_ref().map(|p| read_pages(&txn, p)).unwrap_or_default();
                (pages, shapes)
            };
            self.page_nodes.clear();
            self.pages = None;
            self.attach_pages(pages, shapes);
            return;
        }

        let shapes = {
            let txn = document.transact();
            document
                .pages(&txn)
                .map(|p| read_pages(&txn, &p))
                .unwrap_or_default()
        };

        for shape in shapes {
            let Some(observers) = self.page_nodes.get_mut(&shape.key) else {
                continue;
            };
            if marks.fields.contains(&shape.id) {
                observers.clear_fields();
                let (fields, field_nodes) = self.observe_fields(&shape);
                if let Some(observers) = self.page_nodes.get_mut(&shape.key) {
                    observers.fields = fields;
                    observers.field_nodes = field_nodes;
                }
                continue;
            }

            for field in &shape.field_nodes {
                if !marks.validation.contains(&(shape.id.clone(), field.id.clone())) {
                    continue;
                }
                let validation = field.validation.as_ref().map(|v| self.observe_values(v));
                if let Some(entry) = self
                    .page_nodes
                    .get_mut(&shape.key)
                    .and_then(|p| p.field_nodes.get_mut(&field.key))
                {
                    entry.validation = validation;
                }
            }
        }
    }

    /// Drop every subscription: fields, then pages, then root.
    pub fn teardown(&mut self) {
        for page in self.page_nodes.values_mut() {
            page.clear_fields();
        }
        self.page_nodes.clear();
        self.pages = None;
        self.layout = None;
        self.root = None;
    }

    pub fn observer_count(&self) -> usize {
        usize::from(self.root.is_some())
            + usize::from(self.layout.is_some())
            + usize::from(self.pages.is_some())
            + self.page_nodes.values().map(PageObservers::count).sum::<usize>()
    }

    /// Page ids currently observed, in key order.
    pub fn observed_pages(&self) -> Vec<&str> {
        self.page_nodes.values().map(|p| p.id.as_str()).collect()
    }

    /// Field ids observed on `page_id`.
    pub fn observed_fields(&self, page_id: &str) -> Vec<&str> {
        self.page_nodes
            .values()
            .filter(|p| p.id == page_id)
            .flat_map(|p| p.field_nodes.values().map(|f| f.id.as_str()))
            .collect()
    }

    fn attach_pages(&mut self, pages: Option<ArrayRef>, shapes: Vec<PageShape>) {
        let Some(pages) = pages else {
            return;
        };
        let changes = self.changes.clone();
        self.pages = Some(pages.observe(move |_txn, _event| changes.mark_pages()));

        for shape in shapes {
            let node = self.observe_page(&shape);
            let (fields, field_nodes) = self.observe_fields(&shape);
            self.page_nodes.insert(
                shape.key.clone(),
                PageObservers {
                    id: shape.id.clone(),
                    _node: node,
                    fields,
                    field_nodes,
                },
            );
        }
    }

    fn observe_fields(
        &self,
        shape: &PageShape,
    ) -> (Option<Subscription>, BTreeMap<String, FieldObservers>) {
        let Some(fields) = &shape.fields else {
            return (None, BTreeMap::new());
        };
        let changes = self.changes.clone();
        let page_id = shape.id.clone();
        let array = fields.observe(move |_txn, _event| changes.mark_fields(&page_id));

        let nodes = shape
            .field_nodes
            .iter()
            .map(|field| {
                let observers = FieldObservers {
                    id: field.id.clone(),
                    _node: self.observe_field(&shape.id, field),
                    validation: field.validation.as_ref().map(|v| self.observe_values(v)),
                };
                (field.key.clone(), observers)
            })
            .collect();
        (Some(array), nodes)
    }

    fn observe_root(&self, root: &MapRef) -> Subscription {
        let changes = self.changes.clone();
        root.observe(move |txn, event| {
            for key in event.keys(txn).keys() {
                match key.as_ref() {
                    keys::PAGES | keys::LAYOUT => changes.mark_root(),
                    _ => changes.mark_value(),
                }
            }
        })
    }

    fn observe_page(&self, shape: &PageShape) -> Subscription {
        let changes = self.changes.clone();
        let page_id = shape.id.clone();
        shape.node.observe(move |txn, event| {
            for key in event.keys(txn).keys() {
                if key.as_ref() == keys::FIELDS {
                    changes.mark_fields(&page_id);
                } else {
                    changes.mark_value();
                }
            }
        })
    }

    fn observe_field(&self, page_id: &str, shape: &FieldShape) -> Subscription {
        let changes = self.changes.clone();
        let page_id = page_id.to_string();
        let field_id = shape.id.clone();
        shape.node.observe(move |txn, event| {
            for key in event.keys(txn).keys() {
                if key.as_ref() == keys::VALIDATION {
                    changes.mark_validation(&page_id, &field_id);
                }
                changes.mark_value();
            }
        })
    }

    /// Leaf maps (layout, validation) only ever change values.
    fn observe_values(&self, map: &MapRef) -> Subscription {
        let changes = self.changes.clone();
        map.observe(move |_txn, _event| changes.mark_value())
    }
}

impl Drop for ObserverTree {
    fn drop(&mut self) {
        self.teardown();
    }
}
