//! Editor operations on the shared schema.
//!
//! Every operation is planned against the current document into a list of
//! [`Edit`]s, then committed in one origin-tagged transaction. Applying an
//! edit returns the edit that reverses it, which is what undo replays.

use log::{debug, warn};
use thiserror::Error;
use uuid::Uuid;
use yrs::{Any, Array, ArrayPrelim, ArrayRef, Map, MapPrelim, MapRef, Out, ReadTxn, TransactionMut};

use formsync_core::document::{self, keys, FormDocument};
use formsync_core::raw::{self, Patch, RawNode, RawValue};
use formsync_core::{Field, FieldType, FieldUpdate, LayoutUpdate, Page};

/// Why an operation was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Skip {
    #[error("document structure is not initialized")]
    NoStructure,
    #[error("page {0} not found")]
    PageNotFound(String),
    #[error("field {field_id} not found on page {page_id}")]
    FieldNotFound { page_id: String, field_id: String },
    #[error("cannot remove the only page")]
    LastPage,
    #[error("index {index} out of range for {len} items")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("source and destination are the same page {0}; use reorder_fields")]
    SamePage(String),
    #[error("nothing to change")]
    NoChange,
}

impl Skip {
    /// Log at the level the condition deserves. Invalid targets are
    /// usually a race with a remote delete, so they warn; no-ops don't.
    pub fn log(&self, operation: &str) {
        match self {
            Skip::NoChange => debug!("{} skipped: {}", operation, self),
            _ => warn!("{} skipped: {}", operation, self),
        }
    }
}

/// Edits for one operation plus the id it created, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub edits: Vec<Edit>,
    pub created: Option<String>,
}

impl Plan {
    fn single(edit: Edit) -> Self {
        Self {
            edits: vec![edit],
            created: None,
        }
    }

    fn creating(edit: Edit, id: String) -> Self {
        Self {
            edits: vec![edit],
            created: Some(id),
        }
    }
}

pub type PlanResult = Result<Plan, Skip>;

/// A single reversible change to the document.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    InsertPage { index: u32, node: RawNode },
    RemovePage { page_id: String },
    SetPageTitle { page_id: String, title: String },
    /// Rewrite the page sequence so `ids` come first, in that order.
    SetPageSequence { ids: Vec<String> },
    InsertField { page_id: String, index: u32, node: RawNode },
    RemoveField { page_id: String, field_id: String },
    SetFieldSequence { page_id: String, ids: Vec<String> },
    PatchField {
        page_id: String,
        field_id: String,
        props: Patch,
        validation: Patch,
    },
    PatchLayout { props: Patch },
    SetShuffle { enabled: Option<bool> },
}

impl Edit {
    /// Apply inside `txn`; returns the reversing edit, or `None` if the
    /// target vanished or nothing changed.
    pub fn apply(&self, txn: &mut TransactionMut, document: &FormDocument) -> Option<Edit> {
        match self {
            Edit::InsertPage { index, node } => {
                let pages = document.pages(txn)?;
                let page_id = node_text(node, keys::ID)?;
                if document::find_node(txn, &pages, &page_id).is_some() {
                    debug!("Page {} already present", page_id);
                    return None;
                }
                let index = (*index).min(pages.len(txn));
                raw::insert_node(txn, &pages, index, node);
                document::restamp_orders(txn, &pages);
                Some(Edit::RemovePage { page_id })
            }

            Edit::RemovePage { page_id } => {
                let pages = document.pages(txn)?;
                let (index, page) = document::find_node(txn, &pages, page_id)?;
                let node = raw::read_node(txn, &page);
                pages.remove(txn, index);
                document::restamp_orders(txn, &pages);
                Some(Edit::InsertPage { index, node })
            }

            Edit::SetPageTitle { page_id, title } => {
                let pages = document.pages(txn)?;
                let (_, page) = document::find_node(txn, &pages, page_id)?;
                let previous = match page.get(txn, keys::TITLE) {
                    Some(Out::Any(Any::String(old))) => old.to_string(),
                    _ => String::new(),
                };
                if &previous == title {
                    return None;
                }
                page.insert(txn, keys::TITLE, title.as_str());
                Some(Edit::SetPageTitle {
                    page_id: page_id.clone(),
                    title: previous,
                })
            }

            Edit::SetPageSequence { ids } => {
                let pages = document.pages(txn)?;
                let previous = rewrite_sequence(txn, &pages, ids)?;
                document::restamp_orders(txn, &pages);
                Some(Edit::SetPageSequence { ids: previous })
            }

            Edit::InsertField { page_id, index, node } => {
                let pages = document.pages(txn)?;
                let (_, page) = document::find_node(txn, &pages, page_id)?;
                let fields = match document::page_fields(txn, &page) {
                    Some(fields) => fields,
                    None => page.insert(txn, keys::FIELDS, ArrayPrelim::default()),
                };
                let field_id = node_text(node, keys::ID)?;
                if document::find_node(txn, &fields, &field_id).is_some() {
                    debug!("Field {} already present on page {}", field_id, page_id);
                    return None;
                }
                let index = (*index).min(fields.len(txn));
                raw::insert_node(txn, &fields, index, node);
                Some(Edit::RemoveField {
                    page_id: page_id.clone(),
                    field_id,
                })
            }

            Edit::RemoveField { page_id, field_id } => {
                let (fields, index, field) = field_node(txn, document, page_id, field_id)?;
                let node = raw::read_node(txn, &field);
                fields.remove(txn, index);
                Some(Edit::InsertField {
                    page_id: page_id.clone(),
                    index,
                    node,
                })
            }

            Edit::SetFieldSequence { page_id, ids } => {
                let pages = document.pages(txn)?;
                let (_, page) = document::find_node(txn, &pages, page_id)?;
                let fields = document::page_fields(txn, &page)?;
                let previous = rewrite_sequence(txn, &fields, ids)?;
                Some(Edit::SetFieldSequence {
                    page_id: page_id.clone(),
                    ids: previous,
                })
            }

            Edit::PatchField {
                page_id,
                field_id,
                props,
                validation,
            } => {
                let (_, _, field) = field_node(txn, document, page_id, field_id)?;
                let mut restore_props = raw::apply_patch(txn, &field, props);

                let fillable = match field.get(txn, keys::TYPE) {
                    Some(Out::Any(Any::String(name))) => {
                        FieldType::parse(&name).map_or(true, |t| t.is_fillable())
                    }
                    _ => true,
                };
                // A patch that itself sets or clears the node is an undo/redo
                // step and must not re-create it.
                let replaces_node = props.iter().any(|(key, _)| key == keys::VALIDATION);
                let missing = document::field_validation(txn, &field).is_none();
                let mut restore_validation = Patch::new();
                if fillable && !replaces_node && (missing || !validation.is_empty()) {
                    let node = match document::field_validation(txn, &field) {
                        Some(node) => node,
                        None => {
                            // Created on first use; undo removes it again.
                            restore_props.insert(0, (keys::VALIDATION.to_string(), None));
                            field.insert(txn, keys::VALIDATION, MapPrelim::default())
                        }
                    };
                    let restore = raw::apply_patch(txn, &node, validation);
                    if !restore_props.iter().any(|(key, _)| key == keys::VALIDATION) {
                        restore_validation = restore;
                    }
                }

                if restore_props.is_empty() && restore_validation.is_empty() {
                    return None;
                }
                Some(Edit::PatchField {
                    page_id: page_id.clone(),
                    field_id: field_id.clone(),
                    props: restore_props,
                    validation: restore_validation,
                })
            }

            Edit::PatchLayout { props } => {
                let layout = match document.layout(txn) {
                    Some(layout) => layout,
                    None => document.root().insert(txn, keys::LAYOUT, MapPrelim::default()),
                };
                let restore = raw::apply_patch(txn, &layout, props);
                Some(Edit::PatchLayout { props: restore })
            }

            Edit::SetShuffle { enabled } => {
                let root = document.root();
                let previous = match root.get(txn, keys::IS_SHUFFLE_ENABLED) {
                    Some(Out::Any(Any::Bool(flag))) => Some(flag),
                    _ => None,
                };
                if previous == *enabled {
                    return None;
                }
                match enabled {
                    Some(flag) => {
                        root.insert(txn, keys::IS_SHUFFLE_ENABLED, *flag);
                    }
                    None => {
                        root.remove(txn, keys::IS_SHUFFLE_ENABLED);
                    }
                }
                Some(Edit::SetShuffle { enabled: previous })
            }
        }
    }
}

/// Apply `edits` in order and return their inverses in undo order
/// (last applied first).
pub fn apply_all(txn: &mut TransactionMut, document: &FormDocument, edits: &[Edit]) -> Vec<Edit> {
    let mut inverses: Vec<Edit> = edits
        .iter()
        .filter_map(|edit| edit.apply(txn, document))
        .collect();
    inverses.reverse();
    inverses
}

fn node_text(node: &RawNode, key: &str) -> Option<String> {
    node.get(key).and_then(RawValue::as_str).map(str::to_string)
}

fn field_node<T: ReadTxn>(
    txn: &T,
    document: &FormDocument,
    page_id: &str,
    field_id: &str,
) -> Option<(ArrayRef, u32, MapRef)> {
    let pages = document.pages(txn)?;
    let (_, page) = document::find_node(txn, &pages, page_id)?;
    let fields = document::page_fields(txn, &page)?;
    let (index, field) = document::find_node(txn, &fields, field_id)?;
    Some((fields, index, field))
}

/// Order of current positions after putting `wanted` ids first. Ids that
/// are no longer present are skipped; nodes not named keep their relative
/// order at the end.
fn sequence_order(current: &[Option<String>], wanted: &[String]) -> Vec<usize> {
    let mut used = vec![false; current.len()];
    let mut order = Vec::with_capacity(current.len());
    for id in wanted {
        let found = current
            .iter()
            .enumerate()
            .position(|(i, c)| !used[i] && c.as_deref() == Some(id.as_str()));
        if let Some(position) = found {
            used[position] = true;
            order.push(position);
        }
    }
    order.extend((0..current.len()).filter(|i| !used[*i]));
    order
}

/// Rebuild `array` in the order given by `ids`. Returns the previous id
/// order, or `None` when the order is unchanged.
fn rewrite_sequence(txn: &mut TransactionMut, array: &ArrayRef, ids: &[String]) -> Option<Vec<String>> {
    let current = document::node_ids(txn, array);
    let order = sequence_order(&current, ids);
    if order.iter().enumerate().all(|(i, position)| i == *position) {
        return None;
    }

    let nodes: Vec<Option<RawNode>> = array
        .iter(txn)
        .map(|item| match item {
            Out::YMap(map) => Some(raw::read_node(txn, &map)),
            _ => None,
        })
        .collect();

    array.remove_range(txn, 0, array.len(txn));
    let mut index = 0;
    for position in order {
        match &nodes[position] {
            Some(node) => {
                raw::insert_node(txn, array, index, node);
                index += 1;
            }
            None => warn!("Dropping non-map entry at position {} during reorder", position),
        }
    }

    Some(current.into_iter().map(Option::unwrap_or_default).collect())
}

// ───────────────────────────────────────────────────────────────────
// Planning
// ───────────────────────────────────────────────────────────────────

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn pages_of<T: ReadTxn>(txn: &T, document: &FormDocument) -> Result<ArrayRef, Skip> {
    document.pages(txn).ok_or(Skip::NoStructure)
}

fn page_of<T: ReadTxn>(txn: &T, pages: &ArrayRef, page_id: &str) -> Result<(u32, MapRef), Skip> {
    document::find_node(txn, pages, page_id).ok_or_else(|| Skip::PageNotFound(page_id.to_string()))
}

fn field_of<T: ReadTxn>(
    txn: &T,
    page: &MapRef,
    page_id: &str,
    field_id: &str,
) -> Result<(u32, MapRef), Skip> {
    document::page_fields(txn, page)
        .and_then(|fields| document::find_node(txn, &fields, field_id))
        .ok_or_else(|| Skip::FieldNotFound {
            page_id: page_id.to_string(),
            field_id: field_id.to_string(),
        })
}

fn field_count<T: ReadTxn>(txn: &T, page: &MapRef) -> u32 {
    document::page_fields(txn, page).map_or(0, |fields| fields.len(txn))
}

fn patch_node(node: &mut RawNode, patch: &Patch) {
    for (key, value) in patch {
        match value {
            Some(value) => node.insert(key.clone(), value.clone()),
            None => node.remove(key),
        };
    }
}

/// Copy of a field node under a fresh id.
fn copy_field(node: &RawNode, suffix_label: bool) -> RawNode {
    let mut copy = node.clone();
    copy.insert(keys::ID.to_string(), RawValue::text(new_id()));
    let fillable = node_text(node, keys::TYPE)
        .and_then(|name| FieldType::parse(&name))
        .map_or(node.contains_key(keys::LABEL), |t| t.is_fillable());
    if suffix_label && fillable {
        let label = node_text(node, keys::LABEL).unwrap_or_default();
        copy.insert(keys::LABEL.to_string(), RawValue::text(format!("{label} (Copy)")));
    }
    copy
}

fn move_index(len: usize, old_index: usize, new_index: usize) -> Result<(), Skip> {
    for index in [old_index, new_index] {
        if index >= len {
            return Err(Skip::IndexOutOfRange { index, len });
        }
    }
    if old_index == new_index {
        return Err(Skip::NoChange);
    }
    Ok(())
}

fn moved(mut ids: Vec<String>, old_index: usize, new_index: usize) -> Vec<String> {
    let id = ids.remove(old_index);
    ids.insert(new_index, id);
    ids
}

/// Append "New Page {n+1}".
pub fn add_empty_page(document: &FormDocument) -> PlanResult {
    let txn = document.transact();
    let pages = pages_of(&txn, document)?;
    let count = pages.len(&txn);
    let page = Page::new(new_id(), format!("New Page {}", count + 1), count);
    let id = page.id.clone();
    Ok(Plan::creating(
        Edit::InsertPage {
            index: count,
            node: raw::page_to_raw(&page),
        },
        id,
    ))
}

pub fn remove_page(document: &FormDocument, page_id: &str) -> PlanResult {
    let txn = document.transact();
    let pages = pages_of(&txn, document)?;
    if pages.len(&txn) < 2 {
        return Err(Skip::LastPage);
    }
    page_of(&txn, &pages, page_id)?;
    Ok(Plan::single(Edit::RemovePage {
        page_id: page_id.to_string(),
    }))
}

/// Copy a page and all its fields under fresh ids, right after the original.
pub fn duplicate_page(document: &FormDocument, page_id: &str) -> PlanResult {
    let txn = document.transact();
    let pages = pages_of(&txn, document)?;
    let (index, page) = page_of(&txn, &pages, page_id)?;

    let mut node = raw::read_node(&txn, &page);
    let id = new_id();
    let title = node_text(&node, keys::TITLE).unwrap_or_default();
    node.insert(keys::ID.to_string(), RawValue::text(id.clone()));
    node.insert(keys::TITLE.to_string(), RawValue::text(format!("{title} (Copy)")));
    if let Some(RawValue::Nodes(fields)) = node.get_mut(keys::FIELDS) {
        for field in fields.iter_mut() {
            *field = copy_field(field, false);
        }
    }

    Ok(Plan::creating(Edit::InsertPage { index: index + 1, node }, id))
}

pub fn reorder_pages(document: &FormDocument, old_index: usize, new_index: usize) -> PlanResult {
    let txn = document.transact();
    let pages = pages_of(&txn, document)?;
    let ids: Vec<String> = document::node_ids(&txn, &pages)
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect();
    move_index(ids.len(), old_index, new_index)?;
    Ok(Plan::single(Edit::SetPageSequence {
        ids: moved(ids, old_index, new_index),
    }))
}

pub fn update_page_title(document: &FormDocument, page_id: &str, title: &str) -> PlanResult {
    let txn = document.transact();
    let pages = pages_of(&txn, document)?;
    page_of(&txn, &pages, page_id)?;
    Ok(Plan::single(Edit::SetPageTitle {
        page_id: page_id.to_string(),
        title: title.to_string(),
    }))
}

/// New field of `field_type` with `data` applied, inserted at
/// `index` clamped to the field count.
pub fn add_field_at_index(
    document: &FormDocument,
    page_id: &str,
    field_type: FieldType,
    data: &FieldUpdate,
    index: usize,
) -> PlanResult {
    let txn = document.transact();
    let pages = pages_of(&txn, document)?;
    let (_, page) = page_of(&txn, &pages, page_id)?;
    let len = field_count(&txn, &page);
    let index = u32::try_from(index).unwrap_or(u32::MAX).min(len);

    let field = Field::new(new_id(), field_type);
    let id = field.id.clone();
    let mut node = raw::field_to_raw(&field);
    patch_node(&mut node, &data.field_patch());
    if field_type.is_fillable() {
        if let Some(RawValue::Map(validation)) = node.get_mut(keys::VALIDATION) {
            patch_node(validation, &data.validation_patch());
        }
    }

    Ok(Plan::creating(
        Edit::InsertField {
            page_id: page_id.to_string(),
            index,
            node,
        },
        id,
    ))
}

pub fn add_field(
    document: &FormDocument,
    page_id: &str,
    field_type: FieldType,
    data: &FieldUpdate,
) -> PlanResult {
    add_field_at_index(document, page_id, field_type, data, usize::MAX)
}

pub fn update_field(
    document: &FormDocument,
    page_id: &str,
    field_id: &str,
    updates: &FieldUpdate,
) -> PlanResult {
    let txn = document.transact();
    let pages = pages_of(&txn, document)?;
    let (_, page) = page_of(&txn, &pages, page_id)?;
    field_of(&txn, &page, page_id, field_id)?;
    if updates.is_empty() {
        return Err(Skip::NoChange);
    }
    Ok(Plan::single(Edit::PatchField {
        page_id: page_id.to_string(),
        field_id: field_id.to_string(),
        props: updates.field_patch(),
        validation: updates.validation_patch(),
    }))
}

pub fn remove_field(document: &FormDocument, page_id: &str, field_id: &str) -> PlanResult {
    let txn = document.transact();
    let pages = pages_of(&txn, document)?;
    let (_, page) = page_of(&txn, &pages, page_id)?;
    field_of(&txn, &page, page_id, field_id)?;
    Ok(Plan::single(Edit::RemoveField {
        page_id: page_id.to_string(),
        field_id: field_id.to_string(),
    }))
}

pub fn reorder_fields(
    document: &FormDocument,
    page_id: &str,
    old_index: usize,
    new_index: usize,
) -> PlanResult {
    let txn = document.transact();
    let pages = pages_of(&txn, document)?;
    let (_, page) = page_of(&txn, &pages, page_id)?;
    let ids: Vec<String> = document::page_fields(&txn, &page)
        .map(|fields| document::node_ids(&txn, &fields))
        .unwrap_or_default()
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect();
    move_index(ids.len(), old_index, new_index)?;
    Ok(Plan::single(Edit::SetFieldSequence {
        page_id: page_id.to_string(),
        ids: moved(ids, old_index, new_index),
    }))
}

/// Copy right after the original; fillable labels get " (Copy)".
pub fn duplicate_field(document: &FormDocument, page_id: &str, field_id: &str) -> PlanResult {
    let txn = document.transact();
    let pages = pages_of(&txn, document)?;
    let (_, page) = page_of(&txn, &pages, page_id)?;
    let (index, field) = field_of(&txn, &page, page_id, field_id)?;
    let node = copy_field(&raw::read_node(&txn, &field), true);
    let id = node_text(&node, keys::ID).unwrap_or_default();
    Ok(Plan::creating(
        Edit::InsertField {
            page_id: page_id.to_string(),
            index: index + 1,
            node,
        },
        id,
    ))
}

/// Move to `dst_page_id` at `index` (default: end). Same-page moves are
/// rejected; reordering within a page is `reorder_fields`.
pub fn move_field_between_pages(
    document: &FormDocument,
    src_page_id: &str,
    dst_page_id: &str,
    field_id: &str,
    index: Option<usize>,
) -> PlanResult {
    if src_page_id == dst_page_id {
        return Err(Skip::SamePage(src_page_id.to_string()));
    }
    let txn = document.transact();
    let pages = pages_of(&txn, document)?;
    let (_, src) = page_of(&txn, &pages, src_page_id)?;
    let (_, field) = field_of(&txn, &src, src_page_id, field_id)?;
    let (_, dst) = page_of(&txn, &pages, dst_page_id)?;

    let mut node = raw::read_node(&txn, &field);
    let collides = document::page_fields(&txn, &dst)
        .and_then(|fields| document::find_node(&txn, &fields, field_id))
        .is_some();
    if collides {
        node.insert(keys::ID.to_string(), RawValue::text(new_id()));
    }
    let len = field_count(&txn, &dst);
    let index = index
        .map_or(len, |i| u32::try_from(i).unwrap_or(u32::MAX))
        .min(len);

    Ok(Plan {
        edits: vec![
            Edit::RemoveField {
                page_id: src_page_id.to_string(),
                field_id: field_id.to_string(),
            },
            Edit::InsertField {
                page_id: dst_page_id.to_string(),
                index,
                node,
            },
        ],
        created: None,
    })
}

/// Append a copy to `dst_page_id`; the source page is untouched.
pub fn copy_field_to_page(
    document: &FormDocument,
    src_page_id: &str,
    dst_page_id: &str,
    field_id: &str,
) -> PlanResult {
    if src_page_id == dst_page_id {
        return Err(Skip::SamePage(src_page_id.to_string()));
    }
    let txn = document.transact();
    let pages = pages_of(&txn, document)?;
    let (_, src) = page_of(&txn, &pages, src_page_id)?;
    let (_, field) = field_of(&txn, &src, src_page_id, field_id)?;
    let (_, dst) = page_of(&txn, &pages, dst_page_id)?;

    let node = copy_field(&raw::read_node(&txn, &field), true);
    let id = node_text(&node, keys::ID).unwrap_or_default();
    Ok(Plan::creating(
        Edit::InsertField {
            page_id: dst_page_id.to_string(),
            index: field_count(&txn, &dst),
            node,
        },
        id,
    ))
}

pub fn update_layout(document: &FormDocument, update: &LayoutUpdate) -> PlanResult {
    let props = update.patch();
    if props.is_empty() {
        return Err(Skip::NoChange);
    }
    let txn = document.transact();
    pages_of(&txn, document)?;
    Ok(Plan::single(Edit::PatchLayout { props }))
}

pub fn set_shuffle_enabled(document: &FormDocument, enabled: bool) -> PlanResult {
    let txn = document.transact();
    pages_of(&txn, document)?;
    Ok(Plan::single(Edit::SetShuffle {
        enabled: Some(enabled),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use formsync_core::{DefaultValue, FormSnapshot, Theme};

    fn ready() -> FormDocument {
        let document = FormDocument::with_client_id(11);
        {
            let mut txn = document.transact_mut_with("test");
            document.ensure_structure(&mut txn);
        }
        document
    }

    fn commit(document: &FormDocument, plan: PlanResult) -> Vec<Edit> {
        let plan = plan.unwrap();
        let mut txn = document.transact_mut_with("test");
        apply_all(&mut txn, document, &plan.edits)
    }

    fn undo(document: &FormDocument, inverses: &[Edit]) -> Vec<Edit> {
        let mut txn = document.transact_mut_with("test");
        apply_all(&mut txn, document, inverses)
    }

    fn page_with_fields(document: &FormDocument, labels: &[&str]) -> String {
        commit(document, add_empty_page(document));
        let page_id = document.snapshot().pages.last().unwrap().id.clone();
        for label in labels {
            commit(
                document,
                add_field(document, &page_id, FieldType::TextInput, &FieldUpdate::new().label(*label)),
            );
        }
        page_id
    }

    fn labels(snapshot: &FormSnapshot, page_id: &str) -> Vec<String> {
        snapshot
            .page(page_id)
            .unwrap()
            .fields
            .iter()
            .map(|f| f.label().unwrap_or_default().to_string())
            .collect()
    }

    fn assert_orders(snapshot: &FormSnapshot) {
        for (i, page) in snapshot.pages.iter().enumerate() {
            assert_eq!(page.order as usize, i, "page {} out of order", page.id);
        }
    }

    #[test]
    fn test_operations_need_structure() {
        let document = FormDocument::new();
        assert_eq!(add_empty_page(&document), Err(Skip::NoStructure));
    }

    #[test]
    fn test_add_empty_page_titles() {
        let document = ready();
        commit(&document, add_empty_page(&document));
        commit(&document, add_empty_page(&document));
        let snapshot = document.snapshot();
        let titles: Vec<&str> = snapshot.pages.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["New Page 1", "New Page 2"]);
        assert_orders(&snapshot);
    }

    #[test]
    fn test_remove_only_page_is_rejected() {
        let document = ready();
        let page_id = page_with_fields(&document, &[]);
        assert_eq!(remove_page(&document, &page_id), Err(Skip::LastPage));
        assert_eq!(document.snapshot().pages.len(), 1);
    }

    #[test]
    fn test_order_invariant_across_page_operations() {
        let document = ready();
        for _ in 0..4 {
            commit(&document, add_empty_page(&document));
            assert_orders(&document.snapshot());
        }
        let ids: Vec<String> = document.snapshot().page_ids().iter().map(|s| s.to_string()).collect();

        commit(&document, remove_page(&document, &ids[1]));
        assert_orders(&document.snapshot());
        commit(&document, reorder_pages(&document, 0, 2));
        assert_orders(&document.snapshot());
        commit(&document, duplicate_page(&document, &ids[3]));
        let snapshot = document.snapshot();
        assert_orders(&snapshot);
        assert_eq!(snapshot.pages.len(), 4);
        assert_eq!(snapshot.pages[1].id, ids[3]);
        assert_eq!(snapshot.pages[2].title, "New Page 4 (Copy)");
    }

    #[test]
    fn test_reorder_same_index_is_noop() {
        let document = ready();
        let page_id = page_with_fields(&document, &["A", "B"]);
        let before = document.encode_state_vector();
        assert_eq!(reorder_fields(&document, &page_id, 1, 1), Err(Skip::NoChange));
        assert_eq!(reorder_pages(&document, 0, 0), Err(Skip::NoChange));
        assert_eq!(document.encode_state_vector(), before);
    }

    #[test]
    fn test_reorder_out_of_range() {
        let document = ready();
        let page_id = page_with_fields(&document, &["A"]);
        assert_eq!(
            reorder_fields(&document, &page_id, 0, 3),
            Err(Skip::IndexOutOfRange { index: 3, len: 1 })
        );
    }

    #[test]
    fn test_reorder_fields_moves_first_to_last() {
        let document = ready();
        let page_id = page_with_fields(&document, &["A", "B", "C"]);
        commit(&document, reorder_fields(&document, &page_id, 0, 2));
        assert_eq!(labels(&document.snapshot(), &page_id), vec!["B", "C", "A"]);
    }

    #[test]
    fn test_add_field_defaults() {
        let document = ready();
        let page_id = page_with_fields(&document, &[]);
        commit(&document, add_field(&document, &page_id, FieldType::TextInput, &FieldUpdate::new()));
        let snapshot = document.snapshot();
        let field = &snapshot.page(&page_id).unwrap().fields[0];
        assert_eq!(field.field_type, FieldType::TextInput);
        assert_eq!(field.label(), Some("Text Input"));
        assert!(!field.validation().unwrap().required);
    }

    #[test]
    fn test_add_field_at_index_clamps() {
        let document = ready();
        let page_id = page_with_fields(&document, &["A", "B"]);
        let data = FieldUpdate::new().label("Z");
        commit(&document, add_field_at_index(&document, &page_id, FieldType::Email, &data, 99));
        commit(&document, add_field_at_index(&document, &page_id, FieldType::Email, &data.clone().label("Y"), 0));
        assert_eq!(labels(&document.snapshot(), &page_id), vec!["Y", "A", "B", "Z"]);
    }

    #[test]
    fn test_update_field_creates_validation_and_filters_blanks() {
        let document = ready();
        let page_id = page_with_fields(&document, &[]);
        let plan = add_field(&document, &page_id, FieldType::Checkbox, &FieldUpdate::new()).unwrap();
        let field_id = plan.created.clone().unwrap();

        // Strip the validation node to exercise lazy creation.
        {
            let mut txn = document.transact_mut_with("test");
            apply_all(&mut txn, &document, &plan.edits);
            let (_, _, field) = field_node(&txn, &document, &page_id, &field_id).unwrap();
            field.remove(&mut txn, keys::VALIDATION);
        }

        let updates = FieldUpdate::new()
            .options(["Red", "", "Blue"])
            .default_value(DefaultValue::Choices(vec![" ".into(), "Red".into()]))
            .required(true);
        let inverses = commit(&document, update_field(&document, &page_id, &field_id, &updates));

        let snapshot = document.snapshot();
        let input = snapshot.field(&page_id, &field_id).unwrap().input().unwrap().clone();
        assert_eq!(input.options, vec!["Red", "Blue"]);
        assert_eq!(input.default_value, DefaultValue::Choices(vec!["Red".into()]));
        assert!(input.validation.required);

        undo(&document, &inverses);
        let txn = document.transact();
        let (_, _, field) = field_node(&txn, &document, &page_id, &field_id).unwrap();
        assert!(document::field_validation(&txn, &field).is_none());
    }

    #[test]
    fn test_label_update_creates_missing_validation() {
        let document = ready();
        let page_id = page_with_fields(&document, &["Old"]);
        let field_id = document.snapshot().page(&page_id).unwrap().fields[0].id.clone();
        {
            let mut txn = document.transact_mut_with("test");
            let (_, _, field) = field_node(&txn, &document, &page_id, &field_id).unwrap();
            field.remove(&mut txn, keys::VALIDATION);
        }

        let updates = FieldUpdate::new().label("Name");
        let inverses = commit(&document, update_field(&document, &page_id, &field_id, &updates));
        {
            let txn = document.transact();
            let (_, _, field) = field_node(&txn, &document, &page_id, &field_id).unwrap();
            assert!(document::field_validation(&txn, &field).is_some());
        }
        let field = document.snapshot().field(&page_id, &field_id).unwrap().clone();
        assert_eq!(field.label(), Some("Name"));
        assert!(!field.validation().unwrap().required);

        // Undo restores the legacy shape, redo brings the node back.
        let redo = undo(&document, &inverses);
        {
            let txn = document.transact();
            let (_, _, field) = field_node(&txn, &document, &page_id, &field_id).unwrap();
            assert!(document::field_validation(&txn, &field).is_none());
        }
        assert_eq!(document.snapshot().field(&page_id, &field_id).unwrap().label(), Some("Old"));
        undo(&document, &redo);
        let txn = document.transact();
        let (_, _, field) = field_node(&txn, &document, &page_id, &field_id).unwrap();
        assert!(document::field_validation(&txn, &field).is_some());
    }

    #[test]
    fn test_update_missing_field_is_skipped() {
        let document = ready();
        let page_id = page_with_fields(&document, &[]);
        assert!(matches!(
            update_field(&document, &page_id, "nope", &FieldUpdate::new().label("x")),
            Err(Skip::FieldNotFound { .. })
        ));
        assert!(matches!(
            update_field(&document, "nope", "nope", &FieldUpdate::new().label("x")),
            Err(Skip::PageNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_field_inserts_after_original() {
        let document = ready();
        let page_id = page_with_fields(&document, &["Name", "Email"]);
        let original = document.snapshot().page(&page_id).unwrap().fields[0].id.clone();
        commit(&document, duplicate_field(&document, &page_id, &original));

        let snapshot = document.snapshot();
        let fields = &snapshot.page(&page_id).unwrap().fields;
        assert_eq!(labels(&snapshot, &page_id), vec!["Name", "Name (Copy)", "Email"]);
        assert_ne!(fields[1].id, original);
    }

    #[test]
    fn test_duplicate_rich_text_keeps_content() {
        let document = ready();
        let page_id = page_with_fields(&document, &[]);
        let data = FieldUpdate::new().content("<p>Hi</p>");
        let plan = add_field(&document, &page_id, FieldType::RichText, &data).unwrap();
        let field_id = plan.created.clone().unwrap();
        commit(&document, Ok(plan));
        commit(&document, duplicate_field(&document, &page_id, &field_id));

        let snapshot = document.snapshot();
        let fields = &snapshot.page(&page_id).unwrap().fields;
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].content(), Some("<p>Hi</p>"));
        assert!(fields[1].label().is_none());
    }

    #[test]
    fn test_move_within_same_page_is_rejected() {
        let document = ready();
        let page_id = page_with_fields(&document, &["A", "B"]);
        let field_id = document.snapshot().pages[0].fields[0].id.clone();
        let before = document.snapshot();
        assert_eq!(
            move_field_between_pages(&document, &page_id, &page_id, &field_id, None),
            Err(Skip::SamePage(page_id.clone()))
        );
        assert_eq!(document.snapshot(), before);
    }

    #[test]
    fn test_move_and_copy_between_pages() {
        let document = ready();
        let first = page_with_fields(&document, &["A", "B"]);
        let second = page_with_fields(&document, &["X"]);
        let a = document.snapshot().page(&first).unwrap().fields[0].id.clone();

        commit(&document, move_field_between_pages(&document, &first, &second, &a, Some(0)));
        let snapshot = document.snapshot();
        assert_eq!(labels(&snapshot, &first), vec!["B"]);
        assert_eq!(labels(&snapshot, &second), vec!["A", "X"]);
        assert_eq!(snapshot.field(&second, &a).unwrap().id, a);

        commit(&document, copy_field_to_page(&document, &second, &first, &a));
        let snapshot = document.snapshot();
        assert_eq!(labels(&snapshot, &first), vec!["B", "A (Copy)"]);
        assert_eq!(labels(&snapshot, &second), vec!["A", "X"]);
    }

    #[test]
    fn test_inverses_restore_page_structure() {
        let document = ready();
        let first = page_with_fields(&document, &["A"]);
        page_with_fields(&document, &["B"]);
        let before = document.snapshot();

        let inverses = commit(&document, remove_page(&document, &first));
        assert_eq!(document.snapshot().pages.len(), 1);
        let redo = undo(&document, &inverses);
        assert_eq!(document.snapshot(), before);

        undo(&document, &redo);
        assert_eq!(document.snapshot().pages.len(), 1);
    }

    #[test]
    fn test_layout_and_shuffle() {
        let document = ready();
        let update = LayoutUpdate {
            theme: Some(Theme::Ocean),
            button_text: Some("Send".into()),
            ..LayoutUpdate::default()
        };
        let inverses = commit(&document, update_layout(&document, &update));
        commit(&document, set_shuffle_enabled(&document, true));

        let snapshot = document.snapshot();
        let layout = snapshot.layout.clone().unwrap();
        assert_eq!(layout.theme, Theme::Ocean);
        assert_eq!(layout.button_text, "Send");
        assert_eq!(snapshot.is_shuffle_enabled, Some(true));

        undo(&document, &inverses);
        assert_eq!(document.snapshot().layout.unwrap().theme, Theme::Light);
    }

    #[test]
    fn test_sequence_order_tolerates_stale_ids() {
        let current = vec![Some("a".to_string()), Some("b".to_string()), None, Some("c".to_string())];
        let wanted = vec!["c".to_string(), "gone".to_string(), "a".to_string()];
        assert_eq!(sequence_order(&current, &wanted), vec![3, 0, 1, 2]);
    }
}
