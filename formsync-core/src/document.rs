use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, Doc, Map, MapPrelim, MapRef, Out, ReadTxn, StateVector,
    Transact, Transaction, TransactionMut, Update,
};

use crate::error::{DocumentError, Result};
use crate::model::{Field, FormSnapshot, Page};
use crate::raw::{self, RawNode};
use crate::reconstruct::reconstruct;

/// Name of the root map every replica shares.
pub const ROOT_NAME: &str = "formSchema";

/// Keys used inside the shared document.
pub mod keys {
    pub const PAGES: &str = "pages";
    pub const LAYOUT: &str = "layout";
    pub const IS_SHUFFLE_ENABLED: &str = "isShuffleEnabled";

    pub const ID: &str = "id";
    pub const TITLE: &str = "title";
    pub const ORDER: &str = "order";
    pub const FIELDS: &str = "fields";

    pub const TYPE: &str = "type";
    pub const LABEL: &str = "label";
    pub const DEFAULT_VALUE: &str = "defaultValue";
    pub const PREFIX: &str = "prefix";
    pub const HINT: &str = "hint";
    pub const PLACEHOLDER: &str = "placeholder";
    pub const OPTIONS: &str = "options";
    pub const MIN: &str = "min";
    pub const MAX: &str = "max";
    pub const MIN_DATE: &str = "minDate";
    pub const MAX_DATE: &str = "maxDate";
    pub const CONTENT: &str = "content";
    pub const VALIDATION: &str = "validation";

    pub const REQUIRED: &str = "required";
    pub const MIN_LENGTH: &str = "minLength";
    pub const MAX_LENGTH: &str = "maxLength";
    pub const MIN_SELECTIONS: &str = "minSelections";
    pub const MAX_SELECTIONS: &str = "maxSelections";

    pub const THEME: &str = "theme";
    pub const SPACING: &str = "spacing";
    pub const LAYOUT_CODE: &str = "layoutCode";
    pub const TEXT_COLOR: &str = "textColor";
    pub const CUSTOM_BACKGROUND_COLOR: &str = "customBackgroundColor";
    pub const USE_CUSTOM_BACKGROUND: &str = "useCustomBackground";
    pub const BACKGROUND_IMAGE_KEY: &str = "backgroundImageKey";
    pub const BUTTON_TEXT: &str = "buttonText";
    pub const PAGE_MODE: &str = "pageMode";
}

/// One replica of a form schema.
pub struct FormDocument {
    doc: Doc,
    root: MapRef,
}

impl FormDocument {
    pub fn new() -> Self {
        Self::from_doc(Doc::new())
    }

    /// Fixed client id, so tests get reproducible merge outcomes.
    pub fn with_client_id(client_id: u64) -> Self {
        Self::from_doc(Doc::with_client_id(client_id))
    }

    fn from_doc(doc: Doc) -> Self {
        let root = doc.get_or_insert_map(ROOT_NAME);
        Self { doc, root }
    }

    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    pub fn root(&self) -> &MapRef {
        &self.root
    }

    pub fn client_id(&self) -> u64 {
        self.doc.client_id()
    }

    pub fn transact(&self) -> Transaction<'_> {
        self.doc.transact()
    }

    /// Open a write transaction tagged with `origin`.
    pub fn transact_mut_with(&self, origin: &str) -> TransactionMut<'_> {
        self.doc.transact_mut_with(origin)
    }

    /// Install `pages`, `layout` and `isShuffleEnabled` where missing.
    ///
    /// Returns whether anything was written. Existing values are never
    /// replaced: replacing a root key would discard a peer's subtree.
    pub fn ensure_structure(&self, txn: &mut TransactionMut) -> bool {
        let mut created = false;
        if !self.root.contains_key(txn, keys::PAGES) {
            self.root.insert(txn, keys::PAGES, ArrayPrelim::default());
            created = true;
        }
        if !self.root.contains_key(txn, keys::LAYOUT) {
            let layout = self.root.insert(txn, keys::LAYOUT, MapPrelim::default());
            let defaults = crate::model::Layout::default();
            layout.insert(txn, keys::THEME, defaults.theme.as_str());
            layout.insert(txn, keys::SPACING, defaults.spacing.as_str());
            layout.insert(txn, keys::LAYOUT_CODE, defaults.layout_code.as_str());
            layout.insert(txn, keys::BUTTON_TEXT, defaults.button_text.as_str());
            layout.insert(txn, keys::PAGE_MODE, defaults.page_mode.as_str());
            created = true;
        }
        if !self.root.contains_key(txn, keys::IS_SHUFFLE_ENABLED) {
            self.root.insert(txn, keys::IS_SHUFFLE_ENABLED, false);
            created = true;
        }
        created
    }

    pub fn pages<T: ReadTxn>(&self, txn: &T) -> Option<ArrayRef> {
        match self.root.get(txn, keys::PAGES) {
            Some(Out::YArray(pages)) => Some(pages),
            _ => None,
        }
    }

    pub fn layout<T: ReadTxn>(&self, txn: &T) -> Option<MapRef> {
        match self.root.get(txn, keys::LAYOUT) {
            Some(Out::YMap(layout)) => Some(layout),
            _ => None,
        }
    }

    /// Build the current view model.
    pub fn snapshot(&self) -> FormSnapshot {
        let txn = self.doc.transact();
        reconstruct(&txn, &self.root)
    }

    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    pub fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Everything this replica has that `remote_state_vector` lacks.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_state_vector)
            .map_err(|e| DocumentError::StateVector(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Merge an update produced by another replica.
    pub fn apply_update(&self, update: &[u8], origin: Option<&str>) -> Result<()> {
        let update = Update::decode_v1(update).map_err(|e| DocumentError::Decode(e.to_string()))?;
        let mut txn = match origin {
            Some(origin) => self.doc.transact_mut_with(origin),
            None => self.doc.transact_mut(),
        };
        txn.apply_update(update)
            .map_err(|e| DocumentError::Apply(e.to_string()))
    }
}

impl Default for FormDocument {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────────
// Node helpers
// ───────────────────────────────────────────────────────────────────

pub fn node_id<T: ReadTxn>(txn: &T, node: &MapRef) -> Option<String> {
    match node.get(txn, keys::ID) {
        Some(Out::Any(Any::String(id))) => Some(id.to_string()),
        _ => None,
    }
}

fn map_at<T: ReadTxn>(txn: &T, array: &ArrayRef, index: u32) -> Option<MapRef> {
    match array.get(txn, index) {
        Some(Out::YMap(map)) => Some(map),
        _ => None,
    }
}

/// Ids of the nodes in `array`, in sequence order. Non-map entries yield `None`.
pub fn node_ids<T: ReadTxn>(txn: &T, array: &ArrayRef) -> Vec<Option<String>> {
    array
        .iter(txn)
        .map(|item| match item {
            Out::YMap(map) => node_id(txn, &map),
            _ => None,
        })
        .collect()
}

/// Locate the node with `id` in `array`.
pub fn find_node<T: ReadTxn>(txn: &T, array: &ArrayRef, id: &str) -> Option<(u32, MapRef)> {
    (0..array.len(txn)).find_map(|index| {
        let map = map_at(txn, array, index)?;
        (node_id(txn, &map).as_deref() == Some(id)).then_some((index, map))
    })
}

pub fn page_fields<T: ReadTxn>(txn: &T, page: &MapRef) -> Option<ArrayRef> {
    match page.get(txn, keys::FIELDS) {
        Some(Out::YArray(fields)) => Some(fields),
        _ => None,
    }
}

/// Nested validation map of a field, if one was ever created.
pub fn field_validation<T: ReadTxn>(txn: &T, field: &MapRef) -> Option<MapRef> {
    match field.get(txn, keys::VALIDATION) {
        Some(Out::YMap(validation)) => Some(validation),
        _ => None,
    }
}

/// Set every page's `order` to its sequence position.
pub fn restamp_orders(txn: &mut TransactionMut, pages: &ArrayRef) {
    for index in 0..pages.len(txn) {
        let Some(page) = map_at(txn, pages, index) else {
            continue;
        };
        let current = match page.get(txn, keys::ORDER) {
            Some(Out::Any(Any::Number(order))) => Some(order),
            Some(Out::Any(Any::BigInt(order))) => Some(order as f64),
            _ => None,
        };
        if current != Some(f64::from(index)) {
            page.insert(txn, keys::ORDER, f64::from(index));
        }
    }
}

pub fn write_field(txn: &mut TransactionMut, fields: &ArrayRef, index: u32, field: &Field) -> MapRef {
    raw::insert_node(txn, fields, index, &raw::field_to_raw(field))
}

pub fn write_page(txn: &mut TransactionMut, pages: &ArrayRef, index: u32, page: &Page) -> MapRef {
    raw::insert_node(txn, pages, index, &raw::page_to_raw(page))
}

/// Raw entries of the field `field_id` on `page_id`.
pub fn read_field_raw<T: ReadTxn>(
    txn: &T,
    pages: &ArrayRef,
    page_id: &str,
    field_id: &str,
) -> Option<RawNode> {
    let (_, page) = find_node(txn, pages, page_id)?;
    let fields = page_fields(txn, &page)?;
    let (_, field) = find_node(txn, &fields, field_id)?;
    Some(raw::read_node(txn, &field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldType;

    fn seeded() -> FormDocument {
        let document = FormDocument::with_client_id(1);
        {
            let mut txn = document.transact_mut_with("seed");
            document.ensure_structure(&mut txn);
            let pages = document.pages(&txn).unwrap();
            let mut page = Page::new("p1", "Intro", 0);
            page.fields.push(Field::new("f1", FieldType::TextInput));
            write_page(&mut txn, &pages, 0, &page);
        }
        document
    }

    #[test]
    fn test_ensure_structure_only_once() {
        let document = FormDocument::new();
        let mut txn = document.transact_mut_with("local");
        assert!(document.ensure_structure(&mut txn));
        assert!(!document.ensure_structure(&mut txn));
    }

    #[test]
    fn test_ensure_structure_keeps_existing_pages() {
        let document = seeded();
        {
            let mut txn = document.transact_mut_with("local");
            assert!(!document.ensure_structure(&mut txn));
        }
        assert_eq!(document.snapshot().pages.len(), 1);
    }

    #[test]
    fn test_empty_document_has_no_structure() {
        let snapshot = FormDocument::new().snapshot();
        assert!(snapshot.pages.is_empty());
        assert!(snapshot.layout.is_none());
        assert!(snapshot.is_shuffle_enabled.is_none());
    }

    #[test]
    fn test_find_nodes_and_fields() {
        let document = seeded();
        let txn = document.transact();
        let pages = document.pages(&txn).unwrap();
        let (index, page) = find_node(&txn, &pages, "p1").unwrap();
        assert_eq!(index, 0);
        let fields = page_fields(&txn, &page).unwrap();
        assert!(find_node(&txn, &fields, "f1").is_some());
        assert!(find_node(&txn, &fields, "missing").is_none());

        let raw = read_field_raw(&txn, &pages, "p1", "f1").unwrap();
        assert_eq!(raw.get(keys::LABEL).and_then(|v| v.as_str()), Some("Text Input"));
    }

    #[test]
    fn test_restamp_orders() {
        let document = seeded();
        {
            let mut txn = document.transact_mut_with("local");
            let pages = document.pages(&txn).unwrap();
            write_page(&mut txn, &pages, 0, &Page::new("p0", "Cover", 7));
            restamp_orders(&mut txn, &pages);
        }
        let snapshot = document.snapshot();
        let orders: Vec<u32> = snapshot.pages.iter().map(|page| page.order).collect();
        assert_eq!(snapshot.page_ids(), vec!["p0", "p1"]);
        assert_eq!(orders, vec![0, 1]);
    }

    #[test]
    fn test_state_exchange_converges() {
        let a = seeded();
        let b = FormDocument::with_client_id(2);
        b.apply_update(&a.encode_state_as_update(), None).unwrap();
        assert_eq!(a.snapshot(), b.snapshot());

        {
            let mut txn = b.transact_mut_with("b");
            let pages = b.pages(&txn).unwrap();
            write_page(&mut txn, &pages, 1, &Page::new("p2", "Details", 1));
        }
        let diff = b.encode_diff(&a.encode_state_vector()).unwrap();
        a.apply_update(&diff, Some("remote")).unwrap();
        assert_eq!(a.snapshot().page_ids(), vec!["p1", "p2"]);
    }

    #[test]
    fn test_checkbox_default_as_shared_array() {
        let document = FormDocument::with_client_id(3);
        {
            let mut txn = document.transact_mut_with("seed");
            document.ensure_structure(&mut txn);
            let pages = document.pages(&txn).unwrap();
            let mut page = Page::new("p1", "Prefs", 0);
            page.fields.push(Field::new("c1", FieldType::Checkbox));
            write_page(&mut txn, &pages, 0, &page);

            let (_, page) = find_node(&txn, &pages, "p1").unwrap();
            let fields = page_fields(&txn, &page).unwrap();
            let (_, field) = find_node(&txn, &fields, "c1").unwrap();
            let defaults = field.insert(&mut txn, keys::DEFAULT_VALUE, ArrayPrelim::default());
            for choice in ["Red", " ", "Blue"] {
                defaults.push_back(&mut txn, choice);
            }
        }

        let snapshot = document.snapshot();
        let input = snapshot.field("p1", "c1").unwrap().input().unwrap();
        assert_eq!(
            input.default_value,
            crate::model::DefaultValue::Choices(vec!["Red".into(), "Blue".into()])
        );
    }

    #[test]
    fn test_garbage_update_is_rejected() {
        let document = FormDocument::new();
        assert!(matches!(
            document.apply_update(&[0xff, 0xff, 0xff], None),
            Err(DocumentError::Decode(_)) | Err(DocumentError::Apply(_))
        ));
        assert!(document.encode_diff(&[0xff, 0xff]).is_err());
    }
}
