use yrs::{MapRef, ReadTxn};

use crate::model::FormSnapshot;
use crate::normalize::normalize_snapshot;
use crate::raw::read_node;

/// Walk the document below `root` and build the view model.
///
/// Output depends only on document content: entries are read into ordered
/// maps and sequences keep their replicated order.
pub fn reconstruct<T: ReadTxn>(txn: &T, root: &MapRef) -> FormSnapshot {
    normalize_snapshot(&read_node(txn, root))
}
