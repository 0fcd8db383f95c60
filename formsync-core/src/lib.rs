//! Shared form-schema document and its view model.
//!
//! A [`FormDocument`] wraps one `yrs` replica. [`reconstruct`] turns its
//! current state into a plain [`FormSnapshot`]; nothing outside this crate
//! needs to touch `yrs` types to read a form.

pub mod document;
pub mod error;
pub mod model;
pub mod normalize;
pub mod raw;
pub mod reconstruct;
pub mod update;

pub use document::{FormDocument, ROOT_NAME};
pub use error::{DocumentError, Result};
pub use model::{
    DefaultValue, Field, FieldBody, FieldType, FormSnapshot, InputField, Layout, LayoutCode, Page,
    PageMode, Spacing, Theme, Validation,
};
pub use raw::{Patch, RawNode, RawValue};
pub use reconstruct::reconstruct;
pub use update::{FieldUpdate, LayoutUpdate, ValidationUpdate};
