//! Text analysis helpers applied to message bodies before dispatch.

pub mod code;

pub use code::{extract, extract_labelled, extract_proximate, mentions_code};
