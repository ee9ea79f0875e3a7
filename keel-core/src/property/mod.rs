//! Property codec
//!
//! Entities are persisted as a flat [`PropertyList`] rather than as an
//! opaque blob. Any serde-serializable struct can be flattened with
//! [`to_properties`] and read back with [`from_properties`], including into
//! a different struct whose field paths are compatible.

mod de;
mod ser;
mod value;

pub use de::from_properties;
pub use ser::to_properties;
pub use value::{PropertyList, Value};
