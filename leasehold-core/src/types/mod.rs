mod lease;
mod primitives;

pub use lease::Lease;
pub use primitives::{LOCK_TYPE, PRESENCE_TYPE, Resource, TypeCode, TypeFilter};
