//! home to blindtiming's cross-cutting traits, utilities, etc... Follows
//! the same structure as [`std`] where possible.

pub mod named;
pub mod ops;
pub mod time;
