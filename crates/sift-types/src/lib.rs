//! Sift Types
//!
//! Core data types shared by the Sift rule engine crates: the dynamic
//! [`FactValue`] domain (string, number, boolean, null and nested lists) and
//! the immutable [`Fact`] record that flows through the discrimination
//! network.

mod fact;
mod value;

pub use fact::{Fact, FactId, ID_FIELD};
pub use value::FactValue;
