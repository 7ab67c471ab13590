//! Terminal output helpers.

pub mod events;
pub mod tables;

pub use events::describe_event;
pub use tables::{print_separator, truncate_string};
