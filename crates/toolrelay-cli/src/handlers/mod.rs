//! Command handlers.

pub mod call;
pub mod replay;
pub mod servers;
pub mod tools;
