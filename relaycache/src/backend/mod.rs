//! Concrete [`crate::object::Backend`] implementations (C3-C6).

pub mod disk;
pub mod memory;
pub mod remote;
pub mod tiered;
