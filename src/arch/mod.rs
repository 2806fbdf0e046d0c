//! Architecture-specific definitions and register plumbing.

pub mod armv7;
