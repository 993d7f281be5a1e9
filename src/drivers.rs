//! Shipped hardware backends.

pub mod hwmon;
pub mod riing_quad;
