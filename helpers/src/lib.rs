pub mod general;
pub mod geometry;
