pub mod point_cloud;
pub mod table;

pub use table::{ProjectionTable, Ray};
