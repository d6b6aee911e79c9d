pub mod models;

pub use models::{month_bounds, Coordinate, Post, Radius, ViewRecord};
