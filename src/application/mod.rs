//! Application services layer.

pub mod error;
pub mod generate;
pub mod repos;
pub mod sitemap;
