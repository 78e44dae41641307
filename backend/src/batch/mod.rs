pub mod item;
pub mod model;
pub mod registry;
pub mod repository;
pub mod repository_sqlx;
