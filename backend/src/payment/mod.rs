pub mod allocator;
pub mod model;
pub mod repository;
pub mod repository_sqlx;
pub mod reversal;
