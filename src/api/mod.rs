pub mod models;
pub mod subtitle;
