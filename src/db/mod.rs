mod connection;
pub mod helpers;
mod migrations;
pub mod models;
pub mod repositories;

pub use connection::{Database, QueryTimeout};
pub use models::*;
