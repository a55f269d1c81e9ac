pub mod db;
mod documents;
mod tables;

pub use db::{Database, DatabaseError};
pub use tables::*;
