//! Configuration resolved once at startup

mod schema;

pub use schema::*;
