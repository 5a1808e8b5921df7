pub mod pg_store;
pub mod pool;
pub mod schema;
pub mod store;
