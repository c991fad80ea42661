/// Connection pool setup and migrations
pub mod connection;
/// Typed records and their queries
pub mod models;
