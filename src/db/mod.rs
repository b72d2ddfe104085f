// Database module
// SQLite storage for the resumable session

pub mod connection;
pub mod migrations;
pub mod operations;

pub use connection::DatabaseConnection;
pub use operations::DbOperations;
