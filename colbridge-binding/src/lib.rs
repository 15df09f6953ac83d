pub mod connection;
pub mod executor;
pub mod instance;
pub mod logger;
pub mod query_result;

pub use connection::Connection;
pub use executor::{QueryExecutor, StreamingState};
pub use instance::{Instance, InstanceState};
pub use query_result::QueryResult;
