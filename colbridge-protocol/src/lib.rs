pub mod error;
pub mod meta;
pub mod options;
pub mod request;
pub mod row;

pub use error::{EngineError, Error, ErrorCode, Result};
pub use meta::QueryMetadata;
pub use options::ClusterOptions;
pub use request::QueryRequest;
pub use row::Row;
