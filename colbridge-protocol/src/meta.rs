use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Summary of a concluded query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub request_id: String,
    pub warnings: Vec<QueryWarning>,
    pub metrics: QueryMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWarning {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMetrics {
    #[serde(with = "millis")]
    pub elapsed_time: Duration,
    #[serde(with = "millis")]
    pub execution_time: Duration,
    pub result_count: u64,
    pub result_size: u64,
    pub processed_objects: u64,
}

/// Durations are exposed to the host as milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[inline]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    #[inline]
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_to_json() {
        let meta = QueryMetadata {
            request_id: "r-1".to_string(),
            warnings: vec![QueryWarning {
                code: 1,
                message: "slow".to_string(),
            }],
            metrics: QueryMetrics {
                elapsed_time: Duration::from_millis(12),
                execution_time: Duration::from_millis(10),
                result_count: 2,
                result_size: 20,
                processed_objects: 2,
            },
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["metrics"]["elapsed_time"], json!(12));
        assert_eq!(value["warnings"][0]["message"], json!("slow"));
        let back: QueryMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back, meta);
    }
}
