use std::time::Duration;

/// Mirrors the original `DynamoDB` config block: endpoint override (for
/// local/dynamodb-local testing), table name, and adaptive-retry bounds.
#[derive(Debug, Clone)]
pub struct DynamoConfig {
    pub endpoint: Option<String>,
    pub table_name: String,
    pub retry_max: u32,
    pub retry_wait_max: Duration,
}

impl Default for DynamoConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            table_name: "pipeline-messages".to_string(),
            retry_max: 5,
            retry_wait_max: Duration::from_secs(20),
        }
    }
}
