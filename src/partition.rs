//! Partition identity shared by the cache, the store and the engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A (topic, partition) pair identifying one partition of the log
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub topic: String,
    pub partition: i32,
}

impl PartitionKey {
    /// Create a new partition key
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    /// Key used by stores, namespaced by consumer group: `group:topic:partition`
    pub fn store_key(&self, group_id: &str) -> String {
        format!("{}:{}:{}", group_id, self.topic, self.partition)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition)
    }
}

impl FromStr for PartitionKey {
    type Err = String;

    /// Parse `topic:partition`; the topic itself may contain colons
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (topic, partition) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("Invalid partition key '{}': expected topic:partition", s))?;
        if topic.is_empty() {
            return Err(format!("Invalid partition key '{}': empty topic", s));
        }
        let partition = partition
            .parse::<i32>()
            .map_err(|e| format!("Invalid partition number in '{}': {}", s, e))?;
        Ok(Self::new(topic, partition))
    }
}
