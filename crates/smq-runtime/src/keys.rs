//! Store key layout.
//!
//! All keys of a client live under its namespace:
//!
//! | Key                   | Type       | Content                                   |
//! |-----------------------|------------|-------------------------------------------|
//! | `{ns}:QUEUES`         | set        | names of existing queues                  |
//! | `{ns}:{queue}:Q`      | hash       | queue attributes and counters             |
//! | `{ns}:{queue}:M`      | hash       | message bodies and per-message metadata   |
//! | `{ns}:{queue}:ready`  | sorted set | message ids scored by ready time          |
//! | `{ns}:{queue}:hidden` | sorted set | claimed ids scored by visibility deadline |

use crate::message::{Namespace, QueueName};

/// Attribute hash fields
pub mod attribute {
    pub const VISIBILITY_TIMEOUT: &str = "vt";
    pub const DELAY: &str = "delay";
    pub const MAX_SIZE: &str = "maxsize";
    pub const CREATED: &str = "created";
    pub const MODIFIED: &str = "modified";
    pub const TOTAL_SENT: &str = "totalsent";
    pub const TOTAL_RECEIVED: &str = "totalrecv";
    pub const SEQUENCE: &str = "seq";
}

/// Suffixes of per-message fields in the message hash; the body is stored
/// under the bare id
pub mod message_field {
    pub const RECEIVE_COUNT: &str = ":rc";
    pub const FIRST_RECEIVED: &str = ":fr";
    pub const SENT: &str = ":sent";
    pub const READY_AT: &str = ":rt";
}

/// Keys of one queue, in the order scripts expect them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub attributes: String,
    pub messages: String,
    pub ready: String,
    pub hidden: String,
}

impl QueueKeys {
    /// Script key list: attributes, messages, ready, hidden
    pub fn to_vec(&self) -> Vec<String> {
        vec![
            self.attributes.clone(),
            self.messages.clone(),
            self.ready.clone(),
            self.hidden.clone(),
        ]
    }
}

/// Key builder for one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: Namespace,
}

impl KeySpace {
    pub fn new(namespace: Namespace) -> Self {
        Self { namespace }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Set of queue names
    pub fn queues(&self) -> String {
        format!("{}:QUEUES", self.namespace)
    }

    pub fn queue(&self, queue: &QueueName) -> QueueKeys {
        let prefix = format!("{}:{}", self.namespace, queue);
        QueueKeys {
            attributes: format!("{}:Q", prefix),
            messages: format!("{}:M", prefix),
            ready: format!("{}:ready", prefix),
            hidden: format!("{}:hidden", prefix),
        }
    }

    /// Script key list for registry scripts: the queue set followed by the
    /// queue's own keys
    pub fn registry_keys(&self, queue: &QueueName) -> Vec<String> {
        let mut keys = vec![self.queues()];
        keys.extend(self.queue(queue).to_vec());
        keys
    }
}

/// Every message hash field belonging to the message with text id `id`
pub fn message_fields(id: &str) -> Vec<String> {
    vec![
        id.to_string(),
        format!("{}{}", id, message_field::RECEIVE_COUNT),
        format!("{}{}", id, message_field::FIRST_RECEIVED),
        format!("{}{}", id, message_field::SENT),
        format!("{}{}", id, message_field::READY_AT),
    ]
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod tests;
