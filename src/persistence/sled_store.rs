//! Message store backed by `sled`
//!
//! Each recipient gets its own tree (`recipient:{id}`) keyed by message id,
//! and a shared `message_index` tree maps message ids back to recipients so a
//! delivery acknowledgement can be applied by id alone.
//!
//! Configuration options supported:
//! - `ttl_seconds`: optional retention for delivered records; older ones are
//!   removed when a recipient's records are loaded. Undelivered records are
//!   kept until they are delivered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use tracing::{debug, warn};

use crate::broker::message::ChatMessage;
use crate::utils::error::StoreError;

const INDEX_TREE: &str = "message_index";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Undelivered,
    Delivered,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub message_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StoredMessage {
    /// A fresh undelivered record for `message`, stamped with `now`.
    pub fn undelivered(message: &ChatMessage, now: DateTime<Utc>) -> Self {
        Self {
            message_id: message.message_id.clone(),
            sender_id: message.sender_id.clone(),
            recipient_id: message.recipient_id.clone(),
            content: message.content.clone(),
            timestamp: message.timestamp.or(Some(now)),
            kind: message.kind.clone(),
            status: DeliveryStatus::Undelivered,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// The producer-facing shape, without any storage bookkeeping.
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            message_id: self.message_id.clone(),
            sender_id: self.sender_id.clone(),
            recipient_id: self.recipient_id.clone(),
            content: self.content.clone(),
            timestamp: self.timestamp,
            kind: self.kind.clone(),
        }
    }
}

/// Storage query used by the reconciler: every record addressed to
/// `recipient` that is still marked undelivered.
pub trait UndeliveredSource: Send + Sync {
    fn fetch_undelivered(&self, recipient: &str) -> Result<Vec<StoredMessage>, StoreError>;
}

#[derive(Clone)]
pub struct SledStore {
    db: Db,
    ttl_seconds: Option<i64>,
}

impl SledStore {
    /// Open or create a sled database at `path`.
    pub fn open(path: &str, ttl_seconds: Option<i64>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db, ttl_seconds })
    }

    fn recipient_tree(&self, recipient: &str) -> Result<Tree, StoreError> {
        Ok(self.db.open_tree(format!("recipient:{recipient}"))?)
    }

    /// Insert or overwrite a record.
    pub fn store(&self, record: &StoredMessage) -> Result<(), StoreError> {
        let serialized = serde_json::to_vec(record)?;
        let tree = self.recipient_tree(&record.recipient_id)?;
        tree.insert(record.message_id.as_bytes(), serialized)?;
        self.db
            .open_tree(INDEX_TREE)?
            .insert(record.message_id.as_bytes(), record.recipient_id.as_bytes())?;
        Ok(())
    }

    /// Persist `message` as undelivered and return the stored record.
    pub fn save_undelivered(&self, message: &ChatMessage) -> Result<StoredMessage, StoreError> {
        let record = StoredMessage::undelivered(message, Utc::now());
        self.store(&record)?;
        debug!(message_id = %record.message_id, recipient = %record.recipient_id, "stored undelivered message");
        Ok(record)
    }

    pub fn get(
        &self,
        recipient: &str,
        message_id: &str,
    ) -> Result<Option<StoredMessage>, StoreError> {
        let tree = self.recipient_tree(recipient)?;
        match tree.get(message_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Flip `recipient`'s record to delivered. Returns `false` for unknown
    /// ids, for records that were already delivered and for records addressed
    /// to someone else.
    pub fn mark_delivered(&self, recipient: &str, message_id: &str) -> Result<bool, StoreError> {
        let Some(owner) = self.db.open_tree(INDEX_TREE)?.get(message_id.as_bytes())? else {
            return Ok(false);
        };
        if &owner[..] != recipient.as_bytes() {
            warn!(message_id, recipient, "refusing to mark another recipient's message delivered");
            return Ok(false);
        }

        let Some(mut record) = self.get(recipient, message_id)? else {
            return Ok(false);
        };
        if record.status == DeliveryStatus::Delivered {
            return Ok(false);
        }
        record.status = DeliveryStatus::Delivered;
        record.updated_at = Some(Utc::now());
        self.store(&record)?;
        debug!(message_id, recipient, "marked delivered");
        Ok(true)
    }

    /// Every record for `recipient`, after applying retention. Records that
    /// fail to decode are skipped.
    pub fn load_for_recipient(&self, recipient: &str) -> Result<Vec<StoredMessage>, StoreError> {
        self.cleanup_expired(recipient)?;
        let tree = self.recipient_tree(recipient)?;

        Ok(tree
            .iter()
            .filter_map(|res| res.ok())
            .filter_map(|(key, val)| match serde_json::from_slice(&val) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(recipient, key = %String::from_utf8_lossy(&key), error = %e, "skipping corrupt record");
                    None
                }
            })
            .collect())
    }

    pub fn count_undelivered(&self, recipient: &str) -> Result<usize, StoreError> {
        Ok(self.fetch_undelivered(recipient)?.len())
    }

    pub fn flush(&self) -> Result<usize, StoreError> {
        Ok(self.db.flush()?)
    }

    /// Remove delivered records older than the TTL for a single recipient.
    fn cleanup_expired(&self, recipient: &str) -> Result<(), StoreError> {
        let Some(ttl) = self.ttl_seconds else {
            return Ok(());
        };
        let Some(expiry) = chrono::TimeDelta::try_seconds(ttl)
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return Ok(());
        };

        let tree = self.recipient_tree(recipient)?;
        let expired: Vec<_> = tree
            .iter()
            .filter_map(|res| res.ok())
            .filter_map(|(key, val)| {
                let record: StoredMessage = serde_json::from_slice(&val).ok()?;
                let stamped = record.updated_at.or(record.created_at)?;
                (record.status == DeliveryStatus::Delivered && stamped < expiry).then_some(key)
            })
            .collect();

        let index = self.db.open_tree(INDEX_TREE)?;
        for key in expired {
            tree.remove(&key)?;
            index.remove(&key)?;
        }
        Ok(())
    }
}

impl UndeliveredSource for SledStore {
    fn fetch_undelivered(&self, recipient: &str) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self
            .load_for_recipient(recipient)?
            .into_iter()
            .filter(|record| record.status == DeliveryStatus::Undelivered)
            .collect())
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}
