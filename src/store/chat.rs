//! Chat router session store
//!
//! A chat session pins a secret hash and the rolling message history for
//! the chat-completions adapter. History is trimmed on every write to a
//! fixed cap, and the trim boundary never separates a tool call from its
//! tool result: after cutting from the front, leading orphaned `tool`
//! messages are dropped too.

use crate::kv::Kv;
use crate::llm::ChatMessage;
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Chat sessions expire after an hour of inactivity
const CHAT_TTL: Duration = Duration::from_secs(60 * 60);

/// Cap on stored history messages
const MAX_HISTORY: usize = 40;

/// A chat router session, stored at `chat:session:{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub secret_hash: String,
    pub history: Vec<ChatMessage>,
}

/// Store for chat router sessions
#[derive(Clone)]
pub struct ChatStore {
    kv: Arc<dyn Kv>,
}

impl ChatStore {
    /// Create a chat store
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    fn key(id: &str) -> String {
        format!("chat:session:{}", id)
    }

    /// Hash a session secret for storage and comparison
    pub fn hash_secret(secret: &str) -> String {
        hex::encode(Sha256::digest(secret.as_bytes()))
    }

    /// Load a session
    pub async fn get(&self, id: &str) -> Result<Option<ChatSession>> {
        match self.kv.get(&Self::key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Write a session, trimming history to the cap first
    pub async fn put(&self, id: &str, mut session: ChatSession) -> Result<()> {
        session.history = trim_history(session.history, MAX_HISTORY);
        let raw = serde_json::to_string(&session)?;
        self.kv.set(&Self::key(id), &raw, Some(CHAT_TTL)).await
    }
}

/// Trim history to `cap` messages from the front, then advance past any
/// leading `tool` messages so a tool result never survives without the
/// assistant message that requested it
fn trim_history(history: Vec<ChatMessage>, cap: usize) -> Vec<ChatMessage> {
    if history.len() <= cap {
        return history;
    }
    let mut start = history.len() - cap;
    while start < history.len() && history[start].role == "tool" {
        start += 1;
    }
    history[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::llm::{FunctionCall, ToolCall};

    fn text(role: &str, content: &str) -> ChatMessage {
        ChatMessage::text(role, content)
    }

    fn assistant_with_call(id: &str) -> ChatMessage {
        let mut msg = ChatMessage::text("assistant", "");
        msg.tool_calls = Some(vec![ToolCall {
            id: id.to_string(),
            call_type: "function".into(),
            function: FunctionCall {
                name: "check_status".into(),
                arguments: "{}".into(),
            },
        }]);
        msg
    }

    #[test]
    fn test_trim_noop_under_cap() {
        let history = vec![text("user", "a"), text("assistant", "b")];
        assert_eq!(trim_history(history.clone(), 10).len(), 2);
    }

    #[test]
    fn test_trim_cuts_from_front() {
        let history: Vec<ChatMessage> =
            (0..6).map(|i| text("user", &format!("m{}", i))).collect();
        let trimmed = trim_history(history, 4);
        assert_eq!(trimmed.len(), 4);
        assert_eq!(trimmed[0].content.as_deref(), Some("m2"));
    }

    #[test]
    fn test_trim_keeps_complete_tool_pairs() {
        // Cap 3 starts the window at the assistant call, so the pair stays
        // intact.
        let history = vec![
            text("user", "old"),
            assistant_with_call("call_1"),
            ChatMessage::tool_result("call_1", "{}"),
            text("user", "new"),
        ];
        let trimmed = trim_history(history, 3);
        assert_eq!(trimmed.len(), 3);
        assert!(trimmed[0].has_tool_calls());
        assert_eq!(trimmed[1].role, "tool");
    }

    #[test]
    fn test_trim_drops_orphaned_tool_results() {
        // Cap 2 would start the window on the tool result; the boundary
        // rule walks past it instead of keeping an orphan.
        let history = vec![
            text("user", "old"),
            assistant_with_call("call_1"),
            ChatMessage::tool_result("call_1", "{}"),
            text("user", "new"),
        ];
        let trimmed = trim_history(history, 2);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].content.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_store_roundtrip_and_secret_hash() {
        let store = ChatStore::new(Arc::new(MemoryKv::new()));
        let session = ChatSession {
            secret_hash: ChatStore::hash_secret("hunter2"),
            history: vec![text("user", "hello")],
        };
        store.put("c1", session).await.unwrap();
        let loaded = store.get("c1").await.unwrap().unwrap();
        assert_eq!(loaded.secret_hash, ChatStore::hash_secret("hunter2"));
        assert_ne!(loaded.secret_hash, ChatStore::hash_secret("hunter3"));
        assert_eq!(loaded.history.len(), 1);
    }
}
