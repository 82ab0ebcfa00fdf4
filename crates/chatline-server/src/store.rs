//! In-memory conversation store.
//!
//! Backs both the hub's [`ChatService`] and the conversation HTTP API.
//! Conversations live in one map; each user's view of them (unread count,
//! last activity) lives in a second map keyed by user id.

use std::collections::HashMap;

use async_trait::async_trait;
use chatline_hub::{ChatMessage, ChatService, IncomingEvent, OutgoingEvent, RequestType, ServiceError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Number of most recent messages included in a conversation view.
pub const RECENT_MESSAGES: usize = 20;

/// One-to-one or group conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationKind {
    OneToOne,
    Group,
}

impl ConversationKind {
    fn for_participants(count: usize) -> Self {
        if count > 2 {
            ConversationKind::Group
        } else {
            ConversationKind::OneToOne
        }
    }
}

#[derive(Debug, Clone)]
struct Conversation {
    participants: Vec<String>,
    kind: ConversationKind,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Copy)]
struct Membership {
    unread_count: u32,
    last_updated: DateTime<Utc>,
}

/// A conversation as seen by one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: String,
    pub participants: Vec<String>,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    /// Most recent messages, oldest first
    pub messages: Vec<ChatMessage>,
    pub unread_count: u32,
}

/// Body of a create-conversation request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewConversation {
    pub participants: Vec<String>,
    #[serde(default)]
    pub message: Option<ChatMessage>,
}

/// Thread-safe conversation store.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: DashMap<String, Conversation>,
    memberships: DashMap<String, HashMap<String, Membership>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a conversation. The creator is always a participant and the
    /// optional first message is attributed to them.
    #[instrument(skip_all, fields(creator = %creator))]
    pub fn create_conversation(
        &self,
        creator: &str,
        request: NewConversation,
    ) -> Result<ConversationView, ServiceError> {
        let mut participants = request.participants;
        participants.push(creator.to_string());
        participants.retain(|p| !p.is_empty());
        participants.sort();
        participants.dedup();

        if participants.len() < 2 {
            return Err(ServiceError::InvalidRequest(
                "a conversation needs at least one other participant".to_string(),
            ));
        }
        if self
            .conversations
            .iter()
            .any(|entry| entry.value().participants == participants)
        {
            return Err(ServiceError::Conflict(
                "conversation with these participants already exists".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let messages = request
            .message
            .map(|message| {
                vec![ChatMessage {
                    id: Some(Uuid::new_v4().to_string()),
                    sender_id: creator.to_string(),
                    created_at: Some(now),
                    ..message
                }]
            })
            .unwrap_or_default();
        let kind = ConversationKind::for_participants(participants.len());

        self.conversations.insert(
            id.clone(),
            Conversation {
                participants: participants.clone(),
                kind,
                messages: messages.clone(),
            },
        );
        for user_id in &participants {
            let unread_count = u32::from(user_id != creator && !messages.is_empty());
            self.memberships.entry(user_id.clone()).or_default().insert(
                id.clone(),
                Membership {
                    unread_count,
                    last_updated: now,
                },
            );
        }

        info!(conversation_id = %id, participants = participants.len(), "Created conversation");
        Ok(ConversationView {
            id,
            participants,
            kind,
            messages,
            unread_count: 0,
        })
    }

    /// Fetch one conversation the user takes part in.
    pub fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<ConversationView, ServiceError> {
        let membership = self
            .membership(user_id, conversation_id)
            .ok_or_else(|| not_found(conversation_id))?;
        self.view(conversation_id, membership)
    }

    /// All conversations of a user, most recently active first.
    pub fn list_conversations(&self, user_id: &str) -> Vec<ConversationView> {
        let mut memberships: Vec<(String, Membership)> = self
            .memberships
            .get(user_id)
            .map(|entry| entry.iter().map(|(id, m)| (id.clone(), *m)).collect())
            .unwrap_or_default();
        memberships.sort_by(|a, b| b.1.last_updated.cmp(&a.1.last_updated));

        memberships
            .into_iter()
            .filter_map(|(id, membership)| self.view(&id, membership).ok())
            .collect()
    }

    /// Reset the user's unread count for a conversation.
    pub fn mark_read(&self, user_id: &str, conversation_id: &str) -> Result<(), ServiceError> {
        let mut entry = self
            .memberships
            .get_mut(user_id)
            .ok_or_else(|| not_found(conversation_id))?;
        let membership = entry
            .get_mut(conversation_id)
            .ok_or_else(|| not_found(conversation_id))?;
        membership.unread_count = 0;
        debug!(user_id, conversation_id, "Marked conversation as read");
        Ok(())
    }

    fn membership(&self, user_id: &str, conversation_id: &str) -> Option<Membership> {
        self.memberships
            .get(user_id)
            .and_then(|entry| entry.get(conversation_id).copied())
    }

    fn view(&self, conversation_id: &str, membership: Membership) -> Result<ConversationView, ServiceError> {
        let conversation = self
            .conversations
            .get(conversation_id)
            .ok_or_else(|| not_found(conversation_id))?;
        let skip = conversation.messages.len().saturating_sub(RECENT_MESSAGES);
        Ok(ConversationView {
            id: conversation_id.to_string(),
            participants: conversation.participants.clone(),
            kind: conversation.kind,
            messages: conversation.messages[skip..].to_vec(),
            unread_count: membership.unread_count,
        })
    }

    fn touch(&self, participants: &[String], conversation_id: &str, sender: Option<&str>, now: DateTime<Utc>) {
        for user_id in participants {
            let mut entry = self.memberships.entry(user_id.clone()).or_default();
            let membership = entry.entry(conversation_id.to_string()).or_insert(Membership {
                unread_count: 0,
                last_updated: now,
            });
            if let Some(sender) = sender {
                if sender != user_id {
                    membership.unread_count += 1;
                }
            }
            membership.last_updated = now;
        }
    }
}

fn not_found(conversation_id: &str) -> ServiceError {
    ServiceError::NotFound(format!("conversation {}", conversation_id))
}

fn require_conversation_id(event: &IncomingEvent) -> Result<String, ServiceError> {
    event
        .conversation_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ServiceError::InvalidRequest("conversationId is required".to_string()))
}

#[async_trait]
impl ChatService for ConversationStore {
    async fn add_message(&self, event: IncomingEvent) -> Result<OutgoingEvent, ServiceError> {
        let conversation_id = require_conversation_id(&event)?;
        let message = event
            .message
            .ok_or_else(|| ServiceError::InvalidRequest("message is required".to_string()))?;

        let now = Utc::now();
        let stored = ChatMessage {
            id: Some(Uuid::new_v4().to_string()),
            created_at: Some(now),
            ..message
        };

        let participants = {
            let mut conversation = self
                .conversations
                .get_mut(&conversation_id)
                .ok_or_else(|| not_found(&conversation_id))?;
            if !conversation.participants.contains(&stored.sender_id) {
                return Err(ServiceError::InvalidRequest(format!(
                    "{} is not a participant of {}",
                    stored.sender_id, conversation_id
                )));
            }
            conversation.messages.push(stored.clone());
            conversation.participants.clone()
        };
        self.touch(&participants, &conversation_id, Some(&stored.sender_id), now);

        debug!(conversation_id = %conversation_id, "Stored message");
        Ok(OutgoingEvent {
            conversation_id: Some(conversation_id),
            request_type: RequestType::AddMessage,
            message: Some(stored),
            participants,
            origin: None,
        })
    }

    async fn add_participant(&self, event: IncomingEvent) -> Result<OutgoingEvent, ServiceError> {
        let conversation_id = require_conversation_id(&event)?;
        let added = event
            .participants
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ServiceError::InvalidRequest("participants are required".to_string()))?;

        let participants = {
            let mut conversation = self
                .conversations
                .get_mut(&conversation_id)
                .ok_or_else(|| not_found(&conversation_id))?;
            let mut merged = conversation.participants.clone();
            merged.extend(added.into_iter().filter(|p| !p.is_empty()));
            merged.sort();
            merged.dedup();
            conversation.kind = ConversationKind::for_participants(merged.len());
            conversation.participants = merged.clone();
            merged
        };
        self.touch(&participants, &conversation_id, None, Utc::now());

        debug!(conversation_id = %conversation_id, participants = participants.len(), "Updated participants");
        Ok(OutgoingEvent {
            conversation_id: Some(conversation_id),
            request_type: RequestType::AddParticipant,
            message: None,
            participants,
            origin: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(body: &str) -> ChatMessage {
        ChatMessage {
            content_type: "text".to_string(),
            body: body.to_string(),
            ..ChatMessage::default()
        }
    }

    fn create(store: &ConversationStore, creator: &str, others: &[&str]) -> ConversationView {
        store
            .create_conversation(
                creator,
                NewConversation {
                    participants: others.iter().map(|s| s.to_string()).collect(),
                    message: Some(text("hello")),
                },
            )
            .unwrap()
    }

    fn message_event(conversation_id: &str, sender: &str, body: &str) -> IncomingEvent {
        IncomingEvent {
            conversation_id: Some(conversation_id.to_string()),
            message: Some(ChatMessage {
                sender_id: sender.to_string(),
                ..text(body)
            }),
            ..IncomingEvent::new(RequestType::AddMessage)
        }
    }

    #[test]
    fn test_create_includes_creator() {
        let store = ConversationStore::new();
        let view = create(&store, "alice", &["bob"]);

        assert_eq!(view.participants, vec!["alice", "bob"]);
        assert_eq!(view.kind, ConversationKind::OneToOne);
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].sender_id, "alice");
        assert!(view.messages[0].id.is_some());

        assert_eq!(store.get_conversation("bob", &view.id).unwrap().unread_count, 1);
        assert_eq!(store.get_conversation("alice", &view.id).unwrap().unread_count, 0);
    }

    #[test]
    fn test_create_rejects_lonely_and_duplicate_conversations() {
        let store = ConversationStore::new();
        let lonely = store.create_conversation("alice", NewConversation::default());
        assert!(matches!(lonely, Err(ServiceError::InvalidRequest(_))));

        create(&store, "alice", &["bob"]);
        let again = store.create_conversation(
            "bob",
            NewConversation {
                participants: vec!["alice".to_string()],
                message: None,
            },
        );
        assert!(matches!(again, Err(ServiceError::Conflict(_))));
    }

    #[test]
    fn test_get_requires_membership() {
        let store = ConversationStore::new();
        let view = create(&store, "alice", &["bob"]);
        assert!(matches!(
            store.get_conversation("carol", &view.id),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_message_bumps_unread_for_others() {
        let store = ConversationStore::new();
        let view = create(&store, "alice", &["bob", "carol"]);
        assert_eq!(view.kind, ConversationKind::Group);

        let event = store
            .add_message(message_event(&view.id, "bob", "hi all"))
            .await
            .unwrap();
        assert_eq!(event.request_type, RequestType::AddMessage);
        assert_eq!(event.participants, vec!["alice", "bob", "carol"]);
        let message = event.message.unwrap();
        assert!(message.id.is_some());
        assert!(message.created_at.is_some());

        assert_eq!(store.get_conversation("alice", &view.id).unwrap().unread_count, 1);
        assert_eq!(store.get_conversation("bob", &view.id).unwrap().unread_count, 1);
        assert_eq!(store.get_conversation("carol", &view.id).unwrap().unread_count, 2);

        store.mark_read("carol", &view.id).unwrap();
        assert_eq!(store.get_conversation("carol", &view.id).unwrap().unread_count, 0);
    }

    #[tokio::test]
    async fn test_add_message_to_unknown_conversation() {
        let store = ConversationStore::new();
        let result = store.add_message(message_event("missing", "alice", "hi")).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));

        let mut event = message_event("missing", "alice", "hi");
        event.message = None;
        assert!(matches!(
            store.add_message(event).await,
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_add_message_from_outsider_rejected() {
        let store = ConversationStore::new();
        let view = create(&store, "alice", &["bob"]);

        let result = store.add_message(message_event(&view.id, "mallory", "hi")).await;
        assert!(matches!(result, Err(ServiceError::InvalidRequest(_))));

        let view = store.get_conversation("bob", &view.id).unwrap();
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.unread_count, 1);
    }

    #[tokio::test]
    async fn test_add_participant_returns_updated_list() {
        let store = ConversationStore::new();
        let view = create(&store, "alice", &["bob"]);

        let event = store
            .add_participant(IncomingEvent {
                conversation_id: Some(view.id.clone()),
                participants: Some(vec!["dave".to_string(), "bob".to_string(), "carol".to_string()]),
                ..IncomingEvent::new(RequestType::AddParticipant)
            })
            .await
            .unwrap();

        assert_eq!(event.participants, vec!["alice", "bob", "carol", "dave"]);
        let dave_view = store.get_conversation("dave", &view.id).unwrap();
        assert_eq!(dave_view.kind, ConversationKind::Group);
        assert_eq!(dave_view.unread_count, 0);
    }

    #[tokio::test]
    async fn test_list_orders_by_activity_and_keeps_recent_messages() {
        let store = ConversationStore::new();
        let older = create(&store, "alice", &["bob"]);
        let newer = create(&store, "alice", &["carol"]);

        for i in 0..25 {
            store
                .add_message(message_event(&older.id, "bob", &format!("m{}", i)))
                .await
                .unwrap();
        }

        let list = store.list_conversations("alice");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, older.id);
        assert_eq!(list[1].id, newer.id);
        assert_eq!(list[0].messages.len(), RECENT_MESSAGES);
        assert_eq!(list[0].messages.last().unwrap().body, "m24");
        assert!(store.list_conversations("nobody").is_empty());
    }
}
