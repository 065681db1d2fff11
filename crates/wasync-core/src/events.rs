use serde::{Deserialize, Serialize};

use crate::payloads::{
    ChatPayload, ContactPayload, GroupPayload, MessageKey, MessagePayload, MessageUpdate,
    SessionDataPayload,
};

/// Reconciled row kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Chat,
    Contact,
    Group,
    Message,
    Session,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        Self::Chat,
        Self::Contact,
        Self::Group,
        Self::Message,
        Self::Session,
    ];

    /// Prefix used for outbound notification names and payload keys.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Chat => "chats",
            Self::Contact => "contacts",
            Self::Group => "groups",
            Self::Message => "messages",
            Self::Session => "session",
        }
    }

    /// Outbound notification name, e.g. `chats.upsert`.
    pub fn event_name(&self, op: Operation) -> String {
        format!("{}.{}", self.prefix(), op)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" | "chats" => Ok(Self::Chat),
            "contact" | "contacts" => Ok(Self::Contact),
            "group" | "groups" => Ok(Self::Group),
            "message" | "messages" => Ok(Self::Message),
            "session" | "sessions" => Ok(Self::Session),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// Storage operation a handler performs for an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Set,
    Upsert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Upsert => "upsert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bulk history snapshot. `is_latest` licenses a destructive resync.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySet {
    #[serde(default)]
    pub chats: Vec<ChatPayload>,
    #[serde(default)]
    pub contacts: Vec<ContactPayload>,
    #[serde(default)]
    pub messages: Vec<MessagePayload>,
    #[serde(default)]
    pub is_latest: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupsSet {
    #[serde(default)]
    pub groups: Vec<GroupPayload>,
    #[serde(default)]
    pub is_latest: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupParticipantsUpdate {
    pub id: String,
    pub participants: Vec<String>,
    pub action: ParticipantAction,
}

/// `notify` for live traffic, `append` for messages synced from another device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageUpsertType {
    #[default]
    Notify,
    Append,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagesUpsert {
    pub messages: Vec<MessagePayload>,
    #[serde(rename = "type", default)]
    pub upsert_type: MessageUpsertType,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagesDelete {
    Keys { keys: Vec<MessageKey> },
    Chat { jid: String, all: bool },
}

/// Events raised by the protocol transport, one variant per event name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ProtocolEvent {
    #[serde(rename = "messaging-history.set")]
    HistorySet(HistorySet),

    #[serde(rename = "chats.upsert")]
    ChatsUpsert(Vec<ChatPayload>),
    #[serde(rename = "chats.update")]
    ChatsUpdate(Vec<ChatPayload>),
    #[serde(rename = "chats.delete")]
    ChatsDelete(Vec<String>),

    #[serde(rename = "contacts.upsert")]
    ContactsUpsert(Vec<ContactPayload>),
    #[serde(rename = "contacts.update")]
    ContactsUpdate(Vec<ContactPayload>),
    #[serde(rename = "contacts.delete")]
    ContactsDelete(Vec<String>),

    #[serde(rename = "groups.set")]
    GroupsSet(GroupsSet),
    #[serde(rename = "groups.upsert")]
    GroupsUpsert(Vec<GroupPayload>),
    #[serde(rename = "groups.update")]
    GroupsUpdate(Vec<GroupPayload>),
    #[serde(rename = "groups.delete")]
    GroupsDelete(Vec<String>),
    #[serde(rename = "group-participants.update")]
    GroupParticipantsUpdate(GroupParticipantsUpdate),

    #[serde(rename = "messages.upsert")]
    MessagesUpsert(MessagesUpsert),
    #[serde(rename = "messages.update")]
    MessagesUpdate(Vec<MessageUpdate>),
    #[serde(rename = "messages.delete")]
    MessagesDelete(MessagesDelete),

    #[serde(rename = "session.upsert")]
    SessionUpsert(Vec<SessionDataPayload>),
    #[serde(rename = "session.update")]
    SessionUpdate(Vec<SessionDataPayload>),
    #[serde(rename = "session.delete")]
    SessionDelete(Vec<String>),
}

impl ProtocolEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::HistorySet(_) => "messaging-history.set",
            Self::ChatsUpsert(_) => "chats.upsert",
            Self::ChatsUpdate(_) => "chats.update",
            Self::ChatsDelete(_) => "chats.delete",
            Self::ContactsUpsert(_) => "contacts.upsert",
            Self::ContactsUpdate(_) => "contacts.update",
            Self::ContactsDelete(_) => "contacts.delete",
            Self::GroupsSet(_) => "groups.set",
            Self::GroupsUpsert(_) => "groups.upsert",
            Self::GroupsUpdate(_) => "groups.update",
            Self::GroupsDelete(_) => "groups.delete",
            Self::GroupParticipantsUpdate(_) => "group-participants.update",
            Self::MessagesUpsert(_) => "messages.upsert",
            Self::MessagesUpdate(_) => "messages.update",
            Self::MessagesDelete(_) => "messages.delete",
            Self::SessionUpsert(_) => "session.upsert",
            Self::SessionUpdate(_) => "session.update",
            Self::SessionDelete(_) => "session.delete",
        }
    }

    /// Entity kinds whose handlers consume this event.
    pub fn entity_kinds(&self) -> &'static [EntityKind] {
        match self {
            Self::HistorySet(_) => &[EntityKind::Chat, EntityKind::Contact, EntityKind::Message],
            Self::ChatsUpsert(_) | Self::ChatsUpdate(_) | Self::ChatsDelete(_) => &[EntityKind::Chat],
            Self::ContactsUpsert(_) | Self::ContactsUpdate(_) | Self::ContactsDelete(_) => {
                &[EntityKind::Contact]
            }
            Self::GroupsSet(_)
            | Self::GroupsUpsert(_)
            | Self::GroupsUpdate(_)
            | Self::GroupsDelete(_)
            | Self::GroupParticipantsUpdate(_) => &[EntityKind::Group],
            Self::MessagesUpsert(_) | Self::MessagesUpdate(_) | Self::MessagesDelete(_) => {
                &[EntityKind::Message]
            }
            Self::SessionUpsert(_) | Self::SessionUpdate(_) | Self::SessionDelete(_) => {
                &[EntityKind::Session]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_event_names() {
        assert_eq!(EntityKind::Chat.event_name(Operation::Set), "chats.set");
        assert_eq!(EntityKind::Session.event_name(Operation::Delete), "session.delete");
        assert_eq!(EntityKind::Message.event_name(Operation::Upsert), "messages.upsert");
    }

    #[test]
    fn entity_kind_parses_plural_and_singular() {
        assert_eq!("chats".parse::<EntityKind>().unwrap(), EntityKind::Chat);
        assert_eq!("group".parse::<EntityKind>().unwrap(), EntityKind::Group);
        assert!("labels".parse::<EntityKind>().is_err());
    }

    #[test]
    fn history_set_deserializes_from_wire() {
        let event: ProtocolEvent = serde_json::from_value(json!({
            "event": "messaging-history.set",
            "data": {"chats": [{"id": "c1"}], "isLatest": true}
        }))
        .unwrap();
        match &event {
            ProtocolEvent::HistorySet(set) => {
                assert!(set.is_latest);
                assert_eq!(set.chats.len(), 1);
                assert!(set.contacts.is_empty());
                assert!(set.messages.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(event.event_name(), "messaging-history.set");
        assert_eq!(event.entity_kinds().len(), 3);
    }

    #[test]
    fn chats_delete_deserializes_ids() {
        let event: ProtocolEvent =
            serde_json::from_value(json!({"event": "chats.delete", "data": ["c1", "c2"]})).unwrap();
        assert_eq!(event, ProtocolEvent::ChatsDelete(vec!["c1".into(), "c2".into()]));
        assert_eq!(event.entity_kinds(), &[EntityKind::Chat]);
    }

    #[test]
    fn messages_delete_accepts_both_shapes() {
        let by_keys: MessagesDelete = serde_json::from_value(json!({
            "keys": [{"remoteJid": "a@s.whatsapp.net", "id": "M1"}]
        }))
        .unwrap();
        assert!(matches!(by_keys, MessagesDelete::Keys { ref keys } if keys.len() == 1));

        let by_chat: MessagesDelete =
            serde_json::from_value(json!({"jid": "a@s.whatsapp.net", "all": true})).unwrap();
        assert!(matches!(by_chat, MessagesDelete::Chat { all: true, .. }));
    }

    #[test]
    fn messages_upsert_type_defaults_to_notify() {
        let upsert: MessagesUpsert = serde_json::from_value(json!({"messages": []})).unwrap();
        assert_eq!(upsert.upsert_type, MessageUpsertType::Notify);
    }

    #[test]
    fn participants_update_parses_action() {
        let event: ProtocolEvent = serde_json::from_value(json!({
            "event": "group-participants.update",
            "data": {"id": "g1@g.us", "participants": ["a@s.whatsapp.net"], "action": "promote"}
        }))
        .unwrap();
        match event {
            ProtocolEvent::GroupParticipantsUpdate(update) => {
                assert_eq!(update.action, ParticipantAction::Promote);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_is_rejected() {
        let result: Result<ProtocolEvent, _> =
            serde_json::from_value(json!({"event": "labels.edit", "data": {}}));
        assert!(result.is_err());
    }
}
