//! Message filter pipeline.
//!
//! Raw room-message stream events pass through a fixed-order predicate
//! chain that short-circuits on the first rejection. Accepted events advance
//! a monotonic watermark so backlog and replays never reach the application
//! callback twice. The watermark starts at pipeline install time, not epoch
//! zero, so stale history is never replayed.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{codec::ejson, dispatch::StreamEvent};

/// Collection carrying room-message events.
pub const ROOM_MESSAGE_STREAM: &str = "stream-room-messages";

/// Room kinds distinguished by the filter pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoomKind {
    /// Public channel.
    Channel,
    /// Private group; membership is implied by receiving its events.
    Private,
    /// One-on-one direct message.
    Direct,
    /// Livechat/omnichannel conversation.
    Livechat,
}

impl RoomKind {
    fn from_code(code: &str) -> Self {
        match code {
            "d" => Self::Direct,
            "l" => Self::Livechat,
            "p" => Self::Private,
            _ => Self::Channel,
        }
    }
}

/// A chat message lifted out of a data-push frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Message identifier.
    pub id: String,
    /// Room the message was posted in.
    pub room_id: String,
    /// Author's account identifier.
    pub author_id: String,
    /// Author's username, when present.
    pub author_username: Option<String>,
    /// Message body.
    pub text: String,
    /// Server-side timestamp.
    pub timestamp: DateTime<Utc>,
    /// Whether this event represents an edit of an earlier message.
    pub edited: bool,
}

/// Room metadata accompanying a message event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomMeta {
    /// Kind of room the message belongs to.
    pub kind: RoomKind,
    /// Room display name, when present.
    pub name: Option<String>,
}

/// Which rooms a policy admits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoomScope {
    /// Admit events from any public room, joined or not.
    AllPublic,
    /// Admit only the listed room identifiers.
    Rooms(HashSet<String>),
}

/// Declarative policy for [`Client::on_message`](crate::Client::on_message).
///
/// All flags default to off: only fresh, unedited channel messages from
/// other users in the listed rooms reach the callback.
///
/// # Examples
///
/// ```
/// use rivulet::MessagePolicy;
///
/// let policy = MessagePolicy::rooms(["GENERAL"]).edited(true);
/// let wide_open = MessagePolicy::all_public_rooms()
///     .direct_messages(true)
///     .livechat(true);
/// # let _ = (policy, wide_open);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessagePolicy {
    rooms: RoomScope,
    direct_messages: bool,
    livechat: bool,
    edited: bool,
}

impl MessagePolicy {
    /// Policy admitting only the given room identifiers.
    pub fn rooms<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rooms: RoomScope::Rooms(ids.into_iter().map(Into::into).collect()),
            direct_messages: false,
            livechat: false,
            edited: false,
        }
    }

    /// Policy admitting every public room.
    #[must_use]
    pub fn all_public_rooms() -> Self {
        Self {
            rooms: RoomScope::AllPublic,
            direct_messages: false,
            livechat: false,
            edited: false,
        }
    }

    /// Also admit direct messages.
    #[must_use]
    pub fn direct_messages(mut self, enabled: bool) -> Self {
        self.direct_messages = enabled;
        self
    }

    /// Also admit livechat events.
    #[must_use]
    pub fn livechat(mut self, enabled: bool) -> Self {
        self.livechat = enabled;
        self
    }

    /// Also admit edits of earlier messages.
    #[must_use]
    pub fn edited(mut self, enabled: bool) -> Self {
        self.edited = enabled;
        self
    }
}

/// Why the pipeline dropped an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Rejection {
    OwnMessage,
    DirectMessage,
    Livechat,
    UnjoinedRoom,
    Edited,
    Stale,
}

/// Stateful filter applying a [`MessagePolicy`] with a de-duplication
/// watermark.
///
/// The watermark rejects any message not strictly newer than the last
/// accepted one; granularity is whatever the server stamps messages with
/// (milliseconds upstream), so same-instant rapid fire collapses to the
/// first message.
pub(crate) struct MessageFilter {
    policy: MessagePolicy,
    watermark: DateTime<Utc>,
}

impl MessageFilter {
    /// Filter anchored at install time: older backlog never fires.
    pub(crate) fn new(policy: MessagePolicy) -> Self {
        Self::anchored_at(policy, Utc::now())
    }

    pub(crate) fn anchored_at(policy: MessagePolicy, watermark: DateTime<Utc>) -> Self {
        Self { policy, watermark }
    }

    /// Evaluate one event, advancing the watermark on acceptance.
    pub(crate) fn evaluate(
        &mut self,
        own_id: Option<&str>,
        message: &Message,
        room: &RoomMeta,
    ) -> Result<(), Rejection> {
        if own_id == Some(message.author_id.as_str()) {
            return Err(Rejection::OwnMessage);
        }
        if room.kind == RoomKind::Direct && !self.policy.direct_messages {
            return Err(Rejection::DirectMessage);
        }
        if room.kind == RoomKind::Livechat && !self.policy.livechat {
            return Err(Rejection::Livechat);
        }
        if room.kind == RoomKind::Channel {
            if let RoomScope::Rooms(rooms) = &self.policy.rooms {
                if !rooms.contains(&message.room_id) {
                    return Err(Rejection::UnjoinedRoom);
                }
            }
        }
        if message.edited && !self.policy.edited {
            return Err(Rejection::Edited);
        }
        if message.timestamp <= self.watermark {
            return Err(Rejection::Stale);
        }
        self.watermark = message.timestamp;
        Ok(())
    }
}

/// Parse a room-message stream event into a message and its room metadata.
///
/// Returns `None` for events missing the fields the pipeline depends on.
pub(crate) fn parse_room_message(event: &StreamEvent) -> Option<(Message, RoomMeta)> {
    let args = event.args();
    let raw = args.first()?;
    let author = raw.get("u")?;
    let message = Message {
        id: raw.get("_id")?.as_str()?.to_string(),
        room_id: raw.get("rid")?.as_str()?.to_string(),
        author_id: author.get("_id")?.as_str()?.to_string(),
        author_username: author
            .get("username")
            .and_then(Value::as_str)
            .map(str::to_string),
        text: raw
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        timestamp: raw.get("ts").and_then(ejson::as_date)?,
        edited: raw.get("editedAt").is_some(),
    };
    let room = match args.get(1) {
        Some(meta) => RoomMeta {
            kind: meta
                .get("roomType")
                .and_then(Value::as_str)
                .map_or(RoomKind::Channel, RoomKind::from_code),
            name: meta
                .get("roomName")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        None => RoomMeta {
            kind: RoomKind::Channel,
            name: None,
        },
    };
    Some((message, room))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn t(seconds: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).unwrap()
            + chrono::Duration::seconds(i64::from(seconds))
    }

    fn message(room_id: &str, author: &str, stamp: DateTime<Utc>) -> Message {
        Message {
            id: "m1".to_string(),
            room_id: room_id.to_string(),
            author_id: author.to_string(),
            author_username: None,
            text: "hello".to_string(),
            timestamp: stamp,
            edited: false,
        }
    }

    fn channel() -> RoomMeta {
        RoomMeta {
            kind: RoomKind::Channel,
            name: None,
        }
    }

    fn restrictive() -> MessageFilter {
        MessageFilter::anchored_at(MessagePolicy::rooms(["R1"]), t(0))
    }

    #[test]
    fn accepts_fresh_message_in_joined_room() {
        let mut filter = restrictive();
        let verdict = filter.evaluate(Some("bot"), &message("R1", "alice", t(10)), &channel());
        assert_eq!(verdict, Ok(()));
    }

    #[test]
    fn rejects_own_messages_regardless_of_other_fields() {
        let mut filter = restrictive();
        let mut own = message("R1", "bot", t(10));
        own.edited = true;
        let verdict = filter.evaluate(Some("bot"), &own, &channel());
        assert_eq!(verdict, Err(Rejection::OwnMessage));
    }

    #[test]
    fn rejects_unjoined_public_room() {
        let mut filter = restrictive();
        let verdict = filter.evaluate(Some("bot"), &message("R2", "alice", t(10)), &channel());
        assert_eq!(verdict, Err(Rejection::UnjoinedRoom));
    }

    #[test]
    fn all_public_scope_admits_any_channel() {
        let mut filter = MessageFilter::anchored_at(MessagePolicy::all_public_rooms(), t(0));
        let verdict = filter.evaluate(Some("bot"), &message("R2", "alice", t(10)), &channel());
        assert_eq!(verdict, Ok(()));
    }

    #[rstest]
    #[case(RoomKind::Direct, Rejection::DirectMessage)]
    #[case(RoomKind::Livechat, Rejection::Livechat)]
    fn rejects_flagged_room_kinds_by_default(
        #[case] kind: RoomKind,
        #[case] expected: Rejection,
    ) {
        let mut filter = restrictive();
        let room = RoomMeta { kind, name: None };
        let verdict = filter.evaluate(Some("bot"), &message("R1", "alice", t(10)), &room);
        assert_eq!(verdict, Err(expected));
    }

    #[test]
    fn direct_messages_pass_when_enabled() {
        let policy = MessagePolicy::rooms(["R1"]).direct_messages(true);
        let mut filter = MessageFilter::anchored_at(policy, t(0));
        let room = RoomMeta {
            kind: RoomKind::Direct,
            name: None,
        };
        let verdict = filter.evaluate(Some("bot"), &message("D1", "alice", t(10)), &room);
        assert_eq!(verdict, Ok(()));
    }

    #[test]
    fn rejects_edits_unless_enabled() {
        let mut filter = restrictive();
        let mut edit = message("R1", "alice", t(10));
        edit.edited = true;
        assert_eq!(
            filter.evaluate(Some("bot"), &edit, &channel()),
            Err(Rejection::Edited)
        );

        let mut permissive =
            MessageFilter::anchored_at(MessagePolicy::rooms(["R1"]).edited(true), t(0));
        assert_eq!(permissive.evaluate(Some("bot"), &edit, &channel()), Ok(()));
    }

    #[test]
    fn watermark_rejects_stale_and_equal_timestamps() {
        let mut filter = restrictive();
        assert_eq!(
            filter.evaluate(Some("bot"), &message("R1", "alice", t(10)), &channel()),
            Ok(())
        );
        // Older than the last accepted message.
        assert_eq!(
            filter.evaluate(Some("bot"), &message("R1", "alice", t(5)), &channel()),
            Err(Rejection::Stale)
        );
        // Equal is not strictly newer.
        assert_eq!(
            filter.evaluate(Some("bot"), &message("R1", "alice", t(10)), &channel()),
            Err(Rejection::Stale)
        );
        assert_eq!(
            filter.evaluate(Some("bot"), &message("R1", "alice", t(11)), &channel()),
            Ok(())
        );
    }

    #[test]
    fn backlog_older_than_install_time_never_fires() {
        let mut filter = MessageFilter::anchored_at(MessagePolicy::rooms(["R1"]), t(100));
        assert_eq!(
            filter.evaluate(Some("bot"), &message("R1", "alice", t(99)), &channel()),
            Err(Rejection::Stale)
        );
    }

    #[test]
    fn parses_stream_event_into_message_and_meta() {
        let event = StreamEvent {
            collection: ROOM_MESSAGE_STREAM.to_string(),
            id: Some("id".to_string()),
            fields: json!({
                "eventName": "GENERAL",
                "args": [
                    {
                        "_id": "m1",
                        "rid": "GENERAL",
                        "msg": "hi there",
                        "ts": { "$date": 1_700_000_000_000_i64 },
                        "u": { "_id": "u1", "username": "alice" },
                    },
                    { "roomType": "c", "roomName": "general" },
                ],
            }),
        };
        let (message, room) = parse_room_message(&event).expect("well-formed event");
        assert_eq!(message.id, "m1");
        assert_eq!(message.room_id, "GENERAL");
        assert_eq!(message.author_username.as_deref(), Some("alice"));
        assert!(!message.edited);
        assert_eq!(room.kind, RoomKind::Channel);
        assert_eq!(room.name.as_deref(), Some("general"));
    }

    #[test]
    fn edit_events_are_flagged() {
        let event = StreamEvent {
            collection: ROOM_MESSAGE_STREAM.to_string(),
            id: Some("id".to_string()),
            fields: json!({
                "args": [{
                    "_id": "m1",
                    "rid": "GENERAL",
                    "msg": "hi (fixed)",
                    "ts": { "$date": 1_700_000_000_000_i64 },
                    "editedAt": { "$date": 1_700_000_060_000_i64 },
                    "u": { "_id": "u1" },
                }],
            }),
        };
        let (message, _room) = parse_room_message(&event).expect("well-formed event");
        assert!(message.edited);
    }

    #[test]
    fn malformed_events_are_skipped() {
        let event = StreamEvent {
            collection: ROOM_MESSAGE_STREAM.to_string(),
            id: Some("id".to_string()),
            fields: json!({ "args": [{ "_id": "m1" }] }),
        };
        assert!(parse_room_message(&event).is_none());
    }
}
