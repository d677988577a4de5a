//! Wire protocol.
//!
//! Every frame is one UTF-8 JSON object whose `type` field selects the variant.
//! Inbound frames go through [`ClientMsg::parse`], the single validating
//! constructor: anything malformed yields `None` and is dropped without reply.
//! Outbound frames are [`ServerMsg`] values serialized once per broadcast.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::room::RoomKey;
use crate::world::{coord_from_f64, Block};

pub const MAX_NAME_CHARS: usize = 24;
pub const MAX_SKIN_CHARS: usize = 200_000;
pub const MAX_CHAT_CHARS: usize = 280;

pub const DEFAULT_NAME: &str = "Player";
pub const DEFAULT_HELD_BLOCK: i32 = 2;

/// Serialized outbound frame, shared between all recipients of a broadcast.
pub type Frame = Arc<str>;

/// Connection-scoped peer identity. Assigned in increasing order, never reused.
///
/// Travels on the wire as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(PeerId)
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Last known transform and animation state of a player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub moving: bool,
    pub crouching: bool,
    /// Clamped to `[0, 1]`.
    pub punch_anim: f64,
    /// Clamped to `[0, 1]`.
    pub place_anim: f64,
    pub held_block: i32,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            yaw: 0.0,
            pitch: 0.0,
            moving: false,
            crouching: false,
            punch_anim: 0.0,
            place_anim: 0.0,
            held_block: DEFAULT_HELD_BLOCK,
        }
    }
}

impl PlayerState {
    /// Resolves a candidate update into a full state.
    ///
    /// Rejects the update unless position, yaw and pitch are all finite.
    /// Animation fields are clamped to `[0, 1]` and default to 0; `heldBlock`
    /// is truncated to an integer and defaults to [`DEFAULT_HELD_BLOCK`].
    pub fn from_update(u: &StateUpdate) -> Option<Self> {
        let required = [u.x, u.y, u.z, u.yaw, u.pitch];
        if !required.iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Self {
            x: u.x,
            y: u.y,
            z: u.z,
            yaw: u.yaw,
            pitch: u.pitch,
            moving: u.moving,
            crouching: u.crouching,
            punch_anim: unit_or_zero(u.punch_anim),
            place_anim: unit_or_zero(u.place_anim),
            held_block: u
                .held_block
                .filter(|v| v.is_finite())
                .map_or(DEFAULT_HELD_BLOCK, |v| v.trunc() as i32),
        })
    }
}

fn unit_or_zero(v: Option<f64>) -> f64 {
    v.filter(|v| v.is_finite()).map_or(0.0, |v| v.clamp(0.0, 1.0))
}

/// Inbound `PLAYER_STATE` payload before resolution against the field policies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub moving: bool,
    pub crouching: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub punch_anim: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_anim: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_block: Option<f64>,
}

impl From<PlayerState> for StateUpdate {
    fn from(s: PlayerState) -> Self {
        Self {
            x: s.x,
            y: s.y,
            z: s.z,
            yaw: s.yaw,
            pitch: s.pitch,
            moving: s.moving,
            crouching: s.crouching,
            punch_anim: Some(s.punch_anim),
            place_anim: Some(s.place_anim),
            held_block: Some(f64::from(s.held_block)),
        }
    }
}

/// Client -> server messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMsg {
    /// Enter (or switch to) a room and announce identity.
    ///
    /// `name`/`skin` are `None` when absent or not strings.
    Join {
        room: RoomKey,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        skin: Option<String>,
    },
    Chat {
        text: String,
    },
    Block(Block),
    ChunkRequest {
        cx: i32,
        cz: i32,
    },
    PlayerState(StateUpdate),
}

impl ClientMsg {
    /// Parses and validates one inbound frame.
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        match obj.get("type")?.as_str()? {
            "JOIN" => Some(ClientMsg::Join {
                room: RoomKey::normalize(obj.get("room")),
                name: string_field(obj, "name"),
                skin: string_field(obj, "skin"),
            }),
            "CHAT" => Some(ClientMsg::Chat {
                text: truncate_chars(
                    obj.get("text").and_then(Value::as_str).unwrap_or(""),
                    MAX_CHAT_CHARS,
                ),
            }),
            "BLOCK" => Some(ClientMsg::Block(Block {
                x: coord_from_f64(finite(obj, "x")?),
                y: coord_from_f64(finite(obj, "y")?),
                z: coord_from_f64(finite(obj, "z")?),
                id: coord_from_f64(finite(obj, "id")?),
            })),
            "CHUNK_REQUEST" => Some(ClientMsg::ChunkRequest {
                cx: coord_from_f64(finite(obj, "cx")?),
                cz: coord_from_f64(finite(obj, "cz")?),
            }),
            "PLAYER_STATE" => Some(ClientMsg::PlayerState(StateUpdate {
                x: finite(obj, "x")?,
                y: finite(obj, "y")?,
                z: finite(obj, "z")?,
                yaw: finite(obj, "yaw")?,
                pitch: finite(obj, "pitch")?,
                moving: bool_field(obj, "moving"),
                crouching: bool_field(obj, "crouching"),
                punch_anim: number(obj, "punchAnim"),
                place_anim: number(obj, "placeAnim"),
                held_block: number(obj, "heldBlock"),
            })),
            _ => None,
        }
    }
}

fn number(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key)?.as_f64()
}

fn finite(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    number(obj, key).filter(|v| v.is_finite())
}

fn bool_field(obj: &Map<String, Value>, key: &str) -> bool {
    obj.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// First `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => s[..end].to_string(),
        None => s.to_string(),
    }
}

/// Display name truncated to [`MAX_NAME_CHARS`]; absent or empty names become [`DEFAULT_NAME`].
pub fn sanitize_name(raw: Option<&str>) -> String {
    let name = truncate_chars(raw.unwrap_or(""), MAX_NAME_CHARS);
    if name.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        name
    }
}

/// Opaque skin payload, truncated; absent means empty.
pub fn sanitize_skin(raw: Option<&str>) -> String {
    truncate_chars(raw.unwrap_or(""), MAX_SKIN_CHARS)
}

/// A peer as seen by other members of its room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub id: PeerId,
    pub name: String,
    pub skin: String,
    #[serde(flatten)]
    pub state: PlayerState,
}

/// Server -> client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMsg {
    /// Chat-style notice from the relay itself.
    System { text: String },
    /// Tells a client which id it was assigned.
    #[serde(rename = "SELF")]
    Welcome { id: PeerId },
    /// Other members of the room just joined, with their last known state.
    RoomSnapshot { peers: Vec<PeerSummary> },
    PlayerJoin { id: PeerId, name: String, skin: String },
    PlayerLeave { id: PeerId },
    Chat { name: String, text: String },
    Block(Block),
    ChunkData { cx: i32, cz: i32, blocks: Vec<Block> },
    PlayerState(PeerSummary),
}

/// Serializes an outbound message into a shareable frame.
pub fn encode_frame(msg: &ServerMsg) -> anyhow::Result<Frame> {
    let text = serde_json::to_string(msg).context("serialize server msg")?;
    Ok(Frame::from(text))
}

pub fn decode_frame(text: &str) -> anyhow::Result<ServerMsg> {
    serde_json::from_str(text).context("deserialize server msg")
}

/// Client-side encoding of an outbound request.
pub fn encode_client(msg: &ClientMsg) -> anyhow::Result<String> {
    serde_json::to_string(msg).context("serialize client msg")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_non_objects_and_unknown_types() {
        for text in [
            "not json",
            "[1,2,3]",
            "\"JOIN\"",
            "{}",
            r#"{"type": 7}"#,
            r#"{"type": "TELEPORT"}"#,
            r#"{"type": "join"}"#,
        ] {
            assert_eq!(ClientMsg::parse(text), None, "{text}");
        }
    }

    #[test]
    fn join_normalizes_room_and_keeps_raw_identity() {
        let msg = ClientMsg::parse(r#"{"type":"JOIN","room":"abc ","name":"  Steve ","skin":5}"#);
        assert_eq!(
            msg,
            Some(ClientMsg::Join {
                room: RoomKey::normalize_str("ABC"),
                name: Some("  Steve ".into()),
                skin: None,
            })
        );

        let bare = ClientMsg::parse(r#"{"type":"JOIN"}"#);
        assert_eq!(
            bare,
            Some(ClientMsg::Join {
                room: RoomKey::global(),
                name: None,
                skin: None,
            })
        );
    }

    #[test]
    fn chat_truncates_and_defaults() {
        let long = "é".repeat(MAX_CHAT_CHARS + 10);
        let Some(ClientMsg::Chat { text }) =
            ClientMsg::from_value(&json!({"type": "CHAT", "text": long}))
        else {
            panic!("chat should parse");
        };
        assert_eq!(text.chars().count(), MAX_CHAT_CHARS);

        assert_eq!(
            ClientMsg::parse(r#"{"type":"CHAT","text":{"a":1}}"#),
            Some(ClientMsg::Chat { text: String::new() })
        );
    }

    #[test]
    fn block_requires_all_four_numbers() {
        assert_eq!(
            ClientMsg::parse(r#"{"type":"BLOCK","x":1,"y":2,"z":3,"id":5}"#),
            Some(ClientMsg::Block(Block { x: 1, y: 2, z: 3, id: 5 }))
        );
        assert_eq!(ClientMsg::parse(r#"{"type":"BLOCK","x":1,"y":2,"z":3}"#), None);
        assert_eq!(
            ClientMsg::parse(r#"{"type":"BLOCK","x":1,"y":"2","z":3,"id":5}"#),
            None
        );
        assert_eq!(
            ClientMsg::parse(r#"{"type":"BLOCK","x":-0.5,"y":2.9,"z":3,"id":1}"#),
            Some(ClientMsg::Block(Block { x: -1, y: 2, z: 3, id: 1 }))
        );
    }

    #[test]
    fn chunk_request_requires_numbers() {
        assert_eq!(
            ClientMsg::parse(r#"{"type":"CHUNK_REQUEST","cx":-2,"cz":0}"#),
            Some(ClientMsg::ChunkRequest { cx: -2, cz: 0 })
        );
        assert_eq!(ClientMsg::parse(r#"{"type":"CHUNK_REQUEST","cx":null,"cz":0}"#), None);
    }

    #[test]
    fn player_state_rejects_non_numeric_transform() {
        let text = r#"{"type":"PLAYER_STATE","x":0,"y":0,"z":0,"yaw":"NaN","pitch":0}"#;
        assert_eq!(ClientMsg::parse(text), None);
    }

    #[test]
    fn state_policy_clamps_and_defaults() {
        let Some(ClientMsg::PlayerState(update)) = ClientMsg::parse(
            r#"{"type":"PLAYER_STATE","x":1,"y":2,"z":3,"yaw":0.5,"pitch":-0.25,
                "moving":true,"crouching":"yes","punchAnim":7,"placeAnim":-1,"heldBlock":4.8}"#,
        ) else {
            panic!("state should parse");
        };
        let state = PlayerState::from_update(&update).unwrap();
        assert!(state.moving);
        assert!(!state.crouching);
        assert_eq!(state.punch_anim, 1.0);
        assert_eq!(state.place_anim, 0.0);
        assert_eq!(state.held_block, 4);

        let Some(ClientMsg::PlayerState(update)) =
            ClientMsg::parse(r#"{"type":"PLAYER_STATE","x":1,"y":2,"z":3,"yaw":0,"pitch":0}"#)
        else {
            panic!("state should parse");
        };
        let state = PlayerState::from_update(&update).unwrap();
        assert_eq!(state.punch_anim, 0.0);
        assert_eq!(state.place_anim, 0.0);
        assert_eq!(state.held_block, DEFAULT_HELD_BLOCK);
    }

    #[test]
    fn state_policy_rejects_non_finite() {
        let mut update = StateUpdate::from(PlayerState::default());
        update.pitch = f64::INFINITY;
        assert_eq!(PlayerState::from_update(&update), None);
        update.pitch = 0.0;
        update.x = f64::NAN;
        assert_eq!(PlayerState::from_update(&update), None);
    }

    #[test]
    fn identity_sanitizers() {
        assert_eq!(sanitize_name(None), DEFAULT_NAME);
        assert_eq!(sanitize_name(Some("")), DEFAULT_NAME);
        assert_eq!(sanitize_name(Some(" Ann ")), " Ann ");
        assert_eq!(sanitize_name(Some("n".repeat(30).as_str())).len(), MAX_NAME_CHARS);
        assert_eq!(sanitize_skin(None), "");
        let skin = "s".repeat(MAX_SKIN_CHARS + 1);
        assert_eq!(sanitize_skin(Some(skin.as_str())).len(), MAX_SKIN_CHARS);
    }

    #[test]
    fn server_msgs_use_protocol_field_names() {
        let state = ServerMsg::PlayerState(PeerSummary {
            id: PeerId(3),
            name: "Ann".into(),
            skin: String::new(),
            state: PlayerState::default(),
        });
        let v: Value = serde_json::from_str(&encode_frame(&state).unwrap()).unwrap();
        assert_eq!(v["type"], "PLAYER_STATE");
        assert_eq!(v["id"], "3");
        assert_eq!(v["heldBlock"], 2);
        assert_eq!(v["punchAnim"], 0.0);

        let block = encode_frame(&ServerMsg::Block(Block { x: 1, y: 2, z: 3, id: 5 })).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&block).unwrap(),
            json!({"type": "BLOCK", "x": 1, "y": 2, "z": 3, "id": 5})
        );

        let welcome = encode_frame(&ServerMsg::Welcome { id: PeerId(9) }).unwrap();
        assert_eq!(&*welcome, r#"{"type":"SELF","id":"9"}"#);
        assert_eq!(decode_frame(&welcome).unwrap(), ServerMsg::Welcome { id: PeerId(9) });
    }

    #[test]
    fn client_encoding_parses_back() {
        let join = ClientMsg::Join {
            room: RoomKey::normalize_str("abc"),
            name: Some("Ann".into()),
            skin: None,
        };
        assert_eq!(ClientMsg::parse(&encode_client(&join).unwrap()), Some(join));

        let state = ClientMsg::PlayerState(StateUpdate::from(PlayerState::default()));
        assert_eq!(ClientMsg::parse(&encode_client(&state).unwrap()), Some(state));
    }
}
