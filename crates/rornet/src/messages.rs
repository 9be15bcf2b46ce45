//! Fixed-layout wire records.
//!
//! Field order and widths are frozen by the protocol; every record below
//! packs to an exact byte count (asserted in the tests).  Strings decode
//! with trailing NUL bytes stripped, so decode(encode(x)) equals `x` up to
//! that stripping.

use bytes::{Buf, BufMut, BytesMut};

use crate::enums::{
    ActorStreamStatus, CharacterAnimation, CharacterCommand, StreamType, PLAYER_COLORS,
};
use crate::vector::Vector3;
use crate::wire::{expect_at_least, expect_len, get_str, put_str, WireError};
use crate::{AuthStatus, RORNET_VERSION};

// ---------------------------------------------------------------------------
// ServerInfo
// ---------------------------------------------------------------------------

/// Handshake record carried in the server's HELLO reply.
///
/// Layout: `protocol:20, terrain:128, server:128, has_password:1, motd:4096`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub protocol_version: String,
    pub terrain_name: String,
    pub server_name: String,
    pub has_password: bool,
    /// MOTD file contents.
    pub info: String,
}

impl ServerInfo {
    pub const SIZE: usize = 20 + 128 + 128 + 1 + 4096;

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        put_str(&mut buf, "protocol_version", &self.protocol_version, 20)?;
        put_str(&mut buf, "terrain_name", &self.terrain_name, 128)?;
        put_str(&mut buf, "server_name", &self.server_name, 128)?;
        buf.put_u8(u8::from(self.has_password));
        put_str(&mut buf, "info", &self.info, 4096)?;
        Ok(buf.to_vec())
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        expect_len(data, Self::SIZE)?;
        let mut buf = data;
        Ok(Self {
            protocol_version: get_str(&mut buf, "protocol_version", 20)?,
            terrain_name: get_str(&mut buf, "terrain_name", 128)?,
            server_name: get_str(&mut buf, "server_name", 128)?,
            has_password: buf.get_u8() != 0,
            info: get_str(&mut buf, "info", 4096)?,
        })
    }
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            protocol_version: RORNET_VERSION.to_owned(),
            terrain_name: String::new(),
            server_name: String::new(),
            has_password: false,
            info: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// UserInfo
// ---------------------------------------------------------------------------

/// Per-user record exchanged during the handshake and on USER_INFO updates.
///
/// Layout: `uid:4, auth:4, slot:4, color:4, username:40, token:40,
/// server_password:40, language:10, client_name:10, client_version:25,
/// guid:40, session_type:10, session_options:128`.
#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    /// Assigned by the server; 0 until WELCOME.
    pub unique_id: u32,
    pub auth_status: AuthStatus,
    pub slot_num: i32,
    /// Index into the player palette; -1 until assigned.
    pub color_num: i32,
    pub username: String,
    pub user_token: String,
    /// Uppercase hex SHA-1 of the plaintext password.
    pub server_password: String,
    pub language: String,
    pub client_name: String,
    pub client_version: String,
    pub client_guid: String,
    pub session_type: String,
    pub session_options: String,
}

impl UserInfo {
    pub const SIZE: usize = 16 + 40 + 40 + 40 + 10 + 10 + 25 + 40 + 10 + 128;

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u32_le(self.unique_id);
        buf.put_i32_le(self.auth_status.bits() as i32);
        buf.put_i32_le(self.slot_num);
        buf.put_i32_le(self.color_num);
        put_str(&mut buf, "username", &self.username, 40)?;
        put_str(&mut buf, "user_token", &self.user_token, 40)?;
        put_str(&mut buf, "server_password", &self.server_password, 40)?;
        put_str(&mut buf, "language", &self.language, 10)?;
        put_str(&mut buf, "client_name", &self.client_name, 10)?;
        put_str(&mut buf, "client_version", &self.client_version, 25)?;
        put_str(&mut buf, "client_guid", &self.client_guid, 40)?;
        put_str(&mut buf, "session_type", &self.session_type, 10)?;
        put_str(&mut buf, "session_options", &self.session_options, 128)?;
        Ok(buf.to_vec())
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        expect_len(data, Self::SIZE)?;
        let mut buf = data;
        Ok(Self {
            unique_id: buf.get_u32_le(),
            auth_status: AuthStatus::from_bits_retain(buf.get_i32_le() as u32),
            slot_num: buf.get_i32_le(),
            color_num: buf.get_i32_le(),
            username: get_str(&mut buf, "username", 40)?,
            user_token: get_str(&mut buf, "user_token", 40)?,
            server_password: get_str(&mut buf, "server_password", 40)?,
            language: get_str(&mut buf, "language", 10)?,
            client_name: get_str(&mut buf, "client_name", 10)?,
            client_version: get_str(&mut buf, "client_version", 25)?,
            client_guid: get_str(&mut buf, "client_guid", 40)?,
            session_type: get_str(&mut buf, "session_type", 10)?,
            session_options: get_str(&mut buf, "session_options", 128)?,
        })
    }

    /// The hex color assigned to this user, or white while unassigned.
    pub fn user_color(&self) -> &'static str {
        usize::try_from(self.color_num)
            .ok()
            .and_then(|idx| PLAYER_COLORS.get(idx).copied())
            .unwrap_or(crate::enums::color::WHITE)
    }
}

// ---------------------------------------------------------------------------
// Stream registers
// ---------------------------------------------------------------------------

const REGISTER_HEAD_SIZE: usize = 4 + 4 + 4 + 4 + 128;
const REGISTER_TAIL_SIZE: usize = 128;

/// Common tail used by chat and character stream registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericStreamRegister {
    pub status: i32,
    pub origin_source_id: u32,
    pub origin_stream_id: u32,
    /// `"chat"` for chat streams, `"default"` for character streams.
    pub name: String,
    pub reg_data: String,
}

/// Actor stream register with the actor-specific tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorStreamRegister {
    pub status: i32,
    pub origin_source_id: u32,
    pub origin_stream_id: u32,
    /// Actor definition filename, e.g. `fancy.truck`.
    pub name: String,
    pub buffer_size: i32,
    /// Set to -1 on registers originated by this client.
    pub timestamp: i32,
    pub skin: String,
    pub section_config: String,
}

/// A stream register, discriminated on the leading stream type.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRegister {
    Chat(GenericStreamRegister),
    Character(GenericStreamRegister),
    Actor(ActorStreamRegister),
}

impl StreamRegister {
    pub const SIZE: usize = REGISTER_HEAD_SIZE + REGISTER_TAIL_SIZE;

    /// A chat stream register the way this client announces it.
    pub fn new_chat(source_id: u32, stream_id: u32) -> Self {
        Self::Chat(GenericStreamRegister {
            status: 0,
            origin_source_id: source_id,
            origin_stream_id: stream_id,
            name: "chat".to_owned(),
            reg_data: "0".to_owned(),
        })
    }

    /// A character stream register the way this client announces it.
    pub fn new_character(source_id: u32, stream_id: u32) -> Self {
        Self::Character(GenericStreamRegister {
            status: 0,
            origin_source_id: source_id,
            origin_stream_id: stream_id,
            name: "default".to_owned(),
            reg_data: "\u{2}".to_owned(),
        })
    }

    pub fn stream_type(&self) -> StreamType {
        match self {
            Self::Chat(_) => StreamType::Chat,
            Self::Character(_) => StreamType::Character,
            Self::Actor(_) => StreamType::Actor,
        }
    }

    pub fn origin_source_id(&self) -> u32 {
        match self {
            Self::Chat(r) | Self::Character(r) => r.origin_source_id,
            Self::Actor(r) => r.origin_source_id,
        }
    }

    pub fn origin_stream_id(&self) -> u32 {
        match self {
            Self::Chat(r) | Self::Character(r) => r.origin_stream_id,
            Self::Actor(r) => r.origin_stream_id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Chat(r) | Self::Character(r) => &r.name,
            Self::Actor(r) => &r.name,
        }
    }

    pub fn status(&self) -> i32 {
        match self {
            Self::Chat(r) | Self::Character(r) => r.status,
            Self::Actor(r) => r.status,
        }
    }

    /// Rewrite the origin pair when this client registers the stream itself.
    pub fn set_origin(&mut self, source_id: u32, stream_id: u32) {
        match self {
            Self::Chat(r) | Self::Character(r) => {
                r.origin_source_id = source_id;
                r.origin_stream_id = stream_id;
            }
            Self::Actor(r) => {
                r.origin_source_id = source_id;
                r.origin_stream_id = stream_id;
            }
        }
    }

    pub fn set_status(&mut self, status: ActorStreamStatus) {
        match self {
            Self::Chat(r) | Self::Character(r) => r.status = status as i32,
            Self::Actor(r) => r.status = status as i32,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_i32_le(self.stream_type() as i32);
        match self {
            Self::Chat(r) | Self::Character(r) => {
                buf.put_i32_le(r.status);
                buf.put_u32_le(r.origin_source_id);
                buf.put_u32_le(r.origin_stream_id);
                put_str(&mut buf, "name", &r.name, 128)?;
                put_str(&mut buf, "reg_data", &r.reg_data, 128)?;
            }
            Self::Actor(r) => {
                buf.put_i32_le(r.status);
                buf.put_u32_le(r.origin_source_id);
                buf.put_u32_le(r.origin_stream_id);
                put_str(&mut buf, "name", &r.name, 128)?;
                buf.put_i32_le(r.buffer_size);
                buf.put_i32_le(r.timestamp);
                put_str(&mut buf, "skin", &r.skin, 60)?;
                put_str(&mut buf, "section_config", &r.section_config, 60)?;
            }
        }
        Ok(buf.to_vec())
    }

    /// Decode a register, picking the tail from the leading stream type.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        expect_len(data, Self::SIZE)?;
        let mut buf = data;
        let stream_type = StreamType::try_from(buf.get_i32_le())?;
        let status = buf.get_i32_le();
        let origin_source_id = buf.get_u32_le();
        let origin_stream_id = buf.get_u32_le();
        let name = get_str(&mut buf, "name", 128)?;

        match stream_type {
            StreamType::Chat | StreamType::Character => {
                let reg = GenericStreamRegister {
                    status,
                    origin_source_id,
                    origin_stream_id,
                    name,
                    reg_data: get_str(&mut buf, "reg_data", 128)?,
                };
                Ok(if stream_type == StreamType::Chat {
                    Self::Chat(reg)
                } else {
                    Self::Character(reg)
                })
            }
            StreamType::Actor => Ok(Self::Actor(ActorStreamRegister {
                status,
                origin_source_id,
                origin_stream_id,
                name,
                buffer_size: buf.get_i32_le(),
                timestamp: buf.get_i32_le(),
                skin: get_str(&mut buf, "skin", 60)?,
                section_config: get_str(&mut buf, "section_config", 60)?,
            })),
            StreamType::Ai => Err(WireError::UndecodableStreamType(stream_type)),
        }
    }
}

// ---------------------------------------------------------------------------
// Stream payloads
// ---------------------------------------------------------------------------

/// Character pose update.
///
/// Layout: `command:4, pos:12, rotation:4, animation_time:4,
/// animation_mode:10`.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterPositionStreamData {
    pub position: Vector3,
    /// Rotation in radians.
    pub rotation: f32,
    pub animation_time: f32,
    pub animation_mode: CharacterAnimation,
}

impl CharacterPositionStreamData {
    pub const SIZE: usize = 4 + 12 + 4 + 4 + 10;
}

/// Character attached to another user's stream (entered a vehicle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacterAttachStreamData {
    pub source_id: u32,
    pub stream_id: u32,
    pub position: i32,
}

impl CharacterAttachStreamData {
    pub const SIZE: usize = 16;
}

/// Actor state update.  The fixed head is followed by a variable-length
/// node data blob the client treats as opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorStreamData {
    /// Milliseconds since the sender connected.
    pub time: u32,
    pub engine_rpm: f32,
    pub engine_acceleration: f32,
    pub engine_clutch: f32,
    pub engine_gear: u32,
    pub steering: f32,
    pub brake: f32,
    pub wheel_speed: f32,
    pub flag_mask: u32,
    pub position: Vector3,
    pub node_data: Vec<u8>,
}

impl ActorStreamData {
    pub const HEAD_SIZE: usize = 4 * 9 + 12;
}

/// A decoded stream payload, discriminated first on the stream's type and,
/// for character streams, on the leading command word.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamData {
    CharacterPosition(CharacterPositionStreamData),
    CharacterAttach(CharacterAttachStreamData),
    CharacterDetach,
    Actor(ActorStreamData),
}

impl StreamData {
    /// Decode a stream payload.  Chat payloads are opaque and have no
    /// decoder; asking for one is an error.
    pub fn decode(stream_type: StreamType, data: &[u8]) -> Result<Self, WireError> {
        match stream_type {
            StreamType::Character => {
                expect_at_least(data, 4)?;
                let mut buf = data;
                let command = CharacterCommand::try_from(buf.get_i32_le())?;
                match command {
                    CharacterCommand::Position => {
                        expect_len(data, CharacterPositionStreamData::SIZE)?;
                        let position = Vector3::new(
                            buf.get_f32_le(),
                            buf.get_f32_le(),
                            buf.get_f32_le(),
                        );
                        let rotation = buf.get_f32_le();
                        let animation_time = buf.get_f32_le();
                        let mode = get_str(&mut buf, "animation_mode", 10)?;
                        Ok(Self::CharacterPosition(CharacterPositionStreamData {
                            position,
                            rotation,
                            animation_time,
                            animation_mode: CharacterAnimation::from_wire(&mode)?,
                        }))
                    }
                    CharacterCommand::Attach => {
                        expect_len(data, CharacterAttachStreamData::SIZE)?;
                        Ok(Self::CharacterAttach(CharacterAttachStreamData {
                            source_id: buf.get_u32_le(),
                            stream_id: buf.get_u32_le(),
                            position: buf.get_i32_le(),
                        }))
                    }
                    CharacterCommand::Detach => {
                        expect_len(data, 4)?;
                        Ok(Self::CharacterDetach)
                    }
                    CharacterCommand::Invalid => {
                        Err(WireError::UnknownCharacterCommand(command as i32))
                    }
                }
            }
            StreamType::Actor => {
                expect_at_least(data, ActorStreamData::HEAD_SIZE)?;
                let mut buf = data;
                Ok(Self::Actor(ActorStreamData {
                    time: buf.get_u32_le(),
                    engine_rpm: buf.get_f32_le(),
                    engine_acceleration: buf.get_f32_le(),
                    engine_clutch: buf.get_f32_le(),
                    engine_gear: buf.get_u32_le(),
                    steering: buf.get_f32_le(),
                    brake: buf.get_f32_le(),
                    wheel_speed: buf.get_f32_le(),
                    flag_mask: buf.get_u32_le(),
                    position: Vector3::new(buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()),
                    node_data: buf.to_vec(),
                }))
            }
            StreamType::Chat | StreamType::Ai => Err(WireError::UndecodableStreamType(stream_type)),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        match self {
            Self::CharacterPosition(d) => {
                let mut buf = BytesMut::with_capacity(CharacterPositionStreamData::SIZE);
                buf.put_i32_le(CharacterCommand::Position as i32);
                buf.put_f32_le(d.position.x);
                buf.put_f32_le(d.position.y);
                buf.put_f32_le(d.position.z);
                buf.put_f32_le(d.rotation);
                buf.put_f32_le(d.animation_time);
                put_str(&mut buf, "animation_mode", d.animation_mode.as_str(), 10)?;
                Ok(buf.to_vec())
            }
            Self::CharacterAttach(d) => {
                let mut buf = BytesMut::with_capacity(CharacterAttachStreamData::SIZE);
                buf.put_i32_le(CharacterCommand::Attach as i32);
                buf.put_u32_le(d.source_id);
                buf.put_u32_le(d.stream_id);
                buf.put_i32_le(d.position);
                Ok(buf.to_vec())
            }
            Self::CharacterDetach => {
                let mut buf = BytesMut::with_capacity(4);
                buf.put_i32_le(CharacterCommand::Detach as i32);
                Ok(buf.to_vec())
            }
            Self::Actor(d) => {
                let mut buf =
                    BytesMut::with_capacity(ActorStreamData::HEAD_SIZE + d.node_data.len());
                buf.put_u32_le(d.time);
                buf.put_f32_le(d.engine_rpm);
                buf.put_f32_le(d.engine_acceleration);
                buf.put_f32_le(d.engine_clutch);
                buf.put_u32_le(d.engine_gear);
                buf.put_f32_le(d.steering);
                buf.put_f32_le(d.brake);
                buf.put_f32_le(d.wheel_speed);
                buf.put_u32_le(d.flag_mask);
                buf.put_f32_le(d.position.x);
                buf.put_f32_le(d.position.y);
                buf.put_f32_le(d.position.z);
                buf.put_slice(&d.node_data);
                Ok(buf.to_vec())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Private chat payload
// ---------------------------------------------------------------------------

/// Private chat payloads are a u32 recipient followed by an 8000-byte
/// NUL-padded UTF-8 buffer.
pub const PRIVATE_CHAT_PAYLOAD_LEN: usize = 4 + 8000;

pub fn encode_private_chat(uid: u32, message: &str) -> Result<Vec<u8>, WireError> {
    let mut buf = BytesMut::with_capacity(PRIVATE_CHAT_PAYLOAD_LEN);
    buf.put_u32_le(uid);
    put_str(&mut buf, "message", message, 8000)?;
    Ok(buf.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::color;

    fn sample_user_info() -> UserInfo {
        UserInfo {
            unique_id: 7,
            auth_status: AuthStatus::BOT,
            slot_num: -2,
            color_num: 3,
            username: "bot".to_owned(),
            user_token: "token".to_owned(),
            server_password: crate::hash_password(""),
            language: "en_US".to_owned(),
            client_name: "bot".to_owned(),
            client_version: "2022.12".to_owned(),
            client_guid: String::new(),
            session_type: "bot".to_owned(),
            session_options: String::new(),
        }
    }

    #[test]
    fn record_sizes_are_wire_exact() {
        assert_eq!(ServerInfo::SIZE, 4373);
        assert_eq!(UserInfo::SIZE, 359);
        assert_eq!(StreamRegister::SIZE, 272);
        assert_eq!(CharacterPositionStreamData::SIZE, 34);
        assert_eq!(ActorStreamData::HEAD_SIZE, 48);
    }

    #[test]
    fn server_info_round_trip() {
        let info = ServerInfo {
            protocol_version: RORNET_VERSION.to_owned(),
            terrain_name: "any.terrn2".to_owned(),
            server_name: "t".to_owned(),
            has_password: false,
            info: "welcome".to_owned(),
        };
        let bytes = info.encode().unwrap();
        assert_eq!(bytes.len(), ServerInfo::SIZE);
        assert_eq!(ServerInfo::decode(&bytes).unwrap(), info);
    }

    #[test]
    fn user_info_round_trip_strips_nuls() {
        let info = sample_user_info();
        let bytes = info.encode().unwrap();
        assert_eq!(bytes.len(), UserInfo::SIZE);
        assert_eq!(UserInfo::decode(&bytes).unwrap(), info);
    }

    #[test]
    fn user_color_falls_back_to_white() {
        let mut info = sample_user_info();
        assert_eq!(info.user_color(), PLAYER_COLORS[3]);
        info.color_num = -1;
        assert_eq!(info.user_color(), color::WHITE);
        info.color_num = 25;
        assert_eq!(info.user_color(), color::WHITE);
    }

    #[test]
    fn chat_register_round_trip() {
        let reg = StreamRegister::new_chat(7, 10);
        let bytes = reg.encode().unwrap();
        assert_eq!(bytes.len(), StreamRegister::SIZE);
        assert_eq!(StreamRegister::decode(&bytes).unwrap(), reg);
    }

    #[test]
    fn actor_register_round_trip() {
        let reg = StreamRegister::Actor(ActorStreamRegister {
            status: 0,
            origin_source_id: 42,
            origin_stream_id: 12,
            name: "fancy.truck".to_owned(),
            buffer_size: 3,
            timestamp: -1,
            skin: String::new(),
            section_config: String::new(),
        });
        let bytes = reg.encode().unwrap();
        assert_eq!(bytes.len(), StreamRegister::SIZE);
        assert_eq!(StreamRegister::decode(&bytes).unwrap(), reg);
    }

    #[test]
    fn ai_register_is_a_decode_error() {
        let mut bytes = StreamRegister::new_chat(1, 10).encode().unwrap();
        bytes[0] = 2; // AI stream type
        assert!(matches!(
            StreamRegister::decode(&bytes),
            Err(WireError::UndecodableStreamType(StreamType::Ai))
        ));
    }

    #[test]
    fn character_position_round_trip() {
        let data = StreamData::CharacterPosition(CharacterPositionStreamData {
            position: Vector3::new(10.0, 0.0, 0.0),
            rotation: 1.5,
            animation_time: 0.25,
            animation_mode: CharacterAnimation::IdleSway,
        });
        let bytes = data.encode().unwrap();
        assert_eq!(bytes.len(), CharacterPositionStreamData::SIZE);
        assert_eq!(StreamData::decode(StreamType::Character, &bytes).unwrap(), data);
    }

    #[test]
    fn character_payload_discriminates_on_command() {
        let attach = StreamData::CharacterAttach(CharacterAttachStreamData {
            source_id: 5,
            stream_id: 11,
            position: 0,
        });
        let bytes = attach.encode().unwrap();
        assert_eq!(StreamData::decode(StreamType::Character, &bytes).unwrap(), attach);

        let detach = StreamData::CharacterDetach.encode().unwrap();
        assert_eq!(
            StreamData::decode(StreamType::Character, &detach).unwrap(),
            StreamData::CharacterDetach
        );
    }

    #[test]
    fn actor_payload_keeps_trailing_node_data() {
        let data = StreamData::Actor(ActorStreamData {
            time: 1000,
            engine_rpm: 900.0,
            engine_acceleration: 0.2,
            engine_clutch: 1.0,
            engine_gear: 3,
            steering: -0.1,
            brake: 0.0,
            wheel_speed: 14.0,
            flag_mask: 0,
            position: Vector3::new(1.0, 2.0, 3.0),
            node_data: vec![1, 2, 3, 4, 5],
        });
        let bytes = data.encode().unwrap();
        assert_eq!(bytes.len(), ActorStreamData::HEAD_SIZE + 5);
        assert_eq!(StreamData::decode(StreamType::Actor, &bytes).unwrap(), data);
    }

    #[test]
    fn chat_payload_has_no_decoder() {
        assert!(StreamData::decode(StreamType::Chat, b"hi").is_err());
    }

    #[test]
    fn private_chat_payload_layout() {
        let payload = encode_private_chat(9, "hello").unwrap();
        assert_eq!(payload.len(), PRIVATE_CHAT_PAYLOAD_LEN);
        assert_eq!(&payload[..4], &9u32.to_le_bytes());
        assert_eq!(&payload[4..9], b"hello");
        assert!(payload[9..].iter().all(|&b| b == 0));
    }
}
