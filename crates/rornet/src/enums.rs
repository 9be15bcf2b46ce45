//! Protocol enumerations.
//!
//! Every discriminant here is frozen by the wire protocol: the message type
//! codes, stream types, and character commands are read and written as raw
//! integers, and the player palette is indexed by the server-assigned
//! `color_num`.

use bitflags::bitflags;

use crate::wire::WireError;

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// Packet type codes.  The primary table starts at 1025; `UserInfoLegacy`
/// is a stray legacy code kept for completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Client sends its protocol version as the first message.
    Hello = 1025,
    /// Server is full.
    ServerFull = 1026,
    /// Wrong password.
    WrongPassword = 1027,
    /// Wrong protocol version.
    WrongVersion = 1028,
    /// Client not allowed to join (banned).
    Banned = 1029,
    /// Client accepted.
    Welcome = 1030,
    /// Server sends its version.
    ServerVersion = 1031,
    /// Server sends the terrain name.
    ServerSettings = 1032,
    /// User data sent from the server to clients.
    UserInfo = 1033,
    /// Master server info.
    MasterServerInfo = 1034,
    /// Network quality information.
    NetQuality = 1035,
    /// Script command.  Sent in both directions.
    GameCmd = 1036,
    /// New user joined.
    UserJoin = 1037,
    /// User left the server.
    UserLeave = 1038,
    /// Chat line in UTF-8 encoding.
    Chat = 1039,
    /// Private chat line in UTF-8 encoding.
    PrivateChat = 1040,
    /// Create a new stream.
    StreamRegister = 1041,
    /// Result of a stream creation.
    StreamRegisterResult = 1042,
    /// Remove a stream.
    StreamUnregister = 1043,
    /// Stream payload.
    StreamData = 1044,
    /// Stream payload the receiver is allowed to drop.
    StreamDataDiscardable = 1045,
    /// Legacy user info message.
    UserInfoLegacy = 1003,
}

impl MessageType {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for MessageType {
    type Error = WireError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Ok(match code {
            1025 => Self::Hello,
            1026 => Self::ServerFull,
            1027 => Self::WrongPassword,
            1028 => Self::WrongVersion,
            1029 => Self::Banned,
            1030 => Self::Welcome,
            1031 => Self::ServerVersion,
            1032 => Self::ServerSettings,
            1033 => Self::UserInfo,
            1034 => Self::MasterServerInfo,
            1035 => Self::NetQuality,
            1036 => Self::GameCmd,
            1037 => Self::UserJoin,
            1038 => Self::UserLeave,
            1039 => Self::Chat,
            1040 => Self::PrivateChat,
            1041 => Self::StreamRegister,
            1042 => Self::StreamRegisterResult,
            1043 => Self::StreamUnregister,
            1044 => Self::StreamData,
            1045 => Self::StreamDataDiscardable,
            1003 => Self::UserInfoLegacy,
            _ => return Err(WireError::UnknownMessageType(code)),
        })
    }
}

// ---------------------------------------------------------------------------
// AuthStatus
// ---------------------------------------------------------------------------

bitflags! {
    /// Authentication status flags assigned by the server.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AuthStatus: u32 {
        const NONE = 0;
        const ADMIN = 1;
        const RANKED = 2;
        const MOD = 4;
        const BOT = 8;
        const BANNED = 16;
    }
}

impl AuthStatus {
    /// Single-letter tag shown next to usernames in chat.
    pub fn tag(self) -> &'static str {
        if self.contains(Self::ADMIN) {
            "A"
        } else if self.contains(Self::MOD) {
            "M"
        } else if self.contains(Self::RANKED) {
            "R"
        } else if self.contains(Self::BOT) {
            "B"
        } else if self.contains(Self::BANNED) {
            "X"
        } else {
            ""
        }
    }
}

bitflags! {
    /// Vehicle state flags carried in `ActorStreamData.flag_mask`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NetMask: u32 {
        /// Horn is in use.
        const HORN = 1 << 0;
        /// Police siren is on.
        const POLICE_AUDIO = 1 << 1;
        /// Custom particles are on.
        const PARTICLE = 1 << 2;
        /// Parking brake is on.
        const PARKING_BRAKE = 1 << 3;
        /// Traction control is on.
        const TRACTION_CONTROL_ACTIVE = 1 << 4;
        /// Anti-lock brakes are on.
        const ANTI_LOCK_BRAKES_ACTIVE = 1 << 5;
        /// Ignition is on.
        const ENGINE_CONTACT = 1 << 6;
        /// Engine is running.
        const ENGINE_RUN = 1 << 7;
        const ENGINE_MODE_AUTOMATIC = 1 << 8;
        const ENGINE_MODE_SEMIAUTO = 1 << 9;
        const ENGINE_MODE_MANUAL = 1 << 10;
        const ENGINE_MODE_MANUAL_STICK = 1 << 11;
        const ENGINE_MODE_MANUAL_RANGES = 1 << 12;
    }
}

bitflags! {
    /// Light state flags carried in `ActorStreamData.flag_mask`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LightMask: u32 {
        const CUSTOM_1 = 1 << 0;
        const CUSTOM_2 = 1 << 1;
        const CUSTOM_3 = 1 << 2;
        const CUSTOM_4 = 1 << 3;
        const CUSTOM_5 = 1 << 4;
        const CUSTOM_6 = 1 << 5;
        const CUSTOM_7 = 1 << 6;
        const CUSTOM_8 = 1 << 7;
        const CUSTOM_9 = 1 << 8;
        const CUSTOM_10 = 1 << 9;
        const HEADLIGHT = 1 << 10;
        const HIGH_BEAMS = 1 << 11;
        const FOG_LIGHTS = 1 << 12;
        const SIDE_LIGHTS = 1 << 13;
        const BRAKES = 1 << 14;
        const REVERSE = 1 << 15;
        const BEACONS = 1 << 16;
        const BLINK_LEFT = 1 << 17;
        const BLINK_RIGHT = 1 << 18;
        const BLINK_WARN = 1 << 19;
    }
}

// ---------------------------------------------------------------------------
// Stream discriminants
// ---------------------------------------------------------------------------

/// Stream type discriminant, the leading i32 of every stream register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StreamType {
    Actor = 0,
    Character = 1,
    Ai = 2,
    Chat = 3,
}

impl TryFrom<i32> for StreamType {
    type Error = WireError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Self::Actor,
            1 => Self::Character,
            2 => Self::Ai,
            3 => Self::Chat,
            _ => return Err(WireError::UnknownStreamType(code)),
        })
    }
}

/// Status values carried in actor stream register replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ActorStreamStatus {
    Mismatch = -2,
    Invalid = -1,
    Unknown = 0,
    Success = 1,
}

/// The kind of in-world entity behind an actor stream, parsed from the
/// trailing extension of the actor definition filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    Truck,
    Car,
    Load,
    Airplane,
    Boat,
    Trailer,
    Train,
    Fixed,
}

impl ActorType {
    pub fn from_extension(ext: &str) -> Option<Self> {
        Some(match ext {
            "truck" => Self::Truck,
            "car" => Self::Car,
            "load" => Self::Load,
            "airplane" => Self::Airplane,
            "boat" => Self::Boat,
            "trailer" => Self::Trailer,
            "train" => Self::Train,
            "fixed" => Self::Fixed,
            _ => return None,
        })
    }
}

/// Character stream payload commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CharacterCommand {
    Invalid = 0,
    Position = 1,
    Attach = 2,
    Detach = 3,
}

impl TryFrom<i32> for CharacterCommand {
    type Error = WireError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Self::Invalid,
            1 => Self::Position,
            2 => Self::Attach,
            3 => Self::Detach,
            _ => return Err(WireError::UnknownCharacterCommand(code)),
        })
    }
}

/// Character animation names.  The wire form is the exact string in a
/// 10-byte NUL-padded field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterAnimation {
    IdleSway,
    SpotSwim,
    Walk,
    Run,
    SwimLoop,
    Turn,
    Driving,
    SideStep,
}

impl CharacterAnimation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IdleSway => "Idle_sway",
            Self::SpotSwim => "Spot_swim",
            Self::Walk => "Walk",
            Self::Run => "Run",
            Self::SwimLoop => "Swim_loop",
            Self::Turn => "Turn",
            Self::Driving => "Driving",
            Self::SideStep => "Side_step",
        }
    }

    pub fn from_wire(name: &str) -> Result<Self, WireError> {
        Ok(match name {
            "Idle_sway" => Self::IdleSway,
            "Spot_swim" => Self::SpotSwim,
            "Walk" => Self::Walk,
            "Run" => Self::Run,
            "Swim_loop" => Self::SwimLoop,
            "Turn" => Self::Turn,
            "Driving" => Self::Driving,
            "Side_step" => Self::SideStep,
            _ => return Err(WireError::UnknownAnimation(name.to_owned())),
        })
    }
}

// ---------------------------------------------------------------------------
// Colors
// ---------------------------------------------------------------------------

/// The color assigned to each player, indexed by `color_num`.
/// Order is frozen by the server; do not reorder.
pub const PLAYER_COLORS: [&str; 25] = [
    "#00CC00", // green
    "#0066B3", // blue
    "#FF8000", // orange
    "#FFCC00", // yellow
    "#CCFF00", // lime
    "#FF0000", // red
    "#808080", // gray
    "#008F00", // dark green
    "#B35A00", // windsor tan
    "#B38F00", // light gold
    "#8FB300", // apple green
    "#B30000", // ue red
    "#BEBEBE", // dark gray
    "#80FF80", // light green
    "#80C9FF", // light sky blue
    "#FFC080", // mac and cheese
    "#FFE680", // yellow crayola
    "#AA80FF", // lavender floral
    "#EE00CC", // electric pink
    "#FF8080", // congo pink
    "#666600", // bronze yellow
    "#FFBFFF", // brilliant lavender
    "#00FFCC", // sea green
    "#CC6699", // wild orchid
    "#999900", // dark yellow
];

/// Chat markup colors.
pub mod color {
    pub const BLACK: &str = "#000000";
    pub const GREY: &str = "#999999";
    pub const RED: &str = "#FF0000";
    pub const YELLOW: &str = "#FFFF00";
    pub const WHITE: &str = "#FFFFFF";
    pub const CYAN: &str = "#00FFFF";
    pub const BLUE: &str = "#0000FF";
    pub const GREEN: &str = "#00FF00";
    pub const MAGENTA: &str = "#FF00FF";
    pub const COMMAND: &str = "#941E8D";
    pub const WHISPER: &str = "#967417";
    pub const SCRIPT: &str = "#32436F";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_codes_match_the_wire_tables() {
        assert_eq!(MessageType::Hello.code(), 1025);
        assert_eq!(MessageType::StreamDataDiscardable.code(), 1045);
        assert_eq!(MessageType::UserInfoLegacy.code(), 1003);
        assert_eq!(MessageType::try_from(1038).unwrap(), MessageType::UserLeave);
        assert!(MessageType::try_from(9999).is_err());
    }

    #[test]
    fn auth_status_is_a_bitflag() {
        let auth = AuthStatus::MOD | AuthStatus::RANKED;
        assert!(auth.intersects(AuthStatus::MOD | AuthStatus::ADMIN));
        assert!(!AuthStatus::BOT.intersects(AuthStatus::MOD | AuthStatus::ADMIN));
        assert_eq!(auth.tag(), "M");
    }

    #[test]
    fn unknown_stream_type_is_a_decode_error() {
        assert!(StreamType::try_from(7).is_err());
        assert_eq!(StreamType::try_from(3).unwrap(), StreamType::Chat);
    }
}
