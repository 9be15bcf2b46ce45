// rornet: RoRnet protocol core.
//
// Wire-exact encodings for the RoRnet 2.44 TCP protocol: the 16-byte packet
// header, the handshake records (server info, user info), stream registers,
// and stream payloads.  All records are little-endian with fixed-width
// NUL-padded string fields.

pub mod enums;
pub mod messages;
pub mod packet;
pub mod vector;
pub mod wire;

pub use enums::{
    ActorStreamStatus, ActorType, AuthStatus, CharacterAnimation, CharacterCommand, LightMask,
    MessageType, NetMask, StreamType, PLAYER_COLORS,
};
pub use messages::{
    encode_private_chat, ActorStreamData, ActorStreamRegister, CharacterAttachStreamData,
    CharacterPositionStreamData, GenericStreamRegister, ServerInfo, StreamData, StreamRegister,
    UserInfo, PRIVATE_CHAT_PAYLOAD_LEN,
};
pub use packet::{read_packet, write_packet, Packet};
pub use vector::Vector3;
pub use wire::WireError;

/// The protocol tag sent in the HELLO payload.
pub const RORNET_VERSION: &str = "RoRnet_2.44";

/// Stream ids below this value are reserved by the server; client-allocated
/// ids count up from here.
pub const FIRST_CLIENT_STREAM_ID: u32 = 10;

/// Hash a server password the way the wire expects it: uppercase hex SHA-1
/// of the UTF-8 plaintext.  An empty password hashes the empty input.
pub fn hash_password(password: &str) -> String {
    use sha1::{Digest, Sha1};

    Sha1::digest(password.as_bytes())
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::hash_password;

    #[test]
    fn empty_password_hash() {
        assert_eq!(
            hash_password(""),
            "DA39A3EE5E6B4B0D3255BFEF95601890AFD80709"
        );
    }

    #[test]
    fn known_password_hash() {
        assert_eq!(
            hash_password("secret"),
            "E5E9FA1BA31ECD1AE84F75CAAA474F3A663F05F4"
        );
    }
}
