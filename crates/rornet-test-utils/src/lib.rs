// rornet-test-utils: A scriptable mock RoRnet server for testing clients.
//
// Binds to port 0 (random) and exposes the bound address; each test spins
// up its own isolated instance and drives the session packet by packet.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use rornet::packet::{read_packet, write_packet};
use rornet::{MessageType, Packet, ServerInfo, StreamRegister, UserInfo, RORNET_VERSION};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A mock RoRnet TCP server for integration testing.
pub struct MockServer {
    listener: TcpListener,
}

impl MockServer {
    /// Start the mock server, binding to a random available port.
    pub async fn start() -> Result<Self, BoxError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(Self { listener })
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, BoxError> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for one client connection.
    pub async fn accept(&self) -> Result<MockSession, BoxError> {
        let (stream, _peer) = self.listener.accept().await?;
        Ok(MockSession { stream })
    }
}

/// One accepted client connection, driven packet by packet by the test.
pub struct MockSession {
    stream: TcpStream,
}

/// What the client sent during a scripted handshake.
pub struct HandshakeRecord {
    pub hello_payload: Vec<u8>,
    pub client_info: UserInfo,
    pub chat_register: StreamRegister,
    pub character_register: StreamRegister,
}

impl MockSession {
    pub async fn read_packet(&mut self) -> Result<Packet, BoxError> {
        Ok(read_packet(&mut self.stream).await?)
    }

    /// Read packets until one matches the predicate, skipping the rest
    /// (heartbeats arrive interleaved with whatever a test waits for).
    pub async fn read_until(
        &mut self,
        mut predicate: impl FnMut(&Packet) -> bool,
    ) -> Result<Packet, BoxError> {
        loop {
            let packet = self.read_packet().await?;
            if predicate(&packet) {
                return Ok(packet);
            }
        }
    }

    pub async fn send_packet(&mut self, packet: &Packet) -> Result<(), BoxError> {
        write_packet(&mut self.stream, packet).await?;
        Ok(())
    }

    pub async fn send(
        &mut self,
        kind: MessageType,
        source: u32,
        stream_id: u32,
        payload: Vec<u8>,
    ) -> Result<(), BoxError> {
        self.send_packet(&Packet::new(kind, source, stream_id, payload))
            .await
    }

    /// Run the server side of a successful handshake, assigning `uid` and
    /// color 0 to the client.  Returns everything the client sent.
    pub async fn complete_handshake(&mut self, uid: u32) -> Result<HandshakeRecord, BoxError> {
        // Client hello carries the protocol tag.
        let hello = self.read_packet().await?;
        if hello.kind != MessageType::Hello {
            return Err(format!("expected HELLO, got {:?}", hello.kind).into());
        }

        let server_info = ServerInfo {
            protocol_version: RORNET_VERSION.to_owned(),
            terrain_name: "any.terrn2".to_owned(),
            server_name: "mock".to_owned(),
            has_password: false,
            info: String::new(),
        };
        self.send(MessageType::Hello, 0, 0, server_info.encode()?)
            .await?;

        let user_info_packet = self.read_packet().await?;
        if user_info_packet.kind != MessageType::UserInfo {
            return Err(format!("expected USER_INFO, got {:?}", user_info_packet.kind).into());
        }
        let client_info = UserInfo::decode(&user_info_packet.payload)?;

        let mut welcome = client_info.clone();
        welcome.unique_id = uid;
        welcome.color_num = 0;
        self.send(MessageType::Welcome, uid, 0, welcome.encode()?)
            .await?;

        let chat = self.read_packet().await?;
        if chat.kind != MessageType::StreamRegister {
            return Err(format!("expected STREAM_REGISTER, got {:?}", chat.kind).into());
        }
        let chat_register = StreamRegister::decode(&chat.payload)?;

        let character = self.read_packet().await?;
        if character.kind != MessageType::StreamRegister {
            return Err(format!("expected STREAM_REGISTER, got {:?}", character.kind).into());
        }
        let character_register = StreamRegister::decode(&character.payload)?;

        Ok(HandshakeRecord {
            hello_payload: hello.payload,
            client_info,
            chat_register,
            character_register,
        })
    }
}
