//! RoRnet connection orchestrator.
//!
//! Owns the TCP session with the game server and the three cooperative
//! loops that keep it alive:
//!
//! - the **reader loop** parses inbound packets in arrival order and routes
//!   them to registry mutations and event emission;
//! - the **heartbeat loop** re-sends the bot's character position on a fixed
//!   interval so the server does not drop the client for inactivity;
//! - the **frame clock** emits `frame_step` events at a stable rate for
//!   time-based subscribers (announcements, countdowns).
//!
//! # Handshake
//! 1. Open TCP, start the reader loop
//! 2. Send `HELLO` with the protocol tag; wait for the server's `HELLO`
//!    carrying `ServerInfo`
//! 3. Send `USER_INFO`; wait for `WELCOME` to assign our uid and color
//! 4. Register the chat and character streams (in that order)
//!
//! Refusals (`SERVER_FULL`, `WRONG_PASSWORD`, `WRONG_VERSION`, `BANNED`)
//! surface out of [`RoRConnection::connect`] and are not retried here.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::events::{Event, EventBus};
use crate::registry::{Registry, RegistryError};
use crate::ticker::Ticker;
use rornet::messages::{ActorStreamData, CharacterPositionStreamData};
use rornet::packet::{read_packet, write_packet};
use rornet::{
    encode_private_chat, hash_password, ActorStreamStatus, AuthStatus, CharacterAnimation,
    MessageType, Packet, ServerInfo, StreamData, StreamRegister, StreamType, UserInfo, Vector3,
    WireError, FIRST_CLIENT_STREAM_ID, RORNET_VERSION,
};

/// Frame clock rate: a `frame_step` event every 1/20 s.
pub const STABLE_FPS: u32 = 20;

/// Name this client reports in `UserInfo.client_name`.
pub const CLIENT_NAME: &str = "bot";
/// Version this client reports in `UserInfo.client_version`.
pub const CLIENT_VERSION: &str = "2022.12";

const HANDSHAKE_POLL: Duration = Duration::from_millis(100);
const READER_TICK: Duration = Duration::from_millis(10);
const FRAME_TICK: Duration = Duration::from_millis(10);
const HEARTBEAT_TICK: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A handshake refusal sent by the server.  Never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRefusal {
    Full,
    WrongPassword,
    WrongVersion,
    Banned,
}

impl fmt::Display for ServerRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "server is full"),
            Self::WrongPassword => write!(f, "wrong password"),
            Self::WrongVersion => write!(f, "wrong protocol version"),
            Self::Banned => write!(f, "client is banned"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Transport-level refusal; the reconnect driver retries these.
    #[error("connection refused by {address}")]
    Refused { address: String },
    #[error("could not connect to {address} after {attempts} attempts")]
    RetriesExhausted { address: String, attempts: u32 },
    #[error("server refused the session: {0}")]
    Refusal(ServerRefusal),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("disconnected from the server")]
    Disconnected,
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// ConnectOptions
// ---------------------------------------------------------------------------

/// Everything `connect` needs to reach and introduce itself to a server.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub user_token: String,
    /// Plaintext; hashed before it reaches the wire.
    pub password: String,
    pub language: String,
    /// Seconds between character heartbeats.
    pub heartbeat_interval: f32,
    /// Actor `filename → display name` lookup; may be empty.
    pub truck_names: HashMap<String, String>,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: "RoR Server Bot".to_owned(),
            user_token: String::new(),
            password: String::new(),
            language: "en_US".to_owned(),
            heartbeat_interval: 1.0,
            truck_names: HashMap::new(),
        }
    }

    fn bot_user_info(&self) -> UserInfo {
        UserInfo {
            unique_id: 0,
            auth_status: AuthStatus::BOT,
            // Bots do not occupy a regular player slot.
            slot_num: -2,
            color_num: -1,
            username: self.username.clone(),
            user_token: self.user_token.clone(),
            server_password: hash_password(&self.password),
            language: self.language.clone(),
            client_name: CLIENT_NAME.to_owned(),
            client_version: CLIENT_VERSION.to_owned(),
            client_guid: String::new(),
            session_type: "bot".to_owned(),
            session_options: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// RoRConnection
// ---------------------------------------------------------------------------

/// An authenticated session with a RoRnet server.
///
/// Created by [`RoRConnection::connect`]; shared behind an `Arc` between the
/// loops, event handlers, and the caller.  All registry access goes through
/// a short-lived lock that is never held across an await point.
pub struct RoRConnection {
    address: String,
    heartbeat_interval: f32,
    /// The bot's own identity; replaced wholesale by WELCOME.
    user: Mutex<UserInfo>,
    server_info: Mutex<Option<ServerInfo>>,
    registry: Mutex<Registry>,
    events: EventBus,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    next_stream_id: AtomicU32,
    net_quality: AtomicU32,
    connected: AtomicBool,
    connect_time: Mutex<Option<Instant>>,
    session_error: Mutex<Option<ConnectionError>>,
    closed_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RoRConnection {
    /// Connect and run the full handshake.  On success the connection is in
    /// the running state with all three loops started.
    pub async fn connect(options: ConnectOptions) -> Result<Arc<Self>, ConnectionError> {
        let address = format!("{}:{}", options.host, options.port);
        info!(%address, "connecting");

        let stream = TcpStream::connect(&address).await.map_err(|err| {
            if err.kind() == io::ErrorKind::ConnectionRefused {
                ConnectionError::Refused {
                    address: address.clone(),
                }
            } else {
                ConnectionError::Io(err)
            }
        })?;
        let (reader, writer) = stream.into_split();

        let conn = Arc::new(Self {
            address,
            heartbeat_interval: options.heartbeat_interval,
            user: Mutex::new(options.bot_user_info()),
            server_info: Mutex::new(None),
            registry: Mutex::new(Registry::new(options.truck_names)),
            events: EventBus::new(),
            writer: tokio::sync::Mutex::new(Some(writer)),
            next_stream_id: AtomicU32::new(FIRST_CLIENT_STREAM_ID),
            net_quality: AtomicU32::new(0),
            connected: AtomicBool::new(false),
            connect_time: Mutex::new(None),
            session_error: Mutex::new(None),
            closed_tx: watch::channel(false).0,
            tasks: Mutex::new(Vec::new()),
        });

        info!("starting reader loop");
        let reader_conn = Arc::clone(&conn);
        conn.push_task(tokio::spawn(async move {
            reader_conn.reader_loop(reader).await;
        }));

        if let Err(err) = conn.handshake().await {
            conn.teardown().await;
            return Err(err);
        }

        *conn.connect_time.lock().unwrap() = Some(Instant::now());
        conn.connected.store(true, Ordering::SeqCst);

        info!("starting heartbeat loop");
        let heartbeat_conn = Arc::clone(&conn);
        conn.push_task(tokio::spawn(async move {
            heartbeat_conn.run_heartbeat().await;
        }));

        info!("starting frame clock");
        let frame_conn = Arc::clone(&conn);
        conn.push_task(tokio::spawn(async move {
            frame_conn.frame_clock_loop().await;
        }));

        Ok(conn)
    }

    // -- accessors --

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The server-assigned unique id of this client (0 before WELCOME).
    pub fn uid(&self) -> u32 {
        self.user.lock().unwrap().unique_id
    }

    /// The bot's own authentication flags.
    pub fn auth_status(&self) -> AuthStatus {
        self.user.lock().unwrap().auth_status
    }

    pub fn user_info(&self) -> UserInfo {
        self.user.lock().unwrap().clone()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.lock().unwrap().clone()
    }

    pub fn net_quality(&self) -> u32 {
        self.net_quality.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Lock the user/stream registry.  The guard must not be held across an
    /// await point.
    pub fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap()
    }

    /// Stream id of the bot's chat stream.
    pub fn chat_sid(&self) -> Result<u32, ConnectionError> {
        let uid = self.uid();
        self.registry()
            .get_user(uid)?
            .chat_stream_id
            .ok_or_else(|| ConnectionError::Protocol("chat stream not registered".to_owned()))
    }

    /// Stream id of the bot's character stream.
    pub fn character_sid(&self) -> Result<u32, ConnectionError> {
        let uid = self.uid();
        self.registry()
            .get_user(uid)?
            .character_stream_id
            .ok_or_else(|| ConnectionError::Protocol("character stream not registered".to_owned()))
    }

    // -- lifecycle --

    async fn handshake(&self) -> Result<(), ConnectionError> {
        self.send_hello().await?;
        self.send_user_info().await?;
        self.register_initial_streams().await
    }

    async fn send_hello(&self) -> Result<(), ConnectionError> {
        info!("sending hello");
        *self.server_info.lock().unwrap() = None;

        // No unique id yet; source 0 is the server.
        let stream_id = self.next_stream_id.load(Ordering::SeqCst);
        self.send(Packet::new(
            MessageType::Hello,
            0,
            stream_id,
            RORNET_VERSION.as_bytes().to_vec(),
        ))
        .await?;

        self.await_handshake(|conn| conn.server_info.lock().unwrap().is_some())
            .await
    }

    async fn send_user_info(&self) -> Result<(), ConnectionError> {
        info!(username = %self.user.lock().unwrap().username, "sending user info");

        let payload = self.user.lock().unwrap().encode()?;
        let stream_id = self.next_stream_id.load(Ordering::SeqCst);
        self.send(Packet::new(
            MessageType::UserInfo,
            self.uid(),
            stream_id,
            payload,
        ))
        .await?;

        self.await_handshake(|conn| conn.user.lock().unwrap().color_num != -1)
            .await
    }

    async fn register_initial_streams(&self) -> Result<(), ConnectionError> {
        let uid = self.uid();

        info!("registering chat stream");
        self.register_stream(StreamRegister::new_chat(uid, 0)).await?;

        info!("registering character stream");
        self.register_stream(StreamRegister::new_character(uid, 0))
            .await?;

        Ok(())
    }

    /// Poll a handshake guard at 100 ms until it is satisfied or the reader
    /// loop has failed the session (e.g. with a refusal).
    async fn await_handshake<F>(&self, ready: F) -> Result<(), ConnectionError>
    where
        F: Fn(&Self) -> bool,
    {
        loop {
            if let Some(err) = self.take_session_error() {
                return Err(err);
            }
            if ready(self) {
                return Ok(());
            }
            sleep(HANDSHAKE_POLL).await;
        }
    }

    /// Leave the server and tear the session down.
    pub async fn disconnect(&self) {
        info!(address = %self.address, "disconnecting");

        let leave = Packet::new(
            MessageType::UserLeave,
            self.uid(),
            self.next_stream_id.load(Ordering::SeqCst),
            Vec::new(),
        );
        if let Err(err) = self.send(leave).await {
            debug!(%err, "user leave not sent");
        }

        self.connected.store(false, Ordering::SeqCst);
        self.teardown().await;
    }

    /// Wait until the session is over; returns the fatal error, or
    /// [`ConnectionError::Disconnected`] after a clean disconnect.
    pub async fn closed(&self) -> ConnectionError {
        let mut rx = self.closed_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.take_session_error()
            .unwrap_or(ConnectionError::Disconnected)
    }

    /// Record a fatal loop error and tear the session down.  The first
    /// error wins; it is surfaced by `closed` or the handshake poll.
    fn fail(&self, err: ConnectionError) {
        warn!(%err, "session failed");
        self.connected.store(false, Ordering::SeqCst);
        self.session_error.lock().unwrap().get_or_insert(err);
        self.closed_tx.send_replace(true);
        self.abort_tasks();
    }

    fn take_session_error(&self) -> Option<ConnectionError> {
        self.session_error.lock().unwrap().take()
    }

    async fn teardown(&self) {
        self.abort_tasks();
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.closed_tx.send_replace(true);
    }

    fn push_task(&self, task: JoinHandle<()>) {
        self.tasks.lock().unwrap().push(task);
    }

    fn abort_tasks(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    // -- loops --

    async fn reader_loop(self: Arc<Self>, mut reader: OwnedReadHalf) {
        if let Err(err) = self.read_packets(&mut reader).await {
            self.fail(err);
        }
    }

    async fn read_packets(&self, reader: &mut OwnedReadHalf) -> Result<(), ConnectionError> {
        loop {
            let packet = read_packet(reader).await?;
            debug!(
                kind = ?packet.kind,
                source = packet.source,
                stream_id = packet.stream_id,
                size = packet.size(),
                "received packet"
            );
            self.dispatch(packet).await?;
            sleep(READER_TICK).await;
        }
    }

    async fn run_heartbeat(self: Arc<Self>) {
        if let Err(err) = self.heartbeat_loop().await {
            // Errors after disconnect are the shutdown itself.
            if self.is_connected() {
                self.fail(err);
            }
        }
    }

    /// Re-send the bot's character position every `heartbeat_interval`
    /// seconds, accumulated over 100 ms ticks.
    async fn heartbeat_loop(&self) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        let sid = self.character_sid()?;

        info!(
            interval = self.heartbeat_interval,
            "sending character heartbeats"
        );

        let mut ticker = Ticker::new(self.heartbeat_interval);
        let mut last = Instant::now();
        loop {
            sleep(HEARTBEAT_TICK).await;
            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f32();
            last = now;

            if let Some(elapsed) = ticker.advance(dt) {
                let (position, rotation) = self.bot_pose(sid)?;
                let data = StreamData::CharacterPosition(CharacterPositionStreamData {
                    position,
                    rotation,
                    animation_time: elapsed,
                    animation_mode: CharacterAnimation::IdleSway,
                });
                self.send_stream_data(sid, &data).await?;
            }
        }
    }

    /// Emit `frame_step` events at the stable rate.
    async fn frame_clock_loop(&self) {
        let mut ticker = Ticker::new(1.0 / STABLE_FPS as f32);
        let mut last = Instant::now();
        loop {
            sleep(FRAME_TICK).await;
            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f32();
            last = now;

            if let Some(delta) = ticker.advance(dt) {
                self.events.emit(Event::FrameStep { delta }).await;
            }
        }
    }

    fn bot_pose(&self, sid: u32) -> Result<(Vector3, f32), ConnectionError> {
        let uid = self.uid();
        let registry = self.registry();
        let position = registry.get_position(uid, Some(sid))?.unwrap_or(Vector3::ZERO);
        let rotation = registry.get_rotation(uid, Some(sid))?.unwrap_or(0.0);
        Ok((position, rotation))
    }

    // -- inbound dispatch --

    async fn dispatch(&self, packet: Packet) -> Result<(), ConnectionError> {
        match packet.kind {
            MessageType::Hello => {
                let info = ServerInfo::decode(&packet.payload)?;
                info!(
                    server = %info.server_name,
                    terrain = %info.terrain_name,
                    protocol = %info.protocol_version,
                    "received server info"
                );
                *self.server_info.lock().unwrap() = Some(info);
            }
            MessageType::Welcome => {
                let info = UserInfo::decode(&packet.payload)?;
                info!(uid = info.unique_id, username = %info.username, "welcomed by the server");
                *self.user.lock().unwrap() = info.clone();
                self.registry().add_user(info)?;
            }
            MessageType::ServerFull => {
                return Err(ConnectionError::Refusal(ServerRefusal::Full));
            }
            MessageType::WrongPassword => {
                return Err(ConnectionError::Refusal(ServerRefusal::WrongPassword));
            }
            MessageType::WrongVersion => {
                return Err(ConnectionError::Refusal(ServerRefusal::WrongVersion));
            }
            MessageType::Banned => {
                return Err(ConnectionError::Refusal(ServerRefusal::Banned));
            }
            MessageType::NetQuality => {
                let bytes: [u8; 4] = packet.payload.as_slice().try_into().map_err(|_| {
                    WireError::ShortPayload {
                        expected: 4,
                        got: packet.payload.len(),
                    }
                })?;
                let quality = u32::from_le_bytes(bytes);
                let prev = self.net_quality.swap(quality, Ordering::SeqCst);
                if prev != quality {
                    debug!(prev, quality, "net quality changed");
                    self.events.emit(Event::NetQuality { quality }).await;
                }
            }
            MessageType::UserJoin => {
                if packet.source == self.uid() {
                    return Ok(());
                }
                let info = UserInfo::decode(&packet.payload)?;
                info!(uid = packet.source, username = %info.username, "user joined");
                self.registry().add_user(info.clone())?;
                self.events
                    .emit(Event::UserJoin {
                        uid: packet.source,
                        info,
                    })
                    .await;
            }
            MessageType::UserInfo => {
                let info = UserInfo::decode(&packet.payload)?;
                self.registry().update_user(info.clone())?;
                self.events
                    .emit(Event::UserInfo {
                        uid: packet.source,
                        info,
                    })
                    .await;
            }
            MessageType::UserLeave => {
                let reason = text_payload(&packet.payload);
                if packet.source == self.uid() {
                    info!(%reason, "server dropped this client");
                    return Err(ConnectionError::Disconnected);
                }
                let user = self.registry().delete_user(packet.source)?;
                info!(uid = packet.source, username = %user.username(), %reason, "user left");
                self.events
                    .emit(Event::UserLeave {
                        uid: packet.source,
                        user,
                    })
                    .await;
            }
            MessageType::Chat | MessageType::PrivateChat => {
                let message = text_payload(&packet.payload);
                if message.is_empty() || packet.source == self.uid() {
                    return Ok(());
                }
                info!(from_uid = packet.source, %message, "chat");
                let event = if packet.kind == MessageType::Chat {
                    Event::Chat {
                        from_uid: packet.source,
                        message,
                    }
                } else {
                    Event::PrivateChat {
                        from_uid: packet.source,
                        message,
                    }
                };
                self.events.emit(event).await;
            }
            MessageType::GameCmd => {
                if packet.source == self.uid() {
                    return Ok(());
                }
                let command = text_payload(&packet.payload);
                if command.is_empty() {
                    return Ok(());
                }
                debug!(from_uid = packet.source, %command, "game command");
                self.events
                    .emit(Event::GameCmd {
                        from_uid: packet.source,
                        command,
                    })
                    .await;
            }
            MessageType::StreamRegister => {
                let mut stream = StreamRegister::decode(&packet.payload)?;
                self.registry().add_stream(stream.clone())?;
                info!(
                    uid = packet.source,
                    sid = stream.origin_stream_id(),
                    kind = ?stream.stream_type(),
                    name = %stream.name(),
                    "peer registered a stream"
                );
                if stream.stream_type() == StreamType::Actor {
                    self.reply_to_actor_stream_register(&mut stream, ActorStreamStatus::Success)
                        .await?;
                }
                self.events
                    .emit(Event::StreamRegister {
                        from_uid: packet.source,
                        stream,
                    })
                    .await;
            }
            MessageType::StreamRegisterResult => {
                let stream = StreamRegister::decode(&packet.payload)?;
                info!(
                    uid = packet.source,
                    sid = stream.origin_stream_id(),
                    status = stream.status(),
                    "stream register result"
                );
                self.events
                    .emit(Event::StreamRegisterResult {
                        from_uid: packet.source,
                        stream,
                    })
                    .await;
            }
            MessageType::StreamData | MessageType::StreamDataDiscardable => {
                self.handle_stream_data(&packet).await?;
            }
            MessageType::StreamUnregister => {
                if !packet.payload.is_empty() {
                    return Err(ConnectionError::Protocol(
                        "stream unregister packet has data".to_owned(),
                    ));
                }
                info!(uid = packet.source, sid = packet.stream_id, "stream unregistered");
                self.registry()
                    .delete_stream(packet.source, packet.stream_id)?;
                self.events
                    .emit(Event::StreamUnregister {
                        from_uid: packet.source,
                        sid: packet.stream_id,
                    })
                    .await;
            }
            other => {
                return Err(ConnectionError::Protocol(format!(
                    "unhandled message type {other:?}"
                )));
            }
        }
        Ok(())
    }

    async fn handle_stream_data(&self, packet: &Packet) -> Result<(), ConnectionError> {
        if packet.source == self.uid() {
            return Ok(());
        }

        // Stream data can arrive for a user or stream we have not yet been
        // told about when this client joined mid-session; drop it until the
        // registry catches up.
        let stream = {
            let registry = self.registry();
            match registry.get_stream(packet.source, packet.stream_id) {
                Ok(stream) => stream.register.clone(),
                Err(err) => {
                    debug!(
                        uid = packet.source,
                        sid = packet.stream_id,
                        %err,
                        "dropping stream data for unknown stream"
                    );
                    return Ok(());
                }
            }
        };

        let data = match stream.stream_type() {
            StreamType::Chat => None,
            StreamType::Character | StreamType::Actor => {
                let data = StreamData::decode(stream.stream_type(), &packet.payload)?;
                {
                    let mut registry = self.registry();
                    match &data {
                        StreamData::CharacterPosition(pose) => {
                            registry.set_rotation(packet.source, packet.stream_id, pose.rotation)?;
                            registry.set_position(packet.source, packet.stream_id, pose.position)?;
                            registry.set_current_stream(
                                packet.source,
                                packet.source,
                                packet.stream_id,
                            )?;
                        }
                        StreamData::CharacterAttach(attach) => {
                            registry.set_current_stream(
                                packet.source,
                                attach.source_id,
                                attach.stream_id,
                            )?;
                        }
                        StreamData::CharacterDetach => {}
                        StreamData::Actor(state) => {
                            registry.set_position(packet.source, packet.stream_id, state.position)?;
                            registry.set_current_stream(
                                packet.source,
                                packet.source,
                                packet.stream_id,
                            )?;
                        }
                    }
                }
                Some(data)
            }
            StreamType::Ai => {
                return Err(ConnectionError::Protocol(
                    "stream data for an AI stream".to_owned(),
                ));
            }
        };

        self.events
            .emit(Event::StreamData {
                from_uid: packet.source,
                stream,
                data,
            })
            .await;
        Ok(())
    }

    // -- send primitives --

    /// Write one packet.  The writer mutex serializes whole packets, so two
    /// tasks can never interleave their bytes.
    async fn send(&self, packet: Packet) -> Result<(), ConnectionError> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(ConnectionError::NotConnected);
        };
        debug!(kind = ?packet.kind, size = packet.size(), "sending packet");
        write_packet(writer, &packet).await?;
        Ok(())
    }

    /// Send a line to the game chat.
    pub async fn send_chat(&self, message: &str) -> Result<(), ConnectionError> {
        info!(%message, "sending chat");
        self.send(Packet::new(
            MessageType::Chat,
            self.uid(),
            self.chat_sid()?,
            message.as_bytes().to_vec(),
        ))
        .await
    }

    /// Send a private message to one user.
    pub async fn send_private_chat(&self, uid: u32, message: &str) -> Result<(), ConnectionError> {
        info!(to_uid = uid, %message, "sending private chat");
        let payload = encode_private_chat(uid, message)?;
        self.send(Packet::new(
            MessageType::PrivateChat,
            self.uid(),
            self.chat_sid()?,
            payload,
        ))
        .await
    }

    /// Send a game (script) command to the server.
    pub async fn send_game_cmd(&self, command: &str) -> Result<(), ConnectionError> {
        debug!(%command, "sending game command");
        self.send(Packet::new(
            MessageType::GameCmd,
            self.uid(),
            0,
            command.as_bytes().to_vec(),
        ))
        .await
    }

    /// Ask the server to kick a user.  Interpreted server-side.
    pub async fn kick(&self, uid: u32, reason: &str) -> Result<(), ConnectionError> {
        self.send_chat(&format!("!kick {uid} {reason}")).await
    }

    /// Ask the server to ban a user.  Interpreted server-side.
    pub async fn ban(&self, uid: u32, reason: &str) -> Result<(), ConnectionError> {
        self.send_chat(&format!("!ban {uid} {reason}")).await
    }

    /// Whisper to a user through the server.  Interpreted server-side.
    pub async fn say(&self, uid: u32, message: &str) -> Result<(), ConnectionError> {
        self.send_chat(&format!("!say {uid} {message}")).await
    }

    /// Register a stream as this client: assigns the next stream id,
    /// announces it, and records it locally.  Returns the assigned id.
    pub async fn register_stream(
        &self,
        mut stream: StreamRegister,
    ) -> Result<u32, ConnectionError> {
        let sid = self.next_stream_id.fetch_add(1, Ordering::SeqCst);
        stream.set_origin(self.uid(), sid);
        if let StreamRegister::Actor(actor) = &mut stream {
            actor.timestamp = -1;
        }

        let payload = stream.encode()?;
        self.send(Packet::new(
            MessageType::StreamRegister,
            self.uid(),
            sid,
            payload,
        ))
        .await?;

        self.registry().add_stream(stream)?;
        Ok(sid)
    }

    /// Remove one of this client's streams.  The unregister packet is the
    /// only one that goes out with an empty payload.
    pub async fn unregister_stream(&self, sid: u32) -> Result<(), ConnectionError> {
        self.send(Packet::new(
            MessageType::StreamUnregister,
            self.uid(),
            sid,
            Vec::new(),
        ))
        .await
    }

    /// Answer a peer's actor stream register.  The status decides what the
    /// peer's client displays for this stream.
    pub async fn reply_to_actor_stream_register(
        &self,
        stream: &mut StreamRegister,
        status: ActorStreamStatus,
    ) -> Result<(), ConnectionError> {
        stream.set_status(status);
        let payload = stream.encode()?;
        self.send(Packet::new(
            MessageType::StreamRegisterResult,
            self.uid(),
            stream.origin_stream_id(),
            payload,
        ))
        .await
    }

    pub async fn send_stream_data(
        &self,
        sid: u32,
        data: &StreamData,
    ) -> Result<(), ConnectionError> {
        let payload = data.encode()?;
        self.send(Packet::new(MessageType::StreamData, self.uid(), sid, payload))
            .await
    }

    /// Send actor stream data, optionally restamping `time` with the
    /// milliseconds elapsed since the connection was established.
    pub async fn send_actor_stream_data(
        &self,
        sid: u32,
        mut data: ActorStreamData,
        recalculate_time: bool,
    ) -> Result<(), ConnectionError> {
        if recalculate_time {
            let connect_time = self
                .connect_time
                .lock()
                .unwrap()
                .ok_or(ConnectionError::NotConnected)?;
            data.time = connect_time.elapsed().as_millis() as u32;
        }
        self.send_stream_data(sid, &StreamData::Actor(data)).await
    }

    /// Move the bot's character and announce the new position.
    pub async fn move_bot(&self, position: Vector3) -> Result<(), ConnectionError> {
        let sid = self.character_sid()?;
        let uid = self.uid();
        let rotation = {
            let mut registry = self.registry();
            registry.place_stream(uid, sid, Some(position), None)?;
            registry.get_rotation(uid, Some(sid))?.unwrap_or(0.0)
        };
        self.send_pose(sid, position, rotation).await
    }

    /// Rotate the bot's character in place, in radians.
    pub async fn rotate_bot(&self, rotation: f32) -> Result<(), ConnectionError> {
        let sid = self.character_sid()?;
        let uid = self.uid();
        let position = {
            let mut registry = self.registry();
            registry.place_stream(uid, sid, None, Some(rotation))?;
            registry
                .get_position(uid, Some(sid))?
                .unwrap_or(Vector3::ZERO)
        };
        self.send_pose(sid, position, rotation).await
    }

    async fn send_pose(
        &self,
        sid: u32,
        position: Vector3,
        rotation: f32,
    ) -> Result<(), ConnectionError> {
        let data = StreamData::CharacterPosition(CharacterPositionStreamData {
            position,
            rotation,
            animation_time: 0.0,
            animation_mode: CharacterAnimation::IdleSway,
        });
        self.send_stream_data(sid, &data).await
    }
}

/// Decode a text payload: UTF-8 with stray NUL padding trimmed.
fn text_payload(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload)
        .trim_matches('\0')
        .to_owned()
}
