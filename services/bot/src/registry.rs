//! Per-user and per-stream session state.
//!
//! The registry tracks every connected user, the streams they have
//! registered, which stream each user currently occupies, and distance
//! statistics folded into a per-connection global record when users leave.
//! It is owned by the connection and mutated only from the reader loop and
//! the send primitives; there is no cross-task sharing.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use rornet::enums::color;
use rornet::{ActorType, StreamRegister, StreamType, UserInfo, Vector3};

/// Position updates closer than this to the stored position are dropped:
/// they are pose jitter, not movement.
const DISTANCE_DEAD_BAND_M: f32 = 1.0;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("user uid={0} not found")]
    UserNotFound(u32),
    #[error("user uid={0} already exists")]
    UserAlreadyExists(u32),
    #[error("stream sid={0} not found")]
    StreamNotFound(u32),
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Distance accumulators, in meters.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DistanceStats {
    pub meters_driven: f64,
    pub meters_sailed: f64,
    pub meters_walked: f64,
    pub meters_flown: f64,
}

/// Per-user session statistics.
#[derive(Debug, Clone)]
pub struct UserStats {
    pub distances: DistanceStats,
    pub online_since: DateTime<Utc>,
}

impl Default for UserStats {
    fn default() -> Self {
        Self {
            distances: DistanceStats::default(),
            online_since: Utc::now(),
        }
    }
}

/// Connection-wide statistics.  Distances and session durations of departed
/// users are folded in here by `delete_user`.
#[derive(Debug, Clone)]
pub struct GlobalStats {
    pub distances: DistanceStats,
    pub connected_at: DateTime<Utc>,
    pub usernames: HashSet<String>,
    pub user_count: u32,
    pub connection_times: Vec<Duration>,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            distances: DistanceStats::default(),
            connected_at: Utc::now(),
            usernames: HashSet::new(),
            user_count: 0,
            connection_times: Vec::new(),
        }
    }
}

impl GlobalStats {
    fn add_user(&mut self, username: &str) {
        self.usernames.insert(username.to_owned());
        self.user_count += 1;
    }
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

/// A registered stream plus the runtime state the wire register does not
/// carry: its classified actor type and the last accepted pose.
#[derive(Debug, Clone)]
pub struct Stream {
    pub register: StreamRegister,
    pub actor_type: Option<ActorType>,
    pub position: Vector3,
    /// Radians.
    pub rotation: f32,
}

impl Stream {
    fn new(register: StreamRegister, actor_type: Option<ActorType>) -> Self {
        Self {
            register,
            actor_type,
            position: Vector3::ZERO,
            rotation: 0.0,
        }
    }

    pub fn stream_type(&self) -> StreamType {
        self.register.stream_type()
    }
}

fn truckfile_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:(?P<guid>[a-z0-9]*)-)?(?:.*UID-)?(?P<name>.*)\.(?P<type>truck|car|load|airplane|boat|trailer|train|fixed)$",
        )
        .expect("actor filename pattern is valid")
    })
}

/// Classify an actor definition filename.
///
/// The display-name map (loaded from an external JSON file, possibly empty)
/// wins when it knows the filename; otherwise the filename pattern decides.
pub fn classify_actor(filename: &str, display_names: &HashMap<String, String>) -> Option<ActorType> {
    if display_names.contains_key(filename) {
        let ext = filename.rsplit('.').next()?;
        return ActorType::from_extension(&ext.to_lowercase());
    }
    let captures = truckfile_regex().captures(filename)?;
    ActorType::from_extension(captures.name("type")?.as_str())
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registry entry: the user's wire info plus their streams and stats.
#[derive(Debug, Clone)]
pub struct User {
    pub info: UserInfo,
    pub streams: HashMap<u32, Stream>,
    /// Set at most once per lifetime; cleared by the matching unregister.
    pub character_stream_id: Option<u32>,
    pub chat_stream_id: Option<u32>,
    /// `(unique_id, stream_id)` of the stream the user currently occupies.
    /// The unique id differs from the user's own when they are riding in
    /// another user's vehicle.
    pub current_stream: Option<(u32, u32)>,
    pub stats: UserStats,
}

impl User {
    fn new(info: UserInfo) -> Self {
        Self {
            info,
            streams: HashMap::new(),
            character_stream_id: None,
            chat_stream_id: None,
            current_stream: None,
            stats: UserStats::default(),
        }
    }

    pub fn unique_id(&self) -> u32 {
        self.info.unique_id
    }

    pub fn username(&self) -> &str {
        &self.info.username
    }

    /// The username wrapped in the user's palette color, falling back to
    /// white while no color is assigned.
    pub fn username_colored(&self) -> String {
        format!(
            "{}{}{}",
            self.info.user_color(),
            self.info.username,
            color::WHITE
        )
    }

    pub fn auth_status(&self) -> rornet::AuthStatus {
        self.info.auth_status
    }

    pub fn language(&self) -> &str {
        &self.info.language
    }

    pub fn client_name(&self) -> &str {
        &self.info.client_name
    }

    pub fn client_version(&self) -> &str {
        &self.info.client_version
    }

    pub fn client_guid(&self) -> &str {
        &self.info.client_guid
    }

    pub fn total_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn stream_ids(&self) -> Vec<u32> {
        self.streams.keys().copied().collect()
    }

    pub fn get_stream(&self, sid: u32) -> Result<&Stream, RegistryError> {
        self.streams.get(&sid).ok_or(RegistryError::StreamNotFound(sid))
    }

    fn get_stream_mut(&mut self, sid: u32) -> Result<&mut Stream, RegistryError> {
        self.streams
            .get_mut(&sid)
            .ok_or(RegistryError::StreamNotFound(sid))
    }

    fn add_stream(&mut self, stream: Stream) {
        let sid = stream.register.origin_stream_id();
        match stream.stream_type() {
            StreamType::Character => self.character_stream_id = Some(sid),
            StreamType::Chat => self.chat_stream_id = Some(sid),
            _ => {}
        }
        self.streams.insert(sid, stream);
    }

    fn delete_stream(&mut self, sid: u32) -> Result<Stream, RegistryError> {
        let stream = self
            .streams
            .remove(&sid)
            .ok_or(RegistryError::StreamNotFound(sid))?;
        if self.character_stream_id == Some(sid) {
            self.character_stream_id = None;
        } else if self.chat_stream_id == Some(sid) {
            self.chat_stream_id = None;
        }
        Ok(stream)
    }

    /// Replace a stream's position, accumulating the travelled distance.
    ///
    /// Chat streams have no position; deltas under the dead-band are jitter
    /// and are dropped without replacing the stored position.
    fn set_position(&mut self, sid: u32, position: Vector3) -> Result<(), RegistryError> {
        let stream = self.get_stream_mut(sid)?;
        if stream.stream_type() == StreamType::Chat {
            return Ok(());
        }

        let distance = position.distance(&stream.position);
        if distance < DISTANCE_DEAD_BAND_M {
            return Ok(());
        }
        stream.position = position;

        let distance = f64::from(distance);
        match (stream.stream_type(), stream.actor_type) {
            (StreamType::Character, _) => self.stats.distances.meters_walked += distance,
            (
                StreamType::Actor,
                Some(ActorType::Car | ActorType::Truck | ActorType::Train),
            ) => self.stats.distances.meters_driven += distance,
            (StreamType::Actor, Some(ActorType::Boat)) => {
                self.stats.distances.meters_sailed += distance;
            }
            (StreamType::Actor, Some(ActorType::Airplane)) => {
                self.stats.distances.meters_flown += distance;
            }
            _ => {}
        }
        Ok(())
    }

    fn set_rotation(&mut self, sid: u32, rotation: f32) -> Result<(), RegistryError> {
        let stream = self.get_stream_mut(sid)?;
        if stream.stream_type() == StreamType::Chat {
            return Ok(());
        }
        stream.rotation = rotation;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// All users known to this connection, keyed by unique id.
#[derive(Debug, Default)]
pub struct Registry {
    users: HashMap<u32, User>,
    global_stats: GlobalStats,
    /// Injected `filename → display name` lookup; may be empty.
    truck_names: HashMap<String, String>,
}

impl Registry {
    pub fn new(truck_names: HashMap<String, String>) -> Self {
        Self {
            users: HashMap::new(),
            global_stats: GlobalStats::default(),
            truck_names,
        }
    }

    pub fn global_stats(&self) -> &GlobalStats {
        &self.global_stats
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn user_ids(&self) -> Vec<u32> {
        self.users.keys().copied().collect()
    }

    pub fn stream_ids(&self) -> Vec<u32> {
        self.users
            .values()
            .flat_map(|user| user.streams.keys().copied())
            .collect()
    }

    pub fn get_user(&self, uid: u32) -> Result<&User, RegistryError> {
        self.users.get(&uid).ok_or(RegistryError::UserNotFound(uid))
    }

    fn get_user_mut(&mut self, uid: u32) -> Result<&mut User, RegistryError> {
        self.users
            .get_mut(&uid)
            .ok_or(RegistryError::UserNotFound(uid))
    }

    pub fn get_uid_by_username(&self, username: &str) -> Option<u32> {
        self.users
            .values()
            .find(|user| user.username() == username)
            .map(User::unique_id)
    }

    pub fn add_user(&mut self, info: UserInfo) -> Result<(), RegistryError> {
        let uid = info.unique_id;
        if self.users.contains_key(&uid) {
            return Err(RegistryError::UserAlreadyExists(uid));
        }
        debug!(uid, username = %info.username, "user added");
        self.global_stats.add_user(&info.username);
        self.users.insert(uid, User::new(info));
        Ok(())
    }

    /// Replace a user's info, creating the user if absent.
    pub fn update_user(&mut self, info: UserInfo) -> Result<(), RegistryError> {
        match self.users.get_mut(&info.unique_id) {
            Some(user) => {
                debug!(uid = info.unique_id, username = %info.username, "user updated");
                user.info = info;
                Ok(())
            }
            None => self.add_user(info),
        }
    }

    /// Remove a user, folding their distances and session duration into the
    /// global statistics.
    pub fn delete_user(&mut self, uid: u32) -> Result<User, RegistryError> {
        let user = self.users.remove(&uid).ok_or(RegistryError::UserNotFound(uid))?;

        let d = &user.stats.distances;
        self.global_stats.distances.meters_driven += d.meters_driven;
        self.global_stats.distances.meters_sailed += d.meters_sailed;
        self.global_stats.distances.meters_walked += d.meters_walked;
        self.global_stats.distances.meters_flown += d.meters_flown;
        self.global_stats
            .connection_times
            .push(Utc::now() - user.stats.online_since);

        debug!(uid, username = %user.username(), "user deleted");
        Ok(user)
    }

    /// Attach a stream to its origin user.  Actor streams are classified
    /// from their definition filename as they arrive.
    pub fn add_stream(&mut self, register: StreamRegister) -> Result<(), RegistryError> {
        let actor_type = match &register {
            StreamRegister::Actor(actor) => classify_actor(&actor.name, &self.truck_names),
            _ => None,
        };
        let uid = register.origin_source_id();
        self.get_user_mut(uid)?
            .add_stream(Stream::new(register, actor_type));
        Ok(())
    }

    pub fn get_stream(&self, uid: u32, sid: u32) -> Result<&Stream, RegistryError> {
        self.get_user(uid)?.get_stream(sid)
    }

    pub fn delete_stream(&mut self, uid: u32, sid: u32) -> Result<Stream, RegistryError> {
        self.get_user_mut(uid)?.delete_stream(sid)
    }

    pub fn set_position(&mut self, uid: u32, sid: u32, position: Vector3) -> Result<(), RegistryError> {
        self.get_user_mut(uid)?.set_position(sid, position)
    }

    pub fn set_rotation(&mut self, uid: u32, sid: u32, rotation: f32) -> Result<(), RegistryError> {
        self.get_user_mut(uid)?.set_rotation(sid, rotation)
    }

    /// Overwrite a stream's pose without distance accounting.  Used for the
    /// bot's own character when it is moved programmatically.
    pub fn place_stream(
        &mut self,
        uid: u32,
        sid: u32,
        position: Option<Vector3>,
        rotation: Option<f32>,
    ) -> Result<(), RegistryError> {
        let stream = self.get_user_mut(uid)?.get_stream_mut(sid)?;
        if let Some(position) = position {
            stream.position = position;
        }
        if let Some(rotation) = rotation {
            stream.rotation = rotation;
        }
        Ok(())
    }

    pub fn set_current_stream(
        &mut self,
        uid: u32,
        stream_uid: u32,
        sid: u32,
    ) -> Result<(), RegistryError> {
        self.get_user_mut(uid)?.current_stream = Some((stream_uid, sid));
        Ok(())
    }

    /// Position of a stream, or of the user's current stream when `sid` is
    /// `None`.  Chat streams have no position.
    pub fn get_position(&self, uid: u32, sid: Option<u32>) -> Result<Option<Vector3>, RegistryError> {
        let stream = self.resolve_stream(uid, sid)?;
        Ok((stream.stream_type() != StreamType::Chat).then_some(stream.position))
    }

    pub fn get_rotation(&self, uid: u32, sid: Option<u32>) -> Result<Option<f32>, RegistryError> {
        let stream = self.resolve_stream(uid, sid)?;
        Ok((stream.stream_type() != StreamType::Chat).then_some(stream.rotation))
    }

    fn resolve_stream(&self, uid: u32, sid: Option<u32>) -> Result<&Stream, RegistryError> {
        let user = self.get_user(uid)?;
        let sid = match sid {
            Some(sid) => sid,
            None => {
                let (stream_uid, sid) = user
                    .current_stream
                    .ok_or(RegistryError::StreamNotFound(0))?;
                return self.get_stream(stream_uid, sid);
            }
        };
        user.get_stream(sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rornet::messages::ActorStreamRegister;
    use rornet::AuthStatus;

    fn user_info(uid: u32, username: &str) -> UserInfo {
        UserInfo {
            unique_id: uid,
            auth_status: AuthStatus::NONE,
            slot_num: 0,
            color_num: 0,
            username: username.to_owned(),
            user_token: String::new(),
            server_password: String::new(),
            language: "en_US".to_owned(),
            client_name: "RoR".to_owned(),
            client_version: "2022.12".to_owned(),
            client_guid: String::new(),
            session_type: "normal".to_owned(),
            session_options: String::new(),
        }
    }

    fn actor_register(uid: u32, sid: u32, name: &str) -> StreamRegister {
        StreamRegister::Actor(ActorStreamRegister {
            status: 0,
            origin_source_id: uid,
            origin_stream_id: sid,
            name: name.to_owned(),
            buffer_size: 0,
            timestamp: 0,
            skin: String::new(),
            section_config: String::new(),
        })
    }

    #[test]
    fn duplicate_users_are_rejected() {
        let mut registry = Registry::default();
        registry.add_user(user_info(1, "alice")).unwrap();
        assert!(matches!(
            registry.add_user(user_info(1, "alice")),
            Err(RegistryError::UserAlreadyExists(1))
        ));
    }

    #[test]
    fn update_user_creates_when_absent() {
        let mut registry = Registry::default();
        registry.update_user(user_info(2, "bob")).unwrap();
        assert_eq!(registry.get_user(2).unwrap().username(), "bob");

        let mut updated = user_info(2, "bobby");
        updated.color_num = 4;
        registry.update_user(updated).unwrap();
        assert_eq!(registry.get_user(2).unwrap().username(), "bobby");
    }

    #[test]
    fn delete_user_folds_stats_into_global() {
        let mut registry = Registry::default();
        registry.add_user(user_info(1, "alice")).unwrap();
        registry
            .add_stream(StreamRegister::new_character(1, 10))
            .unwrap();
        registry
            .set_position(1, 10, Vector3::new(3.0, 4.0, 0.0))
            .unwrap();

        let user = registry.delete_user(1).unwrap();
        assert!((user.stats.distances.meters_walked - 5.0).abs() < 1e-3);
        assert!((registry.global_stats().distances.meters_walked - 5.0).abs() < 1e-3);
        assert_eq!(registry.global_stats().connection_times.len(), 1);
        assert!(matches!(
            registry.delete_user(1),
            Err(RegistryError::UserNotFound(1))
        ));
    }

    #[test]
    fn character_and_chat_stream_ids_are_tracked() {
        let mut registry = Registry::default();
        registry.add_user(user_info(1, "alice")).unwrap();
        registry.add_stream(StreamRegister::new_chat(1, 10)).unwrap();
        registry
            .add_stream(StreamRegister::new_character(1, 11))
            .unwrap();

        let user = registry.get_user(1).unwrap();
        assert_eq!(user.chat_stream_id, Some(10));
        assert_eq!(user.character_stream_id, Some(11));
        assert_eq!(user.total_streams(), 2);

        registry.delete_stream(1, 11).unwrap();
        assert_eq!(registry.get_user(1).unwrap().character_stream_id, None);
        assert!(matches!(
            registry.delete_stream(1, 11),
            Err(RegistryError::StreamNotFound(11))
        ));
    }

    #[test]
    fn position_dead_band_drops_jitter() {
        let mut registry = Registry::default();
        registry.add_user(user_info(1, "alice")).unwrap();
        registry
            .add_stream(StreamRegister::new_character(1, 10))
            .unwrap();

        registry
            .set_position(1, 10, Vector3::new(0.5, 0.0, 0.0))
            .unwrap();
        let user = registry.get_user(1).unwrap();
        assert_eq!(user.get_stream(10).unwrap().position, Vector3::ZERO);
        assert_eq!(user.stats.distances.meters_walked, 0.0);

        registry
            .set_position(1, 10, Vector3::new(10.0, 0.0, 0.0))
            .unwrap();
        let user = registry.get_user(1).unwrap();
        assert_eq!(
            user.get_stream(10).unwrap().position,
            Vector3::new(10.0, 0.0, 0.0)
        );
        assert!((user.stats.distances.meters_walked - 10.0).abs() < 1e-3);
    }

    #[test]
    fn distance_routes_by_actor_type() {
        let mut registry = Registry::default();
        registry.add_user(user_info(1, "alice")).unwrap();
        registry.add_stream(actor_register(1, 12, "fancy.truck")).unwrap();
        registry.add_stream(actor_register(1, 13, "dinghy.boat")).unwrap();
        registry.add_stream(actor_register(1, 14, "jumbo.airplane")).unwrap();
        registry.add_stream(actor_register(1, 15, "crate.load")).unwrap();

        for sid in [12, 13, 14, 15] {
            registry
                .set_position(1, sid, Vector3::new(2.0, 0.0, 0.0))
                .unwrap();
        }

        let d = registry.get_user(1).unwrap().stats.distances;
        assert!((d.meters_driven - 2.0).abs() < 1e-3);
        assert!((d.meters_sailed - 2.0).abs() < 1e-3);
        assert!((d.meters_flown - 2.0).abs() < 1e-3);
        assert_eq!(d.meters_walked, 0.0);
    }

    #[test]
    fn chat_streams_have_no_pose() {
        let mut registry = Registry::default();
        registry.add_user(user_info(1, "alice")).unwrap();
        registry.add_stream(StreamRegister::new_chat(1, 10)).unwrap();

        registry
            .set_position(1, 10, Vector3::new(5.0, 5.0, 5.0))
            .unwrap();
        registry.set_rotation(1, 10, 1.0).unwrap();
        assert_eq!(registry.get_position(1, Some(10)).unwrap(), None);
        assert_eq!(registry.get_rotation(1, Some(10)).unwrap(), None);
    }

    #[test]
    fn current_stream_resolves_across_users() {
        let mut registry = Registry::default();
        registry.add_user(user_info(1, "alice")).unwrap();
        registry.add_user(user_info(2, "bob")).unwrap();
        registry.add_stream(actor_register(2, 12, "fancy.truck")).unwrap();
        registry
            .set_position(2, 12, Vector3::new(7.0, 0.0, 0.0))
            .unwrap();

        // Alice rides in Bob's truck.
        registry.set_current_stream(1, 2, 12).unwrap();
        assert_eq!(
            registry.get_position(1, None).unwrap(),
            Some(Vector3::new(7.0, 0.0, 0.0))
        );
    }

    #[test]
    fn colored_username_uses_the_palette() {
        let mut registry = Registry::default();
        let mut info = user_info(1, "alice");
        info.color_num = 0;
        registry.add_user(info).unwrap();
        assert_eq!(
            registry.get_user(1).unwrap().username_colored(),
            "#00CC00alice#FFFFFF"
        );

        let mut info = user_info(2, "bob");
        info.color_num = -1;
        registry.add_user(info).unwrap();
        assert_eq!(
            registry.get_user(2).unwrap().username_colored(),
            "#FFFFFFbob#FFFFFF"
        );
    }

    #[test]
    fn actor_classification_prefers_the_display_name_map() {
        let empty = HashMap::new();
        assert_eq!(
            classify_actor("fancy.truck", &empty),
            Some(ActorType::Truck)
        );
        assert_eq!(
            classify_actor("a1b2-95b0UID-quirky.car", &empty),
            Some(ActorType::Car)
        );
        assert_eq!(classify_actor("not-an-actor.zip", &empty), None);

        let mut names = HashMap::new();
        names.insert("ODD.TRUCK".to_owned(), "Oddity".to_owned());
        assert_eq!(classify_actor("ODD.TRUCK", &names), Some(ActorType::Truck));
        // Uppercase extensions only pass through the display-name map.
        assert_eq!(classify_actor("ODD.TRUCK", &empty), None);
    }

    #[test]
    fn uid_lookup_by_username() {
        let mut registry = Registry::default();
        registry.add_user(user_info(5, "eve")).unwrap();
        assert_eq!(registry.get_uid_by_username("eve"), Some(5));
        assert_eq!(registry.get_uid_by_username("mallory"), None);
    }
}
