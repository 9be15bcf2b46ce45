//! Operator chat commands.
//!
//! Chat lines starting with `>` are parsed as `<verb> <args…>` and
//! dispatched against a fixed catalogue.  Recording verbs are gated on the
//! sender's MOD/ADMIN flags and delegate to the injected recorder.

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::connection::{ConnectionError, RoRConnection};
use crate::events::{handler, Event, EventKind, HandlerId};
use crate::recorder::StreamRecorder;
use rornet::enums::color;
use rornet::{AuthStatus, Vector3};

pub const COMMAND_PREFIX: &str = ">";

/// `(verb, usage, description)` for every command, in help order.
const CATALOGUE: &[(&str, &str, &str)] = &[
    ("help", "help [command]", "Get help for commands."),
    ("prefix", "prefix", "Get the prefix for commands."),
    ("ping", "ping", "Ping the bot."),
    ("brb", "brb", "Set your status to brb."),
    ("afk", "afk", "Set your status to afk."),
    ("back", "back", "Set your status to back."),
    ("gtg", "gtg", "Set your status to gtg."),
    ("version", "version", "Get the version of the bot."),
    ("countdown", "countdown <seconds>", "Start a countdown."),
    (
        "movebot",
        "movebot <x> <y> <z>",
        "Move the bot to a different position on the map.",
    ),
    (
        "rotatebot",
        "rotatebot <degrees>",
        "Rotate the bot a number of degrees.",
    ),
    ("getpos", "getpos", "Get your current position on the map."),
    ("getrot", "getrot", "Get your current rotation on the map."),
    (
        "record",
        "record <start|stop|pause|resume> [sid]",
        "Record a stream.",
    ),
    (
        "playback",
        "playback <start|stop|pause|resume> [name]",
        "Play back a recorded stream.",
    ),
    ("recordings", "recordings", "List available recordings."),
];

/// Split an operator line into its verb and arguments.  Returns `None` for
/// lines that do not carry the command prefix.
pub(crate) fn parse_command(message: &str) -> Option<(&str, Vec<&str>)> {
    let line = message.strip_prefix(COMMAND_PREFIX)?;
    let mut parts = line.split_whitespace();
    let verb = parts.next()?;
    Some((verb, parts.collect()))
}

/// Subscribe the command surface to the connection's chat events.
pub fn install(conn: &Arc<RoRConnection>, recorder: Arc<dyn StreamRecorder>) -> HandlerId {
    let surface = Arc::new(CommandSurface {
        conn: Arc::clone(conn),
        recorder,
    });

    conn.events().on(
        EventKind::Chat,
        handler(move |event| {
            let surface = Arc::clone(&surface);
            async move {
                let Event::Chat { from_uid, message } = event else {
                    return Ok(());
                };
                if let Some((verb, args)) = parse_command(&message) {
                    surface.dispatch(from_uid, verb, &args).await?;
                }
                Ok(())
            }
        }),
    )
}

struct CommandSurface {
    conn: Arc<RoRConnection>,
    recorder: Arc<dyn StreamRecorder>,
}

impl CommandSurface {
    async fn dispatch(
        &self,
        from_uid: u32,
        verb: &str,
        args: &[&str],
    ) -> Result<(), ConnectionError> {
        info!(from_uid, verb, "operator command");
        match verb {
            "help" => self.help(from_uid, args).await,
            "prefix" => {
                self.conn
                    .send_chat(&format!("The prefix for commands is: {COMMAND_PREFIX}"))
                    .await
            }
            "ping" => self.conn.send_chat("pong").await,
            "brb" | "afk" | "back" | "gtg" => self.status(from_uid, verb, args).await,
            "version" => {
                self.conn
                    .send_chat(&format!("RoR Server Bot v{}", env!("CARGO_PKG_VERSION")))
                    .await
            }
            "countdown" => self.countdown(from_uid, args).await,
            "movebot" => self.move_bot(args).await,
            "rotatebot" => self.rotate_bot(args).await,
            "getpos" => self.get_pos(from_uid).await,
            "getrot" => self.get_rot(from_uid).await,
            "record" | "playback" | "recordings" => {
                self.recorder_command(from_uid, verb, args).await
            }
            _ => {
                self.conn
                    .send_chat(&format!("Invalid command {verb}"))
                    .await
            }
        }
    }

    async fn help(&self, from_uid: u32, args: &[&str]) -> Result<(), ConnectionError> {
        let message = match args {
            [] => {
                let verbs: Vec<&str> = CATALOGUE.iter().map(|(verb, _, _)| *verb).collect();
                format!(
                    "Available commands: {}\nUse {COMMAND_PREFIX}help [command] for more information.",
                    verbs.join(", ")
                )
            }
            [topic] => match CATALOGUE.iter().find(|(verb, _, _)| verb == topic) {
                Some((verb, usage, description)) => format!(
                    "{COMMAND_PREFIX}help {verb}\nDescription: {description}\nUsage: {COMMAND_PREFIX}{usage}"
                ),
                None => format!("Invalid command {topic}"),
            },
            _ => "Too many arguments".to_owned(),
        };

        // Whisper when the server lets this bot use !say; everyone gets the
        // reply in open chat otherwise.
        if self
            .conn
            .auth_status()
            .intersects(AuthStatus::MOD | AuthStatus::ADMIN)
        {
            self.conn.say(from_uid, &message).await
        } else {
            self.conn.send_chat(&message).await
        }
    }

    async fn status(
        &self,
        from_uid: u32,
        verb: &str,
        args: &[&str],
    ) -> Result<(), ConnectionError> {
        let message = if args.is_empty() {
            let username = self.conn.registry().get_user(from_uid)?.username_colored();
            match verb {
                "brb" => format!("{username} will brb!"),
                "afk" => format!("{username} is afk!"),
                "back" => format!("{username} is back!"),
                _ => format!("{username} is gtg"),
            }
        } else {
            "Too many arguments".to_owned()
        };
        self.conn.send_chat(&message).await
    }

    async fn countdown(&self, from_uid: u32, args: &[&str]) -> Result<(), ConnectionError> {
        let [arg] = args else {
            return self.conn.send_chat("Invalid number of arguments").await;
        };
        let Ok(seconds) = arg.parse::<u32>() else {
            return self.conn.send_chat("Invalid argument").await;
        };

        let username = self.conn.registry().get_user(from_uid)?.username().to_owned();
        self.conn
            .send_chat(&format!("{username} started a {seconds} second countdown!"))
            .await?;

        struct Countdown {
            time: f32,
            seconds: u32,
        }

        // Start at a full second so the first number goes out immediately.
        let state = Arc::new(Mutex::new(Countdown {
            time: 1.0,
            seconds,
        }));
        let slot: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));

        let conn = Arc::clone(&self.conn);
        let slot_in = Arc::clone(&slot);
        let id = self.conn.events().on(
            EventKind::FrameStep,
            handler(move |event| {
                let conn = Arc::clone(&conn);
                let state = Arc::clone(&state);
                let slot = Arc::clone(&slot_in);
                async move {
                    let Event::FrameStep { delta } = event else {
                        return Ok(());
                    };

                    enum Step {
                        Number(u32),
                        Go,
                        Wait,
                    }

                    let step = {
                        let mut state = state.lock().unwrap();
                        state.time += delta;
                        if state.time < 1.0 {
                            Step::Wait
                        } else if state.seconds > 0 {
                            state.time = 0.0;
                            let number = state.seconds;
                            state.seconds -= 1;
                            Step::Number(number)
                        } else {
                            Step::Go
                        }
                    };

                    match step {
                        Step::Number(number) => {
                            conn.send_chat(&format!("{}\t{number}", color::RED)).await?;
                        }
                        Step::Go => {
                            conn.send_chat(&format!("{}\tGO!!!", color::GREEN)).await?;
                            if let Some(id) = slot.lock().unwrap().take() {
                                conn.events().remove(EventKind::FrameStep, id);
                            }
                        }
                        Step::Wait => {}
                    }
                    Ok(())
                }
            }),
        );
        *slot.lock().unwrap() = Some(id);

        Ok(())
    }

    async fn move_bot(&self, args: &[&str]) -> Result<(), ConnectionError> {
        let [x, y, z] = args else {
            return self.conn.send_chat("Invalid number of arguments").await;
        };
        let (Ok(x), Ok(y), Ok(z)) = (x.parse(), y.parse(), z.parse()) else {
            return self.conn.send_chat("Invalid argument").await;
        };

        let position = Vector3::new(x, y, z);
        self.conn.move_bot(position).await?;
        self.conn
            .send_chat(&format!("Moved bot to {position}"))
            .await
    }

    async fn rotate_bot(&self, args: &[&str]) -> Result<(), ConnectionError> {
        let [arg] = args else {
            return self.conn.send_chat("Invalid number of arguments").await;
        };
        let Ok(degrees) = arg.parse::<f32>() else {
            return self.conn.send_chat("Invalid argument").await;
        };

        self.conn.rotate_bot(degrees.to_radians()).await?;
        self.conn
            .send_chat(&format!("Rotated bot to {degrees}"))
            .await
    }

    async fn get_pos(&self, from_uid: u32) -> Result<(), ConnectionError> {
        let position = { self.conn.registry().get_position(from_uid, None) };
        let message = match position {
            Ok(Some(position)) => format!("Your position is {position}"),
            _ => "Your position is unknown".to_owned(),
        };
        self.conn.send_chat(&message).await
    }

    async fn get_rot(&self, from_uid: u32) -> Result<(), ConnectionError> {
        let rotation = { self.conn.registry().get_rotation(from_uid, None) };
        let message = match rotation {
            Ok(Some(rotation)) => format!("Your rotation is {:.2}", rotation.to_degrees()),
            _ => "Your rotation is unknown".to_owned(),
        };
        self.conn.send_chat(&message).await
    }

    // -- recorder verbs (privileged) --

    async fn recorder_command(
        &self,
        from_uid: u32,
        verb: &str,
        args: &[&str],
    ) -> Result<(), ConnectionError> {
        let auth = self.conn.registry().get_user(from_uid)?.auth_status();
        if !auth.intersects(AuthStatus::MOD | AuthStatus::ADMIN) {
            return self
                .conn
                .send_chat("You do not have permission to do that.")
                .await;
        }

        match verb {
            "recordings" => self.recordings().await,
            "record" => self.record(from_uid, args).await,
            _ => self.playback(args).await,
        }
    }

    async fn recordings(&self) -> Result<(), ConnectionError> {
        let recordings = self.recorder.available_recordings();
        let message = if recordings.is_empty() {
            "No recordings available".to_owned()
        } else {
            format!("Available recordings:\n{}", recordings.join("\n"))
        };
        self.conn.send_chat(&message).await
    }

    async fn record(&self, from_uid: u32, args: &[&str]) -> Result<(), ConnectionError> {
        let Some(subcommand) = args.first() else {
            return self.conn.send_chat("Invalid number of arguments").await;
        };
        if args.len() > 2 {
            return self.conn.send_chat("Invalid number of arguments").await;
        }

        let sid = match args.get(1) {
            Some(arg) => match arg.parse::<u32>() {
                Ok(sid) => sid,
                Err(_) => return self.conn.send_chat("Invalid argument").await,
            },
            None => {
                let current = self.conn.registry().get_user(from_uid)?.current_stream;
                match current {
                    Some((_, sid)) => sid,
                    None => return self.conn.send_chat("Invalid argument").await,
                }
            }
        };

        let outcome = match *subcommand {
            "start" => {
                let info = self.conn.registry().get_user(from_uid)?.info.clone();
                self.recorder
                    .start_recording(&info, sid)
                    .map(|()| format!("Recording {from_uid}:{sid}"))
            }
            "stop" => self
                .recorder
                .stop_recording(from_uid, sid)
                .map(|()| format!("Stopped recording {from_uid}:{sid}")),
            "pause" => self
                .recorder
                .pause_recording(from_uid, sid)
                .map(|()| format!("Paused recording {from_uid}:{sid}")),
            "resume" => self
                .recorder
                .resume_recording(from_uid, sid)
                .map(|()| format!("Resumed recording {from_uid}:{sid}")),
            _ => return self.conn.send_chat("Invalid subcommand").await,
        };

        match outcome {
            Ok(message) => self.conn.send_chat(&message).await,
            Err(err) => self.conn.send_chat(&err.to_string()).await,
        }
    }

    async fn playback(&self, args: &[&str]) -> Result<(), ConnectionError> {
        let Some(subcommand) = args.first() else {
            return self.conn.send_chat("Invalid number of arguments").await;
        };
        if args.len() > 2 {
            return self.conn.send_chat("Invalid number of arguments").await;
        }

        let outcome = match *subcommand {
            "start" | "play" => self.recorder.play_recording(args.get(1).copied()),
            "stop" | "pause" | "resume" => {
                let sid = match args.get(1) {
                    Some(arg) => match arg.parse::<u32>() {
                        Ok(sid) => Some(sid),
                        Err(_) => return self.conn.send_chat("Invalid argument").await,
                    },
                    None => None,
                };
                match *subcommand {
                    "stop" => self.recorder.stop_playback(sid),
                    "pause" => self.recorder.pause_playback(sid),
                    _ => self.recorder.resume_playback(sid),
                }
            }
            _ => return self.conn.send_chat("Invalid subcommand").await,
        };

        if let Err(err) = outcome {
            return self.conn.send_chat(&err.to_string()).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_without_the_prefix_are_not_commands() {
        assert_eq!(parse_command("hello there"), None);
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command(">"), None);
    }

    #[test]
    fn verb_and_args_are_split_on_whitespace() {
        assert_eq!(parse_command(">ping"), Some(("ping", vec![])));
        assert_eq!(
            parse_command(">movebot 1.0  2.0 3.0"),
            Some(("movebot", vec!["1.0", "2.0", "3.0"]))
        );
    }

    #[test]
    fn every_catalogue_entry_has_usage_starting_with_its_verb() {
        for (verb, usage, _) in CATALOGUE {
            assert!(usage.starts_with(verb), "{verb} usage mismatch");
        }
    }
}
