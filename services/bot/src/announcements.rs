//! Round-robin chat announcements paced by the frame clock.

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::config::AnnouncementsConfig;
use crate::connection::RoRConnection;
use crate::events::{handler, Event, EventKind, HandlerId};
use crate::ticker::Ticker;

/// The rotation state: which message is next and how much frame-clock time
/// has accumulated since the last announcement.
#[derive(Debug)]
pub struct Rotation {
    messages: Vec<String>,
    color: String,
    ticker: Ticker,
    index: usize,
}

impl Rotation {
    pub fn new(messages: Vec<String>, color: String, delay_seconds: f32) -> Self {
        Self {
            messages,
            color,
            ticker: Ticker::new(delay_seconds),
            index: 0,
        }
    }

    /// Advance the clock; returns the formatted announcement when due.
    pub fn advance(&mut self, dt: f32) -> Option<String> {
        self.ticker.advance(dt)?;
        let message = format!("{}ANNOUNCEMENT: {}", self.color, self.messages[self.index]);
        self.index = (self.index + 1) % self.messages.len();
        Some(message)
    }
}

/// Subscribe the announcement rotation to the connection's frame clock.
///
/// Returns `None` (disabled) when the message list is empty.
pub fn install(conn: &Arc<RoRConnection>, config: &AnnouncementsConfig) -> Option<HandlerId> {
    if config.messages.is_empty() {
        return None;
    }

    info!(
        count = config.messages.len(),
        delay = config.delay_seconds,
        "announcements enabled"
    );

    let rotation = Arc::new(Mutex::new(Rotation::new(
        config.messages.clone(),
        config.color.clone(),
        config.delay_seconds as f32,
    )));
    let sender = Arc::clone(conn);

    Some(conn.events().on(
        EventKind::FrameStep,
        handler(move |event| {
            let conn = Arc::clone(&sender);
            let rotation = Arc::clone(&rotation);
            async move {
                let Event::FrameStep { delta } = event else {
                    return Ok(());
                };
                let due = rotation.lock().unwrap().advance(delta);
                if let Some(message) = due {
                    conn.send_chat(&message).await?;
                }
                Ok(())
            }
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_in_order_modulo_the_list() {
        let mut rotation = Rotation::new(
            vec!["one".to_owned(), "two".to_owned()],
            "#FFFF00".to_owned(),
            10.0,
        );

        // Nothing before the delay elapses.
        assert_eq!(rotation.advance(9.0), None);

        let mut seen = Vec::new();
        for _ in 0..5 {
            for _ in 0..100 {
                if let Some(message) = rotation.advance(0.1) {
                    seen.push(message);
                }
            }
        }

        // k * D seconds of accumulated delta -> message index k mod N.
        assert_eq!(
            seen,
            vec![
                "#FFFF00ANNOUNCEMENT: one",
                "#FFFF00ANNOUNCEMENT: two",
                "#FFFF00ANNOUNCEMENT: one",
                "#FFFF00ANNOUNCEMENT: two",
                "#FFFF00ANNOUNCEMENT: one",
            ]
        );
    }
}
