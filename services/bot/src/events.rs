//! Named-event bus with async handlers.
//!
//! Handlers run in registration order and are awaited synchronously at the
//! emit site, so events derived from one packet are fully handled before the
//! reader advances to the next.  A failing handler is reported on the
//! `error` meta-event but never aborts the remaining handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tracing::{debug, error};

use crate::registry::User;
use rornet::{StreamData, StreamRegister, UserInfo};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An event published by the connection, with its arguments.
#[derive(Debug, Clone)]
pub enum Event {
    FrameStep { delta: f32 },
    NetQuality { quality: u32 },
    Chat { from_uid: u32, message: String },
    PrivateChat { from_uid: u32, message: String },
    UserJoin { uid: u32, info: UserInfo },
    UserInfo { uid: u32, info: UserInfo },
    UserLeave { uid: u32, user: User },
    GameCmd { from_uid: u32, command: String },
    StreamRegister { from_uid: u32, stream: StreamRegister },
    StreamRegisterResult { from_uid: u32, stream: StreamRegister },
    StreamData {
        from_uid: u32,
        stream: StreamRegister,
        data: Option<StreamData>,
    },
    StreamUnregister { from_uid: u32, sid: u32 },
    /// Meta-event: a handler was registered.
    NewListener { event: EventKind },
    /// Meta-event: a handler failed.
    Error { message: String },
}

/// The name of an event, used as the registration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    FrameStep,
    NetQuality,
    Chat,
    PrivateChat,
    UserJoin,
    UserInfo,
    UserLeave,
    GameCmd,
    StreamRegister,
    StreamRegisterResult,
    StreamData,
    StreamUnregister,
    NewListener,
    Error,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::FrameStep { .. } => EventKind::FrameStep,
            Event::NetQuality { .. } => EventKind::NetQuality,
            Event::Chat { .. } => EventKind::Chat,
            Event::PrivateChat { .. } => EventKind::PrivateChat,
            Event::UserJoin { .. } => EventKind::UserJoin,
            Event::UserInfo { .. } => EventKind::UserInfo,
            Event::UserLeave { .. } => EventKind::UserLeave,
            Event::GameCmd { .. } => EventKind::GameCmd,
            Event::StreamRegister { .. } => EventKind::StreamRegister,
            Event::StreamRegisterResult { .. } => EventKind::StreamRegisterResult,
            Event::StreamData { .. } => EventKind::StreamData,
            Event::StreamUnregister { .. } => EventKind::StreamUnregister,
            Event::NewListener { .. } => EventKind::NewListener,
            Event::Error { .. } => EventKind::Error,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerFuture = BoxFuture<'static, Result<(), HandlerError>>;
pub type Handler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// Identity of a registered handler, for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

#[derive(Clone)]
struct Entry {
    id: HandlerId,
    once: bool,
    handler: Handler,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct EventBus {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<Entry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; it stays registered until removed.
    pub fn on(&self, kind: EventKind, handler: Handler) -> HandlerId {
        self.register(kind, handler, false)
    }

    /// Register a handler that is de-registered before its first invocation.
    pub fn once(&self, kind: EventKind, handler: Handler) -> HandlerId {
        self.register(kind, handler, true)
    }

    fn register(&self, kind: EventKind, handler: Handler, once: bool) -> HandlerId {
        let id = {
            let mut inner = self.inner.lock().unwrap();
            inner.next_id += 1;
            let id = HandlerId(inner.next_id);
            inner.handlers.entry(kind).or_default().push(Entry {
                id,
                once,
                handler,
            });
            id
        };
        debug!(event = ?kind, once, "new listener");
        self.notify_new_listener(kind);
        id
    }

    /// Remove a handler.  Returns whether it was still registered.
    pub fn remove(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(entries) = inner.handlers.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        before != entries.len()
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner
            .lock()
            .unwrap()
            .handlers
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Emit an event: run its handlers in registration order, awaiting each.
    ///
    /// `once` handlers are de-registered before running, so a handler that
    /// re-emits its own event cannot run twice.
    pub async fn emit(&self, event: Event) {
        let kind = event.kind();
        let entries = self.take_entries(kind);

        if kind != EventKind::FrameStep {
            debug!(event = ?kind, listeners = entries.len(), "emit");
        }

        for entry in entries {
            if let Err(err) = (entry.handler)(event.clone()).await {
                error!(event = ?kind, %err, "event handler failed");
                self.emit_error(err.to_string()).await;
            }
        }
    }

    /// Snapshot the handler list for `kind`, stripping `once` entries from
    /// the registered set.
    fn take_entries(&self, kind: EventKind) -> Vec<Entry> {
        let mut inner = self.inner.lock().unwrap();
        let Some(entries) = inner.handlers.get_mut(&kind) else {
            return Vec::new();
        };
        let snapshot = entries.clone();
        entries.retain(|entry| !entry.once);
        snapshot
    }

    /// Run the `error` meta-handlers.  Failures in error handlers are only
    /// logged; they do not re-enter the error event.
    async fn emit_error(&self, message: String) {
        for entry in self.take_entries(EventKind::Error) {
            if let Err(err) = (entry.handler)(Event::Error {
                message: message.clone(),
            })
            .await
            {
                error!(%err, "error-event handler failed");
            }
        }
    }

    /// Fire the `new_listener` meta-event.  Registration is synchronous, so
    /// the dispatch is spawned; outside a runtime it is skipped (tests that
    /// care run under tokio).
    fn notify_new_listener(&self, kind: EventKind) {
        if kind == EventKind::NewListener {
            return;
        }
        let entries = self.take_entries(EventKind::NewListener);
        if entries.is_empty() {
            return;
        }
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(async move {
                for entry in entries {
                    if let Err(err) = (entry.handler)(Event::NewListener { event: kind }).await {
                        error!(%err, "new-listener handler failed");
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording_handler(log: Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Handler {
        handler(move |_event| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(tag);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on(EventKind::Chat, recording_handler(Arc::clone(&log), "first"));
        bus.on(EventKind::Chat, recording_handler(Arc::clone(&log), "second"));

        bus.emit(Event::Chat {
            from_uid: 1,
            message: "hi".to_owned(),
        })
        .await;

        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn once_handlers_fire_a_single_time() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        bus.once(
            EventKind::FrameStep,
            handler(move |_| {
                let calls = Arc::clone(&calls_in);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        bus.emit(Event::FrameStep { delta: 0.05 }).await;
        bus.emit(Event::FrameStep { delta: 0.05 }).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(EventKind::FrameStep), 0);
    }

    #[tokio::test]
    async fn removed_handlers_stop_firing() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = bus.on(EventKind::Chat, recording_handler(Arc::clone(&log), "gone"));

        assert!(bus.remove(EventKind::Chat, id));
        assert!(!bus.remove(EventKind::Chat, id));

        bus.emit(Event::Chat {
            from_uid: 1,
            message: "hi".to_owned(),
        })
        .await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_failing_handler_reports_but_does_not_abort() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.on(
            EventKind::Chat,
            handler(|_| async { Err::<(), HandlerError>("boom".into()) }),
        );
        bus.on(EventKind::Chat, recording_handler(Arc::clone(&log), "survivor"));

        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_in = Arc::clone(&errors);
        bus.on(
            EventKind::Error,
            handler(move |event| {
                let errors = Arc::clone(&errors_in);
                async move {
                    if let Event::Error { message } = event {
                        errors.lock().unwrap().push(message);
                    }
                    Ok(())
                }
            }),
        );

        bus.emit(Event::Chat {
            from_uid: 1,
            message: "hi".to_owned(),
        })
        .await;

        assert_eq!(*log.lock().unwrap(), vec!["survivor"]);
        assert_eq!(*errors.lock().unwrap(), vec!["boom".to_owned()]);
    }

    #[tokio::test]
    async fn new_listener_meta_event_fires() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        bus.on(
            EventKind::NewListener,
            handler(move |event| {
                let seen = Arc::clone(&seen_in);
                async move {
                    if let Event::NewListener { event } = event {
                        seen.lock().unwrap().push(event);
                    }
                    Ok(())
                }
            }),
        );

        bus.on(EventKind::Chat, handler(|_| async { Ok(()) }));
        // The meta-event dispatch is spawned; let it run.
        tokio::task::yield_now().await;

        assert_eq!(*seen.lock().unwrap(), vec![EventKind::Chat]);
    }
}
