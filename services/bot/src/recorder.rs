//! Stream recorder seam.
//!
//! Recording and playback persistence live outside this crate; the operator
//! command surface only needs something to call.  The default
//! [`NullRecorder`] reports every operation as unavailable.

use thiserror::Error;

use rornet::UserInfo;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("stream recording is not available")]
    Unavailable,
    #[error("no recording for {uid}:{sid}")]
    NotRecording { uid: u32, sid: u32 },
    #[error("{0}")]
    Failed(String),
}

pub trait StreamRecorder: Send + Sync {
    fn start_recording(&self, user: &UserInfo, sid: u32) -> Result<(), RecorderError>;
    fn stop_recording(&self, uid: u32, sid: u32) -> Result<(), RecorderError>;
    fn pause_recording(&self, uid: u32, sid: u32) -> Result<(), RecorderError>;
    fn resume_recording(&self, uid: u32, sid: u32) -> Result<(), RecorderError>;

    fn play_recording(&self, name: Option<&str>) -> Result<(), RecorderError>;
    fn stop_playback(&self, sid: Option<u32>) -> Result<(), RecorderError>;
    fn pause_playback(&self, sid: Option<u32>) -> Result<(), RecorderError>;
    fn resume_playback(&self, sid: Option<u32>) -> Result<(), RecorderError>;

    fn available_recordings(&self) -> Vec<String>;
}

/// Recorder used when no recording backend is wired in.
pub struct NullRecorder;

impl StreamRecorder for NullRecorder {
    fn start_recording(&self, _user: &UserInfo, _sid: u32) -> Result<(), RecorderError> {
        Err(RecorderError::Unavailable)
    }

    fn stop_recording(&self, _uid: u32, _sid: u32) -> Result<(), RecorderError> {
        Err(RecorderError::Unavailable)
    }

    fn pause_recording(&self, _uid: u32, _sid: u32) -> Result<(), RecorderError> {
        Err(RecorderError::Unavailable)
    }

    fn resume_recording(&self, _uid: u32, _sid: u32) -> Result<(), RecorderError> {
        Err(RecorderError::Unavailable)
    }

    fn play_recording(&self, _name: Option<&str>) -> Result<(), RecorderError> {
        Err(RecorderError::Unavailable)
    }

    fn stop_playback(&self, _sid: Option<u32>) -> Result<(), RecorderError> {
        Err(RecorderError::Unavailable)
    }

    fn pause_playback(&self, _sid: Option<u32>) -> Result<(), RecorderError> {
        Err(RecorderError::Unavailable)
    }

    fn resume_playback(&self, _sid: Option<u32>) -> Result<(), RecorderError> {
        Err(RecorderError::Unavailable)
    }

    fn available_recordings(&self) -> Vec<String> {
        Vec::new()
    }
}
