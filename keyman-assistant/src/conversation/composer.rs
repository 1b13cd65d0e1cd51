//! Primary composer: the typed text plus at most one staged file or recording.

use tracing::debug;

use super::models::FilePayload;
use crate::error::MediaError;

/// Audio capture device port
pub trait Recorder: Send {
    /// Acquire the device and begin capturing
    fn start(&mut self) -> Result<(), MediaError>;

    /// Stop capturing and hand back the recorded clip
    fn stop(&mut self) -> Result<FilePayload, MediaError>;

    /// Stop capturing and discard the clip
    fn cancel(&mut self);
}

/// Staged media; a file and a recording are mutually exclusive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staged {
    File(FilePayload),
    Recording,
}

/// Input gathered before a send
#[derive(Default)]
pub struct Composer {
    text: String,
    staged: Option<Staged>,
    recorder: Option<Box<dyn Recorder>>,
}

/// Text and media taken out of the composer for one send
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Draft {
    pub text: String,
    pub file: Option<FilePayload>,
}

impl Composer {
    pub fn new(recorder: Option<Box<dyn Recorder>>) -> Self {
        Self {
            text: String::new(),
            staged: None,
            recorder,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn staged(&self) -> Option<&Staged> {
        self.staged.as_ref()
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.staged, Some(Staged::Recording))
    }

    /// Something would be sent: text, a file or a running recording
    pub fn has_input(&self) -> bool {
        !self.text.trim().is_empty() || self.staged.is_some()
    }

    /// Stage a file, cancelling any running recording
    pub fn attach_file(&mut self, file: FilePayload) {
        if self.is_recording() {
            self.cancel_recorder();
        }
        debug!(file_name = %file.file_name, mime = %file.mime, "Staged attachment");
        self.staged = Some(Staged::File(file));
    }

    /// Start recording, dropping any staged file.
    ///
    /// On failure nothing is staged and the composer is not recording.
    pub fn start_recording(&mut self) -> Result<(), MediaError> {
        if self.is_recording() {
            return Ok(());
        }

        let recorder = self.recorder.as_mut().ok_or(MediaError::Unsupported)?;
        recorder.start()?;

        if matches!(self.staged, Some(Staged::File(_))) {
            debug!("Recording started, dropping staged attachment");
        }
        self.staged = Some(Staged::Recording);
        Ok(())
    }

    /// Stop recording and stage the clip as the attachment
    pub fn stop_recording(&mut self) -> Result<(), MediaError> {
        if !self.is_recording() {
            return Ok(());
        }

        self.staged = None;
        self.staged = self.stop_recorder()?.map(Staged::File);
        Ok(())
    }

    pub fn cancel_recording(&mut self) {
        if self.is_recording() {
            self.cancel_recorder();
            self.staged = None;
        }
    }

    /// Remove the staged file or recording
    pub fn discard_staged(&mut self) {
        if self.is_recording() {
            self.cancel_recorder();
        }
        self.staged = None;
    }

    /// Take everything staged, stopping a running recording first, and clear
    pub fn take(&mut self) -> Result<Draft, MediaError> {
        let file = match self.staged.take() {
            Some(Staged::File(file)) => Some(file),
            Some(Staged::Recording) => self.stop_recorder()?,
            None => None,
        };

        let text = std::mem::take(&mut self.text).trim().to_string();
        Ok(Draft { text, file })
    }

    fn stop_recorder(&mut self) -> Result<Option<FilePayload>, MediaError> {
        match self.recorder.as_mut() {
            Some(recorder) => recorder.stop().map(Some),
            None => Ok(None),
        }
    }

    fn cancel_recorder(&mut self) {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.cancel();
        }
    }
}
