//! Command buffer records and their lifecycle state machine.
//!
//! Validation is advisory: a lifecycle violation is reported, but the
//! state machine still advances wherever the resulting state is
//! well-defined, so one mistake does not cascade into a wall of
//! follow-on reports.

use crate::{
    defect::{codes, DefectCode},
    id::{HandleKind, HandleMarker},
    layout::LayoutOverlay,
};
use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecordState {
    /// Freshly created or reset; accepts `begin`.
    Initial,
    /// Between `begin` and `end`; accepts recorded commands.
    Recording,
    /// Finished recording; accepts submission.
    Executable,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandStateError {
    #[error("begin called while the command buffer is recording")]
    BeginWhileRecording,
    #[error("end called outside of recording")]
    EndNotRecording,
    #[error("command recorded outside of recording")]
    RecordNotRecording,
    #[error("submitted command buffer is not executable")]
    SubmitNotExecutable,
}

impl CommandStateError {
    pub fn code(&self) -> DefectCode {
        match *self {
            Self::BeginWhileRecording => codes::BEGIN_INVALID_STATE,
            Self::EndNotRecording => codes::END_NOT_RECORDING,
            Self::RecordNotRecording => codes::RECORD_NOT_RECORDING,
            Self::SubmitNotExecutable => codes::SUBMIT_NOT_EXECUTABLE,
        }
    }
}

#[derive(Debug)]
pub struct CommandBuffer {
    state: RecordState,
    /// Layout predictions accumulated by the recorded commands.
    pub(crate) layouts: LayoutOverlay,
}

impl HandleMarker for CommandBuffer {
    const KIND: HandleKind = HandleKind::CommandBuffer;
}

impl CommandBuffer {
    pub(crate) fn new() -> Self {
        Self {
            state: RecordState::Initial,
            layouts: LayoutOverlay::default(),
        }
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    /// Start recording. Doubles as an implicit reset of an `Executable`
    /// buffer; beginning mid-recording is reported but still restarts.
    pub(crate) fn begin(&mut self) -> Result<(), CommandStateError> {
        let result = match self.state {
            RecordState::Recording => Err(CommandStateError::BeginWhileRecording),
            RecordState::Initial | RecordState::Executable => Ok(()),
        };
        self.layouts.clear();
        self.state = RecordState::Recording;
        result
    }

    pub(crate) fn end(&mut self) -> Result<(), CommandStateError> {
        match self.state {
            RecordState::Recording => {
                self.state = RecordState::Executable;
                Ok(())
            }
            // Ending a buffer that never began has no well-defined
            // result state; leave it alone.
            RecordState::Initial | RecordState::Executable => {
                Err(CommandStateError::EndNotRecording)
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.layouts.clear();
        self.state = RecordState::Initial;
    }

    /// Gate for recorded commands. The command is still applied after a
    /// violation; only the report differs.
    pub(crate) fn expect_recording(&self) -> Result<(), CommandStateError> {
        match self.state {
            RecordState::Recording => Ok(()),
            _ => Err(CommandStateError::RecordNotRecording),
        }
    }

    pub(crate) fn expect_executable(&self) -> Result<(), CommandStateError> {
        match self.state {
            RecordState::Executable => Ok(()),
            _ => Err(CommandStateError::SubmitNotExecutable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_happy_path() {
        let mut cb = CommandBuffer::new();
        assert_eq!(cb.state(), RecordState::Initial);
        cb.begin().unwrap();
        assert_eq!(cb.state(), RecordState::Recording);
        cb.expect_recording().unwrap();
        cb.end().unwrap();
        assert_eq!(cb.state(), RecordState::Executable);
        cb.expect_executable().unwrap();
    }

    #[test]
    fn begin_twice_reports_but_restarts() {
        let mut cb = CommandBuffer::new();
        cb.begin().unwrap();
        assert_eq!(cb.begin(), Err(CommandStateError::BeginWhileRecording));
        // The buffer is recording again, from scratch.
        assert_eq!(cb.state(), RecordState::Recording);
        assert!(cb.layouts.is_empty());
    }

    #[test]
    fn end_without_begin_is_reported_and_ignored() {
        let mut cb = CommandBuffer::new();
        assert_eq!(cb.end(), Err(CommandStateError::EndNotRecording));
        assert_eq!(cb.state(), RecordState::Initial);
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut cb = CommandBuffer::new();
        cb.begin().unwrap();
        cb.end().unwrap();
        cb.reset();
        assert_eq!(cb.state(), RecordState::Initial);
        assert_eq!(
            cb.expect_executable(),
            Err(CommandStateError::SubmitNotExecutable)
        );
    }

    #[test]
    fn begin_implicitly_resets_an_executable_buffer() {
        let mut cb = CommandBuffer::new();
        cb.begin().unwrap();
        cb.end().unwrap();
        cb.begin().unwrap();
        assert_eq!(cb.state(), RecordState::Recording);
    }
}
