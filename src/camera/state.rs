//! Camera finite state machine.
//!
//! The state machine gates every device operation: a command is only
//! dispatched when a transition is defined for the current state, and the
//! matching controller operation runs while the transition mutex is held, so
//! no two device operations ever interleave.
//!
//! A failed controller operation aborts the transition and lands the
//! machine in [`CameraStateType::Error`]; the only command accepted there is
//! `reset`, which disconnects the device and clears the recorded error.

use std::sync::Mutex;

use crate::error::{CameraStateError, ControllerError};

/// Camera lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraStateType {
    Disconnected,
    Connected,
    Armed,
    Recording,
    Error,
}

impl CameraStateType {
    pub fn name(self) -> &'static str {
        match self {
            CameraStateType::Disconnected => "disconnected",
            CameraStateType::Connected => "connected",
            CameraStateType::Armed => "armed",
            CameraStateType::Recording => "recording",
            CameraStateType::Error => "error",
        }
    }
}

/// Commands accepted by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraCommand {
    Connect,
    Disconnect,
    Arm,
    Disarm,
    StartRecording,
    StopRecording,
    Reset,
}

impl CameraCommand {
    pub fn name(self) -> &'static str {
        match self {
            CameraCommand::Connect => "connect",
            CameraCommand::Disconnect => "disconnect",
            CameraCommand::Arm => "arm",
            CameraCommand::Disarm => "disarm",
            CameraCommand::StartRecording => "start",
            CameraCommand::StopRecording => "stop",
            CameraCommand::Reset => "reset",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "connect" => Some(CameraCommand::Connect),
            "disconnect" => Some(CameraCommand::Disconnect),
            "arm" => Some(CameraCommand::Arm),
            "disarm" => Some(CameraCommand::Disarm),
            "start" => Some(CameraCommand::StartRecording),
            "stop" => Some(CameraCommand::StopRecording),
            "reset" => Some(CameraCommand::Reset),
            _ => None,
        }
    }
}

/// Controller operations invoked by state transitions.
///
/// The state machine holds no owning reference to the controller; the
/// operations are passed in at dispatch time.
pub trait CameraOps {
    fn connect(&self) -> Result<(), ControllerError>;
    fn disconnect(&self, reset_error: bool) -> Result<(), ControllerError>;
    fn arm(&self) -> Result<(), ControllerError>;
    fn disarm(&self) -> Result<(), ControllerError>;
    fn start_recording(&self) -> Result<(), ControllerError>;
    fn stop_recording(&self) -> Result<(), ControllerError>;
}

/// The camera state machine.
///
/// The current state doubles as the transition mutex: the lock is held for
/// the full duration of a command dispatch, so transitions never interleave.
pub struct PcoCameraState {
    current: Mutex<CameraStateType>,
}

impl Default for PcoCameraState {
    fn default() -> Self {
        Self::new()
    }
}

impl PcoCameraState {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(CameraStateType::Disconnected),
        }
    }

    pub fn current_state(&self) -> CameraStateType {
        *self.current.lock().unwrap()
    }

    pub fn current_state_name(&self) -> &'static str {
        self.current_state().name()
    }

    /// Mark the machine as errored outside a command dispatch.
    ///
    /// Used when a startup step that is not itself a transition fails.
    pub(crate) fn set_error(&self) {
        *self.current.lock().unwrap() = CameraStateType::Error;
    }

    /// Map a command name onto a command and dispatch it.
    pub fn execute_command_name(
        &self,
        ops: &dyn CameraOps,
        command: &str,
    ) -> Result<(), CameraStateError> {
        let command = CameraCommand::from_name(command)
            .ok_or_else(|| CameraStateError::UnknownCommand(command.to_string()))?;
        self.execute_command(ops, command)
    }

    /// Dispatch a command through the transition table.
    pub fn execute_command(
        &self,
        ops: &dyn CameraOps,
        command: CameraCommand,
    ) -> Result<(), CameraStateError> {
        use CameraCommand::*;
        use CameraStateType::*;

        let mut state = self.current.lock().unwrap();

        let (operation, next): (fn(&dyn CameraOps) -> Result<(), ControllerError>, _) =
            match (command, *state) {
                (Connect, Disconnected) => (|ops| ops.connect(), Connected),
                (Disconnect, Connected) => (|ops| ops.disconnect(false), Disconnected),
                (Arm, Connected) => (|ops| ops.arm(), Armed),
                (Disarm, Armed) => (|ops| ops.disarm(), Connected),
                (StartRecording, Armed) => (|ops| ops.start_recording(), Recording),
                (StopRecording, Recording) => (|ops| ops.stop_recording(), Armed),
                (Reset, Error) => (|ops| ops.disconnect(true), Disconnected),
                (command, state) => {
                    return Err(CameraStateError::IllegalTransition {
                        command: command.name(),
                        state: state.name(),
                    });
                }
            };

        match operation(ops) {
            Ok(()) => {
                log::debug!(
                    "Camera state transition {} -> {} on {}",
                    state.name(),
                    next.name(),
                    command.name()
                );
                *state = next;
                Ok(())
            }
            Err(source) => {
                log::error!(
                    "Camera {} operation failed, entering error state: {}",
                    command.name(),
                    source
                );
                *state = Error;
                Err(CameraStateError::OperationFailed {
                    command: command.name(),
                    source,
                })
            }
        }
    }
}
