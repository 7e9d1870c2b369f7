use std::sync::mpsc::{self, Sender, SyncSender};

use crate::{
    action::{ActionKind, ConfigurationAction},
    calculation::CalculationResult,
    error::WlOutputError,
    wl_output::{WlOutput, WlOutputMode, WlPosition},
};

pub type Reply<T> = Sender<Result<T, WlOutputError>>;

/// Requests handled on the manager thread, each answered through its
/// `reply` sender
#[derive(Debug)]
pub enum WlOutputCommand {
    /// Snapshots of every attached output
    Outputs { reply: Reply<Vec<WlOutput>> },
    Modes {
        identifier: String,
        reply: Reply<Vec<WlOutputMode>>,
    },
    Output {
        identifier: String,
        reply: Reply<WlOutput>,
    },
    /// Turn an output on or off right away
    SetEnabled {
        identifier: String,
        enabled: bool,
        reply: Reply<()>,
    },
    /// Switch the mode of an output right away
    SetMode {
        identifier: String,
        width: i32,
        height: i32,
        /// Refresh rate in Hz
        refresh: f64,
        reply: Reply<()>,
    },
    /// Move an output right away
    SetPosition {
        identifier: String,
        position: WlPosition,
        reply: Reply<()>,
    },
    QueueAction {
        action: ConfigurationAction,
        reply: Reply<()>,
    },
    RemoveAction {
        identifier: String,
        kind: ActionKind,
        reply: Reply<bool>,
    },
    PendingActions {
        reply: Reply<Vec<ConfigurationAction>>,
    },
    /// Dry run of the queued actions
    Calculate { reply: Reply<CalculationResult> },
    /// Commit the queued actions
    Apply { reply: Reply<CalculationResult> },
    /// Drop the queued actions
    Reset { reply: Reply<()> },
}

/// Blocking client for a running [`crate::WlOutputManager`].
///
/// Cheap to clone; every clone talks to the same manager thread.
#[derive(Debug, Clone)]
pub struct WlOutputHandle {
    sender: SyncSender<WlOutputCommand>,
}

impl WlOutputHandle {
    pub fn new(sender: SyncSender<WlOutputCommand>) -> Self {
        Self { sender }
    }

    fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> WlOutputCommand,
    ) -> Result<T, WlOutputError> {
        let (reply, response) = mpsc::channel();
        self.sender
            .send(build(reply))
            .map_err(|_| WlOutputError::Disconnected)?;
        response.recv().map_err(|_| WlOutputError::Disconnected)?
    }

    pub fn outputs(&self) -> Result<Vec<WlOutput>, WlOutputError> {
        self.request(|reply| WlOutputCommand::Outputs { reply })
    }

    pub fn modes(
        &self,
        identifier: &str,
    ) -> Result<Vec<WlOutputMode>, WlOutputError> {
        self.request(|reply| WlOutputCommand::Modes {
            identifier: identifier.to_string(),
            reply,
        })
    }

    pub fn output(&self, identifier: &str) -> Result<WlOutput, WlOutputError> {
        self.request(|reply| WlOutputCommand::Output {
            identifier: identifier.to_string(),
            reply,
        })
    }

    pub fn set_enabled(
        &self,
        identifier: &str,
        enabled: bool,
    ) -> Result<(), WlOutputError> {
        self.request(|reply| WlOutputCommand::SetEnabled {
            identifier: identifier.to_string(),
            enabled,
            reply,
        })
    }

    pub fn set_mode(
        &self,
        identifier: &str,
        width: i32,
        height: i32,
        refresh: f64,
    ) -> Result<(), WlOutputError> {
        self.request(|reply| WlOutputCommand::SetMode {
            identifier: identifier.to_string(),
            width,
            height,
            refresh,
            reply,
        })
    }

    pub fn set_position(
        &self,
        identifier: &str,
        x: i32,
        y: i32,
    ) -> Result<(), WlOutputError> {
        self.request(|reply| WlOutputCommand::SetPosition {
            identifier: identifier.to_string(),
            position: WlPosition { x, y },
            reply,
        })
    }

    pub fn queue_action(
        &self,
        action: ConfigurationAction,
    ) -> Result<(), WlOutputError> {
        self.request(|reply| WlOutputCommand::QueueAction { action, reply })
    }

    pub fn remove_action(
        &self,
        identifier: &str,
        kind: ActionKind,
    ) -> Result<bool, WlOutputError> {
        self.request(|reply| WlOutputCommand::RemoveAction {
            identifier: identifier.to_string(),
            kind,
            reply,
        })
    }

    pub fn pending_actions(
        &self,
    ) -> Result<Vec<ConfigurationAction>, WlOutputError> {
        self.request(|reply| WlOutputCommand::PendingActions { reply })
    }

    pub fn calculate(&self) -> Result<CalculationResult, WlOutputError> {
        self.request(|reply| WlOutputCommand::Calculate { reply })
    }

    pub fn apply(&self) -> Result<CalculationResult, WlOutputError> {
        self.request(|reply| WlOutputCommand::Apply { reply })
    }

    pub fn reset(&self) -> Result<(), WlOutputError> {
        self.request(|reply| WlOutputCommand::Reset { reply })
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc::sync_channel, thread};

    use super::*;

    #[test]
    fn test_request_reply() {
        let (tx, rx) = sync_channel(4);
        let handle = WlOutputHandle::new(tx);
        let worker = thread::spawn(move || {
            while let Ok(command) = rx.recv() {
                match command {
                    WlOutputCommand::RemoveAction {
                        identifier, reply, ..
                    } => {
                        let _ = reply.send(Ok(identifier == "A"));
                    }
                    WlOutputCommand::Output { identifier, reply } => {
                        let missing = WlOutputError::OutputMissing(identifier);
                        let _ = reply.send(Err(missing));
                    }
                    _ => {}
                }
            }
        });

        assert_eq!(handle.remove_action("A", ActionKind::Scale), Ok(true));
        assert_eq!(
            handle.output("Z"),
            Err(WlOutputError::OutputMissing("Z".into()))
        );
        drop(handle);
        worker.join().unwrap();
    }

    #[test]
    fn test_stopped_manager_is_disconnected() {
        let (tx, rx) = sync_channel(1);
        drop(rx);
        let handle = WlOutputHandle::new(tx);
        assert_eq!(handle.reset(), Err(WlOutputError::Disconnected));
    }
}
