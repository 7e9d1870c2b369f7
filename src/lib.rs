pub mod action;
pub mod calculation;
mod command;
pub mod config;
mod error;
pub mod meta_head;
pub mod meta_mode;
pub mod plan;
pub mod proxy;
pub mod queue;
mod state;
mod transaction;
mod wl_output;

pub use action::{ActionChange, ActionKind, ConfigurationAction};
pub use calculation::{
    CalculationResult, OutputTargetState, UnresolvedAnchor, UnresolvedReason,
    calculate,
};
pub use command::{WlOutputCommand, WlOutputHandle};
pub use config::{DisplayConfig, DisplayGroup, OutputSettings};
pub use error::WlOutputError;
pub use queue::ActionQueue;
pub use state::{ManagerOptions, WlOutputEvent, WlOutputManager};
pub use transaction::TransactionOutcome;
pub use wl_output::{
    AdaptiveSync, BindingId, HorizontalAnchor, ModeId, VerticalAnchor, WlOutput,
    WlOutputMode, WlPosition, WlRect, WlResolution, WlTransform,
};
