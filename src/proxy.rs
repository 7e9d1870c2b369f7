// Translation of raw wlr-output-management events into property changes.
//
// Protocol: https://gitlab.freedesktop.org/wlroots/wlr-protocols/-/blob/master/unstable/wlr-output-management-unstable-v1.xml

use wayland_protocols_wlr::output_management::v1::client::{
    zwlr_output_head_v1, zwlr_output_mode_v1,
};

use crate::wl_output::{
    AdaptiveSync, BindingId, WlPosition, WlResolution, WlTransform,
};

/// One property of a head as reported by the compositor.
#[derive(Debug, Clone, PartialEq)]
pub enum HeadChange {
    Name(String),
    Description(String),
    Make(String),
    Model(String),
    SerialNumber(String),
    Enabled(bool),
    /// A new mode object was advertised for this head
    ModeAdded(BindingId),
    /// The head now runs the given mode object
    CurrentMode(BindingId),
    Position(WlPosition),
    Scale(f64),
    Transform(WlTransform),
    AdaptiveSync(AdaptiveSync),
    /// The compositor destroyed the head object
    Finished,
}

impl HeadChange {
    /// Returns `None` for events the aggregator does not track.
    pub fn from_event(event: zwlr_output_head_v1::Event) -> Option<Self> {
        let change = match event {
            zwlr_output_head_v1::Event::Name { name } => Self::Name(name),
            zwlr_output_head_v1::Event::Description { description } => {
                Self::Description(description)
            }
            zwlr_output_head_v1::Event::Make { make } => Self::Make(make),
            zwlr_output_head_v1::Event::Model { model } => Self::Model(model),
            zwlr_output_head_v1::Event::SerialNumber { serial_number } => {
                Self::SerialNumber(serial_number)
            }
            zwlr_output_head_v1::Event::Enabled { enabled } => {
                Self::Enabled(enabled != 0)
            }
            zwlr_output_head_v1::Event::Mode { mode } => {
                Self::ModeAdded(BindingId::of(&mode))
            }
            zwlr_output_head_v1::Event::CurrentMode { mode } => {
                Self::CurrentMode(BindingId::of(&mode))
            }
            zwlr_output_head_v1::Event::Position { x, y } => {
                Self::Position(WlPosition { x, y })
            }
            zwlr_output_head_v1::Event::Scale { scale } => Self::Scale(scale),
            zwlr_output_head_v1::Event::Transform { transform } => {
                Self::Transform(WlTransform::from_wayland(transform))
            }
            zwlr_output_head_v1::Event::AdaptiveSync { state } => {
                Self::AdaptiveSync(AdaptiveSync::from_wayland(state))
            }
            zwlr_output_head_v1::Event::Finished => Self::Finished,
            _ => return None,
        };
        Some(change)
    }
}

/// One property of a mode as reported by the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChange {
    Size(WlResolution),
    /// Refresh rate in milli-hertz
    Refresh(i32),
    Preferred,
    Finished,
}

impl ModeChange {
    pub fn from_event(event: zwlr_output_mode_v1::Event) -> Option<Self> {
        let change = match event {
            zwlr_output_mode_v1::Event::Size { width, height } => {
                Self::Size(WlResolution { width, height })
            }
            zwlr_output_mode_v1::Event::Refresh { refresh } => {
                Self::Refresh(refresh)
            }
            zwlr_output_mode_v1::Event::Preferred => Self::Preferred,
            zwlr_output_mode_v1::Event::Finished => Self::Finished,
            _ => return None,
        };
        Some(change)
    }
}
