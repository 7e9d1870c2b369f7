use serde::{Deserialize, Serialize};
use wayland_client::{Proxy, WEnum, protocol::wl_output::Transform};
use wayland_protocols_wlr::output_management::v1::client::zwlr_output_head_v1::{
    AdaptiveSyncState,
};

/// Protocol id of a live wayland object (head, mode).
///
/// Records in the aggregator refer to protocol objects through this id only;
/// the proxies themselves stay with the output manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub u32);

impl BindingId {
    pub fn of<P: Proxy>(proxy: &P) -> Self {
        Self(proxy.id().protocol_id())
    }
}

/// Stable handle of a mode record within its head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModeId(pub u32);

/// Monitor transform (rotation/flip)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WlTransform {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl WlTransform {
    pub(crate) fn from_wayland(t: WEnum<Transform>) -> Self {
        match t {
            WEnum::Value(Transform::Normal) => Self::Normal,
            WEnum::Value(Transform::_90) => Self::Rotate90,
            WEnum::Value(Transform::_180) => Self::Rotate180,
            WEnum::Value(Transform::_270) => Self::Rotate270,
            WEnum::Value(Transform::Flipped) => Self::Flipped,
            WEnum::Value(Transform::Flipped90) => Self::Flipped90,
            WEnum::Value(Transform::Flipped180) => Self::Flipped180,
            WEnum::Value(Transform::Flipped270) => Self::Flipped270,
            _ => Self::Normal,
        }
    }

    pub(crate) fn to_wayland(self) -> Transform {
        match self {
            Self::Normal => Transform::Normal,
            Self::Rotate90 => Transform::_90,
            Self::Rotate180 => Transform::_180,
            Self::Rotate270 => Transform::_270,
            Self::Flipped => Transform::Flipped,
            Self::Flipped90 => Transform::Flipped90,
            Self::Flipped180 => Transform::Flipped180,
            Self::Flipped270 => Transform::Flipped270,
        }
    }

    /// Builds a transform from a rotation in degrees. Unknown angles fall
    /// back to no rotation.
    pub fn from_degrees(degrees: i32, flipped: bool) -> Self {
        match (degrees.rem_euclid(360), flipped) {
            (90, false) => Self::Rotate90,
            (180, false) => Self::Rotate180,
            (270, false) => Self::Rotate270,
            (0, true) => Self::Flipped,
            (90, true) => Self::Flipped90,
            (180, true) => Self::Flipped180,
            (270, true) => Self::Flipped270,
            _ => Self::Normal,
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Self::Normal | Self::Flipped => 0,
            Self::Rotate90 | Self::Flipped90 => 90,
            Self::Rotate180 | Self::Flipped180 => 180,
            Self::Rotate270 | Self::Flipped270 => 270,
        }
    }

    pub fn is_flipped(self) -> bool {
        matches!(
            self,
            Self::Flipped
                | Self::Flipped90
                | Self::Flipped180
                | Self::Flipped270
        )
    }

    /// Whether width and height trade places on screen.
    pub fn swaps_axes(self) -> bool {
        matches!(self.degrees(), 90 | 270)
    }
}

/// Adaptive sync (VRR) state of a head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdaptiveSync {
    #[default]
    Disabled,
    Enabled,
}

impl AdaptiveSync {
    pub(crate) fn from_wayland(state: WEnum<AdaptiveSyncState>) -> Self {
        match state {
            WEnum::Value(AdaptiveSyncState::Enabled) => Self::Enabled,
            _ => Self::Disabled,
        }
    }

    pub(crate) fn to_wayland(self) -> AdaptiveSyncState {
        match self {
            Self::Disabled => AdaptiveSyncState::Disabled,
            Self::Enabled => AdaptiveSyncState::Enabled,
        }
    }

    pub fn is_enabled(self) -> bool {
        self == Self::Enabled
    }
}

impl From<bool> for AdaptiveSync {
    fn from(enabled: bool) -> Self {
        if enabled { Self::Enabled } else { Self::Disabled }
    }
}

/// Horizontal alignment of an output against its relative output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HorizontalAnchor {
    /// Directly to the right of the relative output
    #[default]
    None,
    /// Left edges aligned
    Left,
    /// Right edges aligned
    Right,
    /// Centers aligned
    Center,
}

/// Vertical alignment of an output against its relative output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerticalAnchor {
    /// Same y as the relative output
    #[default]
    None,
    /// Bottom edge touches the top edge of the relative output
    Above,
    /// Top edges aligned
    Top,
    /// Middles aligned
    Middle,
    /// Bottom edges aligned
    Bottom,
    /// Top edge touches the bottom edge of the relative output
    Below,
}

/// Represents the resolution of a monitor mode
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct WlResolution {
    /// Height in pixels
    pub height: i32,
    /// Width in pixels
    pub width: i32,
}

impl WlResolution {
    pub fn new(width: i32, height: i32) -> Self {
        Self { height, width }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub(crate) fn transposed(self) -> Self {
        Self {
            height: self.width,
            width: self.height,
        }
    }
}

/// Represents the position of a monitor in the global coordinate space
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct WlPosition {
    /// X coordinate
    pub x: i32,
    /// Y coordinate
    pub y: i32,
}

impl WlPosition {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in compositor logical space
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct WlRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl WlRect {
    pub fn new(position: WlPosition, size: WlResolution) -> Self {
        Self {
            x: position.x,
            y: position.y,
            width: size.width,
            height: size.height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Smallest rectangle containing both. Empty rectangles do not contribute.
    pub fn united(&self, other: &WlRect) -> WlRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        WlRect {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }
}

/// Converts a refresh rate in Hz to the protocol's milli-hertz.
pub(crate) fn millihertz(refresh: f64) -> i32 {
    (refresh * 1000.0).round() as i32
}

/// Snapshot of a display mode (resolution + refresh rate) of an output
#[derive(Clone, Debug, PartialEq)]
pub struct WlOutputMode {
    /// Stable handle of this mode within its output
    pub id: ModeId,
    /// Screen resolution
    pub resolution: WlResolution,
    /// Refresh rate in milli-hertz, as reported by the compositor
    pub refresh_mhz: i32,
    /// Whether this is the preferred mode for the output
    pub preferred: bool,
    /// Whether this is the currently active mode
    pub is_current: bool,
    /// Whether the compositor still advertises this mode
    pub available: bool,
}

impl WlOutputMode {
    /// Refresh rate in Hz
    pub fn refresh(&self) -> f64 {
        f64::from(self.refresh_mhz) / 1000.0
    }
}

/// Snapshot of a connected output/display
#[derive(Clone, Debug, PartialEq)]
pub struct WlOutput {
    /// Stable identifier (hardware serial or derived hash)
    pub identifier: String,
    /// Output name (e.g., "DP-1", "HDMI-A-1")
    pub name: String,
    /// Human-readable description of the output
    pub description: String,
    /// Manufacturer name
    pub make: String,
    /// Model name
    pub model: String,
    /// Serial number, empty when the compositor reports none
    pub serial_number: String,
    /// Whether the output is currently enabled
    pub enabled: bool,
    /// Whether the compositor still advertises this output
    pub available: bool,
    /// Current position in the global coordinate space
    pub position: WlPosition,
    /// Current scale factor (e.g., 1.0, 1.5, 2.0)
    pub scale: f64,
    /// Current transformation (normal, rotated, flipped, etc.)
    pub transform: WlTransform,
    pub adaptive_sync: AdaptiveSync,
    /// Currently active mode (if any)
    pub current_mode: Option<WlOutputMode>,
    /// List of known display modes
    pub modes: Vec<WlOutputMode>,
    /// Output this one is anchored to, if any
    pub relative_output: Option<String>,
    pub horizontal_anchor: HorizontalAnchor,
    pub vertical_anchor: VerticalAnchor,
    pub primary: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_degrees_round_trip() {
        for transform in [
            WlTransform::Normal,
            WlTransform::Rotate90,
            WlTransform::Flipped180,
            WlTransform::Flipped270,
        ] {
            let degrees = transform.degrees();
            let flipped = transform.is_flipped();
            assert_eq!(WlTransform::from_degrees(degrees, flipped), transform);
        }
        assert_eq!(WlTransform::from_degrees(45, false), WlTransform::Normal);
        assert_eq!(
            WlTransform::from_degrees(-90, false),
            WlTransform::Rotate270
        );
    }

    #[test]
    fn test_swaps_axes_only_for_quarter_turns() {
        assert!(WlTransform::Rotate90.swaps_axes());
        assert!(WlTransform::Flipped270.swaps_axes());
        assert!(!WlTransform::Rotate180.swaps_axes());
        assert!(!WlTransform::Flipped.swaps_axes());
    }

    #[test]
    fn test_rect_union() {
        let a =
            WlRect::new(WlPosition::new(0, 0), WlResolution::new(1920, 1080));
        let b = WlRect::new(
            WlPosition::new(1920, 0),
            WlResolution::new(1280, 1024),
        );
        assert_eq!(
            a.united(&b),
            WlRect {
                x: 0,
                y: 0,
                width: 3200,
                height: 1080
            }
        );
        assert_eq!(WlRect::default().united(&b), b);
    }

    #[test]
    fn test_millihertz_rounds() {
        assert_eq!(millihertz(59.951), 59951);
        assert_eq!(millihertz(60.0), 60000);
        assert_eq!(millihertz(143.9995), 144000);
    }
}
