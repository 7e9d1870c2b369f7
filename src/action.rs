use crate::{
    error::WlOutputError,
    wl_output::{AdaptiveSync, HorizontalAnchor, VerticalAnchor, WlTransform},
};

/// Kind of a pending edit. At most one action per kind and output is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    OnOff,
    Mode,
    PositionAnchor,
    Scale,
    Transform,
    AdaptiveSync,
    Primary,
    MirrorOf,
}

/// Payload of a pending edit
#[derive(Debug, Clone, PartialEq)]
pub enum ActionChange {
    OnOff {
        on: bool,
    },
    Mode {
        width: i32,
        height: i32,
        /// Refresh rate in Hz
        refresh: f64,
    },
    PositionAnchor {
        relative: String,
        horizontal: HorizontalAnchor,
        vertical: VerticalAnchor,
    },
    Scale(f64),
    Transform(WlTransform),
    AdaptiveSync(AdaptiveSync),
    Primary,
    MirrorOf {
        relative: String,
    },
}

/// One pending edit scoped to a single output.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationAction {
    output: String,
    change: ActionChange,
}

impl ConfigurationAction {
    pub fn new(output: impl Into<String>, change: ActionChange) -> Self {
        Self {
            output: output.into(),
            change,
        }
    }

    pub fn explicit_on(output: impl Into<String>) -> Self {
        Self::new(output, ActionChange::OnOff { on: true })
    }

    pub fn explicit_off(output: impl Into<String>) -> Self {
        Self::new(output, ActionChange::OnOff { on: false })
    }

    pub fn mode(
        output: impl Into<String>,
        width: i32,
        height: i32,
        refresh: f64,
    ) -> Self {
        Self::new(
            output,
            ActionChange::Mode {
                width,
                height,
                refresh,
            },
        )
    }

    pub fn position_anchor(
        output: impl Into<String>,
        relative: impl Into<String>,
        horizontal: HorizontalAnchor,
        vertical: VerticalAnchor,
    ) -> Self {
        Self::new(
            output,
            ActionChange::PositionAnchor {
                relative: relative.into(),
                horizontal,
                vertical,
            },
        )
    }

    /// Places `output` directly to the right of `relative`.
    pub fn right_of(
        output: impl Into<String>,
        relative: impl Into<String>,
    ) -> Self {
        Self::position_anchor(
            output,
            relative,
            HorizontalAnchor::None,
            VerticalAnchor::None,
        )
    }

    pub fn scale(output: impl Into<String>, scale: f64) -> Self {
        Self::new(output, ActionChange::Scale(scale))
    }

    pub fn transform(
        output: impl Into<String>,
        transform: WlTransform,
    ) -> Self {
        Self::new(output, ActionChange::Transform(transform))
    }

    pub fn adaptive_sync(
        output: impl Into<String>,
        state: AdaptiveSync,
    ) -> Self {
        Self::new(output, ActionChange::AdaptiveSync(state))
    }

    pub fn primary(output: impl Into<String>) -> Self {
        Self::new(output, ActionChange::Primary)
    }

    pub fn mirror_of(
        output: impl Into<String>,
        relative: impl Into<String>,
    ) -> Self {
        Self::new(
            output,
            ActionChange::MirrorOf {
                relative: relative.into(),
            },
        )
    }

    /// Identifier of the output this action edits
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn change(&self) -> &ActionChange {
        &self.change
    }

    pub fn kind(&self) -> ActionKind {
        match self.change {
            ActionChange::OnOff { .. } => ActionKind::OnOff,
            ActionChange::Mode { .. } => ActionKind::Mode,
            ActionChange::PositionAnchor { .. } => ActionKind::PositionAnchor,
            ActionChange::Scale(_) => ActionKind::Scale,
            ActionChange::Transform(_) => ActionKind::Transform,
            ActionChange::AdaptiveSync(_) => ActionKind::AdaptiveSync,
            ActionChange::Primary => ActionKind::Primary,
            ActionChange::MirrorOf { .. } => ActionKind::MirrorOf,
        }
    }

    /// Output referenced by anchor and mirror actions
    pub fn relative(&self) -> Option<&str> {
        match &self.change {
            ActionChange::PositionAnchor { relative, .. }
            | ActionChange::MirrorOf { relative } => Some(relative),
            _ => None,
        }
    }

    /// Whether this action turns its output off.
    pub fn is_off(&self) -> bool {
        matches!(self.change, ActionChange::OnOff { on: false })
    }

    /// Rejects values no compositor accepts.
    pub fn validate(&self) -> Result<(), WlOutputError> {
        match &self.change {
            ActionChange::Scale(scale)
                if !scale.is_finite() || *scale <= 0.0 =>
            {
                Err(WlOutputError::InvalidValue(format!(
                    "invalid scale value '{scale}': must be finite and > 0"
                )))
            }
            ActionChange::Mode {
                width,
                height,
                refresh,
            } if *width <= 0
                || *height <= 0
                || !refresh.is_finite()
                || *refresh <= 0.0 =>
            {
                Err(WlOutputError::InvalidValue(format!(
                    "invalid mode {width}x{height}@{refresh}Hz"
                )))
            }
            ActionChange::PositionAnchor { relative, .. }
            | ActionChange::MirrorOf { relative }
                if *relative == self.output =>
            {
                Err(WlOutputError::InvalidValue(format!(
                    "output '{relative}' cannot be placed relative to itself"
                )))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_relative() {
        let action = ConfigurationAction::mirror_of("B", "A");
        assert_eq!(action.kind(), ActionKind::MirrorOf);
        assert_eq!(action.output(), "B");
        assert_eq!(action.relative(), Some("A"));

        let action = ConfigurationAction::scale("B", 1.5);
        assert_eq!(action.kind(), ActionKind::Scale);
        assert_eq!(action.relative(), None);
    }

    #[test]
    fn test_validate() {
        assert!(ConfigurationAction::scale("A", 1.5).validate().is_ok());
        assert!(ConfigurationAction::scale("A", 0.0).validate().is_err());
        assert!(ConfigurationAction::scale("A", f64::NAN).validate().is_err());
        let valid = ConfigurationAction::mode("A", 1920, 1080, 60.0);
        assert!(valid.validate().is_ok());
        let negative = ConfigurationAction::mode("A", 1920, -1, 60.0);
        assert!(negative.validate().is_err());
        assert!(ConfigurationAction::right_of("A", "A").validate().is_err());
        assert!(ConfigurationAction::mirror_of("B", "A").validate().is_ok());
    }

    #[test]
    fn test_is_off() {
        assert!(ConfigurationAction::explicit_off("A").is_off());
        assert!(!ConfigurationAction::explicit_on("A").is_off());
        assert!(!ConfigurationAction::primary("A").is_off());
    }
}
