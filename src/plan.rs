use tracing::debug;

use crate::{
    calculation::{CalculationResult, OutputTargetState},
    config::{DisplayGroup, OutputSettings},
    error::WlOutputError,
    meta_head::MetaHead,
    meta_mode::MetaMode,
    wl_output::{AdaptiveSync, BindingId, WlPosition, WlTransform, millihertz},
};

/// Mode request for an enabled head
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModeSelection {
    /// One of the modes the head advertises
    Existing(BindingId),
    Custom {
        width: i32,
        height: i32,
        refresh_mhz: i32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeadSettings {
    /// `None` leaves the mode as it is
    pub mode: Option<ModeSelection>,
    pub position: WlPosition,
    pub scale: f64,
    pub transform: WlTransform,
    pub adaptive_sync: AdaptiveSync,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeadDirective {
    Enable(HeadSettings),
    Disable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedHead {
    pub head: BindingId,
    pub identifier: String,
    pub directive: HeadDirective,
}

/// A direct edit of one output
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeadEdit {
    Enabled(bool),
    Mode {
        width: i32,
        height: i32,
        /// Refresh rate in Hz
        refresh: f64,
    },
    Position(WlPosition),
}

/// The requests of one configuration transaction, one entry per live head.
///
/// Building a plan never touches the connection, so a plan that fails to
/// build leaves the compositor untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPlan {
    entries: Vec<PlannedHead>,
}

fn select_mode(
    head: &MetaHead,
    width: i32,
    height: i32,
    refresh: f64,
) -> Option<ModeSelection> {
    if width <= 0 || height <= 0 || !refresh.is_finite() || refresh <= 0.0 {
        return None;
    }
    let refresh_mhz = millihertz(refresh);
    let existing = head
        .mode_for(width, height, refresh_mhz)
        .and_then(MetaMode::binding);
    Some(match existing {
        Some(binding) => ModeSelection::Existing(binding),
        None => {
            debug!(
                output = %head.name(),
                width,
                height,
                refresh_mhz,
                "requesting custom mode"
            );
            ModeSelection::Custom {
                width,
                height,
                refresh_mhz,
            }
        }
    })
}

fn current_settings(head: &MetaHead) -> HeadSettings {
    HeadSettings {
        mode: head
            .current_mode()
            .and_then(MetaMode::binding)
            .map(ModeSelection::Existing),
        position: head.position(),
        scale: head.scale(),
        transform: head.transform(),
        adaptive_sync: head.adaptive_sync(),
    }
}

fn bound(head: &MetaHead) -> Result<BindingId, WlOutputError> {
    head.binding().ok_or_else(|| {
        WlOutputError::OutputUnavailable(head.identifier().to_string())
    })
}

/// Re-asserts the current state of a head so a transaction leaves it as is.
pub fn preserve(head: &MetaHead) -> Result<PlannedHead, WlOutputError> {
    let directive = if head.is_enabled() {
        HeadDirective::Enable(current_settings(head))
    } else {
        HeadDirective::Disable
    };
    Ok(PlannedHead {
        head: bound(head)?,
        identifier: head.identifier().to_string(),
        directive,
    })
}

impl TransactionPlan {
    pub fn entries(&self) -> &[PlannedHead] {
        &self.entries
    }

    pub fn entry(&self, identifier: &str) -> Option<&PlannedHead> {
        self.entries.iter().find(|e| e.identifier == identifier)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Translates a calculated layout into requests.
    ///
    /// Fails as a whole if any live head lacks a target state.
    pub fn from_calculation<'a>(
        result: &CalculationResult,
        heads: impl IntoIterator<Item = &'a MetaHead>,
    ) -> Result<Self, WlOutputError> {
        let mut entries = Vec::new();
        for head in heads.into_iter().filter(|h| h.is_available()) {
            let identifier = head.identifier();
            let state = result.output_state(identifier).ok_or_else(|| {
                WlOutputError::CalculationInconsistency(identifier.to_string())
            })?;
            entries.push(PlannedHead {
                head: bound(head)?,
                identifier: head.identifier().to_string(),
                directive: target_directive(head, state),
            });
        }
        Ok(Self { entries })
    }

    /// Applies one direct edit to the head named by `identifier` and
    /// preserves every other head.
    pub fn single<'a>(
        heads: impl IntoIterator<Item = &'a MetaHead> + Clone,
        identifier: &str,
        edit: HeadEdit,
    ) -> Result<Self, WlOutputError> {
        let target = heads
            .clone()
            .into_iter()
            .filter(|h| !h.is_advertising())
            .find(|h| h.identifier() == identifier)
            .ok_or_else(|| {
                WlOutputError::OutputMissing(identifier.to_string())
            })?;
        if !target.is_available() {
            let identifier = identifier.to_string();
            return Err(WlOutputError::OutputUnavailable(identifier));
        }
        let directive = edited_directive(target, edit)?;

        let mut entries = Vec::new();
        for head in heads.into_iter().filter(|h| h.is_available()) {
            if head.identifier() == identifier {
                entries.push(PlannedHead {
                    head: bound(head)?,
                    identifier: identifier.to_string(),
                    directive: directive.clone(),
                });
            } else {
                entries.push(preserve(head)?);
            }
        }
        Ok(Self { entries })
    }

    /// Requests the saved settings of `group`. Heads the group does not
    /// mention are preserved.
    pub fn from_group<'a>(
        group: &DisplayGroup,
        heads: impl IntoIterator<Item = &'a MetaHead>,
    ) -> Result<Self, WlOutputError> {
        let mut entries = Vec::new();
        for head in heads.into_iter().filter(|h| h.is_available()) {
            let Some(settings) = group.output(head.identifier()) else {
                entries.push(preserve(head)?);
                continue;
            };
            entries.push(PlannedHead {
                head: bound(head)?,
                identifier: head.identifier().to_string(),
                directive: saved_directive(head, settings),
            });
        }
        Ok(Self { entries })
    }
}

fn target_directive(
    head: &MetaHead,
    state: &OutputTargetState,
) -> HeadDirective {
    if !state.on {
        return HeadDirective::Disable;
    }
    HeadDirective::Enable(HeadSettings {
        mode: select_mode(
            head,
            state.dimensions.width,
            state.dimensions.height,
            state.refresh,
        ),
        position: state.position,
        scale: state.scale,
        transform: state.transform,
        adaptive_sync: state.adaptive_sync,
    })
}

fn saved_directive(
    head: &MetaHead,
    settings: &OutputSettings,
) -> HeadDirective {
    if settings.disabled {
        return HeadDirective::Disable;
    }
    let [x, y] = settings.position;
    HeadDirective::Enable(HeadSettings {
        mode: select_mode(
            head,
            settings.width,
            settings.height,
            settings.refresh,
        )
        .or_else(|| current_settings(head).mode),
        position: WlPosition { x, y },
        scale: if settings.scale > 0.0 { settings.scale } else { 1.0 },
        transform: settings.transform(),
        adaptive_sync: settings.adaptive_sync(),
    })
}

fn edited_directive(
    head: &MetaHead,
    edit: HeadEdit,
) -> Result<HeadDirective, WlOutputError> {
    let identifier = head.identifier();
    match edit {
        HeadEdit::Enabled(false) => Ok(HeadDirective::Disable),
        HeadEdit::Enabled(true) => {
            let mode = head
                .fallback_mode()
                .and_then(MetaMode::binding)
                .ok_or_else(|| {
                    WlOutputError::InvalidValue(format!(
                        "no valid mode available for output '{identifier}'"
                    ))
                })?;
            Ok(HeadDirective::Enable(HeadSettings {
                mode: Some(ModeSelection::Existing(mode)),
                ..current_settings(head)
            }))
        }
        HeadEdit::Mode {
            width,
            height,
            refresh,
        } => {
            let mode = select_mode(head, width, height, refresh);
            let mode = mode.ok_or_else(|| {
                WlOutputError::InvalidValue(format!(
                    "invalid mode {width}x{height}@{refresh}Hz \
                     for output '{identifier}'"
                ))
            })?;
            Ok(HeadDirective::Enable(HeadSettings {
                mode: Some(mode),
                ..current_settings(head)
            }))
        }
        HeadEdit::Position(position) => {
            if !head.is_enabled() {
                return Err(WlOutputError::InvalidValue(format!(
                    "output '{identifier}' is disabled, cannot set position"
                )));
            }
            Ok(HeadDirective::Enable(HeadSettings {
                position,
                ..current_settings(head)
            }))
        }
    }
}
