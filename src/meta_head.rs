use std::{cell::OnceCell, fs, sync::Arc};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::{
    meta_mode::MetaMode,
    proxy::{HeadChange, ModeChange},
    wl_output::{
        AdaptiveSync, BindingId, HorizontalAnchor, ModeId, VerticalAnchor,
        WlOutput, WlPosition, WlTransform,
    },
};

const MACHINE_ID_PATHS: [&str; 2] =
    ["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Reads the host machine id used to seed derived identifiers.
///
/// Returns an empty string when no machine id is available.
pub fn machine_id() -> String {
    MACHINE_ID_PATHS
        .iter()
        .find_map(|path| fs::read_to_string(path).ok())
        .map(|id| id.trim().to_string())
        .unwrap_or_default()
}

/// Derives a stable identifier for a head without a hardware serial.
pub fn derive_identifier(
    machine_id: &str,
    name: &str,
    make: &str,
    model: &str,
) -> String {
    let source = if !make.is_empty() && !model.is_empty() {
        format!("{make} {model} ({name})")
    } else {
        format!("{machine_id}_{name}")
    };
    let identifier = hex::encode(Sha256::digest(source.as_bytes()));
    debug!(%source, %identifier, "derived output identifier");
    identifier
}

/// Aggregated state of one output.
///
/// The compositor reports every property as a separate event; this record
/// folds them into one consistent view. It keeps existing when the head
/// object is finished so that a reconnecting output can be re-attached under
/// the same identifier.
#[derive(Debug)]
pub struct MetaHead {
    binding: Option<BindingId>,
    machine_id: Arc<str>,
    name: String,
    description: String,
    make: String,
    model: String,
    serial_number: String,
    identifier: OnceCell<String>,
    enabled: bool,
    position: WlPosition,
    scale: f64,
    transform: WlTransform,
    adaptive_sync: AdaptiveSync,
    modes: Vec<MetaMode>,
    // Modes whose size or refresh is still unknown
    pending_modes: Vec<MetaMode>,
    next_mode_id: u32,
    current_mode: Option<ModeId>,
    pending_current: Option<BindingId>,
    available: bool,
    // Set until the manager's `done` closes the batch that announced it
    advertising: bool,

    // Not part of the protocol, restored from the saved configuration
    relative_output: Option<String>,
    horizontal_anchor: HorizontalAnchor,
    vertical_anchor: VerticalAnchor,
    primary: bool,
}

impl MetaHead {
    pub fn new(binding: BindingId, machine_id: Arc<str>) -> Self {
        Self {
            binding: Some(binding),
            machine_id,
            name: String::new(),
            description: String::new(),
            make: String::new(),
            model: String::new(),
            serial_number: String::new(),
            identifier: OnceCell::new(),
            enabled: false,
            position: WlPosition::default(),
            scale: 1.0,
            transform: WlTransform::Normal,
            adaptive_sync: AdaptiveSync::Disabled,
            modes: Vec::new(),
            pending_modes: Vec::new(),
            next_mode_id: 0,
            current_mode: None,
            pending_current: None,
            available: true,
            advertising: false,
            relative_output: None,
            horizontal_anchor: HorizontalAnchor::None,
            vertical_anchor: VerticalAnchor::None,
            primary: false,
        }
    }

    /// Record for a head the compositor is still describing. It stays out of
    /// every live view until [`MetaHead::complete_advertisement`].
    pub fn advertised(binding: BindingId, machine_id: Arc<str>) -> Self {
        Self {
            advertising: true,
            ..Self::new(binding, machine_id)
        }
    }

    pub fn complete_advertisement(&mut self) {
        self.advertising = false;
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    /// Hardware serial if reported, otherwise a derived hash that is
    /// computed once and never changes afterwards.
    pub fn identifier(&self) -> &str {
        if !self.serial_number.is_empty() {
            return &self.serial_number;
        }
        self.identifier.get_or_init(|| {
            derive_identifier(
                &self.machine_id,
                &self.name,
                &self.make,
                &self.model,
            )
        })
    }

    pub fn binding(&self) -> Option<BindingId> {
        self.binding
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn make(&self) -> &str {
        &self.make
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Attached and fully advertised.
    pub fn is_available(&self) -> bool {
        self.available && !self.advertising
    }

    pub fn position(&self) -> WlPosition {
        self.position
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn transform(&self) -> WlTransform {
        self.transform
    }

    pub fn adaptive_sync(&self) -> AdaptiveSync {
        self.adaptive_sync
    }

    pub fn relative_output(&self) -> Option<&str> {
        self.relative_output.as_deref()
    }

    pub fn horizontal_anchor(&self) -> HorizontalAnchor {
        self.horizontal_anchor
    }

    pub fn vertical_anchor(&self) -> VerticalAnchor {
        self.vertical_anchor
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn modes(&self) -> &[MetaMode] {
        &self.modes
    }

    pub fn current_mode(&self) -> Option<&MetaMode> {
        let id = self.current_mode?;
        self.modes.iter().find(|m| m.id() == id)
    }

    pub fn preferred_mode(&self) -> Option<&MetaMode> {
        self.modes
            .iter()
            .find(|m| m.is_available() && m.is_preferred())
    }

    /// Mode to turn the head on with: the current one, else the preferred
    /// one, else the first available.
    pub fn fallback_mode(&self) -> Option<&MetaMode> {
        self.current_mode()
            .filter(|m| m.is_available())
            .or_else(|| self.preferred_mode())
            .or_else(|| self.modes.iter().find(|m| m.is_available()))
    }

    /// Available mode with exactly this size and refresh.
    pub fn mode_for(
        &self,
        width: i32,
        height: i32,
        refresh_mhz: i32,
    ) -> Option<&MetaMode> {
        self.modes
            .iter()
            .find(|m| m.is_available() && m.matches(width, height, refresh_mhz))
    }

    pub fn set_relative_output(&mut self, relative: Option<String>) {
        self.relative_output = relative.filter(|r| !r.is_empty());
    }

    pub fn set_anchors(
        &mut self,
        horizontal: HorizontalAnchor,
        vertical: VerticalAnchor,
    ) {
        self.horizontal_anchor = horizontal;
        self.vertical_anchor = vertical;
    }

    pub fn set_primary(&mut self, primary: bool) {
        self.primary = primary;
    }

    /// Applies one head property change. Returns whether anything visible
    /// changed.
    pub fn apply(&mut self, change: HeadChange) -> bool {
        match change {
            HeadChange::Name(name) => replace(&mut self.name, name),
            HeadChange::Description(description) => {
                replace(&mut self.description, description)
            }
            HeadChange::Make(make) => replace(&mut self.make, make),
            HeadChange::Model(model) => replace(&mut self.model, model),
            HeadChange::SerialNumber(serial) => {
                replace(&mut self.serial_number, serial)
            }
            HeadChange::Enabled(enabled) => {
                if self.enabled != enabled {
                    info!(
                        output = %self.name,
                        enabled,
                        "output enabled state changed"
                    );
                }
                replace(&mut self.enabled, enabled)
            }
            HeadChange::ModeAdded(binding) => {
                self.add_mode(binding);
                false
            }
            HeadChange::CurrentMode(binding) => self.set_current_mode(binding),
            HeadChange::Position(position) => {
                replace(&mut self.position, position)
            }
            HeadChange::Scale(scale) => replace(&mut self.scale, scale),
            HeadChange::Transform(transform) => {
                replace(&mut self.transform, transform)
            }
            HeadChange::AdaptiveSync(state) => {
                replace(&mut self.adaptive_sync, state)
            }
            HeadChange::Finished => {
                self.disconnect();
                true
            }
        }
    }

    /// Applies a property change of one of this head's mode objects.
    /// Returns whether the visible mode set changed.
    pub fn apply_mode(
        &mut self,
        binding: BindingId,
        change: ModeChange,
    ) -> bool {
        if let Some(index) = self
            .pending_modes
            .iter()
            .position(|m| m.is_bound_to(binding))
        {
            let settled = self.pending_modes[index].apply(binding, change);
            if settled {
                let mode = self.pending_modes.remove(index);
                let id = self.settle(mode);
                if self.pending_current == Some(binding) {
                    self.pending_current = None;
                    self.current_mode = Some(id);
                }
                return true;
            }
            if self.pending_modes[index].binding().is_none() {
                self.pending_modes.remove(index);
                if self.pending_current == Some(binding) {
                    self.pending_current = None;
                }
            }
            return false;
        }

        match self.modes.iter_mut().find(|m| m.is_bound_to(binding)) {
            Some(mode) => {
                mode.apply(binding, change);
                true
            }
            None => false,
        }
    }

    fn allocate_mode_id(&mut self) -> ModeId {
        let id = ModeId(self.next_mode_id);
        self.next_mode_id += 1;
        id
    }

    fn knows_binding(&self, binding: BindingId) -> bool {
        self.pending_modes
            .iter()
            .chain(self.modes.iter())
            .any(|m| m.is_bound_to(binding))
    }

    fn add_mode(&mut self, binding: BindingId) {
        if self.knows_binding(binding) {
            return;
        }
        let id = self.allocate_mode_id();
        self.pending_modes.push(MetaMode::new(id, binding));
    }

    // Deduplicates a freshly completed mode against the known set.
    fn settle(&mut self, mode: MetaMode) -> ModeId {
        if let Some(existing) =
            self.modes.iter_mut().find(|m| m.is_same_as(&mode))
        {
            existing.absorb(mode);
            return existing.id();
        }
        debug!(
            output = %self.name,
            size = ?mode.size(),
            refresh_mhz = ?mode.refresh_mhz(),
            "adding output mode"
        );
        let id = mode.id();
        self.modes.push(mode);
        id
    }

    fn set_current_mode(&mut self, binding: BindingId) -> bool {
        if let Some(mode) = self.modes.iter().find(|m| m.is_bound_to(binding)) {
            let id = mode.id();
            self.pending_current = None;
            return replace(&mut self.current_mode, Some(id));
        }

        // The mode is not complete yet (or was never announced): remember
        // the binding and adopt it once the mode settles.
        if !self.knows_binding(binding) {
            self.add_mode(binding);
        }
        self.pending_current = Some(binding);
        false
    }

    fn disconnect(&mut self) {
        info!(
            output = %self.name,
            identifier = %self.identifier(),
            "output head disconnected"
        );
        self.binding = None;
        self.available = false;
        self.pending_modes.clear();
        self.pending_current = None;
        for mode in &mut self.modes {
            mode.detach_all();
        }
    }

    /// Moves the live state of a newly advertised head for the same output
    /// into this record. Mode handles, anchor metadata and the primary flag
    /// of this record are kept.
    pub fn reattach(&mut self, newer: MetaHead) {
        info!(
            output = %newer.name,
            identifier = %self.identifier(),
            "output head re-attached"
        );
        let current = newer
            .current_mode()
            .and_then(|m| Some((m.size()?, m.refresh_mhz()?)));

        self.binding = newer.binding;
        self.available = newer.available;
        self.advertising = newer.advertising;
        self.name = newer.name;
        self.description = newer.description;
        self.make = newer.make;
        self.model = newer.model;
        self.serial_number = newer.serial_number;
        self.enabled = newer.enabled;
        self.position = newer.position;
        self.scale = newer.scale;
        self.transform = newer.transform;
        self.adaptive_sync = newer.adaptive_sync;

        for mode in newer.modes {
            match self.modes.iter_mut().find(|m| m.is_same_as(&mode)) {
                Some(existing) => existing.absorb(mode),
                None => {
                    let id = self.allocate_mode_id();
                    self.modes.push(mode.renumbered(id));
                }
            }
        }
        for mode in newer.pending_modes {
            let id = self.allocate_mode_id();
            self.pending_modes.push(mode.renumbered(id));
        }
        self.pending_current = newer.pending_current;
        self.current_mode = current.and_then(|(size, refresh)| {
            self.modes
                .iter()
                .find(|m| m.matches(size.width, size.height, refresh))
                .map(|m| m.id())
        });
    }

    pub fn snapshot(&self) -> WlOutput {
        WlOutput {
            identifier: self.identifier().to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            make: self.make.clone(),
            model: self.model.clone(),
            serial_number: self.serial_number.clone(),
            enabled: self.enabled,
            available: self.available,
            position: self.position,
            scale: self.scale,
            transform: self.transform,
            adaptive_sync: self.adaptive_sync,
            current_mode: self.current_mode().map(|m| m.snapshot(true)),
            modes: self
                .modes
                .iter()
                .map(|m| m.snapshot(Some(m.id()) == self.current_mode))
                .collect(),
            relative_output: self.relative_output.clone(),
            horizontal_anchor: self.horizontal_anchor,
            vertical_anchor: self.vertical_anchor,
            primary: self.primary,
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wl_output::WlResolution;

    fn head(binding: u32) -> MetaHead {
        MetaHead::new(BindingId(binding), Arc::from("machine"))
    }

    fn announce_mode(
        head: &mut MetaHead,
        binding: u32,
        width: i32,
        height: i32,
        mhz: i32,
    ) {
        let binding = BindingId(binding);
        let size = WlResolution::new(width, height);
        head.apply(HeadChange::ModeAdded(binding));
        head.apply_mode(binding, ModeChange::Size(size));
        head.apply_mode(binding, ModeChange::Refresh(mhz));
    }

    #[test]
    fn test_identifier_prefers_serial() {
        let mut head = head(1);
        head.apply(HeadChange::Name("DP-1".into()));
        let derived = head.identifier().to_string();
        assert_eq!(derived, head.identifier());
        assert_eq!(derived.len(), 64);

        head.apply(HeadChange::SerialNumber("SN-42".into()));
        assert_eq!(head.identifier(), "SN-42");
    }

    #[test]
    fn test_identifier_uses_make_and_model() {
        let mut a = head(1);
        a.apply(HeadChange::Name("DP-1".into()));
        a.apply(HeadChange::Make("Dell".into()));
        a.apply(HeadChange::Model("U2720Q".into()));
        assert_eq!(
            a.identifier(),
            derive_identifier("other-machine", "DP-1", "Dell", "U2720Q")
        );

        let mut b = head(2);
        b.apply(HeadChange::Name("DP-1".into()));
        assert_eq!(
            b.identifier(),
            derive_identifier("machine", "DP-1", "", "")
        );
        assert_ne!(a.identifier(), b.identifier());
    }

    #[test]
    fn test_identifier_is_cached_once_derived() {
        let mut head = head(1);
        head.apply(HeadChange::Name("HDMI-A-1".into()));
        let first = head.identifier().to_string();
        head.apply(HeadChange::Name("HDMI-A-2".into()));
        assert_eq!(head.identifier(), first);
    }

    #[test]
    fn test_advertised_head_is_available_after_completion() {
        let mut head = MetaHead::advertised(BindingId(1), Arc::from("machine"));
        head.apply(HeadChange::Name("DP-1".into()));
        assert!(head.is_advertising());
        assert!(!head.is_available());

        head.apply(HeadChange::Make("Dell".into()));
        head.apply(HeadChange::Model("U2720Q".into()));
        head.complete_advertisement();
        assert!(head.is_available());
        assert_eq!(
            head.identifier(),
            derive_identifier("machine", "DP-1", "Dell", "U2720Q")
        );
    }

    #[test]
    fn test_fallback_mode_prefers_current_then_preferred() {
        let mut head = head(1);
        assert!(head.fallback_mode().is_none());
        announce_mode(&mut head, 10, 1280, 720, 60000);
        announce_mode(&mut head, 11, 1920, 1080, 60000);
        assert!(head.fallback_mode().unwrap().matches(1280, 720, 60000));

        head.apply_mode(BindingId(11), ModeChange::Preferred);
        assert!(head.fallback_mode().unwrap().matches(1920, 1080, 60000));

        head.apply(HeadChange::CurrentMode(BindingId(10)));
        assert!(head.fallback_mode().unwrap().matches(1280, 720, 60000));
    }

    #[test]
    fn test_duplicate_mode_is_absorbed() {
        let mut head = head(1);
        announce_mode(&mut head, 10, 1920, 1080, 60000);
        announce_mode(&mut head, 11, 1920, 1080, 60000);
        announce_mode(&mut head, 12, 1280, 720, 60000);
        assert_eq!(head.modes().len(), 2);
        let mode = head.mode_for(1920, 1080, 60000).unwrap();
        assert!(mode.is_bound_to(BindingId(10)));
        assert!(mode.is_bound_to(BindingId(11)));
        assert_eq!(mode.binding(), Some(BindingId(11)));
    }

    #[test]
    fn test_current_mode_after_mode_is_known() {
        let mut head = head(1);
        announce_mode(&mut head, 10, 1920, 1080, 60000);
        assert!(head.apply(HeadChange::CurrentMode(BindingId(10))));
        let current = head.current_mode().unwrap();
        assert_eq!(current.size(), Some(WlResolution::new(1920, 1080)));
    }

    #[test]
    fn test_current_mode_before_mode_is_complete() {
        let mut head = head(1);
        let binding = BindingId(10);
        head.apply(HeadChange::CurrentMode(binding));
        assert!(head.current_mode().is_none());
        let size = WlResolution::new(3840, 2160);
        head.apply_mode(binding, ModeChange::Size(size));
        assert!(head.current_mode().is_none());
        head.apply_mode(binding, ModeChange::Refresh(30000));
        let current = head.current_mode().unwrap();
        assert!(current.matches(3840, 2160, 30000));
        assert_eq!(head.modes().len(), 1);
    }

    #[test]
    fn test_current_mode_on_duplicate_resolves_to_existing() {
        let mut head = head(1);
        announce_mode(&mut head, 10, 1920, 1080, 60000);
        head.apply(HeadChange::ModeAdded(BindingId(11)));
        head.apply(HeadChange::CurrentMode(BindingId(11)));
        let size = WlResolution::new(1920, 1080);
        head.apply_mode(BindingId(11), ModeChange::Size(size));
        head.apply_mode(BindingId(11), ModeChange::Refresh(60000));
        assert_eq!(head.modes().len(), 1);
        assert_eq!(
            head.current_mode().map(|m| m.id()),
            Some(head.modes()[0].id())
        );
    }

    #[test]
    fn test_finished_keeps_record() {
        let mut head = head(1);
        head.apply(HeadChange::Name("DP-2".into()));
        announce_mode(&mut head, 10, 1920, 1080, 60000);
        let identifier = head.identifier().to_string();
        assert!(head.apply(HeadChange::Finished));
        assert!(!head.is_available());
        assert_eq!(head.binding(), None);
        assert_eq!(head.identifier(), identifier);
        assert_eq!(head.modes().len(), 1);
        assert!(head.mode_for(1920, 1080, 60000).is_none());
    }

    #[test]
    fn test_reattach_keeps_mode_handles_and_metadata() {
        let mut old = head(1);
        old.apply(HeadChange::Name("DP-1".into()));
        announce_mode(&mut old, 10, 1920, 1080, 60000);
        announce_mode(&mut old, 11, 1280, 720, 60000);
        old.set_primary(true);
        old.set_relative_output(Some("other".into()));
        let kept = old.mode_for(1280, 720, 60000).unwrap().id();
        old.apply(HeadChange::Finished);

        let mut newer = head(2);
        newer.apply(HeadChange::Name("DP-1".into()));
        newer.apply(HeadChange::Enabled(true));
        announce_mode(&mut newer, 20, 1280, 720, 60000);
        announce_mode(&mut newer, 21, 2560, 1440, 60000);
        newer.apply(HeadChange::CurrentMode(BindingId(20)));

        old.reattach(newer);
        assert!(old.is_available());
        assert!(old.is_enabled());
        assert_eq!(old.binding(), Some(BindingId(2)));
        assert!(old.is_primary());
        assert_eq!(old.relative_output(), Some("other"));
        assert_eq!(old.modes().len(), 3);
        assert_eq!(old.current_mode().map(|m| m.id()), Some(kept));
        assert!(old.mode_for(1920, 1080, 60000).is_none());
        assert!(old.mode_for(2560, 1440, 60000).is_some());
    }

    #[test]
    fn test_snapshot_marks_current_mode() {
        let mut head = head(1);
        announce_mode(&mut head, 10, 1920, 1080, 60000);
        announce_mode(&mut head, 11, 1280, 720, 60000);
        head.apply(HeadChange::CurrentMode(BindingId(11)));
        let snapshot = head.snapshot();
        assert_eq!(snapshot.modes.iter().filter(|m| m.is_current).count(), 1);
        assert_eq!(
            snapshot.current_mode.map(|m| m.resolution),
            Some(WlResolution::new(1280, 720))
        );
    }
}
