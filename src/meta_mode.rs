use tracing::debug;

use crate::{
    proxy::ModeChange,
    wl_output::{BindingId, ModeId, WlOutputMode, WlResolution},
};

/// Aggregated state of one display mode.
///
/// A record outlives the protocol objects it was built from: when the
/// compositor advertises the same size and refresh again, the existing record
/// takes over the new object so that its [`ModeId`] stays valid.
#[derive(Debug, Clone)]
pub struct MetaMode {
    id: ModeId,
    bindings: Vec<BindingId>,
    size: Option<WlResolution>,
    refresh_mhz: Option<i32>,
    preferred: bool,
    settled: bool,
}

impl MetaMode {
    pub fn new(id: ModeId, binding: BindingId) -> Self {
        Self {
            id,
            bindings: vec![binding],
            size: None,
            refresh_mhz: None,
            preferred: false,
            settled: false,
        }
    }

    pub fn id(&self) -> ModeId {
        self.id
    }

    pub(crate) fn renumbered(mut self, id: ModeId) -> Self {
        self.id = id;
        self
    }

    /// Most recently attached protocol object, if any is still alive.
    pub fn binding(&self) -> Option<BindingId> {
        self.bindings.last().copied()
    }

    pub fn is_bound_to(&self, binding: BindingId) -> bool {
        self.bindings.contains(&binding)
    }

    pub fn size(&self) -> Option<WlResolution> {
        self.size
    }

    pub fn refresh_mhz(&self) -> Option<i32> {
        self.refresh_mhz
    }

    pub fn is_preferred(&self) -> bool {
        self.preferred
    }

    /// Size and refresh are both known.
    pub fn is_complete(&self) -> bool {
        self.size.is_some() && self.refresh_mhz.is_some()
    }

    /// Complete and backed by at least one live protocol object.
    pub fn is_available(&self) -> bool {
        self.is_complete() && !self.bindings.is_empty()
    }

    /// Two modes are the same when size and refresh match exactly.
    pub fn is_same_as(&self, other: &MetaMode) -> bool {
        let own = self.size.zip(self.refresh_mhz);
        own.is_some() && own == other.size.zip(other.refresh_mhz)
    }

    pub fn matches(&self, width: i32, height: i32, refresh_mhz: i32) -> bool {
        self.size == Some(WlResolution { width, height })
            && self.refresh_mhz == Some(refresh_mhz)
    }

    /// Applies one property change. Returns `true` the first time the mode
    /// becomes complete, which is when the owning head should settle it.
    pub fn apply(&mut self, binding: BindingId, change: ModeChange) -> bool {
        match change {
            ModeChange::Size(size) => self.size = Some(size),
            ModeChange::Refresh(refresh) => self.refresh_mhz = Some(refresh),
            ModeChange::Preferred => self.preferred = true,
            ModeChange::Finished => {
                self.detach(binding);
                return false;
            }
        }

        if !self.settled && self.is_complete() {
            self.settled = true;
            return true;
        }
        false
    }

    /// Takes over the protocol objects of a duplicate record.
    pub fn absorb(&mut self, duplicate: MetaMode) {
        debug!(
            mode = self.id.0,
            bindings = ?duplicate.bindings,
            "absorbing duplicate mode"
        );
        for binding in duplicate.bindings {
            if !self.bindings.contains(&binding) {
                self.bindings.push(binding);
            }
        }
        self.preferred |= duplicate.preferred;
    }

    pub fn detach(&mut self, binding: BindingId) {
        self.bindings.retain(|b| *b != binding);
        if self.bindings.is_empty() {
            debug!(mode = self.id.0, "mode no longer available");
        }
    }

    pub fn detach_all(&mut self) {
        self.bindings.clear();
    }

    pub fn snapshot(&self, is_current: bool) -> WlOutputMode {
        WlOutputMode {
            id: self.id,
            resolution: self.size.unwrap_or_default(),
            refresh_mhz: self.refresh_mhz.unwrap_or_default(),
            preferred: self.preferred,
            is_current,
            available: self.is_available(),
        }
    }
}
