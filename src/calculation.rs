use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::{
    action::ActionChange,
    meta_head::MetaHead,
    queue::ActionQueue,
    wl_output::{
        AdaptiveSync, HorizontalAnchor, VerticalAnchor, WlPosition, WlRect,
        WlResolution, WlTransform,
    },
};

/// Desired state of one output during a calculation pass
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTargetState {
    pub identifier: String,
    pub on: bool,
    /// Requested mode size, zero when the output has no known mode
    pub dimensions: WlResolution,
    /// Requested refresh rate in Hz, zero when unknown
    pub refresh: f64,
    pub horizontal_anchor: HorizontalAnchor,
    pub vertical_anchor: VerticalAnchor,
    pub relative_output: Option<String>,
    pub mirror_of: Option<String>,
    pub position: WlPosition,
    pub scale: f64,
    pub transform: WlTransform,
    pub adaptive_sync: AdaptiveSync,
    pub primary: bool,
    /// `dimensions` after the transform; scale does not change it
    pub resulting_dimensions: WlResolution,
}

impl OutputTargetState {
    /// Seeds a target state from the live state of a head.
    ///
    /// A head without a current mode is sized by the mode it would be turned
    /// on with.
    pub fn from_head(head: &MetaHead) -> Self {
        let mode = head.fallback_mode();
        let mut state = Self {
            identifier: head.identifier().to_string(),
            on: head.is_enabled(),
            dimensions: mode.and_then(|m| m.size()).unwrap_or_default(),
            refresh: mode
                .and_then(|m| m.refresh_mhz())
                .map(|mhz| f64::from(mhz) / 1000.0)
                .unwrap_or_default(),
            horizontal_anchor: head.horizontal_anchor(),
            vertical_anchor: head.vertical_anchor(),
            relative_output: head.relative_output().map(str::to_string),
            mirror_of: None,
            position: head.position(),
            scale: head.scale(),
            transform: head.transform(),
            adaptive_sync: head.adaptive_sync(),
            primary: head.is_primary(),
            resulting_dimensions: WlResolution::default(),
        };
        state.update_resulting_dimensions();
        state
    }

    pub fn apply(&mut self, change: &ActionChange) {
        match change {
            ActionChange::OnOff { on } => self.on = *on,
            ActionChange::Mode {
                width,
                height,
                refresh,
            } => {
                self.dimensions = WlResolution::new(*width, *height);
                self.refresh = *refresh;
            }
            ActionChange::PositionAnchor {
                relative,
                horizontal,
                vertical,
            } => {
                self.relative_output = Some(relative.clone());
                self.horizontal_anchor = *horizontal;
                self.vertical_anchor = *vertical;
            }
            ActionChange::Scale(scale) => self.scale = *scale,
            ActionChange::Transform(transform) => self.transform = *transform,
            ActionChange::AdaptiveSync(state) => self.adaptive_sync = *state,
            ActionChange::Primary => self.primary = true,
            ActionChange::MirrorOf { relative } => {
                self.mirror_of = Some(relative.clone());
            }
        }
    }

    pub fn update_resulting_dimensions(&mut self) {
        self.resulting_dimensions = if self.transform.swaps_axes() {
            self.dimensions.transposed()
        } else {
            self.dimensions
        };
    }

    pub fn rect(&self) -> WlRect {
        WlRect::new(self.position, self.resulting_dimensions)
    }

    // Output whose placement this one follows: its anchor, else its mirror.
    fn dependency(&self) -> Option<&str> {
        self.relative_output
            .as_deref()
            .or(self.mirror_of.as_deref())
    }

    fn right_of(&self) -> Option<&str> {
        if self.horizontal_anchor == HorizontalAnchor::None
            && self.vertical_anchor == VerticalAnchor::None
        {
            self.relative_output.as_deref()
        } else {
            None
        }
    }
}

/// Why an output could not be placed relative to its anchor or mirror target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// The referenced output is not attached
    UnknownTarget,
    /// The referenced output is turned off
    DisabledTarget,
    /// The anchors form a loop
    Cycle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedAnchor {
    pub output: String,
    pub relative: String,
    pub reason: UnresolvedReason,
}

/// Outcome of one layout calculation. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationResult {
    outputs: BTreeMap<String, OutputTargetState>,
    global_space: WlRect,
    unresolved: Vec<UnresolvedAnchor>,
}

impl CalculationResult {
    pub fn output_states(&self) -> impl Iterator<Item = &OutputTargetState> {
        self.outputs.values()
    }

    pub fn output_state(&self, identifier: &str) -> Option<&OutputTargetState> {
        self.outputs.get(identifier)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.outputs.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Union of every enabled output's rectangle, empty if none is enabled.
    pub fn global_space(&self) -> WlRect {
        self.global_space
    }

    /// Outputs that were placed by fallback because their anchor or mirror
    /// target could never be positioned.
    pub fn unresolved(&self) -> &[UnresolvedAnchor] {
        &self.unresolved
    }

    pub fn primary(&self) -> Option<&str> {
        self.outputs
            .values()
            .find(|s| s.primary)
            .map(|s| s.identifier.as_str())
    }

    #[cfg(test)]
    pub(crate) fn without(mut self, identifier: &str) -> Self {
        self.outputs.remove(identifier);
        self
    }
}

/// Computes the target layout for the available heads with the queued
/// actions applied. Pure: performs no I/O.
pub fn calculate<'a>(
    heads: impl IntoIterator<Item = &'a MetaHead>,
    queue: &ActionQueue,
) -> CalculationResult {
    let mut order = Vec::new();
    let mut states = HashMap::new();
    for head in heads.into_iter().filter(|h| h.is_available()) {
        let state = OutputTargetState::from_head(head);
        order.push(state.identifier.clone());
        states.insert(state.identifier.clone(), state);
    }

    let mut primary = None;
    let mut anchored = HashSet::new();
    for action in queue.actions() {
        let Some(state) = states.get_mut(action.output()) else {
            debug!(
                output = %action.output(),
                kind = ?action.kind(),
                "action for unknown output ignored"
            );
            continue;
        };
        state.apply(action.change());
        match action.change() {
            ActionChange::Primary => {
                primary = Some(action.output().to_string());
            }
            ActionChange::PositionAnchor { .. } => {
                anchored.insert(action.output());
            }
            _ => {}
        }
    }
    // A queued mirror replaces an anchor that only came from the saved group
    for state in states.values_mut() {
        if state.mirror_of.is_some()
            && !anchored.contains(state.identifier.as_str())
        {
            state.relative_output = None;
            state.horizontal_anchor = HorizontalAnchor::None;
            state.vertical_anchor = VerticalAnchor::None;
        }
    }
    if let Some(primary) = primary {
        for state in states.values_mut() {
            state.primary = state.identifier == primary;
        }
    }

    for state in states.values_mut() {
        state.update_resulting_dimensions();
    }

    let unresolved = Layout::new(&order, &mut states).run();
    for issue in &unresolved {
        warn!(
            output = %issue.output,
            relative = %issue.relative,
            reason = ?issue.reason,
            "anchor could not be resolved, placing output with fallback"
        );
    }

    let global_space = order
        .iter()
        .filter_map(|id| states.get(id))
        .filter(|s| s.on)
        .fold(WlRect::default(), |space, s| space.united(&s.rect()));

    CalculationResult {
        outputs: states.into_iter().collect(),
        global_space,
        unresolved,
    }
}

/// Places the anchored output `target` against its positioned `relative`.
pub fn anchored_position(
    target: &OutputTargetState,
    relative: &OutputTargetState,
) -> WlPosition {
    let origin = relative.position;
    let outer = relative.resulting_dimensions;
    let inner = target.resulting_dimensions;

    let x = match target.horizontal_anchor {
        HorizontalAnchor::Left => origin.x,
        HorizontalAnchor::Right => origin.x + outer.width - inner.width,
        HorizontalAnchor::Center => origin.x + (outer.width - inner.width) / 2,
        HorizontalAnchor::None => {
            let mirrors = target.mirror_of.as_deref()
                == Some(relative.identifier.as_str());
            if mirrors {
                origin.x
            } else {
                origin.x + outer.width
            }
        }
    };

    let y = match target.vertical_anchor {
        VerticalAnchor::Above => origin.y - inner.height,
        VerticalAnchor::Top | VerticalAnchor::None => origin.y,
        VerticalAnchor::Middle => origin.y + (outer.height - inner.height) / 2,
        VerticalAnchor::Bottom => origin.y + outer.height - inner.height,
        VerticalAnchor::Below => origin.y + outer.height,
    };

    WlPosition { x, y }
}

struct Layout<'a> {
    order: &'a [String],
    states: &'a mut HashMap<String, OutputTargetState>,
    positioned: HashSet<String>,
    // target -> outputs waiting for it, in collection order
    dependents: HashMap<String, Vec<String>>,
}

impl<'a> Layout<'a> {
    fn new(
        order: &'a [String],
        states: &'a mut HashMap<String, OutputTargetState>,
    ) -> Self {
        Self {
            order,
            states,
            positioned: HashSet::new(),
            dependents: HashMap::new(),
        }
    }

    fn enabled(&self) -> impl Iterator<Item = &'a String> + '_ {
        self.order
            .iter()
            .filter(|id| self.states.get(*id).is_some_and(|s| s.on))
    }

    fn run(mut self) -> Vec<UnresolvedAnchor> {
        let mut roots: Vec<String> = self
            .enabled()
            .filter(|id| self.states[*id].dependency().is_none())
            .cloned()
            .collect();
        // Stable: equal x keeps collection order
        roots.sort_by_key(|id| self.states[id].position.x);

        let chain = self.horizontal_chain(&roots);
        let mut sequence = chain.clone();
        sequence.extend(roots.into_iter().filter(|id| !chain.contains(id)));

        let mut cursor = 0;
        for id in &sequence {
            cursor = self.place_at(id, cursor);
        }

        let waiting: Vec<(String, String)> = self
            .enabled()
            .filter(|id| !self.positioned.contains(*id))
            .filter_map(|id| {
                let target = self.states[id].dependency()?;
                Some((target.to_string(), id.clone()))
            })
            .collect();
        for (target, id) in waiting {
            self.dependents.entry(target).or_default().push(id);
        }

        self.resolve_from(sequence);

        let mut unresolved = Vec::new();
        loop {
            let next = self
                .enabled()
                .find(|id| !self.positioned.contains(*id))
                .cloned();
            let Some(id) = next else {
                break;
            };
            unresolved.push(self.diagnose(&id));
            let cursor = self
                .positioned
                .iter()
                .filter_map(|p| self.states.get(p))
                .map(|s| s.rect().right())
                .max()
                .unwrap_or(0);
            self.place_at(&id, cursor);
            self.resolve_from(vec![id]);
        }
        unresolved
    }

    // Outputs joined by "right of" anchors, starting at an unanchored output.
    fn horizontal_chain(&self, roots: &[String]) -> Vec<String> {
        let mut successors: HashMap<&str, &str> = HashMap::new();
        for id in self.enabled() {
            if let Some(target) = self.states[id].right_of() {
                successors.entry(target).or_insert(id.as_str());
            }
        }

        let Some(head) = roots
            .iter()
            .find(|id| successors.contains_key(id.as_str()))
            .or_else(|| roots.first())
        else {
            return Vec::new();
        };

        let mut chain = vec![head.clone()];
        let mut current = head.as_str();
        while let Some(&next) = successors.get(current) {
            if chain.iter().any(|id| id == next) {
                break;
            }
            chain.push(next.to_string());
            current = next;
        }
        chain
    }

    // Positions `id` at (cursor, 0) and returns the cursor after it.
    fn place_at(&mut self, id: &str, cursor: i32) -> i32 {
        let Some(state) = self.states.get_mut(id) else {
            return cursor;
        };
        state.position = WlPosition { x: cursor, y: 0 };
        self.positioned.insert(id.to_string());
        cursor + state.resulting_dimensions.width
    }

    // Breadth-first over the dependency graph: an output is placed as soon
    // as the output it depends on has a position.
    fn resolve_from(&mut self, placed: Vec<String>) {
        let mut ready: VecDeque<String> = placed.into();
        while let Some(target) = ready.pop_front() {
            let Some(waiting) = self.dependents.remove(&target) else {
                continue;
            };
            for id in waiting {
                if self.positioned.contains(&id) {
                    continue;
                }
                let position = if self.states[&id].relative_output.is_some() {
                    anchored_position(&self.states[&id], &self.states[&target])
                } else {
                    self.states[&target].position
                };
                if let Some(state) = self.states.get_mut(&id) {
                    state.position = position;
                }
                self.positioned.insert(id.clone());
                ready.push_back(id);
            }
        }
    }

    fn diagnose(&self, id: &str) -> UnresolvedAnchor {
        let relative =
            self.states[id].dependency().unwrap_or_default().to_string();
        let mut seen = HashSet::from([id]);
        let mut current = relative.as_str();
        let reason = loop {
            let Some(state) = self.states.get(current) else {
                break UnresolvedReason::UnknownTarget;
            };
            if !state.on {
                break UnresolvedReason::DisabledTarget;
            }
            if !seen.insert(current) {
                break UnresolvedReason::Cycle;
            }
            match state.dependency() {
                Some(next) => current = next,
                // Unreachable in practice: roots are always positioned
                None => break UnresolvedReason::Cycle,
            }
        };
        UnresolvedAnchor {
            output: id.to_string(),
            relative,
            reason,
        }
    }
}
