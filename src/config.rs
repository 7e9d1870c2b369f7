use std::{
    collections::BTreeSet,
    env, fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    calculation::{CalculationResult, OutputTargetState},
    error::WlOutputError,
    meta_head::MetaHead,
    wl_output::{AdaptiveSync, HorizontalAnchor, VerticalAnchor, WlTransform},
};

pub const CONFIG_ENV: &str = "WLX_OUTPUTS_CONFIG";
const CONFIG_DIR: &str = "wlx-outputs";
const CONFIG_FILE: &str = "display-config.toml";

/// Location of the configuration file: `$WLX_OUTPUTS_CONFIG` if set,
/// otherwise `display-config.toml` in the user's config directory.
pub fn default_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Saved display groups
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    #[serde(rename = "group")]
    pub groups: Vec<DisplayGroup>,
}

/// Settings for one particular set of attached outputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayGroup {
    pub name: String,
    /// Wins when several groups match the attached outputs
    pub preferred: bool,
    pub identifiers: Vec<String>,
    pub primary_output: String,
    #[serde(rename = "output")]
    pub outputs: Vec<OutputSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub identifier: String,
    pub width: i32,
    pub height: i32,
    /// Refresh rate in Hz
    pub refresh: f64,
    pub position: [i32; 2],
    pub scale: f64,
    /// Rotation in degrees: 0, 90, 180 or 270
    pub rotation: i32,
    pub flipped: bool,
    pub adaptive_sync: bool,
    pub disabled: bool,
    /// Empty when the output has no anchor
    pub relative_output: String,
    pub horizontal_anchor: HorizontalAnchor,
    pub vertical_anchor: VerticalAnchor,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            width: 0,
            height: 0,
            refresh: 0.0,
            position: [0, 0],
            scale: 1.0,
            rotation: 0,
            flipped: false,
            adaptive_sync: false,
            disabled: false,
            relative_output: String::new(),
            horizontal_anchor: HorizontalAnchor::None,
            vertical_anchor: VerticalAnchor::None,
        }
    }
}

impl OutputSettings {
    pub fn from_state(state: &OutputTargetState) -> Self {
        Self {
            identifier: state.identifier.clone(),
            width: state.dimensions.width,
            height: state.dimensions.height,
            refresh: state.refresh,
            position: [state.position.x, state.position.y],
            scale: state.scale,
            rotation: state.transform.degrees(),
            flipped: state.transform.is_flipped(),
            adaptive_sync: state.adaptive_sync.is_enabled(),
            disabled: !state.on,
            relative_output: state.relative_output.clone().unwrap_or_default(),
            horizontal_anchor: state.horizontal_anchor,
            vertical_anchor: state.vertical_anchor,
        }
    }

    pub fn transform(&self) -> WlTransform {
        WlTransform::from_degrees(self.rotation, self.flipped)
    }

    pub fn adaptive_sync(&self) -> AdaptiveSync {
        AdaptiveSync::from(self.adaptive_sync)
    }

    pub fn relative_output(&self) -> Option<&str> {
        Some(self.relative_output.as_str()).filter(|r| !r.is_empty())
    }
}

impl DisplayGroup {
    pub fn output(&self, identifier: &str) -> Option<&OutputSettings> {
        self.outputs.iter().find(|o| o.identifier == identifier)
    }

    fn covers(&self, identifiers: &BTreeSet<&str>) -> bool {
        let own: BTreeSet<&str> =
            self.identifiers.iter().map(String::as_str).collect();
        own == *identifiers
    }

    /// Copies the anchors and the primary flag of this group onto the heads
    /// it covers.
    pub fn restore_onto<'a>(
        &self,
        heads: impl IntoIterator<Item = &'a mut MetaHead>,
    ) {
        for head in heads {
            let Some(settings) = self.output(head.identifier()) else {
                continue;
            };
            let relative = settings.relative_output().map(str::to_string);
            let primary = self.primary_output == head.identifier();
            head.set_relative_output(relative);
            head.set_anchors(
                settings.horizontal_anchor,
                settings.vertical_anchor,
            );
            head.set_primary(primary);
        }
    }
}

impl DisplayConfig {
    /// Reads the configuration at `path`. A missing file is an empty
    /// configuration.
    pub fn load(path: &Path) -> Result<Self, WlOutputError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(
                    path = %path.display(),
                    "no saved display configuration"
                );
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(WlOutputError::ConfigurationLoad {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        toml::from_str(&content).map_err(|e| WlOutputError::ConfigurationLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Like [`DisplayConfig::load`], but treats an unreadable file as empty.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => {
                info!(
                    path = %path.display(),
                    groups = config.groups.len(),
                    "loaded display configuration"
                );
                config
            }
            Err(e) => {
                warn!(error = %e, "ignoring display configuration");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), WlOutputError> {
        let save_error = |reason: String| WlOutputError::ConfigurationSave {
            path: path.to_path_buf(),
            reason,
        };

        let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            fs::create_dir_all(parent)
                .map_err(|e| save_error(e.to_string()))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| save_error(e.to_string()))?;
        fs::write(path, content).map_err(|e| save_error(e.to_string()))?;
        debug!(path = %path.display(), "saved display configuration");
        Ok(())
    }

    /// Group saved for exactly this set of identifiers. A preferred group
    /// wins over an earlier match.
    pub fn matching_group<'a, I>(&self, identifiers: I) -> Option<&DisplayGroup>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let index = self.matching_index(&identifiers.into_iter().collect())?;
        self.groups.get(index)
    }

    fn matching_index(&self, identifiers: &BTreeSet<&str>) -> Option<usize> {
        let mut matches = self
            .groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.covers(identifiers));
        let first = matches.next()?;
        let preferred = std::iter::once(first)
            .chain(matches)
            .find(|(_, g)| g.preferred)
            .unwrap_or(first);
        Some(preferred.0)
    }

    /// Stores an applied layout in the group for its set of outputs,
    /// creating the group if there is none.
    pub fn record_calculation(&mut self, result: &CalculationResult) {
        let identifiers: Vec<String> = result
            .output_states()
            .map(|s| s.identifier.clone())
            .collect();
        let set: BTreeSet<&str> =
            identifiers.iter().map(String::as_str).collect();

        let index = match self.matching_index(&set) {
            Some(index) => index,
            None => {
                let name =
                    format!("{} (Auto Generated)", identifiers.join(", "));
                info!(group = %name, "creating display group");
                self.groups.push(DisplayGroup {
                    name,
                    preferred: true,
                    ..DisplayGroup::default()
                });
                self.groups.len() - 1
            }
        };

        let group = &mut self.groups[index];
        group.primary_output =
            result.primary().unwrap_or_default().to_string();
        group.outputs = result
            .output_states()
            .map(OutputSettings::from_state)
            .collect();
        group.identifiers = identifiers;
        debug!(group = %group.name, "recorded display group");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        action::ConfigurationAction,
        calculation::calculate,
        proxy::{HeadChange, ModeChange},
        queue::ActionQueue,
        wl_output::{BindingId, WlResolution},
    };

    const SAMPLE: &str = r#"
[[group]]
name = "Desk"
identifiers = ["A", "B"]
primary_output = "B"

[[group.output]]
identifier = "A"
width = 1920
height = 1080
refresh = 60.0
position = [0, 0]

[[group.output]]
identifier = "B"
width = 2560
height = 1440
refresh = 144.0
position = [1920, 0]
rotation = 90
relative_output = "A"
vertical_anchor = "bottom"

[[group]]
name = "Desk (docked)"
preferred = true
identifiers = ["B", "A"]

[[group]]
name = "Laptop"
identifiers = ["A"]
"#;

    fn head(binding: u32, serial: &str) -> MetaHead {
        let mut head = MetaHead::new(BindingId(binding), Arc::from("machine"));
        let mode = BindingId(binding + 100);
        head.apply(HeadChange::SerialNumber(serial.to_string()));
        head.apply(HeadChange::Enabled(true));
        head.apply(HeadChange::ModeAdded(mode));
        head.apply_mode(mode, ModeChange::Size(WlResolution::new(1920, 1080)));
        head.apply_mode(mode, ModeChange::Refresh(60000));
        head.apply(HeadChange::CurrentMode(mode));
        head
    }

    #[test]
    fn test_parse_with_defaults() {
        let config: DisplayConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.groups.len(), 3);
        let desk = &config.groups[0];
        let a = desk.output("A").unwrap();
        assert_eq!(a.scale, 1.0);
        assert_eq!(a.transform(), WlTransform::Normal);
        assert_eq!(a.relative_output(), None);
        let b = desk.output("B").unwrap();
        assert_eq!(b.transform(), WlTransform::Rotate90);
        assert_eq!(b.relative_output(), Some("A"));
        assert_eq!(b.vertical_anchor, VerticalAnchor::Bottom);
        assert_eq!(b.horizontal_anchor, HorizontalAnchor::None);
    }

    #[test]
    fn test_matching_group_prefers_preferred() {
        let config: DisplayConfig = toml::from_str(SAMPLE).unwrap();
        let group = config.matching_group(["A", "B"]).unwrap();
        assert_eq!(group.name, "Desk (docked)");
        assert_eq!(config.matching_group(["A"]).unwrap().name, "Laptop");
        assert!(config.matching_group(["A", "B", "C"]).is_none());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = DisplayConfig::load(&path).unwrap();
        assert!(config.groups.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("display-config.toml");
        fs::write(&path, "[[group]\nname = ").unwrap();
        let err = DisplayConfig::load(&path).unwrap_err();
        assert!(matches!(err, WlOutputError::ConfigurationLoad { .. }));
        assert!(DisplayConfig::load_or_default(&path).groups.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let config: DisplayConfig = toml::from_str(SAMPLE).unwrap();
        config.save(&path).unwrap();
        assert_eq!(DisplayConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_record_creates_auto_generated_group() {
        let heads = vec![head(1, "A"), head(2, "B")];
        let mut queue = ActionQueue::new();
        queue.add(ConfigurationAction::right_of("B", "A"));
        queue.add(ConfigurationAction::primary("A"));
        let result = calculate(&heads, &queue);

        let mut config = DisplayConfig::default();
        config.record_calculation(&result);
        assert_eq!(config.groups.len(), 1);
        let group = &config.groups[0];
        assert_eq!(group.name, "A, B (Auto Generated)");
        assert!(group.preferred);
        assert_eq!(group.primary_output, "A");
        let b = group.output("B").unwrap();
        assert_eq!(b.position, [1920, 0]);
        assert_eq!(b.relative_output, "A");
        assert_eq!(b.refresh, 60.0);
    }

    #[test]
    fn test_record_updates_matching_group() {
        let mut config: DisplayConfig = toml::from_str(SAMPLE).unwrap();
        let heads = vec![head(1, "A")];
        let mut queue = ActionQueue::new();
        queue.add(ConfigurationAction::scale("A", 2.0));
        config.record_calculation(&calculate(&heads, &queue));

        assert_eq!(config.groups.len(), 3);
        let laptop = config.matching_group(["A"]).unwrap();
        assert_eq!(laptop.name, "Laptop");
        assert_eq!(laptop.output("A").unwrap().scale, 2.0);
    }

    #[test]
    fn test_restore_onto_heads() {
        let config: DisplayConfig = toml::from_str(SAMPLE).unwrap();
        let mut heads = vec![head(1, "A"), head(2, "B")];
        config.groups[0].restore_onto(heads.iter_mut());
        assert!(heads[1].is_primary());
        assert!(!heads[0].is_primary());
        assert_eq!(heads[1].relative_output(), Some("A"));
        assert_eq!(heads[1].vertical_anchor(), VerticalAnchor::Bottom);
        assert_eq!(heads[0].relative_output(), None);
    }
}
