//! Application and overlay settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::feed::PollPolicy;
use crate::window::WindowLevel;

#[cfg(feature = "desktop")]
use tauri::AppHandle;
#[cfg(feature = "desktop")]
use tauri_plugin_store::StoreExt;

pub const SETTINGS_STORE_PATH: &str = "settings_store.json";

pub const API_BASE_URL_ENV: &str = "COMPASS_API_BASE_URL";

/// A background/border color pair
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ColorPair {
    pub color: String,
    pub border: String,
}

const fn pair(color: &'static str, border: &'static str) -> (&'static str, &'static str) {
    (color, border)
}

pub const DEFAULT_PROGRESS_BAR_COLOR: (&str, &str) = pair("#ffffff", "#333333");

/// Progress bar palette, indexed by `AppSettings::progress_bar_color_index`
pub const PROGRESS_BAR_COLORS: [(&str, &str); 37] = [
    pair("#ffffff", "#333333"),
    pair("#e5e5e5", "#999999"),
    pair("#FFF9C4", "#ccca9d"),
    pair("#FFCCBC", "#cca295"),
    pair("#C8E6C9", "#a1b8a2"),
    pair("#BBDEFB", "#95b1cb"),
    pair("#F8BBD0", "#c995a6"),
    pair("#E1BEE7", "#b598ba"),
    pair("#0066ff", "#004499"),
    pair("#00ff66", "#00cc52"),
    pair("#ffb6c1", "#cc9199"),
    pair("#9892ff", "#7b75cc"),
    pair("#00ffff", "#00cccc"),
    pair("#ccff00", "#a6cc00"),
    pair("#ff00ff", "#cc00cc"),
    pair("#ffff00", "#cccc00"),
    pair("#4169e1", "#2854b4"),
    pair("#228b22", "#1b6b1b"),
    pair("#87ceeb", "#6ba6cd"),
    pair("#98fb98", "#7bc97b"),
    pair("#dda0dd", "#b87db8"),
    pair("#F3B1D1", "#cc5d97"),
    pair("#BDBDBD", "#a1a1a1"),
    pair("#6FCF97", "#5baa52"),
    pair("#B298F5", "#8b6dc9"),
    pair("#9AD1E3", "#3aa6b0"),
    pair("#c0c0c0", "#999999"),
    pair("#ffd700", "#ccac00"),
    pair("#ffa500", "#cc8400"),
    pair("#40e0d0", "#33b3a6"),
    pair("#8a2be2", "#6b22b5"),
    pair("#00ff7f", "#00cc66"),
    pair("#00bfff", "#0099cc"),
    pair("#ba55d3", "#9444a6"),
    pair("#7fffd4", "#66cca7"),
    pair("#8a2be2", "#6b22b5"),
    pair("#7fff00", "#66cc00"),
];

/// Widget badge palette, indexed by a deadline's `colorIndex`
pub const WIDGET_COLORS: [(&str, &str); 10] = [
    pair("#F3B1D1", "#cc5d97"), // Pink
    pair("#BDBDBD", "#a1a1a1"), // Gray
    pair("#6FCF97", "#5baa52"), // Green
    pair("#B298F5", "#8b6dc9"), // Purple
    pair("#9AD1E3", "#3aa6b0"), // Blue
    pair("#FFD54F", "#FFA000"), // Yellow
    pair("#81C784", "#4CAF50"), // Light Green
    pair("#64B5F6", "#2196F3"), // Light Blue
    pair("#FF8A65", "#FF5722"), // Orange
    pair("#BA68C8", "#9C27B0"), // Light Purple
];

pub fn progress_bar_color(index: usize) -> ColorPair {
    let (color, border) = PROGRESS_BAR_COLORS
        .get(index)
        .copied()
        .unwrap_or(DEFAULT_PROGRESS_BAR_COLOR);
    ColorPair {
        color: color.to_string(),
        border: border.to_string(),
    }
}

pub fn default_widget_palette() -> Vec<ColorPair> {
    WIDGET_COLORS
        .iter()
        .map(|(color, border)| ColorPair {
            color: color.to_string(),
            border: border.to_string(),
        })
        .collect()
}

/// Settings as seen by the overlay content layer
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OverlaySettings {
    pub widgets_enabled: bool,
    pub progress_bar_enabled: bool,
    pub progress_bar_color: String,
    pub progress_bar_border: String,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        let (color, border) = DEFAULT_PROGRESS_BAR_COLOR;
        Self {
            widgets_enabled: true,
            progress_bar_enabled: true,
            progress_bar_color: color.to_string(),
            progress_bar_border: border.to_string(),
        }
    }
}

impl OverlaySettings {
    /// Merge a partial update. Absent fields keep their value.
    /// Returns whether anything changed, so duplicates are harmless.
    pub fn apply(&mut self, patch: &SettingsPatch) -> bool {
        let before = self.clone();

        if let Some(enabled) = patch.widgets_enabled {
            self.widgets_enabled = enabled;
        }
        if let Some(enabled) = patch.progress_bar_enabled {
            self.progress_bar_enabled = enabled;
        }
        if let Some(color) = &patch.progress_bar_color {
            self.progress_bar_color.clone_from(color);
        }
        if let Some(border) = &patch.progress_bar_border {
            self.progress_bar_border.clone_from(border);
        }

        *self != before
    }

    pub fn as_patch(&self) -> SettingsPatch {
        SettingsPatch {
            widgets_enabled: Some(self.widgets_enabled),
            progress_bar_enabled: Some(self.progress_bar_enabled),
            progress_bar_color: Some(self.progress_bar_color.clone()),
            progress_bar_border: Some(self.progress_bar_border.clone()),
        }
    }
}

/// Partial overlay settings pushed from the host
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widgets_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_bar_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_bar_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_bar_border: Option<String>,
}

/// Color update pushed when the main interface changes its palette
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ColorsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_colors: Option<Vec<ColorPair>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_bar_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_bar_border: Option<String>,
}

impl ColorsPatch {
    /// The progress bar part of the update, as a settings patch
    pub fn progress_bar(&self) -> SettingsPatch {
        SettingsPatch {
            progress_bar_color: self.progress_bar_color.clone(),
            progress_bar_border: self.progress_bar_border.clone(),
            ..SettingsPatch::default()
        }
    }
}

/// Persisted application settings
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    /// Whether the deadline dock is shown
    pub widgets_enabled: bool,

    /// Whether the day progress bar is shown
    pub progress_bar_enabled: bool,

    /// Index into `PROGRESS_BAR_COLORS`
    pub progress_bar_color_index: usize,

    /// Custom progress bar color, overrides the palette entry
    pub progress_bar_color: Option<String>,

    /// Custom progress bar border, overrides the palette entry
    pub progress_bar_border: Option<String>,

    /// Widget palette from the main interface, None for the built-in one
    pub widget_colors: Option<Vec<ColorPair>>,

    /// REST base for the deadlines/events feed
    pub api_base_url: String,

    pub poll_interval_secs: u64,
    pub poll_max_backoff_secs: u64,
    pub request_timeout_secs: u64,

    /// Ambient visibility enforcement period
    pub enforcement_interval_ms: u64,

    /// Always-on-top level of the overlay
    pub window_level: WindowLevel,

    /// Global shortcut for toggling desktop widgets
    pub toggle_shortcut: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            widgets_enabled: true,
            progress_bar_enabled: true,
            progress_bar_color_index: 0,
            progress_bar_color: None,
            progress_bar_border: None,
            widget_colors: None,
            api_base_url: "http://localhost:8080".to_string(),
            poll_interval_secs: 30,
            poll_max_backoff_secs: 300,
            request_timeout_secs: 10,
            enforcement_interval_ms: 2000,
            window_level: WindowLevel::ScreenSaver,
            toggle_shortcut: "ctrl+shift+d".to_string(),
        }
    }
}

impl AppSettings {
    /// Overlay view of these settings, with the palette index resolved
    pub fn overlay_settings(&self) -> OverlaySettings {
        let colors = progress_bar_color(self.progress_bar_color_index);
        OverlaySettings {
            widgets_enabled: self.widgets_enabled,
            progress_bar_enabled: self.progress_bar_enabled,
            progress_bar_color: self.progress_bar_color.clone().unwrap_or(colors.color),
            progress_bar_border: self.progress_bar_border.clone().unwrap_or(colors.border),
        }
    }

    /// Persisted widget palette as a color push, if one was ever set
    pub fn colors_patch(&self) -> Option<ColorsPatch> {
        self.widget_colors.as_ref().map(|palette| ColorsPatch {
            widget_colors: Some(palette.clone()),
            ..ColorsPatch::default()
        })
    }

    /// Fold an overlay patch back into what gets persisted.
    /// Palette colors are stored as an index, anything else verbatim.
    pub fn absorb(&mut self, patch: &SettingsPatch) {
        if let Some(enabled) = patch.widgets_enabled {
            self.widgets_enabled = enabled;
        }
        if let Some(enabled) = patch.progress_bar_enabled {
            self.progress_bar_enabled = enabled;
        }
        if let Some(color) = &patch.progress_bar_color {
            match PROGRESS_BAR_COLORS
                .iter()
                .position(|(c, _)| c.eq_ignore_ascii_case(color))
            {
                Some(index) => {
                    self.progress_bar_color_index = index;
                    self.progress_bar_color = None;
                    self.progress_bar_border = None;
                }
                None => self.progress_bar_color = Some(color.clone()),
            }
        }
        if let Some(border) = &patch.progress_bar_border {
            self.progress_bar_border = Some(border.clone());
        }
    }

    pub fn absorb_colors(&mut self, colors: &ColorsPatch) {
        self.absorb(&colors.progress_bar());
        if let Some(palette) = &colors.widget_colors {
            if !palette.is_empty() {
                self.widget_colors = Some(palette.clone());
            }
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            max_backoff: Duration::from_secs(
                self.poll_max_backoff_secs.max(self.poll_interval_secs),
            ),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
        }
    }

    pub fn enforcement_period(&self) -> Duration {
        Duration::from_millis(self.enforcement_interval_ms.max(100))
    }

    /// Apply environment overrides (`COMPASS_API_BASE_URL`)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(API_BASE_URL_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                log::debug!("Using API base URL from {}: {}", API_BASE_URL_ENV, url);
                self.api_base_url = url.trim_end_matches('/').to_string();
            }
        }
        self
    }
}

/// Get current settings from the store, or defaults if not set
#[cfg(feature = "desktop")]
pub fn get_settings(app: &AppHandle) -> AppSettings {
    let store = match app.store(SETTINGS_STORE_PATH) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("Failed to get settings store: {}", e);
            return AppSettings::default().with_env_overrides();
        }
    };

    let settings = match store.get("settings") {
        Some(value) => match serde_json::from_value::<AppSettings>(value.clone()) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Failed to deserialize settings, using defaults: {}", e);
                AppSettings::default()
            }
        },
        None => {
            log::debug!("No settings found, using defaults");
            AppSettings::default()
        }
    };

    settings.with_env_overrides()
}

/// Write settings to the store
#[cfg(feature = "desktop")]
pub fn write_settings(app: &AppHandle, settings: &AppSettings) -> Result<(), String> {
    let store = app
        .store(SETTINGS_STORE_PATH)
        .map_err(|e| format!("Failed to get settings store: {}", e))?;

    let value = serde_json::to_value(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;

    store.set("settings", value);
    store
        .save()
        .map_err(|e| format!("Failed to save settings: {}", e))?;

    log::debug!("Settings saved");
    Ok(())
}

/// Update a single setting field
#[cfg(feature = "desktop")]
pub fn update_setting<F>(app: &AppHandle, updater: F) -> Result<AppSettings, String>
where
    F: FnOnce(&mut AppSettings),
{
    let mut settings = get_settings(app);
    updater(&mut settings);
    write_settings(app, &settings)?;
    Ok(settings)
}
