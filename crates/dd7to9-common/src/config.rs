//! Shim configuration
//!
//! Loaded from a TOML file. Every field has a default so an empty file (or no
//! file at all) gives the stock behavior:
//! - `DD7TO9_CONFIG` – explicit path to the config file
//! - otherwise `dd7to9.toml` next to the host executable

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable holding an explicit config path
pub const CONFIG_ENV_VAR: &str = "DD7TO9_CONFIG";

/// File name looked up next to the host executable
pub const CONFIG_FILE_NAME: &str = "dd7to9.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Runtime switches for the DirectDraw to Direct3D9 shim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Emulate DirectDraw on top of Direct3D9. When off, creation is refused
    /// and the proxy layer forwards everything to the system ddraw.
    pub dd7to9: bool,

    /// Treat every legacy interface as version 7 internally
    pub convert_to_ddraw7: bool,

    /// Request the best multisample type the adapter supports
    pub anti_aliasing: bool,

    /// Forced back buffer size (0 = not forced)
    pub override_width: u32,
    pub override_height: u32,

    /// Forced refresh rate (0 = not forced)
    pub override_refresh_rate: u32,

    /// Forced display bit depth: 0, 8, 16, 24 or 32
    pub override_bit_mode: u32,

    /// Forced depth-stencil format as a raw D3DFORMAT value (0 = not forced)
    pub override_stencil_format: u32,

    /// Use the desktop resolution for the back buffer
    pub use_native_resolution: bool,

    pub enable_window_mode: bool,
    pub fullscreen_window_mode: bool,

    /// Route the primary surface through GDI memory
    pub write_to_gdi: bool,

    pub auto_frame_skip: bool,

    /// Multiplier applied to frame time estimates by the frame skipper
    pub frame_skip_safety_factor: f32,

    pub enable_vsync: bool,
    pub force_vsync_mode: bool,

    /// Keep all work on one core: no present thread, no multithreaded device
    pub single_proc_affinity: bool,

    /// Clamp the cursor to the emulated display mode
    pub enable_mouse_hook: bool,

    /// Hand out DWORD aligned pitches even when the GPU pitch differs
    pub fix_byte_alignment: bool,

    /// Fill blank odd scanlines on unlock
    pub remove_scanlines: bool,

    /// Cap on the number of modes returned by EnumDisplayModes (0 = no cap)
    pub limit_display_mode_count: u32,

    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dd7to9: true,
            convert_to_ddraw7: false,
            anti_aliasing: false,
            override_width: 0,
            override_height: 0,
            override_refresh_rate: 0,
            override_bit_mode: 0,
            override_stencil_format: 0,
            use_native_resolution: false,
            enable_window_mode: false,
            fullscreen_window_mode: false,
            write_to_gdi: false,
            auto_frame_skip: false,
            frame_skip_safety_factor: 1.1,
            enable_vsync: false,
            force_vsync_mode: false,
            single_proc_affinity: false,
            enable_mouse_hook: false,
            fix_byte_alignment: true,
            remove_scanlines: false,
            limit_display_mode_count: 0,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file from disk
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Resolve the config the way the DLL does on attach
    ///
    /// A missing file is not an error; a broken one is.
    pub fn load_from_env() -> anyhow::Result<Self> {
        let Some(path) = Self::locate() else {
            tracing::debug!("No config file found, using defaults");
            return Ok(Self::default());
        };

        tracing::info!("Loading config from {}", path.display());
        Self::load(&path).with_context(|| format!("loading {}", path.display()))
    }

    fn locate() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
            return Some(PathBuf::from(explicit));
        }

        let exe = std::env::current_exe().ok()?;
        let candidate = exe.parent()?.join(CONFIG_FILE_NAME);
        candidate.is_file().then_some(candidate)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.override_bit_mode, 0 | 8 | 16 | 24 | 32) {
            return Err(ConfigError::Invalid(format!(
                "override_bit_mode must be 0, 8, 16, 24 or 32 (got {})",
                self.override_bit_mode
            )));
        }
        if !(self.frame_skip_safety_factor >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "frame_skip_safety_factor must be at least 1.0 (got {})",
                self.frame_skip_safety_factor
            )));
        }
        Ok(())
    }

    /// Back buffer size is forced by either an explicit override or native resolution
    pub fn forces_back_buffer_size(&self) -> bool {
        self.use_native_resolution || self.override_width != 0 || self.override_height != 0
    }

    /// Fullscreen in the sense of the display path, not of the window flags
    pub fn is_fullscreen_path(&self) -> bool {
        !self.enable_window_mode || self.fullscreen_window_mode
    }
}
