// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a missing file or a partial one still
// yields a complete configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::{Diagnostics, RendererSettings};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub shaders: ShaderConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Triangle".to_string(),
            width: 1024,
            height: 768,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Preferred present mode; FIFO is used when it is unavailable
    pub present_mode: String,
    /// One by default: a frame is submitted only after the previous one's fence signaled
    pub frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            frames_in_flight: 1,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honoured in debug builds
    pub validation_layers: bool,
    pub layers: Vec<String>,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            layers: vec!["VK_LAYER_KHRONOS_validation".to_string()],
            show_fps: true,
        }
    }
}

/// Pre-compiled SPIR-V inputs
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/vert.spv"),
            fragment: PathBuf::from("shaders/frag.spv"),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        if config.graphics.frames_in_flight == 0 {
            log::warn!("frames_in_flight = 0 is not usable, using 1");
            config.graphics.frames_in_flight = 1;
        }
        Ok(config)
    }

    /// Get preferred present mode as Vulkan enum
    pub fn present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::MAILBOX
            }
        }
    }

    /// Diagnostic layers to request; `debug_build` gates the config switch.
    pub fn diagnostics(&self, debug_build: bool) -> Diagnostics {
        Diagnostics {
            enabled: debug_build && self.debug.validation_layers,
            layers: self.debug.layers.clone(),
        }
    }

    pub fn renderer_settings(&self) -> RendererSettings {
        RendererSettings {
            app_name: self.window.title.clone(),
            diagnostics: self.diagnostics(cfg!(debug_assertions)),
            preferred_present_mode: self.present_mode(),
            frames_in_flight: self.graphics.frames_in_flight,
            vertex_shader: self.shaders.vertex.clone(),
            fragment_shader: self.shaders.fragment.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::parse("").expect("empty config parses");
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 768);
        assert_eq!(config.graphics.frames_in_flight, 1);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.shaders.vertex, PathBuf::from("shaders/vert.spv"));
        assert_eq!(config.shaders.fragment, PathBuf::from("shaders/frag.spv"));
        assert_eq!(config.debug.layers, vec!["VK_LAYER_KHRONOS_validation"]);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [graphics]
            present_mode = "FIFO"

            [shaders]
            vertex = "build/tri.vert.spv"
            "#,
        )
        .expect("config parses");

        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.graphics.frames_in_flight, 1);
        assert_eq!(config.shaders.vertex, PathBuf::from("build/tri.vert.spv"));
        assert_eq!(config.shaders.fragment, PathBuf::from("shaders/frag.spv"));
        assert_eq!(config.window.title, "Vulkan Triangle");
    }

    #[test]
    fn default_settings_keep_a_single_frame_in_flight() {
        assert_eq!(Config::default().renderer_settings().frames_in_flight, 1);
        let parsed = Config::parse("[window]\ntitle = \"t\"\n").expect("config parses");
        assert_eq!(parsed.renderer_settings().frames_in_flight, 1);
    }

    #[test]
    fn zero_frames_in_flight_is_coerced() {
        let config = Config::parse("[graphics]\nframes_in_flight = 0\n").expect("config parses");
        assert_eq!(config.graphics.frames_in_flight, 1);
    }

    #[test]
    fn unknown_present_mode_prefers_mailbox() {
        let config = Config::parse("[graphics]\npresent_mode = \"turbo\"\n").expect("config parses");
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn diagnostics_need_debug_build_and_switch() {
        let config = Config::parse("[debug]\nlayers = [\"VK_LAYER_A\", \"VK_LAYER_B\"]\n")
            .expect("config parses");

        let enabled = config.diagnostics(true);
        assert!(enabled.enabled);
        assert_eq!(enabled.layers, vec!["VK_LAYER_A", "VK_LAYER_B"]);
        assert!(!config.diagnostics(false).enabled);

        let off = Config::parse("[debug]\nvalidation_layers = false\n").expect("config parses");
        assert!(!off.diagnostics(true).enabled);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::parse("[window\nwidth = 3").is_err());
        assert!(Config::parse("[window]\nwidth = \"wide\"\n").is_err());
    }

    #[test]
    fn loads_from_disk_and_tolerates_missing_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[window]\ntitle = \"from disk\"\nwidth = 640").expect("write config");

        let config = Config::load_from_path(file.path()).expect("config loads");
        assert_eq!(config.window.title, "from disk");
        assert_eq!(config.window.width, 640);

        let dir = tempfile::tempdir().expect("temp dir");
        let missing = Config::load_from_path(dir.path().join("nope.toml")).expect("defaults");
        assert_eq!(missing.window.width, 1024);
    }

    #[test]
    fn renderer_settings_carry_config_values() {
        let config = Config::parse(
            "[window]\ntitle = \"tri\"\n[graphics]\nframes_in_flight = 3\npresent_mode = \"immediate\"\n",
        )
        .expect("config parses");
        let settings = config.renderer_settings();

        assert_eq!(settings.app_name, "tri");
        assert_eq!(settings.frames_in_flight, 3);
        assert_eq!(settings.preferred_present_mode, vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(settings.vertex_shader, PathBuf::from("shaders/vert.spv"));
    }
}
