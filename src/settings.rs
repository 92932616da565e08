use std::path::PathBuf;

/// Engine limits persisted as `key=value` lines. Unknown keys and
/// unparsable values are ignored and keep their defaults.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    /// Undo entries kept before the oldest is dropped.
    pub max_undo_steps: usize,
    /// Memory cap for the undo history, in MiB. 0 disables the cap.
    pub max_history_memory_mb: usize,
    /// Budget of the partial-edit backup cache, in MiB.
    pub backup_cache_mb: usize,
    /// Longest edge of generated thumbnails, in pixels.
    pub thumbnail_edge: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_undo_steps: 50,
            max_history_memory_mb: 100,
            backup_cache_mb: 256,
            thumbnail_edge: 128,
        }
    }
}

impl EngineSettings {
    pub fn max_history_memory_bytes(&self) -> Option<usize> {
        (self.max_history_memory_mb > 0).then(|| self.max_history_memory_mb * 1024 * 1024)
    }

    pub fn backup_cache_bytes(&self) -> usize {
        self.backup_cache_mb.saturating_mul(1024 * 1024)
    }

    /// Parse settings text. Never fails: bad lines are skipped.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "max_undo_steps" => {
                    if let Ok(v) = val.parse::<usize>() {
                        s.max_undo_steps = v.clamp(1, 10_000);
                    }
                }
                "max_history_memory_mb" => {
                    if let Ok(v) = val.parse() {
                        s.max_history_memory_mb = v;
                    }
                }
                "backup_cache_mb" => {
                    if let Ok(v) = val.parse() {
                        s.backup_cache_mb = v;
                    }
                }
                "thumbnail_edge" => {
                    if let Ok(v) = val.parse::<u32>() {
                        s.thumbnail_edge = v.clamp(8, 4096);
                    }
                }
                _ => {}
            }
        }
        s
    }

    pub fn to_cfg_string(&self) -> String {
        format!(
            "max_undo_steps={}\n\
             max_history_memory_mb={}\n\
             backup_cache_mb={}\n\
             thumbnail_edge={}\n",
            self.max_undo_steps, self.max_history_memory_mb, self.backup_cache_mb, self.thumbnail_edge,
        )
    }

    /// Path to the settings file.
    /// On Linux:   ~/.config/paintstack/paintstack.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\PaintStack\paintstack.cfg
    /// On macOS:   ~/Library/Application Support/PaintStack/paintstack.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            Some(PathBuf::from(appdata).join("PaintStack").join("paintstack.cfg"))
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("PaintStack")
                    .join("paintstack.cfg"),
            )
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = match std::env::var("XDG_CONFIG_HOME") {
                Ok(xdg) => PathBuf::from(xdg),
                Err(_) => PathBuf::from(std::env::var("HOME").ok()?).join(".config"),
            };
            Some(config_dir.join("paintstack").join("paintstack.cfg"))
        }
    }

    /// Load settings from disk (defaults if the file is missing or unreadable).
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::settings_path() else { return Ok(()) };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, self.to_cfg_string())?;
        crate::log_info!("Settings saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_defaults_for_bad_lines() {
        let s = EngineSettings::parse(
            "max_undo_steps = 20\n\
             # comment=1\n\
             backup_cache_mb=lots\n\
             nonsense\n\
             unknown_key=4\n\
             thumbnail_edge=1\n",
        );
        assert_eq!(s.max_undo_steps, 20);
        assert_eq!(s.backup_cache_mb, 256);
        assert_eq!(s.thumbnail_edge, 8);
        assert_eq!(s.max_history_memory_mb, 100);
    }

    #[test]
    fn cfg_string_parses_back() {
        let s = EngineSettings {
            max_undo_steps: 7,
            max_history_memory_mb: 0,
            backup_cache_mb: 12,
            thumbnail_edge: 64,
        };
        let parsed = EngineSettings::parse(&s.to_cfg_string());
        assert_eq!(parsed, s);
        assert_eq!(parsed.max_history_memory_bytes(), None);
    }
}
