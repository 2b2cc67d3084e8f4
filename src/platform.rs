use once_cell::sync::Lazy;
use serde::Serialize;

static CURRENT: Lazy<Platform> = Lazy::new(Platform::detect);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModifierKey {
    Command,
    Control,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyModifiers {
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
    pub alt: bool,
}

impl Platform {
    fn detect() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    pub fn current() -> Self {
        *CURRENT
    }

    pub fn separator(self) -> char {
        match self {
            Platform::Windows => '\\',
            _ => '/',
        }
    }

    /// Rewrites foreign separators to this platform's convention.
    pub fn normalize_separators(self, path: &str) -> String {
        match self {
            Platform::Windows => path.replace('/', "\\"),
            _ => path.replace('\\', "/"),
        }
    }

    pub fn primary_modifier(self) -> ModifierKey {
        match self {
            Platform::MacOs => ModifierKey::Command,
            _ => ModifierKey::Control,
        }
    }

    /// True when the pressed chord is this platform's submit shortcut
    /// (primary modifier + Enter).
    pub fn is_submit_chord(self, key: &str, mods: KeyModifiers) -> bool {
        if key != "Enter" {
            return false;
        }
        match self.primary_modifier() {
            ModifierKey::Command => mods.meta,
            ModifierKey::Control => mods.ctrl,
        }
    }

    pub fn submit_hint(self) -> &'static str {
        match self.primary_modifier() {
            ModifierKey::Command => "⌘+Enter",
            ModifierKey::Control => "Ctrl+Enter",
        }
    }
}

pub fn is_cancel_key(key: &str) -> bool {
    key == "Escape"
}
