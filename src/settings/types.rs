use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{Category, Severity};

/// The fully merged configuration one analysis runs under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveSettings {
    pub enabled_categories: Vec<Category>,
    pub severity_threshold: Severity,
    pub ignored_files: Vec<String>,
    pub ignored_patterns: Vec<String>,
    pub languages: HashMap<String, LanguageProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageProfile {
    pub enabled: bool,
    /// Upper bound on the diff size considered for a file of this language,
    /// in patch bytes.
    pub max_file_size_bytes: usize,
}

impl LanguageProfile {
    fn enabled_with_default_size() -> Self {
        Self {
            enabled: true,
            max_file_size_bytes: 256 * 1024,
        }
    }
}

impl Default for EffectiveSettings {
    fn default() -> Self {
        let languages = [
            "rust",
            "javascript",
            "typescript",
            "python",
            "go",
            "java",
            "ruby",
        ]
        .into_iter()
        .map(|lang| (lang.to_string(), LanguageProfile::enabled_with_default_size()))
        .collect();

        Self {
            enabled_categories: vec![
                Category::Security,
                Category::Performance,
                Category::Style,
                Category::Bug,
                Category::BestPractice,
                Category::Other,
            ],
            severity_threshold: Severity::Info,
            ignored_files: vec![
                "Cargo.lock".to_string(),
                "package-lock.json".to_string(),
                "yarn.lock".to_string(),
                "pnpm-lock.yaml".to_string(),
            ],
            ignored_patterns: vec![
                r"(^|/)node_modules/".to_string(),
                r"(^|/)target/".to_string(),
                r"(^|/)dist/".to_string(),
                r"(^|/)vendor/".to_string(),
                r"\.min\.(js|css)$".to_string(),
                r"\.generated\.".to_string(),
            ],
            languages,
        }
    }
}

/// A partial settings blob as stored per scope. Every field is optional so
/// "present but empty" (e.g. an explicitly cleared ignore list) and
/// "absent" stay distinguishable. A present field fully replaces the prior
/// value; there is no array concatenation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_categories: Option<Vec<Category>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_threshold: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignored_files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignored_patterns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<HashMap<String, LanguageProfile>>,
}

impl SettingsPatch {
    /// Apply this patch over a base configuration, field by field.
    pub fn apply(&self, base: EffectiveSettings) -> EffectiveSettings {
        EffectiveSettings {
            enabled_categories: self
                .enabled_categories
                .clone()
                .unwrap_or(base.enabled_categories),
            severity_threshold: self.severity_threshold.unwrap_or(base.severity_threshold),
            ignored_files: self.ignored_files.clone().unwrap_or(base.ignored_files),
            ignored_patterns: self
                .ignored_patterns
                .clone()
                .unwrap_or(base.ignored_patterns),
            languages: self.languages.clone().unwrap_or(base.languages),
        }
    }

    /// Overlay another partial update on top of this blob, keeping fields
    /// the update does not mention.
    pub fn overlay(&self, update: &SettingsPatch) -> SettingsPatch {
        SettingsPatch {
            enabled_categories: update
                .enabled_categories
                .clone()
                .or_else(|| self.enabled_categories.clone()),
            severity_threshold: update.severity_threshold.or(self.severity_threshold),
            ignored_files: update
                .ignored_files
                .clone()
                .or_else(|| self.ignored_files.clone()),
            ignored_patterns: update
                .ignored_patterns
                .clone()
                .or_else(|| self.ignored_patterns.clone()),
            languages: update.languages.clone().or_else(|| self.languages.clone()),
        }
    }
}

/// Map a file path to the language key used by per-language profiles.
pub fn language_for_path(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?;
    match ext {
        "rs" => Some("rust"),
        "js" | "jsx" | "mjs" | "cjs" => Some("javascript"),
        "ts" | "tsx" => Some("typescript"),
        "py" => Some("python"),
        "go" => Some("go"),
        "java" => Some("java"),
        "rb" => Some("ruby"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_fields_fully_replace_base_values() {
        let base = EffectiveSettings::default();
        let patch = SettingsPatch {
            ignored_files: Some(vec!["only-this.txt".to_string()]),
            ..Default::default()
        };
        let merged = patch.apply(base.clone());
        // Replacement, not concatenation
        assert_eq!(merged.ignored_files, vec!["only-this.txt"]);
        // Untouched fields carry through
        assert_eq!(merged.severity_threshold, base.severity_threshold);
    }

    #[test]
    fn explicitly_empty_list_clears_defaults() {
        let patch = SettingsPatch {
            ignored_patterns: Some(vec![]),
            ..Default::default()
        };
        let merged = patch.apply(EffectiveSettings::default());
        assert!(merged.ignored_patterns.is_empty());
    }

    #[test]
    fn overlay_keeps_unmentioned_fields() {
        let existing = SettingsPatch {
            severity_threshold: Some(Severity::Warning),
            ignored_files: Some(vec!["a.txt".to_string()]),
            ..Default::default()
        };
        let update = SettingsPatch {
            severity_threshold: Some(Severity::Critical),
            ..Default::default()
        };
        let merged = existing.overlay(&update);
        assert_eq!(merged.severity_threshold, Some(Severity::Critical));
        assert_eq!(merged.ignored_files, Some(vec!["a.txt".to_string()]));
    }

    #[test]
    fn maps_extensions_to_languages() {
        assert_eq!(language_for_path("src/main.rs"), Some("rust"));
        assert_eq!(language_for_path("web/app.tsx"), Some("typescript"));
        assert_eq!(language_for_path("README.md"), None);
        assert_eq!(language_for_path("Makefile"), None);
    }
}
