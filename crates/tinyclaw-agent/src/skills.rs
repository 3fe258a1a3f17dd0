//! Skills index — the interface the context builder needs from the skill
//! file collaborator.
//!
//! Skills live at `workspace/skills/<name>/SKILL.md`. Discovery, install,
//! and management are handled elsewhere; here we only build the index of
//! names and descriptions that goes into the system prompt. Bodies are
//! loaded on demand by the LLM through `read_file`.

use std::path::{Path, PathBuf};

use tracing::debug;

/// A discovered skill.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkillEntry {
    pub name: String,
    pub description: String,
    pub path: PathBuf,
}

/// Index of skills under a workspace.
pub struct SkillsIndex {
    skills_dir: PathBuf,
}

impl SkillsIndex {
    pub fn new(workspace: &Path) -> Self {
        Self {
            skills_dir: workspace.join("skills"),
        }
    }

    /// Scan `skills/*/SKILL.md` and collect name + description.
    pub fn entries(&self) -> Vec<SkillEntry> {
        let mut entries = Vec::new();
        let Ok(dir) = std::fs::read_dir(&self.skills_dir) else {
            return entries;
        };

        for item in dir.flatten() {
            let path = item.path().join("SKILL.md");
            if !path.is_file() {
                continue;
            }
            let name = item.file_name().to_string_lossy().to_string();
            let description = std::fs::read_to_string(&path)
                .ok()
                .map(|content| extract_description(&content, &name))
                .unwrap_or_default();
            debug!(skill = %name, "indexed skill");
            entries.push(SkillEntry {
                name,
                description,
                path,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// The index block for the system prompt (names + descriptions only).
    /// Empty string when no skills exist.
    pub fn index_text(&self) -> String {
        let entries = self.entries();
        if entries.is_empty() {
            return String::new();
        }
        entries
            .iter()
            .map(|e| format!("- {}: {} ({})", e.name, e.description, e.path.display()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Pull a description from the frontmatter `description:` field, falling
/// back to the first non-header prose line.
fn extract_description(content: &str, fallback: &str) -> String {
    let mut in_frontmatter = false;
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if i == 0 && trimmed == "---" {
            in_frontmatter = true;
            continue;
        }
        if in_frontmatter {
            if trimmed == "---" {
                in_frontmatter = false;
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix("description:") {
                return rest.trim().trim_matches('"').to_string();
            }
            continue;
        }
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            return trimmed.to_string();
        }
    }
    fallback.to_string()
}
