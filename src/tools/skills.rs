//! Skill loading from directory-packaged bundles.
//!
//! A skill is a directory containing a `SKILL.md` with YAML front-matter
//! (name, description) followed by instructions, plus optional `.py` scripts.
//! At agent setup the instructions extend the system prompt and the scripts
//! are injected into the interpreter namespace.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use walkdir::WalkDir;

use super::{Tool, ToolCollection};

#[derive(Debug, Clone, Deserialize)]
struct SkillFrontMatter {
    name: String,
    #[serde(default)]
    description: String,
}

/// A parsed skill bundle.
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    /// Markdown body after the front-matter.
    pub instructions: String,
    /// (file stem, source) pairs for scripts shipped with the skill.
    pub scripts: Vec<(String, String)>,
}

/// Parse a `SKILL.md` file: YAML front-matter between `---` fences, then the
/// instruction body.
fn parse_skill_md(content: &str) -> Option<(SkillFrontMatter, String)> {
    let rest = content.strip_prefix("---")?;
    let end = rest.find("\n---")?;
    let front: SkillFrontMatter = serde_yaml::from_str(&rest[..end]).ok()?;
    let body = rest[end + 4..].trim_start_matches('\n').to_string();
    Some((front, body))
}

/// Collection over a directory of skill bundles.
pub struct SkillCollection {
    root: PathBuf,
    skills: Vec<Skill>,
    healthy: bool,
    closed: bool,
}

impl SkillCollection {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            skills: Vec::new(),
            healthy: false,
            closed: false,
        }
    }

    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    /// Combined instruction block for the system prompt.
    pub fn combined_instructions(&self) -> String {
        let sections: Vec<String> = self
            .skills
            .iter()
            .filter(|s| !s.instructions.trim().is_empty())
            .map(|s| format!("## Skill: {}\n\n{}", s.name, s.instructions.trim()))
            .collect();
        sections.join("\n\n---\n\n")
    }

    fn load_skill_dir(dir: &Path) -> Option<Skill> {
        let manifest = dir.join("SKILL.md");
        let content = std::fs::read_to_string(&manifest).ok()?;
        let (front, instructions) = parse_skill_md(&content)?;

        let mut scripts = Vec::new();
        for entry in WalkDir::new(dir).max_depth(2).into_iter().flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("py") {
                if let Ok(source) = std::fs::read_to_string(path) {
                    let stem = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or("script")
                        .to_string();
                    scripts.push((stem, source));
                }
            }
        }
        scripts.sort_by(|(a, _), (b, _)| a.cmp(b));

        Some(Skill {
            name: front.name,
            description: front.description,
            instructions,
            scripts,
        })
    }
}

#[async_trait]
impl ToolCollection for SkillCollection {
    fn name(&self) -> &str {
        "skills"
    }

    async fn setup(&mut self) -> anyhow::Result<()> {
        if self.healthy {
            return Ok(());
        }
        if !self.root.is_dir() {
            anyhow::bail!("skills directory not found: {}", self.root.display());
        }
        let mut skills = Vec::new();
        let entries = std::fs::read_dir(&self.root)?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match Self::load_skill_dir(&path) {
                Some(skill) => {
                    tracing::debug!(skill = %skill.name, scripts = skill.scripts.len(), "skill loaded");
                    skills.push(skill);
                }
                None => {
                    tracing::warn!(dir = %path.display(), "skipping directory without a valid SKILL.md");
                }
            }
        }
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        self.skills = skills;
        self.healthy = true;
        Ok(())
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        // skills contribute instructions and interpreter scripts, not tools
        Vec::new()
    }

    fn skills(&self) -> &[Skill] {
        &self.skills
    }

    fn instructions(&self) -> Option<String> {
        if self.closed || !self.healthy {
            return None;
        }
        let combined = self.combined_instructions();
        if combined.is_empty() {
            None
        } else {
            Some(combined)
        }
    }

    fn is_healthy(&self) -> bool {
        self.healthy && !self.closed
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_skill(root: &Path, name: &str, body: &str, script: Option<&str>) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("SKILL.md"),
            format!("---\nname: {}\ndescription: a {} skill\n---\n{}", name, name, body),
        )
        .unwrap();
        if let Some(code) = script {
            fs::write(dir.join("helpers.py"), code).unwrap();
        }
    }

    #[tokio::test]
    async fn test_loads_skills_with_scripts() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(tmp.path(), "math-helpers", "Use the helpers for arithmetic.", Some("def double(x):\n    return x * 2\n"));
        write_skill(tmp.path(), "writing", "Write clearly.", None);

        let mut collection = SkillCollection::new(tmp.path());
        collection.setup().await.unwrap();
        assert!(collection.is_healthy());
        assert_eq!(collection.skills().len(), 2);

        let math = &collection.skills()[0];
        assert_eq!(math.name, "math-helpers");
        assert_eq!(math.scripts.len(), 1);
        assert!(math.scripts[0].1.contains("def double"));

        let instructions = collection.instructions().unwrap();
        assert!(instructions.contains("## Skill: math-helpers"));
        assert!(instructions.contains("Write clearly."));
    }

    #[tokio::test]
    async fn test_missing_directory_fails_setup() {
        let mut collection = SkillCollection::new("/nonexistent/skills");
        assert!(collection.setup().await.is_err());
        assert!(!collection.is_healthy());
    }

    #[tokio::test]
    async fn test_directory_without_manifest_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("not-a-skill")).unwrap();
        write_skill(tmp.path(), "real", "Body.", None);

        let mut collection = SkillCollection::new(tmp.path());
        collection.setup().await.unwrap();
        assert_eq!(collection.skills().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_collection_reports_unhealthy() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(tmp.path(), "s", "Body.", None);
        let mut collection = SkillCollection::new(tmp.path());
        collection.setup().await.unwrap();
        collection.close().await.unwrap();
        assert!(!collection.is_healthy());
        assert!(collection.instructions().is_none());
    }
}
