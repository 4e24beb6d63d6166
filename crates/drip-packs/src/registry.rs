use std::collections::{HashMap, HashSet};
use std::path::Path;

use drip_core::error::{DripError, Result};
use drip_core::ports::StepResolver;
use drip_core::types::StepDescriptor;
use figment::{
    providers::{Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One unit of content in a pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub slug: String,
    pub subject: String,
    pub body: String,
}

/// An ordered content sequence, e.g. a five-day email course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pack {
    pub key: String,
    #[serde(default)]
    pub title: String,
    pub steps: Vec<Step>,
}

/// Immutable lookup of packs by key. Built once, shared read-only.
#[derive(Debug, Default)]
pub struct PackRegistry {
    packs: HashMap<String, Pack>,
}

impl PackRegistry {
    /// Build a registry, rejecting duplicate pack keys and duplicate slugs.
    pub fn new(packs: Vec<Pack>) -> Result<Self> {
        let mut map = HashMap::with_capacity(packs.len());
        for pack in packs {
            validate_pack(&pack)?;
            if map.contains_key(&pack.key) {
                return Err(DripError::Config(format!(
                    "duplicate content pack key: {}",
                    pack.key
                )));
            }
            map.insert(pack.key.clone(), pack);
        }
        Ok(Self { packs: map })
    }

    /// Load every `*.toml` file in `dir` as a pack.
    ///
    /// A missing directory yields an empty registry; subscriptions that
    /// reference a pack will then fail with `PackNotFound`.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            warn!(path = %dir.display(), "pack directory not found, registry is empty");
            return Self::new(Vec::new());
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        // deterministic load order keeps duplicate-key errors reproducible
        paths.sort();

        let mut packs = Vec::with_capacity(paths.len());
        for path in &paths {
            let pack: Pack = Figment::new()
                .merge(Toml::file(path))
                .extract()
                .map_err(|e| {
                    DripError::Config(format!("invalid pack file {}: {e}", path.display()))
                })?;
            info!(pack = %pack.key, steps = pack.steps.len(), "content pack loaded");
            packs.push(pack);
        }

        Self::new(packs)
    }

    pub fn get(&self, key: &str) -> Option<&Pack> {
        self.packs.get(key)
    }

    pub fn len(&self) -> usize {
        self.packs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }
}

impl StepResolver for PackRegistry {
    fn next(&self, pack_key: &str, step_index: u32) -> Result<Option<StepDescriptor>> {
        let pack = self.get(pack_key).ok_or_else(|| DripError::PackNotFound {
            pack_key: pack_key.to_string(),
        })?;

        Ok(pack
            .steps
            .get(step_index as usize)
            .map(|step| StepDescriptor {
                pack_key: pack.key.clone(),
                index: step_index,
                slug: step.slug.clone(),
                subject: step.subject.clone(),
                body: step.body.clone(),
            }))
    }
}

fn validate_pack(pack: &Pack) -> Result<()> {
    if pack.key.trim().is_empty() {
        return Err(DripError::Config("content pack key must not be empty".to_string()));
    }
    let mut seen = HashSet::new();
    for step in &pack.steps {
        if step.slug.trim().is_empty() {
            return Err(DripError::Config(format!(
                "pack {} has a step with an empty slug",
                pack.key
            )));
        }
        if !seen.insert(step.slug.as_str()) {
            return Err(DripError::Config(format!(
                "pack {} repeats step slug {}",
                pack.key, step.slug
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(slug: &str) -> Step {
        Step {
            slug: slug.to_string(),
            subject: format!("Subject {slug}"),
            body: format!("Body of {slug}"),
        }
    }

    fn course() -> Pack {
        Pack {
            key: "course".to_string(),
            title: "Course".to_string(),
            steps: vec![step("day-1"), step("day-2")],
        }
    }

    #[test]
    fn resolves_steps_in_order_then_exhausts() {
        let registry = PackRegistry::new(vec![course()]).unwrap();

        let first = registry.next("course", 0).unwrap().unwrap();
        assert_eq!(first.slug, "day-1");
        assert_eq!(first.index, 0);

        let second = registry.next("course", 1).unwrap().unwrap();
        assert_eq!(second.slug, "day-2");

        assert!(registry.next("course", 2).unwrap().is_none());
        assert!(registry.next("course", 99).unwrap().is_none());
    }

    #[test]
    fn unknown_pack_is_an_error() {
        let registry = PackRegistry::new(vec![course()]).unwrap();
        let err = registry.next("nope", 0).unwrap_err();
        assert!(matches!(err, DripError::PackNotFound { .. }));
    }

    #[test]
    fn duplicate_pack_keys_are_rejected() {
        assert!(PackRegistry::new(vec![course(), course()]).is_err());
    }

    #[test]
    fn duplicate_slugs_are_rejected() {
        let mut pack = course();
        pack.steps.push(step("day-1"));
        assert!(PackRegistry::new(vec![pack]).is_err());
    }

    #[test]
    fn loads_pack_files_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("intro.toml"),
            r#"
            key = "intro"
            title = "Intro"

            [[steps]]
            slug = "welcome"
            subject = "Welcome"
            body = "Hello there."

            [[steps]]
            slug = "next"
            subject = "Next"
            body = "More."
            "#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = PackRegistry::load_dir(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("intro").unwrap().steps.len(), 2);
    }

    #[test]
    fn missing_directory_gives_empty_registry() {
        let registry = PackRegistry::load_dir("/definitely/not/here").unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn malformed_pack_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.toml"), "key = 3\nsteps = \"x\"").unwrap();
        let err = PackRegistry::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, DripError::Config(_)));
    }
}
