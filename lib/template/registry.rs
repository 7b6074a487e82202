use std::{collections::HashMap, path::Path};

use tokio::fs;

use crate::{DcsandboxError, DcsandboxResult};

use super::Template;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The built-in templates, shipped as data.
const BUILTIN_TEMPLATES: &[&str] = &[
    include_str!("builtin/base.yaml"),
    include_str!("builtin/node.yaml"),
    include_str!("builtin/python.yaml"),
    include_str!("builtin/go.yaml"),
    include_str!("builtin/rust.yaml"),
    include_str!("builtin/react.yaml"),
    include_str!("builtin/django.yaml"),
    include_str!("builtin/fullstack.yaml"),
];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Ordered template lookup: custom templates shadow built-ins by name.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<String, Template>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TemplateRegistry {
    /// Builds a registry from the built-ins alone.
    pub fn builtin() -> Self {
        let mut templates = HashMap::new();
        for doc in BUILTIN_TEMPLATES {
            match serde_yaml::from_str::<Template>(doc) {
                Result::Ok(template) => {
                    templates.insert(template.name.clone(), template);
                }
                Result::Err(e) => {
                    // Built-ins are compiled in; a parse failure here is a
                    // packaging bug, but listing must not die over it.
                    tracing::warn!(error = %e, "skipping malformed built-in template");
                }
            }
        }
        Self { templates }
    }

    /// Builds a registry from the built-ins plus a custom directory whose
    /// templates shadow built-ins of the same name.
    ///
    /// Custom files failing shape validation are skipped with a warning;
    /// they never fail the whole listing.
    pub async fn load(custom_dir: Option<&Path>) -> DcsandboxResult<Self> {
        let mut registry = Self::builtin();

        let Some(dir) = custom_dir else {
            return Ok(registry);
        };
        if !dir.exists() {
            return Ok(registry);
        }

        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if !is_yaml {
                continue;
            }

            let contents = fs::read_to_string(&path).await?;
            match serde_yaml::from_str::<Template>(&contents) {
                Result::Ok(template) => {
                    tracing::debug!(
                        name = %template.name,
                        path = %path.display(),
                        "loaded custom template"
                    );
                    registry.templates.insert(template.name.clone(), template);
                }
                Result::Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping invalid template file"
                    );
                }
            }
        }

        Ok(registry)
    }

    /// Looks up a template by name.
    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// Looks up a template by name, failing with `TEMPLATE_NOT_FOUND`.
    pub fn resolve(&self, name: &str) -> DcsandboxResult<&Template> {
        self.templates
            .get(name)
            .ok_or_else(|| DcsandboxError::TemplateNotFound(name.to_string()))
    }

    /// Returns the sorted names of all known templates.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_builtins_are_complete() {
        let registry = TemplateRegistry::builtin();
        for name in [
            "base",
            "node",
            "python",
            "go",
            "rust",
            "react",
            "django",
            "fullstack",
        ] {
            let template = registry.get(name).unwrap_or_else(|| panic!("missing {}", name));
            let servers: Vec<&str> = template
                .capability_servers
                .iter()
                .map(|s| s.name.as_str())
                .collect();
            for core in ["filesystem", "shell", "git"] {
                assert!(servers.contains(&core), "{} lacks {}", name, core);
            }
        }
    }

    #[test]
    fn test_react_exposes_port_3000() {
        let registry = TemplateRegistry::builtin();
        assert!(registry.get("react").unwrap().ports.contains(&3000));
    }

    #[tokio::test]
    async fn test_custom_templates_shadow_builtins() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("node.yaml"),
            "name: node\nbaseImage: node:22-alpine\nfeatures: []\ncapabilityServers: []\n",
        )
        .unwrap();

        let registry = TemplateRegistry::load(Some(temp.path())).await.unwrap();
        assert_eq!(registry.get("node").unwrap().base_image, "node:22-alpine");
        // Built-ins not shadowed remain intact.
        assert!(registry.get("python").is_some());
    }

    #[tokio::test]
    async fn test_invalid_custom_template_is_skipped() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("broken.yaml"), "name: broken\n").unwrap();

        let registry = TemplateRegistry::load(Some(temp.path())).await.unwrap();
        assert!(registry.get("broken").is_none());
        assert!(registry.get("base").is_some());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = TemplateRegistry::builtin();
        let err = registry.resolve("does-not-exist").unwrap_err();
        assert_eq!(err.code(), "TEMPLATE_NOT_FOUND");
    }
}
