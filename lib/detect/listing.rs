use std::{collections::BTreeSet, path::Path};

use tokio::fs;

use crate::DcsandboxResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A shallow listing of a project tree: the root plus one directory level,
/// excluding dotfiles and `node_modules`. This is the only input the scorer
/// sees; all I/O happens here.
#[derive(Debug, Clone, Default)]
pub struct DirectoryListing {
    /// Relative paths of the listed files.
    pub files: BTreeSet<String>,

    /// The outcome of probing `package.json`, when present.
    pub package_json: Option<PackageJsonProbe>,
}

/// The result of reading and parsing `package.json`.
#[derive(Debug, Clone)]
pub enum PackageJsonProbe {
    /// The manifest parsed; dependency names from `dependencies` and
    /// `devDependencies` combined.
    Parsed {
        /// The combined dependency names.
        dependencies: BTreeSet<String>,
    },

    /// The manifest exists but is not valid JSON.
    Invalid,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DirectoryListing {
    /// Returns whether a file with exactly this relative path is present.
    pub fn has_file(&self, name: &str) -> bool {
        self.files.contains(name)
    }

    /// Returns whether any listed file carries the given extension.
    pub fn has_extension(&self, ext: &str) -> bool {
        self.files
            .iter()
            .any(|f| Path::new(f).extension().is_some_and(|e| e == ext))
    }

    /// Returns whether the parsed `package.json` declares the dependency.
    pub fn has_dependency(&self, name: &str) -> bool {
        matches!(
            &self.package_json,
            Some(PackageJsonProbe::Parsed { dependencies }) if dependencies.contains(name)
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds a [`DirectoryListing`] for the given project root.
pub async fn scan_project(root: impl AsRef<Path>) -> DcsandboxResult<DirectoryListing> {
    let root = root.as_ref();
    let mut listing = DirectoryListing::default();

    let mut entries = fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if skip_entry(&name) {
            continue;
        }

        if entry.file_type().await?.is_dir() {
            let mut nested = fs::read_dir(entry.path()).await?;
            while let Some(child) = nested.next_entry().await? {
                let child_name = child.file_name().to_string_lossy().to_string();
                if skip_entry(&child_name) {
                    continue;
                }
                if child.file_type().await?.is_file() {
                    listing.files.insert(format!("{}/{}", name, child_name));
                }
            }
        } else {
            listing.files.insert(name);
        }
    }

    if listing.has_file("package.json") {
        let contents = fs::read_to_string(root.join("package.json")).await?;
        listing.package_json = Some(probe_package_json(&contents));
    }

    Ok(listing)
}

/// Parses a `package.json` body into a probe outcome.
pub fn probe_package_json(contents: &str) -> PackageJsonProbe {
    let Result::Ok(value) = serde_json::from_str::<serde_json::Value>(contents) else {
        return PackageJsonProbe::Invalid;
    };

    let mut dependencies = BTreeSet::new();
    for key in ["dependencies", "devDependencies"] {
        if let Some(map) = value.get(key).and_then(|v| v.as_object()) {
            dependencies.extend(map.keys().cloned());
        }
    }

    PackageJsonProbe::Parsed { dependencies }
}

fn skip_entry(name: &str) -> bool {
    name.starts_with('.') || name == "node_modules"
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_scan_is_shallow_and_skips_noise() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        std::fs::write(root.join("package.json"), "{}").unwrap();
        std::fs::write(root.join(".env"), "SECRET=1").unwrap();
        std::fs::create_dir_all(root.join("src/deep")).unwrap();
        std::fs::write(root.join("src/index.ts"), "").unwrap();
        std::fs::write(root.join("src/deep/far.ts"), "").unwrap();
        std::fs::create_dir_all(root.join("node_modules/react")).unwrap();
        std::fs::write(root.join("node_modules/left-pad.js"), "").unwrap();

        let listing = scan_project(root).await.unwrap();
        assert!(listing.has_file("package.json"));
        assert!(listing.has_file("src/index.ts"));
        assert!(!listing.files.iter().any(|f| f.contains("deep")));
        assert!(!listing.files.iter().any(|f| f.contains("node_modules")));
        assert!(!listing.files.iter().any(|f| f.starts_with('.')));
    }

    #[test]
    fn test_probe_collects_both_dependency_maps() {
        let probe = probe_package_json(
            r#"{"dependencies": {"react": "^18"}, "devDependencies": {"vite": "^5"}}"#,
        );
        let PackageJsonProbe::Parsed { dependencies } = probe else {
            panic!("expected parse");
        };
        assert!(dependencies.contains("react"));
        assert!(dependencies.contains("vite"));
    }

    #[test]
    fn test_probe_flags_invalid_manifest() {
        assert!(matches!(
            probe_package_json("{nope"),
            PackageJsonProbe::Invalid
        ));
    }
}
