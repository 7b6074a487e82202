use super::{DirectoryListing, PackageJsonProbe, ProjectDetection};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One language detector's working state while signals accumulate.
#[derive(Debug)]
struct Candidate {
    language: &'static str,
    score: f64,
    framework: Option<&'static str>,
    package_manager: Option<&'static str>,
    template: &'static str,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Classifies a project listing.
///
/// Returns the highest-scoring candidate, ties broken by detector order
/// (javascript, python, go, rust, java, ruby, php, dotnet). Returns `None`
/// when no detector recognized anything at all. The confidence threshold is
/// the caller's concern; a weak winner is still reported.
pub fn detect_project(listing: &DirectoryListing) -> Option<ProjectDetection> {
    let detectors: [fn(&DirectoryListing) -> Option<Candidate>; 8] = [
        detect_javascript,
        detect_python,
        detect_go,
        detect_rust,
        detect_java,
        detect_ruby,
        detect_php,
        detect_dotnet,
    ];

    let mut winner: Option<Candidate> = None;
    for detector in detectors {
        let Some(candidate) = detector(listing) else {
            continue;
        };
        // Strictly-greater keeps the earliest detector on ties.
        match &winner {
            Some(best) if candidate.score <= best.score => {}
            _ => winner = Some(candidate),
        }
    }

    winner.map(|c| ProjectDetection {
        language: c.language.to_string(),
        framework: c.framework.map(str::to_string),
        package_manager: c.package_manager.map(str::to_string),
        template: c.template.to_string(),
        confidence: c.score.clamp(0.0, 1.0),
    })
}

//--------------------------------------------------------------------------------------------------
// Functions: Detectors
//--------------------------------------------------------------------------------------------------

fn detect_javascript(listing: &DirectoryListing) -> Option<Candidate> {
    if !listing.has_file("package.json") {
        return None;
    }

    let mut c = Candidate {
        language: "javascript",
        score: 0.8,
        framework: None,
        package_manager: None,
        template: "node",
    };

    if listing.has_extension("ts") || listing.has_extension("tsx") {
        c.score += 0.1;
    }

    match &listing.package_json {
        Some(PackageJsonProbe::Parsed { .. }) => {
            if listing.has_dependency("react") {
                c.score += 0.1;
                c.framework = Some("react");
                c.template = "react";
            }
            if listing.has_dependency("next") {
                c.score += 0.1;
                c.framework = Some("nextjs");
            }
        }
        Some(PackageJsonProbe::Invalid) => {
            c.score -= 0.2;
        }
        None => {}
    }

    for (lockfile, manager) in [
        ("package-lock.json", "npm"),
        ("yarn.lock", "yarn"),
        ("pnpm-lock.yaml", "pnpm"),
    ] {
        if listing.has_file(lockfile) {
            c.score += 0.05;
            if c.package_manager.is_none() {
                c.package_manager = Some(manager);
            }
        }
    }

    Some(c)
}

fn detect_python(listing: &DirectoryListing) -> Option<Candidate> {
    if !listing.has_extension("py") {
        return None;
    }

    let mut c = Candidate {
        language: "python",
        score: 0.6,
        framework: None,
        package_manager: None,
        template: "python",
    };

    if listing.has_file("requirements.txt") {
        c.score += 0.2;
        c.package_manager = Some("pip");
    }
    if listing.has_file("manage.py") {
        c.score += 0.15;
        c.framework = Some("django");
        c.template = "django";
    }

    Some(c)
}

fn detect_go(listing: &DirectoryListing) -> Option<Candidate> {
    if !listing.has_extension("go") {
        return None;
    }

    let mut c = Candidate {
        language: "go",
        score: 0.7,
        framework: None,
        package_manager: None,
        template: "go",
    };

    if listing.has_file("go.mod") {
        c.score += 0.2;
        c.package_manager = Some("go-modules");
    }

    Some(c)
}

fn detect_rust(listing: &DirectoryListing) -> Option<Candidate> {
    if !listing.has_extension("rs") {
        return None;
    }

    let mut c = Candidate {
        language: "rust",
        score: 0.7,
        framework: None,
        package_manager: None,
        template: "rust",
    };

    if listing.has_file("Cargo.toml") {
        c.score += 0.25;
        c.package_manager = Some("cargo");
    }

    Some(c)
}

fn detect_java(listing: &DirectoryListing) -> Option<Candidate> {
    if !listing.has_file("pom.xml") && !listing.has_file("build.gradle") {
        return None;
    }

    Some(Candidate {
        language: "java",
        score: 0.2,
        framework: None,
        package_manager: None,
        template: "base",
    })
}

fn detect_ruby(listing: &DirectoryListing) -> Option<Candidate> {
    if !listing.has_file("Gemfile") {
        return None;
    }

    Some(Candidate {
        language: "ruby",
        score: 0.2,
        framework: None,
        package_manager: Some("bundler"),
        template: "base",
    })
}

fn detect_php(listing: &DirectoryListing) -> Option<Candidate> {
    if !listing.has_file("composer.json") {
        return None;
    }

    Some(Candidate {
        language: "php",
        score: 0.2,
        framework: None,
        package_manager: Some("composer"),
        template: "base",
    })
}

fn detect_dotnet(listing: &DirectoryListing) -> Option<Candidate> {
    if !listing.has_extension("csproj") && !listing.has_extension("sln") {
        return None;
    }

    Some(Candidate {
        language: "csharp",
        score: 0.2,
        framework: None,
        package_manager: None,
        template: "base",
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::probe_package_json;
    use super::*;

    fn listing(files: &[&str]) -> DirectoryListing {
        DirectoryListing {
            files: files.iter().map(|s| s.to_string()).collect(),
            package_json: None,
        }
    }

    fn listing_with_manifest(files: &[&str], manifest: &str) -> DirectoryListing {
        let mut l = listing(files);
        l.package_json = Some(probe_package_json(manifest));
        l
    }

    #[test]
    fn test_react_project_scores_high() {
        let l = listing_with_manifest(
            &["package.json", "package-lock.json", "src/App.tsx"],
            r#"{"dependencies": {"react": "^18.2.0"}}"#,
        );
        let d = detect_project(&l).unwrap();
        assert_eq!(d.language, "javascript");
        assert_eq!(d.framework.as_deref(), Some("react"));
        assert_eq!(d.package_manager.as_deref(), Some("npm"));
        assert_eq!(d.template, "react");
        assert!(d.confidence >= 0.9, "confidence {}", d.confidence);
    }

    #[test]
    fn test_plain_node_project_maps_to_node_template() {
        let l = listing_with_manifest(&["package.json", "index.js"], r#"{"dependencies": {}}"#);
        let d = detect_project(&l).unwrap();
        assert_eq!(d.template, "node");
        assert_eq!(d.framework, None);
        assert!((d.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_package_json_parse_error_penalty() {
        let good = listing_with_manifest(&["package.json"], "{}");
        let bad = listing_with_manifest(&["package.json"], "{nope");
        let good_score = detect_project(&good).unwrap().confidence;
        let bad_score = detect_project(&bad).unwrap().confidence;
        assert!((good_score - bad_score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_django_project() {
        let l = listing(&["manage.py", "requirements.txt", "app/views.py"]);
        let d = detect_project(&l).unwrap();
        assert_eq!(d.language, "python");
        assert_eq!(d.framework.as_deref(), Some("django"));
        assert_eq!(d.template, "django");
        assert!((d.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_go_and_rust_projects() {
        let go = detect_project(&listing(&["main.go", "go.mod"])).unwrap();
        assert_eq!(go.language, "go");
        assert_eq!(go.package_manager.as_deref(), Some("go-modules"));
        assert!((go.confidence - 0.9).abs() < 1e-9);

        let rust = detect_project(&listing(&["src/main.rs", "Cargo.toml"])).unwrap();
        assert_eq!(rust.language, "rust");
        assert_eq!(rust.package_manager.as_deref(), Some("cargo"));
        assert!((rust.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_weak_signals_stay_below_threshold() {
        for files in [&["Gemfile"][..], &["composer.json"], &["pom.xml"], &["app.csproj"]] {
            let d = detect_project(&listing(files)).unwrap();
            assert!(d.confidence < 0.7, "{:?} scored {}", files, d.confidence);
            assert_eq!(d.template, "base");
        }
    }

    #[test]
    fn test_empty_listing_detects_nothing() {
        assert!(detect_project(&listing(&["README.md"])).is_none());
    }

    #[test]
    fn test_adding_files_never_decreases_confidence() {
        // Monotonicity: growing a python tree only adds score.
        let base = detect_project(&listing(&["a.py"])).unwrap().confidence;
        let more = detect_project(&listing(&["a.py", "requirements.txt"]))
            .unwrap()
            .confidence;
        let most = detect_project(&listing(&["a.py", "requirements.txt", "manage.py"]))
            .unwrap()
            .confidence;
        assert!(base <= more && more <= most);
    }

    #[test]
    fn test_tie_break_prefers_detector_order() {
        // Gemfile and composer.json both score 0.2; ruby comes first.
        let d = detect_project(&listing(&["Gemfile", "composer.json"])).unwrap();
        assert_eq!(d.language, "ruby");
    }
}
