use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn pkgindex_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("pkgindex");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"
[index]
url = "http://127.0.0.1:9"

[build]
sincefile = "{root}/state/since"

[maintainers]
cache_dir = "{root}/cache"

[profiles.plone]
name = "Plone"
classifiers = ["Framework :: Plone"]
npm_scopes = ["@plone"]

[profiles.django]
name = "Django"
classifiers = ["Framework :: Django"]
collection = "django-packages"

[profiles.broken]
name = "Broken"
"#,
        root = root.display()
    );
    let config_path = config_dir.join("pkgindex.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run_pkgindex(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pkgindex_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("DEFAULT_PROFILE")
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pkgindex binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_profiles_lists_validity() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_pkgindex(&config, &["profiles"]);
    assert!(success);
    assert!(stdout.contains("PROFILE"));
    assert!(stdout.contains("django-packages"));
    assert!(stdout.contains("empty classifiers list"));
    let plone = stdout.lines().find(|l| l.starts_with("plone")).unwrap();
    assert!(plone.contains("yes"));
    assert!(plone.ends_with("OK"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_pkgindex(&tmp.path().join("nope.toml"), &["profiles"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_completions_need_no_config() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _, success) = run_pkgindex(&tmp.path().join("nope.toml"), &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("pkgindex"));
}

#[test]
fn test_unknown_profile_lists_available() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_pkgindex(&config, &["build", "pypi", "--profile", "flask"]);
    assert!(!success);
    assert!(stderr.contains("broken, django, plone"));
}

#[test]
fn test_invalid_profile_is_rejected() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_pkgindex(&config, &["build", "pypi", "--profile", "broken"]);
    assert!(!success);
    assert!(stderr.contains("is invalid"));
}

#[test]
fn test_npm_build_needs_npm_profile() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_pkgindex(&config, &["build", "npm", "--profile", "django"]);
    assert!(!success);
    assert!(stderr.contains("no npm configuration"));
}

#[test]
fn test_incremental_needs_a_previous_build() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) =
        run_pkgindex(&config, &["build", "pypi", "--profile", "plone", "--incremental"]);
    assert!(!success);
    assert!(stderr.contains("run a full build first"));
}

#[test]
fn test_show_without_target_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_pkgindex(&config, &["show", "plone.api"]);
    assert!(!success);
    assert!(stderr.contains("target collection name is required"));
}

#[test]
fn test_unknown_registry_is_a_usage_error() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_pkgindex(&config, &["build", "conda", "--profile", "plone"]);
    assert!(!success);
    assert!(stderr.contains("unknown registry"));
}

#[test]
fn test_unknown_enrich_source_is_a_usage_error() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_pkgindex(&config, &["enrich", "stars", "--target", "plone"]);
    assert!(!success);
    assert!(stderr.contains("invalid value"));
}
