//! Profile resolution.
//!
//! A profile names one package ecosystem: the PyPI classifiers and npm
//! keywords/scopes that select its packages, and the collection it lives
//! in. Commands take `--profile` and `--target`; the effective profile is
//! the CLI value, then `DEFAULT_PROFILE`, then `default_profile` from the
//! config file. The target defaults to the profile's collection, then the
//! profile id.

use thiserror::Error;

use crate::config::{Config, ProfileConfig};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("profile '{name}' not found. Available profiles: {available}")]
    NotFound { name: String, available: String },
    #[error("profile '{name}' is invalid: {reason}")]
    Invalid { name: String, reason: String },
    #[error("target collection name is required. Use --target <collection>, --profile <profile>, or set DEFAULT_PROFILE")]
    MissingTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProfile {
    pub id: String,
    pub name: String,
    pub classifiers: Vec<String>,
    pub npm_keywords: Vec<String>,
    pub npm_scopes: Vec<String>,
    pub collection: String,
}

impl ResolvedProfile {
    pub fn has_npm(&self) -> bool {
        !self.npm_keywords.is_empty() || !self.npm_scopes.is_empty()
    }
}

/// Where a command operates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub collection: String,
    pub profile: Option<ResolvedProfile>,
}

/// Structural check: a display name and at least one classifier.
pub fn validate(id: &str, profile: &ProfileConfig) -> Result<(), ProfileError> {
    let invalid = |reason: &str| ProfileError::Invalid {
        name: id.to_string(),
        reason: reason.to_string(),
    };
    match profile.name.as_deref() {
        Some(n) if !n.trim().is_empty() => {}
        _ => return Err(invalid("missing 'name' field")),
    }
    if profile.classifiers.is_empty() {
        return Err(invalid("empty classifiers list"));
    }
    if profile.classifiers.iter().any(|c| c.trim().is_empty()) {
        return Err(invalid("classifiers must not be blank"));
    }
    Ok(())
}

/// Extra check for npm builds: at least one keyword or scope.
pub fn validate_npm(profile: &ResolvedProfile) -> Result<(), ProfileError> {
    if !profile.has_npm() {
        return Err(ProfileError::Invalid {
            name: profile.id.clone(),
            reason: "no npm configuration; add npm_keywords and/or npm_scopes".to_string(),
        });
    }
    Ok(())
}

/// Look up and validate one profile.
pub fn resolve_profile(config: &Config, id: &str) -> Result<ResolvedProfile, ProfileError> {
    let profile = config
        .profiles
        .get(id)
        .ok_or_else(|| ProfileError::NotFound {
            name: id.to_string(),
            available: config.profiles.keys().cloned().collect::<Vec<_>>().join(", "),
        })?;
    validate(id, profile)?;
    Ok(ResolvedProfile {
        id: id.to_string(),
        name: profile.name.clone().unwrap_or_else(|| id.to_string()),
        classifiers: profile.classifiers.clone(),
        npm_keywords: profile.npm_keywords.clone(),
        npm_scopes: profile
            .npm_scopes
            .iter()
            .map(|s| s.trim_start_matches('@').to_string())
            .collect(),
        collection: profile.collection.clone().unwrap_or_else(|| id.to_string()),
    })
}

/// CLI value, then `DEFAULT_PROFILE`, then the config default.
pub fn effective_profile(cli: Option<&str>, config: &Config) -> Option<String> {
    cli.map(str::to_string)
        .or_else(|| std::env::var("DEFAULT_PROFILE").ok().filter(|s| !s.is_empty()))
        .or_else(|| config.default_profile.clone())
}

/// Resolve the target collection (and profile, when one applies).
pub fn resolve_target(
    config: &Config,
    profile: Option<&str>,
    target: Option<&str>,
) -> Result<Target, ProfileError> {
    let resolved = match effective_profile(profile, config) {
        Some(id) => Some(resolve_profile(config, &id)?),
        None => None,
    };
    let collection = target
        .map(str::to_string)
        .or_else(|| resolved.as_ref().map(|p| p.collection.clone()))
        .ok_or(ProfileError::MissingTarget)?;
    if let Some(p) = &resolved {
        tracing::info!(profile = %p.id, target = %collection, "using profile");
    }
    Ok(Target {
        collection,
        profile: resolved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn config() -> Config {
        parse_config(
            r#"
[profiles.plone]
name = "Plone"
classifiers = ["Framework :: Plone"]
npm_scopes = ["@plone"]

[profiles.django]
name = "Django"
classifiers = ["Framework :: Django"]
collection = "django-packages"

[profiles.broken]
classifiers = []
"#,
        )
        .unwrap()
    }

    #[test]
    fn target_defaults_to_profile_id() {
        let t = resolve_target(&config(), Some("plone"), None).unwrap();
        assert_eq!(t.collection, "plone");
        let p = t.profile.unwrap();
        assert_eq!(p.npm_scopes, vec!["plone"]);
        assert!(validate_npm(&p).is_ok());
    }

    #[test]
    fn explicit_collection_and_target_win() {
        let c = config();
        assert_eq!(resolve_target(&c, Some("django"), None).unwrap().collection, "django-packages");
        assert_eq!(resolve_target(&c, Some("django"), Some("x")).unwrap().collection, "x");
    }

    #[test]
    fn unknown_profile_lists_available() {
        let err = resolve_target(&config(), Some("flask"), None).unwrap_err();
        match err {
            ProfileError::NotFound { available, .. } => assert_eq!(available, "broken, django, plone"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn invalid_profile_is_rejected() {
        let err = resolve_profile(&config(), "broken").unwrap_err();
        assert!(matches!(err, ProfileError::Invalid { .. }));
    }

    #[test]
    fn django_has_no_npm() {
        let p = resolve_profile(&config(), "django").unwrap();
        assert!(validate_npm(&p).is_err());
    }
}
