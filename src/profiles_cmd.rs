use anyhow::Result;

use crate::config::Config;
use crate::profiles::{effective_profile, resolve_profile};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRow {
    pub id: String,
    pub collection: String,
    pub npm: bool,
    pub is_default: bool,
    /// `None` when valid, otherwise the reason.
    pub problem: Option<String>,
}

pub fn profile_rows(config: &Config) -> Vec<ProfileRow> {
    let default = effective_profile(None, config);
    config
        .profiles
        .iter()
        .map(|(id, raw)| {
            let resolved = resolve_profile(config, id);
            ProfileRow {
                id: id.clone(),
                collection: raw.collection.clone().unwrap_or_else(|| id.clone()),
                npm: resolved.as_ref().map(|p| p.has_npm()).unwrap_or(false),
                is_default: default.as_deref() == Some(id.as_str()),
                problem: resolved.err().map(|e| e.to_string()),
            }
        })
        .collect()
}

pub fn list_profiles(config: &Config) -> Result<()> {
    let rows = profile_rows(config);
    if rows.is_empty() {
        println!("No profiles configured.");
        return Ok(());
    }
    println!("{:<16} {:<24} {:<5} STATUS", "PROFILE", "COLLECTION", "NPM");
    for row in rows {
        let marker = if row.is_default { "*" } else { "" };
        let status = row.problem.as_deref().unwrap_or("OK");
        println!(
            "{:<16} {:<24} {:<5} {}",
            format!("{}{}", row.id, marker),
            row.collection,
            if row.npm { "yes" } else { "no" },
            status
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn rows_report_validity() {
        let config = parse_config(
            r#"
default_profile = "plone"

[profiles.plone]
name = "Plone"
classifiers = ["Framework :: Plone"]
npm_keywords = ["volto-addon"]

[profiles.empty]
name = "Empty"
"#,
        )
        .unwrap();
        let rows = profile_rows(&config);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "empty");
        assert!(rows[0].problem.as_deref().unwrap().contains("empty classifiers"));
        assert!(rows[1].npm);
        assert!(rows[1].problem.is_none());
    }
}
