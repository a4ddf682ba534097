//! `pkgindex collections` and `pkgindex show`: administration of the
//! versioned collections behind each alias.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `collections list` | Every collection with its document count and aliases |
//! | `collections aliases` | Every alias and the collection it points at |
//! | `collections recreate <name>` | Roll the alias to a new generation |
//! | `collections migrate --source --target` | Copy all documents |
//! | `collections alias --name --target` | Create or repoint an alias |
//! | `collections delete <name>` | Drop a concrete collection |
//! | `collections keys ...` | Search-only API keys |
//! | `show <package>` | Indexed releases of one package |
//!
//! The operations are generic over [`SearchIndex`] and take the
//! confirmation prompt as a callback, so they run unchanged against the
//! in-memory backend in tests.

use std::io::{BufRead, Write};

use anyhow::{bail, Context, Result};
use pkgindex_core::index::{SearchIndex, SearchParams};
use pkgindex_core::models::Document;
use pkgindex_core::schema::packages_schema;
use pkgindex_core::versioner::{copy_documents, CollectionVersioner, CopyStats, Generation};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::typesense::TypesenseClient;

/// Asks a yes/no question; the bool is the answer on empty input.
pub type Confirm<'a> = &'a dyn Fn(&str, bool) -> bool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionRow {
    pub name: String,
    pub num_documents: u64,
    pub aliases: Vec<String>,
}

pub async fn collection_rows<I: SearchIndex + ?Sized>(index: &I) -> Result<Vec<CollectionRow>> {
    let aliases = index.list_aliases().await?;
    let mut rows: Vec<CollectionRow> = index
        .list_collections()
        .await?
        .into_iter()
        .map(|c| CollectionRow {
            aliases: aliases
                .iter()
                .filter(|a| a.collection_name == c.name)
                .map(|a| a.name.clone())
                .collect(),
            name: c.name,
            num_documents: c.num_documents,
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(rows)
}

/// Roll `name` to its next generation. The previous generation is kept
/// when `keep_old` is set or the prompt is declined.
pub async fn recreate<I: SearchIndex + ?Sized>(
    index: &I,
    name: &str,
    keep_old: bool,
    force: bool,
    batch_size: usize,
    confirm: Confirm<'_>,
) -> Result<Generation> {
    let mut generation = CollectionVersioner::new(index, packages_schema(name))
        .keep_old(true)
        .batch_size(batch_size)
        .ensure(name)
        .await
        .with_context(|| format!("Failed to recreate '{}'", name))?;

    let Some(previous) = generation.previous.clone() else {
        return Ok(generation);
    };
    if keep_old {
        info!(collection = %previous, "previous generation kept");
        return Ok(generation);
    }
    let question = format!("Delete old collection '{}'? (Y/n)", previous);
    if force || confirm(&question, true) {
        index.delete_collection(&previous).await?;
        generation.previous_deleted = true;
        info!(collection = %previous, "previous generation deleted");
    }
    Ok(generation)
}

/// Copy `source` into `target`, creating `target` with the package schema
/// when it does not exist.
pub async fn migrate<I: SearchIndex + ?Sized>(
    index: &I,
    source: &str,
    target: &str,
    batch_size: usize,
) -> Result<CopyStats> {
    if !index.collection_exists(source).await? {
        bail!("source collection '{}' does not exist", source);
    }
    if !index.collection_exists(target).await? {
        info!(collection = target, "no target collection, creating one");
        index.create_collection(&packages_schema(target)).await?;
    }
    Ok(copy_documents(index, source, target, batch_size).await?)
}

pub async fn alias<I: SearchIndex + ?Sized>(index: &I, name: &str, target: &str) -> Result<()> {
    let exists = index
        .list_collections()
        .await?
        .iter()
        .any(|c| c.name == target);
    if !exists {
        bail!("collection '{}' does not exist", target);
    }
    index.upsert_alias(name, target).await?;
    info!(alias = name, collection = target, "alias set");
    Ok(())
}

/// Delete the concrete collection `name`. Alias names are refused. Returns
/// false when the prompt was declined.
pub async fn delete<I: SearchIndex + ?Sized>(
    index: &I,
    name: &str,
    force: bool,
    confirm: Confirm<'_>,
) -> Result<bool> {
    let concrete = index
        .list_collections()
        .await?
        .iter()
        .any(|c| c.name == name);
    if !concrete {
        if let Some(points_to) = index.retrieve_alias(name).await? {
            bail!(
                "'{}' is an alias pointing to '{}'. Delete the collection '{}' instead",
                name,
                points_to,
                points_to
            );
        }
        bail!("collection '{}' does not exist", name);
    }

    let pointing: Vec<String> = index
        .list_aliases()
        .await?
        .into_iter()
        .filter(|a| a.collection_name == name)
        .map(|a| a.name)
        .collect();
    if !pointing.is_empty() {
        warn!(collection = name, aliases = %pointing.join(", "), "aliases point at this collection");
    }

    let question = format!("Delete collection '{}'? (y/N)", name);
    if !force && !confirm(&question, false) {
        return Ok(false);
    }
    index.delete_collection(name).await?;
    info!(collection = name, "collection deleted");
    Ok(true)
}

/// Indexed releases of `package`, newest first. Only the newest unless
/// `all_versions`.
pub async fn show<I: SearchIndex + ?Sized>(
    index: &I,
    collection: &str,
    package: &str,
    all_versions: bool,
) -> Result<Vec<Document>> {
    let params = SearchParams {
        filter_by: Some(format!("name:=`{}`", package)),
        sort_by: Some("version_sortable:desc".to_string()),
        per_page: if all_versions { 250 } else { 1 },
        ..SearchParams::default()
    };
    let mut docs = index.search(collection, &params).await?.documents();
    if !all_versions {
        docs.truncate(1);
    }
    Ok(docs)
}

/// Interactive prompt on stdin. End of input takes the default.
pub fn prompt(question: &str, default: bool) -> bool {
    print!("{} ", question);
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return default;
    }
    match line.trim().to_lowercase().as_str() {
        "" => default,
        "y" | "yes" => true,
        _ => false,
    }
}

pub async fn run_list(config: &Config) -> Result<()> {
    let index = TypesenseClient::new(&config.index)?;
    let rows = collection_rows(&index).await?;
    println!("{:<32} {:>10}  ALIASES", "COLLECTION", "DOCUMENTS");
    for row in rows {
        println!(
            "{:<32} {:>10}  {}",
            row.name,
            row.num_documents,
            row.aliases.join(", ")
        );
    }
    Ok(())
}

pub async fn run_aliases(config: &Config) -> Result<()> {
    let index = TypesenseClient::new(&config.index)?;
    println!("{:<32} COLLECTION", "ALIAS");
    for alias in index.list_aliases().await? {
        println!("{:<32} {}", alias.name, alias.collection_name);
    }
    Ok(())
}

pub async fn run_recreate(config: &Config, name: &str, keep_old: bool, force: bool) -> Result<()> {
    let index = TypesenseClient::new(&config.index)?;
    let generation = recreate(&index, name, keep_old, force, config.build.batch_size, &prompt).await?;
    match &generation.previous {
        Some(previous) if generation.previous_deleted => println!(
            "'{}' -> '{}' ({} documents copied, '{}' deleted).",
            generation.logical, generation.current, generation.copied, previous
        ),
        Some(previous) => println!(
            "'{}' -> '{}' ({} documents copied, '{}' kept).",
            generation.logical, generation.current, generation.copied, previous
        ),
        None => println!("'{}' -> '{}' (new).", generation.logical, generation.current),
    }
    Ok(())
}

pub async fn run_migrate(config: &Config, source: &str, target: &str) -> Result<()> {
    let index = TypesenseClient::new(&config.index)?;
    let stats = migrate(&index, source, target, config.build.batch_size).await?;
    println!(
        "Copied '{}' -> '{}': {} exported, {} imported, {} rejected.",
        source, target, stats.exported, stats.imported, stats.rejected
    );
    Ok(())
}

pub async fn run_alias(config: &Config, name: &str, target: &str) -> Result<()> {
    let index = TypesenseClient::new(&config.index)?;
    alias(&index, name, target).await?;
    println!("Alias '{}' -> '{}'.", name, target);
    Ok(())
}

pub async fn run_delete(config: &Config, name: &str, force: bool) -> Result<()> {
    let index = TypesenseClient::new(&config.index)?;
    if delete(&index, name, force, &prompt).await? {
        println!("Deleted '{}'.", name);
    } else {
        println!("Aborted.");
    }
    Ok(())
}

pub async fn run_show(config: &Config, collection: &str, package: &str, all_versions: bool) -> Result<()> {
    let index = TypesenseClient::new(&config.index)?;
    let docs = show(&index, collection, package, all_versions).await?;
    if docs.is_empty() {
        bail!("package '{}' not found in '{}'", package, collection);
    }
    for doc in docs {
        println!("{}", serde_json::to_string_pretty(&doc)?);
    }
    Ok(())
}

pub async fn run_keys_list(config: &Config) -> Result<()> {
    let client = TypesenseClient::new(&config.index)?;
    println!("{:<8} {:<10} {:<24} COLLECTIONS", "ID", "PREFIX", "ACTIONS");
    for key in client.list_keys().await? {
        println!(
            "{:<8} {:<10} {:<24} {}",
            key.id.map(|id| id.to_string()).unwrap_or_default(),
            key.value_prefix.unwrap_or_default(),
            key.actions.join(","),
            key.collections.join(",")
        );
    }
    Ok(())
}

pub async fn run_keys_create(config: &Config, collection: &str, value: Option<&str>) -> Result<()> {
    let client = TypesenseClient::new(&config.index)?;
    let key = client.create_search_key(collection, value).await?;
    println!("{}", serde_json::to_string_pretty(&key)?);
    Ok(())
}

pub async fn run_keys_delete(config: &Config, id: u64) -> Result<()> {
    let client = TypesenseClient::new(&config.index)?;
    client.delete_key(id).await?;
    println!("Deleted API key {}.", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgindex_core::index::memory::InMemoryIndex;
    use pkgindex_core::index::ImportAction;
    use pkgindex_core::models::{PackageDocument, Registry};
    use pkgindex_core::transform::TransformChain;

    const NOW: i64 = 1_760_000_000;

    fn doc(name: &str, version: &str) -> Document {
        let mut pkg = PackageDocument::new(Registry::Pypi, name, version);
        pkg.upload_timestamp = NOW - 86_400;
        TransformChain::standard(NOW).apply(pkg)
    }

    async fn seeded() -> InMemoryIndex {
        let index = InMemoryIndex::new();
        index.create_collection(&packages_schema("packages-1")).await.unwrap();
        index.upsert_alias("packages", "packages-1").await.unwrap();
        let docs = vec![
            doc("plone.api", "1.0.0"),
            doc("plone.api", "2.0.0"),
            doc("plone.api", "2.1.0a1"),
            doc("collective.x", "0.1"),
        ];
        index
            .import_documents("packages", &docs, ImportAction::Upsert)
            .await
            .unwrap();
        index
    }

    fn yes(_: &str, _: bool) -> bool {
        true
    }

    fn no(_: &str, _: bool) -> bool {
        false
    }

    #[tokio::test]
    async fn list_marks_aliases() {
        let index = seeded().await;
        index.create_collection(&packages_schema("scratch")).await.unwrap();
        let rows = collection_rows(&index).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "packages-1");
        assert_eq!(rows[0].aliases, vec!["packages"]);
        assert_eq!(rows[0].num_documents, 4);
        assert!(rows[1].aliases.is_empty());
    }

    #[tokio::test]
    async fn recreate_deletes_previous_when_confirmed() {
        let index = seeded().await;
        let generation = recreate(&index, "packages", false, false, 2, &yes).await.unwrap();
        assert_eq!(generation.current, "packages-2");
        assert!(generation.previous_deleted);
        assert!(!index.collection_exists("packages-1").await.unwrap());
        assert_eq!(index.document_count("packages"), 4);
    }

    #[tokio::test]
    async fn recreate_keeps_previous_when_declined() {
        let index = seeded().await;
        let generation = recreate(&index, "packages", false, false, 2, &no).await.unwrap();
        assert!(!generation.previous_deleted);
        assert!(index.collection_exists("packages-1").await.unwrap());
        assert_eq!(index.retrieve_alias("packages").await.unwrap().as_deref(), Some("packages-2"));
    }

    #[tokio::test]
    async fn delete_refuses_alias_names() {
        let index = seeded().await;
        let err = delete(&index, "packages", true, &yes).await.unwrap_err();
        assert!(err.to_string().contains("'packages-1'"));
        assert!(delete(&index, "missing", true, &yes).await.is_err());
    }

    #[tokio::test]
    async fn delete_asks_unless_forced() {
        let index = seeded().await;
        assert!(!delete(&index, "packages-1", false, &no).await.unwrap());
        assert!(index.collection_exists("packages-1").await.unwrap());
        assert!(delete(&index, "packages-1", true, &no).await.unwrap());
        assert!(!index.collection_exists("packages-1").await.unwrap());
    }

    #[tokio::test]
    async fn migrate_creates_the_target() {
        let index = seeded().await;
        let stats = migrate(&index, "packages", "copy", 3).await.unwrap();
        assert_eq!(stats.imported, 4);
        assert_eq!(index.document_count("copy"), 4);
        assert!(migrate(&index, "nowhere", "copy", 3).await.is_err());
    }

    #[tokio::test]
    async fn alias_needs_an_existing_collection() {
        let index = seeded().await;
        assert!(alias(&index, "other", "nope").await.is_err());
        alias(&index, "other", "packages-1").await.unwrap();
        assert_eq!(index.retrieve_alias("other").await.unwrap().as_deref(), Some("packages-1"));
    }

    #[tokio::test]
    async fn show_sorts_newest_first() {
        let index = seeded().await;
        let newest = show(&index, "packages", "plone.api", false).await.unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0]["version"], "2.0.0");

        let all = show(&index, "packages", "plone.api", true).await.unwrap();
        let versions: Vec<&str> = all.iter().map(|d| d["version"].as_str().unwrap()).collect();
        assert_eq!(versions, vec!["2.0.0", "1.0.0", "2.1.0a1"]);
    }
}
