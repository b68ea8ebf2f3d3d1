//! Manifest discovery and YAML parsing
//!
//! A manifest source is a single file or a directory searched recursively
//! for `.yaml`/`.yml` files. A file may hold several YAML documents; each
//! document is one manifest, a list of manifests, or a mapping with a
//! `manifests` list.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use reconcile::{ManifestSet, RawManifest};

#[derive(Deserialize)]
#[serde(untagged)]
enum Document {
    Wrapped { manifests: Vec<RawManifest> },
    List(Vec<RawManifest>),
    Single(Box<RawManifest>),
}

/// Load and validate every manifest under `path`
pub fn load(path: &Path) -> Result<ManifestSet> {
    let raw = load_raw(path)?;
    log::info!("Loaded {} manifests from {}", raw.len(), path.display());
    ManifestSet::from_raw(raw).context("Invalid manifests")
}

/// Parse every manifest under `path` without validating them
pub fn load_raw(path: &Path) -> Result<Vec<RawManifest>> {
    let files = discover(path)?;
    if files.is_empty() {
        bail!("No manifest files (.yaml, .yml) found in {}", path.display());
    }

    let mut manifests = Vec::new();
    for file in &files {
        let content = fs::read_to_string(file)
            .with_context(|| format!("Could not read {}", file.display()))?;
        let parsed =
            parse_str(&content).with_context(|| format!("Invalid manifest file {}", file.display()))?;
        log::debug!("{}: {} manifests", file.display(), parsed.len());
        manifests.extend(parsed);
    }
    Ok(manifests)
}

/// Manifest files under `path`, sorted for a stable load order
pub fn discover(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        bail!("Manifest path does not exist: {}", path.display());
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_manifest_file(entry.path()))
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    Ok(files)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

fn is_manifest_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

/// Parse the YAML documents of one file
pub fn parse_str(content: &str) -> Result<Vec<RawManifest>> {
    let mut manifests = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .with_context(|| format!("YAML error in document {}", index + 1))?;
        if value.is_null() {
            continue;
        }
        let parsed: Document = serde_yaml::from_value(value)
            .with_context(|| format!("Document {} is not a manifest or list of manifests", index + 1))?;
        match parsed {
            Document::Wrapped { manifests: list } | Document::List(list) => manifests.extend(list),
            Document::Single(manifest) => manifests.push(*manifest),
        }
    }
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CATEGORY: &str = r##"
id: type1
kind: items_type
spec:
  title: Reagent
  color: "#29AEB9"
  fields:
    - name: Supplier
    - group: Physical
      fields:
        - name: Mass
          type: number
          unit: g
          units: [g, kg]
"##;

    const ITEMS: &str = r"
- id: item1
  kind: item
  spec:
    title: Buffer A
    category: type1
    field_values:
      Mass: { value: 3, unit: kg }
- id: item2
  kind: item
  spec:
    title: Buffer B
    category: type1
";

    #[test]
    fn test_parse_document_shapes() {
        let wrapped = "manifests:\n  - id: tpl\n    kind: experiments_template\n    spec:\n      title: Assay\n";
        let content = format!("{CATEGORY}\n---\n{ITEMS}\n---\n{wrapped}---\n");
        let manifests = parse_str(&content).unwrap();
        let ids: Vec<_> = manifests.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["type1", "item1", "item2", "tpl"]);
    }

    #[test]
    fn test_parse_error_names_document() {
        let err = parse_str("id: a\nkind: item\n---\n- 3\n").unwrap_err();
        assert!(format!("{err:#}").contains("Document 2"));
    }

    #[test]
    fn test_load_directory() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("items")).unwrap();
        fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        fs::write(dir.path().join("categories.yaml"), CATEGORY).unwrap();
        fs::write(dir.path().join("items").join("buffers.yml"), ITEMS).unwrap();
        fs::write(dir.path().join(".hidden").join("skip.yaml"), "not: [valid").unwrap();
        fs::write(dir.path().join("README.md"), "# notes").unwrap();

        let set = load(dir.path()).unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains("item1"));

        let mass = set
            .get("item1")
            .unwrap()
            .spec
            .fields()
            .find(|f| f.name == "Mass")
            .unwrap();
        assert_eq!(mass.unit.as_deref(), Some("kg"));
    }

    #[test]
    fn test_load_single_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("one.yaml");
        fs::write(&path, CATEGORY).unwrap();
        assert_eq!(discover(&path).unwrap(), [path.clone()]);
        assert_eq!(load(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        assert!(load_raw(dir.path()).is_err());
        assert!(discover(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_validation_errors_surface() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("dup.yaml"),
            "- {id: a, kind: item, spec: {title: A}}\n- {id: a, kind: item, spec: {title: B}}\n",
        )
        .unwrap();
        let err = load(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate manifest id 'a'"));
    }
}
