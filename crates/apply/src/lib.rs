//! devkube apply: load multi-document YAML/JSON manifests into dynamic objects.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use kube::core::DynamicObject;
use serde::Deserialize;
use serde_json::Value as Json;
use tracing::debug;

pub type Result<T, E = ManifestError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML payload too large (>{0} bytes)")]
    TooLarge(usize),

    #[error("YAML document too complex (>{0} nodes)")]
    TooComplex(usize),

    #[error("parsing YAML document {index}: {source}")]
    Yaml {
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("document {index}: {source}")]
    Convert {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("document {index}: YAML missing {field}")]
    MissingField { index: usize, field: &'static str },

    #[error("getting {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("getting {url}: server answered {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("loading objects from {url}: {source}")]
    Remote {
        url: String,
        #[source]
        source: Box<ManifestError>,
    },
}

impl ManifestError {
    fn remote(url: &str, source: ManifestError) -> Self {
        ManifestError::Remote { url: url.to_string(), source: Box::new(source) }
    }
}

fn env_limit(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(default)
}

/// Per-source byte budget, `DEVKUBE_MAX_YAML_BYTES` (1 MiB default).
pub fn max_yaml_bytes() -> usize {
    env_limit("DEVKUBE_MAX_YAML_BYTES", 1_000_000)
}

/// Per-document node budget, `DEVKUBE_MAX_YAML_NODES`.
pub fn max_yaml_nodes() -> usize {
    env_limit("DEVKUBE_MAX_YAML_NODES", 100_000)
}

fn json_node_budget_exceeded(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur >= max {
            return;
        }
        *cur += 1;
        let children: Box<dyn Iterator<Item = &Json>> = match v {
            Json::Object(map) => Box::new(map.values()),
            Json::Array(arr) => Box::new(arr.iter()),
            _ => return,
        };
        for vv in children {
            if *cur >= max {
                break;
            }
            walk(vv, cur, max);
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count >= max
}

fn str_at<'a>(v: &'a Json, path: &str) -> Option<&'a str> {
    v.pointer(path).and_then(|s| s.as_str()).filter(|s| !s.is_empty())
}

fn is_list(v: &Json) -> bool {
    str_at(v, "/kind").is_some_and(|k| k.ends_with("List")) && v.get("items").is_some_and(|i| i.is_array())
}

fn push_object(json: Json, index: usize, out: &mut Vec<DynamicObject>) -> Result<()> {
    if is_list(&json) {
        if let Some(Json::Array(items)) = json.get("items") {
            for item in items {
                push_object(item.clone(), index, out)?;
            }
        }
        return Ok(());
    }
    if str_at(&json, "/apiVersion").is_none() {
        return Err(ManifestError::MissingField { index, field: "apiVersion" });
    }
    if str_at(&json, "/kind").is_none() {
        return Err(ManifestError::MissingField { index, field: "kind" });
    }
    if str_at(&json, "/metadata/name").is_none() {
        return Err(ManifestError::MissingField { index, field: "metadata.name" });
    }
    let obj = serde_json::from_value(json).map_err(|source| ManifestError::Convert { index, source })?;
    out.push(obj);
    Ok(())
}

/// Parse every document in `bytes`, in order. Empty documents are skipped and
/// `*List` documents contribute their items.
pub fn load_from_bytes(bytes: &[u8]) -> Result<Vec<DynamicObject>> {
    let limit = max_yaml_bytes();
    if bytes.len() > limit {
        return Err(ManifestError::TooLarge(limit));
    }
    let nodes = max_yaml_nodes();
    let mut out = Vec::new();
    for (index, doc) in serde_yaml::Deserializer::from_slice(bytes).enumerate() {
        let val = serde_yaml::Value::deserialize(doc).map_err(|source| ManifestError::Yaml { index, source })?;
        if val.is_null() {
            continue;
        }
        let json = serde_json::to_value(val).map_err(|source| ManifestError::Convert { index, source })?;
        if json_node_budget_exceeded(&json, nodes) {
            return Err(ManifestError::TooComplex(nodes));
        }
        push_object(json, index, &mut out)?;
    }
    Ok(out)
}

pub fn load_from_file(path: &Path) -> Result<Vec<DynamicObject>> {
    let bytes = std::fs::read(path).map_err(|source| ManifestError::Io { path: path.to_path_buf(), source })?;
    let objs = load_from_bytes(&bytes)?;
    debug!(path = %path.display(), count = objs.len(), "loaded manifests");
    Ok(objs)
}

fn is_manifest(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml" | "json"))
}

/// Loads the manifest files directly inside `dir`, in file name order.
/// Other files and subdirectories are ignored.
pub fn load_from_folder(dir: &Path) -> Result<Vec<DynamicObject>> {
    let io_err = |source| ManifestError::Io { path: dir.to_path_buf(), source };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && is_manifest(&path) {
            files.push(path);
        }
    }
    files.sort();
    let mut out = Vec::new();
    for file in files {
        out.extend(load_from_file(&file)?);
    }
    Ok(out)
}

/// Files are loaded as is, directories through [`load_from_folder`].
pub fn load_from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<DynamicObject>> {
    let mut out = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if path.is_dir() {
            out.extend(load_from_folder(path)?);
        } else {
            out.extend(load_from_file(path)?);
        }
    }
    Ok(out)
}

pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Fetches `url` and parses the body. The body is held to the same byte
/// budget as files and is rejected as soon as it exceeds it.
pub async fn load_from_http(client: &reqwest::Client, url: &str) -> Result<Vec<DynamicObject>> {
    let http_err = |source| ManifestError::Http { url: url.to_string(), source };
    let mut resp = client.get(url).send().await.map_err(http_err)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(ManifestError::HttpStatus { url: url.to_string(), status: status.as_u16() });
    }
    let limit = max_yaml_bytes();
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await.map_err(http_err)? {
        if body.len() + chunk.len() > limit {
            return Err(ManifestError::remote(url, ManifestError::TooLarge(limit)));
        }
        body.extend_from_slice(&chunk);
    }
    let objs = load_from_bytes(&body).map_err(|e| ManifestError::remote(url, e))?;
    debug!(url = %url, count = objs.len(), "loaded manifests");
    Ok(objs)
}

/// Loads every URL in order with one shared client.
pub async fn load_from_urls<U: AsRef<str>>(urls: &[U]) -> Result<Vec<DynamicObject>> {
    let client = reqwest::Client::new();
    let mut out = Vec::new();
    for url in urls {
        out.extend(load_from_http(&client, url.as_ref()).await?);
    }
    Ok(out)
}

/// Mixed sources in order: `http(s)://` URLs are fetched, anything else goes
/// through [`load_from_paths`].
pub async fn load_from_sources<S: AsRef<str>>(sources: &[S]) -> Result<Vec<DynamicObject>> {
    let mut client = None;
    let mut out = Vec::new();
    for source in sources {
        let source = source.as_ref();
        if is_url(source) {
            let client = client.get_or_insert_with(reqwest::Client::new);
            out.extend(load_from_http(client, source).await?);
        } else {
            out.extend(load_from_paths(&[source])?);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(objs: &[DynamicObject]) -> Vec<&str> {
        objs.iter().filter_map(|o| o.metadata.name.as_deref()).collect()
    }

    #[test]
    fn multi_document_yaml_keeps_order_and_skips_empty() {
        let y = "---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\n---\napiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: b\n  namespace: web\n";
        let objs = load_from_bytes(y.as_bytes()).unwrap();
        assert_eq!(names(&objs), vec!["a", "b"]);
        let types = objs[1].types.as_ref().unwrap();
        assert_eq!(types.api_version, "apps/v1");
        assert_eq!(objs[1].metadata.namespace.as_deref(), Some("web"));
    }

    #[test]
    fn json_document_loads() {
        let j = r#"{"apiVersion":"v1","kind":"Secret","metadata":{"name":"s"},"data":{}}"#;
        assert_eq!(names(&load_from_bytes(j.as_bytes()).unwrap()), vec!["s"]);
    }

    #[test]
    fn list_items_are_expanded() {
        let y = "apiVersion: v1\nkind: List\nitems:\n- apiVersion: v1\n  kind: ConfigMap\n  metadata:\n    name: x\n- apiVersion: v1\n  kind: ConfigMap\n  metadata:\n    name: y\n";
        assert_eq!(names(&load_from_bytes(y.as_bytes()).unwrap()), vec!["x", "y"]);
    }

    #[test]
    fn missing_fields_are_friendly() {
        let e1 = load_from_bytes(b"kind: Foo\nmetadata:\n  name: x\n").unwrap_err().to_string();
        assert!(e1.contains("missing apiVersion"), "e1={}", e1);

        let e2 = load_from_bytes(b"apiVersion: v1\nmetadata:\n  name: x\n").unwrap_err().to_string();
        assert!(e2.contains("missing kind"), "e2={}", e2);

        let e3 = load_from_bytes(b"apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n").unwrap_err().to_string();
        assert!(e3.contains("missing metadata.name"), "e3={}", e3);
    }

    #[test]
    fn error_names_the_failing_document() {
        let y = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: ok\n---\napiVersion: v1\nmetadata:\n  name: bad\n";
        match load_from_bytes(y.as_bytes()).unwrap_err() {
            ManifestError::MissingField { index, field } => {
                assert_eq!(index, 1);
                assert_eq!(field, "kind");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn invalid_yaml_is_error() {
        assert!(matches!(load_from_bytes(b"a: [1, 2\n"), Err(ManifestError::Yaml { .. })));
    }

    #[test]
    fn node_budget_counts_nested_values() {
        let v = serde_json::json!({ "a": [1, 2, 3], "b": { "c": true } });
        assert!(!json_node_budget_exceeded(&v, 100));
        assert!(json_node_budget_exceeded(&v, 3));
    }

    #[test]
    fn folder_loads_manifests_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("20-b.yml"), "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n").unwrap();
        std::fs::write(dir.path().join("10-a.json"), r#"{"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"a"}}"#).unwrap();
        std::fs::write(dir.path().join("README.md"), "# not a manifest").unwrap();
        std::fs::create_dir(dir.path().join("nested.yaml")).unwrap();
        let objs = load_from_folder(dir.path()).unwrap();
        assert_eq!(names(&objs), vec!["a", "b"]);

        let file = dir.path().join("20-b.yml");
        let mixed = load_from_paths(&[file.as_path(), dir.path()]).unwrap();
        assert_eq!(names(&mixed), vec!["b", "a", "b"]);
    }

    #[test]
    fn only_http_schemes_are_urls() {
        assert!(is_url("https://example.com/m.yaml"));
        assert!(is_url("http://127.0.0.1:8080/m.yaml"));
        assert!(!is_url("manifests/http.yaml"));
        assert!(!is_url("ftp://example.com/m.yaml"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_from_file(Path::new("/nonexistent/x.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/x.yaml"), "err={}", err);
    }
}
