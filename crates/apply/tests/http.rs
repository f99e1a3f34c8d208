use axum::{http::StatusCode, routing::get, Router};
use devkube_apply::{load_from_http, load_from_sources, load_from_urls, ManifestError};

const MANIFESTS: &str = "\
apiVersion: v1
kind: ConfigMap
metadata:
  name: first
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: second
";

/// Serves `app` on an ephemeral local port and returns its base URL.
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn names(objs: &[kube::core::DynamicObject]) -> Vec<&str> {
    objs.iter().filter_map(|o| o.metadata.name.as_deref()).collect()
}

#[tokio::test]
async fn multi_document_body_loads_in_order() {
    let base = serve(Router::new().route("/m.yaml", get(|| async { MANIFESTS }))).await;
    let objs = load_from_http(&reqwest::Client::new(), &format!("{}/m.yaml", base)).await.unwrap();
    assert_eq!(names(&objs), vec!["first", "second"]);
}

#[tokio::test]
async fn error_status_names_the_url() {
    let base = serve(Router::new().route("/gone", get(|| async { StatusCode::NOT_FOUND }))).await;
    let url = format!("{}/gone", base);
    let err = load_from_urls(&[url.as_str()]).await.unwrap_err();
    assert!(matches!(err, ManifestError::HttpStatus { status: 404, .. }), "got {err:?}");
    assert!(err.to_string().contains(&url), "got {err}");
}

#[tokio::test]
async fn oversized_body_is_rejected_with_the_url() {
    let big = "#".repeat(devkube_apply::max_yaml_bytes() + 1);
    let base = serve(Router::new().route("/big", get(move || async move { big }))).await;
    let url = format!("{}/big", base);
    let err = load_from_urls(&[url.as_str()]).await.unwrap_err();
    match &err {
        ManifestError::Remote { source, .. } => assert!(matches!(**source, ManifestError::TooLarge(_))),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains(&url), "got {err}");
}

#[tokio::test]
async fn bad_document_names_the_url() {
    let base = serve(Router::new().route("/bad", get(|| async { "kind: ConfigMap\nmetadata:\n  name: x\n" }))).await;
    let url = format!("{}/bad", base);
    let err = load_from_urls(&[url.as_str()]).await.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains(&url) && msg.contains("YAML missing apiVersion"), "got {msg}");
}

#[tokio::test]
async fn unreachable_server_is_an_http_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/m.yaml", listener.local_addr().unwrap());
    drop(listener);
    let err = load_from_urls(&[url.as_str()]).await.unwrap_err();
    assert!(matches!(err, ManifestError::Http { .. }), "got {err:?}");
}

#[tokio::test]
async fn files_and_urls_mix_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("local.yaml");
    std::fs::write(&file, "apiVersion: v1\nkind: Secret\nmetadata:\n  name: local\n").unwrap();
    let base = serve(Router::new().route("/m.yaml", get(|| async { MANIFESTS }))).await;

    let sources = vec![format!("{}/m.yaml", base), file.display().to_string()];
    let objs = load_from_sources(&sources).await.unwrap();
    assert_eq!(names(&objs), vec!["first", "second", "local"]);
}
