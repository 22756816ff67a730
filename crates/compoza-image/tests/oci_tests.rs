//! OCI Distribution client: bearer-token flow, digests, versions, tag scan

mod common;

use common::*;
use compoza_image::{ImageRef, OciClient, RegistryType, VersionResolver};
use serde_json::json;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPO: &str = "org/app";

fn oci(server: &MockServer) -> OciClient {
    clients_for(server, no_credentials()).oci_for(&ImageRef::parse(&format!("{}/{}", TEST_REGISTRY, REPO)))
}

#[tokio::test]
async fn test_bearer_challenge_fetches_one_token_and_retries_once() {
    let server = MockServer::start().await;
    let manifest_path = format!("/v2/{}/manifests/latest", REPO);

    Mock::given(method("HEAD"))
        .and(path(manifest_path.as_str()))
        .and(header("authorization", "Bearer t0ken"))
        .respond_with(ResponseTemplate::new(200).insert_header("docker-content-digest", NEW_DIGEST))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(manifest_path.as_str()))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("www-authenticate", bearer_challenge(&server, "token", REPO).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t0ken"})))
        .expect(1)
        .mount(&server)
        .await;

    let digest = oci(&server).get_digest_for_tag(REPO, "latest").await.unwrap();
    assert_eq!(digest.as_deref(), Some(NEW_DIGEST));
}

#[tokio::test]
async fn test_second_unauthorized_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path(format!("/v2/{}/manifests/latest", REPO)))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("www-authenticate", bearer_challenge(&server, "token", REPO).as_str()),
        )
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "t0ken"})))
        .expect(1)
        .mount(&server)
        .await;

    let digest = oci(&server).get_digest_for_tag(REPO, "latest").await.unwrap();
    assert!(digest.is_none());
}

#[tokio::test]
async fn test_cached_token_is_reused() {
    let server = MockServer::start().await;
    let manifest_path = format!("/v2/{}/manifests/latest", REPO);

    Mock::given(method("HEAD"))
        .and(path(manifest_path.as_str()))
        .and(header("authorization", "Bearer t0ken"))
        .respond_with(ResponseTemplate::new(200).insert_header("docker-content-digest", NEW_DIGEST))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(manifest_path.as_str()))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("www-authenticate", bearer_challenge(&server, "token", REPO).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t0ken"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = oci(&server);
    for _ in 0..2 {
        let digest = client.get_digest_for_tag(REPO, "latest").await.unwrap();
        assert_eq!(digest.as_deref(), Some(NEW_DIGEST));
    }
}

#[tokio::test]
async fn test_rejected_credentials_are_disabled_and_token_fetched_anonymously() {
    let server = MockServer::start().await;
    let manifest_path = format!("/v2/{}/manifests/latest", REPO);
    // Realm path contains the GHCR host so the GHCR token is offered
    let realm = "ghcr.io/token";

    Mock::given(method("HEAD"))
        .and(path(manifest_path.as_str()))
        .and(header("authorization", "Bearer anon"))
        .respond_with(ResponseTemplate::new(200).insert_header("docker-content-digest", NEW_DIGEST))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(manifest_path.as_str()))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("www-authenticate", bearer_challenge(&server, realm, REPO).as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ghcr.io/token"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ghcr.io/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "anon"})))
        .expect(1)
        .mount(&server)
        .await;

    let clients = clients_for(&server, ghcr_credentials());
    let client = clients.oci_for(&ImageRef::parse(&format!("{}/{}", TEST_REGISTRY, REPO)));
    let digest = client.get_digest_for_tag(REPO, "latest").await.unwrap();

    assert_eq!(digest.as_deref(), Some(NEW_DIGEST));
    assert!(clients.credentials().is_disabled(RegistryType::Ghcr));
}

#[tokio::test]
async fn test_rate_limit_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(format!("/v2/{}/manifests/latest", REPO)))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = oci(&server)
        .get_digest_for_tag(REPO, "latest")
        .await
        .unwrap_err();
    assert!(err.is_rate_limited());
}

#[tokio::test]
async fn test_missing_manifest_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(format!("/v2/{}/manifests/gone", REPO)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let digest = oci(&server).get_digest_for_tag(REPO, "gone").await.unwrap();
    assert!(digest.is_none());
}

#[tokio::test]
async fn test_version_from_index_annotations() {
    let server = MockServer::start().await;
    mock_manifest(
        &server,
        REPO,
        NEW_DIGEST,
        image_index(json!({"org.opencontainers.image.version": "2.4.1"})),
    )
    .await;

    let version = oci(&server)
        .get_version_from_digest(REPO, NEW_DIGEST)
        .await
        .unwrap();
    assert_eq!(version.as_deref(), Some("2.4.1"));
}

#[tokio::test]
async fn test_version_from_platform_config_labels() {
    let server = MockServer::start().await;
    mock_manifest(&server, REPO, NEW_DIGEST, image_index(json!({}))).await;
    mock_manifest(&server, REPO, AMD64_DIGEST, image_manifest()).await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/blobs/{}", REPO, CONFIG_DIGEST)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "architecture": "amd64",
            "os": "linux",
            "config": {"Labels": {"org.label-schema.version": "2.4.0"}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let version = oci(&server)
        .get_version_from_digest(REPO, NEW_DIGEST)
        .await
        .unwrap();
    assert_eq!(version.as_deref(), Some("2.4.0"));
}

#[tokio::test]
async fn test_version_absent_everywhere_is_none() {
    let server = MockServer::start().await;
    mock_manifest(&server, REPO, NEW_DIGEST, image_manifest()).await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/blobs/{}", REPO, CONFIG_DIGEST)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"config": {"Labels": null}})))
        .mount(&server)
        .await;

    let version = oci(&server)
        .get_version_from_digest(REPO, NEW_DIGEST)
        .await
        .unwrap();
    assert!(version.is_none());
}

#[tokio::test]
async fn test_list_tags_resolves_version_tags_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/tags/list", REPO)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": REPO,
            "tags": ["latest", "1.0", "1.1.0", "sha-abc123", "nightly"]
        })))
        .mount(&server)
        .await;
    mock_head_digest(&server, REPO, "1.1.0", NEW_DIGEST).await;
    mock_head_digest(&server, REPO, "1.0", OLD_DIGEST).await;
    Mock::given(method("HEAD"))
        .and(path(format!("/v2/{}/manifests/latest", REPO)))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let tags = oci(&server).list_tags(REPO).await.unwrap();
    let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["1.1.0", "1.0"]);
    assert_eq!(tags[0].digest, NEW_DIGEST);
}

#[tokio::test]
async fn test_resolver_uses_semver_tag_without_network() {
    let server = MockServer::start().await;
    let resolver = VersionResolver::new(clients_for(&server, no_credentials()));

    let versions = resolver
        .resolve_versions(
            &ImageRef::parse("ghcr.io/org/app:v1.4.2"),
            Some(OLD_DIGEST),
            Some(NEW_DIGEST),
        )
        .await;

    assert_eq!(versions.current_version.as_deref(), Some("v1.4.2"));
    assert_eq!(versions.latest_version.as_deref(), Some("v1.4.2"));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resolver_reads_both_digests() {
    let server = MockServer::start().await;
    mock_manifest(
        &server,
        REPO,
        OLD_DIGEST,
        image_index(json!({"org.opencontainers.image.version": "1.9.0"})),
    )
    .await;
    mock_manifest(
        &server,
        REPO,
        NEW_DIGEST,
        image_index(json!({"org.opencontainers.image.version": "2.0.0"})),
    )
    .await;

    let resolver = VersionResolver::new(clients_for(&server, no_credentials()));
    let versions = resolver
        .resolve_versions(
            &ImageRef::parse(&format!("{}/{}:stable", TEST_REGISTRY, REPO)),
            Some(OLD_DIGEST),
            Some(NEW_DIGEST),
        )
        .await;

    assert_eq!(versions.current_version.as_deref(), Some("1.9.0"));
    assert_eq!(versions.latest_version.as_deref(), Some("2.0.0"));
}

#[tokio::test]
async fn test_resolver_tag_scan_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/manifests/{}", REPO, NEW_DIGEST)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/tags/list", REPO)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": REPO,
            "tags": ["stable", "5.1", "5.1.3"]
        })))
        .mount(&server)
        .await;
    mock_head_digest(&server, REPO, "5.1.3", NEW_DIGEST).await;
    mock_head_digest(&server, REPO, "5.1", NEW_DIGEST).await;

    let resolver = VersionResolver::new(clients_for(&server, no_credentials()))
        .with_tag_scan_fallback(true);
    let versions = resolver
        .resolve_versions(
            &ImageRef::parse(&format!("{}/{}:stable", TEST_REGISTRY, REPO)),
            None,
            Some(NEW_DIGEST),
        )
        .await;

    assert!(versions.current_version.is_none());
    assert_eq!(versions.latest_version.as_deref(), Some("5.1.3"));
}
