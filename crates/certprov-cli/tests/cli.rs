//! End-to-end tests for the `certprov` binary.

use assert_cmd::Command;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use predicates::prelude::*;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SCOPE: &str = "0ne00000A0A";

/// A `certprov` command isolated from the caller's environment and config.
fn certprov(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("certprov").unwrap();
    cmd.arg("--config")
        .arg(dir.join("config.toml"))
        .arg("--no-color")
        .env_remove("DPS_IDSCOPE")
        .env_remove("DPS_X509_CERTIFICATE_PATH")
        .env_remove("DPS_X509_CERTIFICATE_PASSWORD")
        .env_remove("DPS_GLOBAL_ENDPOINT")
        .env_remove("CERTPROV_BASE_URL")
        .env_remove("CERTPROV_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

fn self_signed(common_name: &str) -> (String, String) {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec![common_name.to_string()]).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    let cert = params.self_signed(&key).unwrap();
    (cert.pem(), key.serialize_pem())
}

/// PEM bundle with a key-less CA certificate followed by a device certificate and its key.
fn write_bundle(dir: &Path) -> PathBuf {
    let (ca, _) = self_signed("Contoso Test CA");
    let (device, key) = self_signed("iothubx509device1");
    let path = dir.join("bundle.pem");
    std::fs::write(&path, [ca, device, key].concat()).unwrap();
    path
}

async fn mock_service(server: &MockServer, attestation: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(format!("/{SCOPE}/sessions")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sessionId": "s-1",
            "nonce": STANDARD.encode(b"challenge"),
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/{SCOPE}/sessions/s-1/attestation")))
        .respond_with(attestation)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/{SCOPE}/sessions/s-1/registration")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "assigned",
            "assignedHub": "contoso.azure-devices.net",
            "deviceId": "iothubx509device1",
        })))
        .mount(server)
        .await;
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    certprov(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("provision"))
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_provision_requires_scope() {
    let dir = TempDir::new().unwrap();
    let bundle = write_bundle(dir.path());
    certprov(dir.path())
        .args(["provision", "--certificate"])
        .arg(&bundle)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Scope identifier required"));
}

#[test]
fn test_inspect_selects_first_certificate_with_key() {
    let dir = TempDir::new().unwrap();
    let bundle = write_bundle(dir.path());

    let output = certprov(dir.path())
        .args(["-o", "json", "inspect", "-c"])
        .arg(&bundle)
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["certificates"].as_array().unwrap().len(), 2);
    assert_eq!(report["selected"], 1);
    assert_eq!(report["registration_id"], "iothubx509device1");
    assert_eq!(report["certificates"][0]["has_private_key"], false);
}

#[test]
fn test_inspect_without_key_fails() {
    let dir = TempDir::new().unwrap();
    let (ca, _) = self_signed("Contoso Test CA");
    let bundle = dir.path().join("ca.pem");
    std::fs::write(&bundle, ca).unwrap();

    certprov(dir.path())
        .args(["inspect", "-c"])
        .arg(&bundle)
        .assert()
        .failure()
        .stderr(predicate::str::contains("private key"));
}

#[test]
fn test_inspect_missing_store() {
    let dir = TempDir::new().unwrap();
    certprov(dir.path())
        .args(["inspect", "-c"])
        .arg(dir.path().join("missing.pfx"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_config_set_show_unset() {
    let dir = TempDir::new().unwrap();

    certprov(dir.path())
        .args(["config", "set", "scope_id", SCOPE])
        .assert()
        .success();
    certprov(dir.path())
        .args(["config", "set", "certificate_password", "1234"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1234").not());

    let output = certprov(dir.path())
        .args(["-o", "json", "config", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let shown: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["scope_id"], SCOPE);
    assert_eq!(shown["certificate_password"], "********");

    certprov(dir.path())
        .args(["config", "unset", "scope_id"])
        .assert()
        .success();
    let saved = std::fs::read_to_string(dir.path().join("config.toml")).unwrap();
    assert!(!saved.contains(SCOPE));

    certprov(dir.path())
        .args(["config", "set", "colour", "blue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown config key"));
}

#[test]
fn test_config_path_honors_override() {
    let dir = TempDir::new().unwrap();
    certprov(dir.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_provision_assigned() {
    let server = MockServer::start().await;
    mock_service(&server, ResponseTemplate::new(204)).await;

    let dir = TempDir::new().unwrap();
    let bundle = write_bundle(dir.path());
    let uri = server.uri();

    let output = tokio::task::spawn_blocking(move || {
        certprov(dir.path())
            .args(["-o", "json", "provision", SCOPE, "--base-url", &uri, "-c"])
            .arg(&bundle)
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["state"]["state"], "assigned");
    assert_eq!(report["registration_id"], "iothubx509device1");
    assert_eq!(report["result"]["assigned_hub"], "contoso.azure-devices.net");
    assert_eq!(report["connect_attempts"], 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_provision_rejected_certificate() {
    let server = MockServer::start().await;
    mock_service(
        &server,
        ResponseTemplate::new(401).set_body_json(json!({ "message": "unknown certificate" })),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let bundle = write_bundle(dir.path());
    let uri = server.uri();

    let output = tokio::task::spawn_blocking(move || {
        certprov(dir.path())
            .args(["-o", "json", "provision", "--scope", SCOPE, "--base-url", &uri])
            .args(["--max-retries", "0", "-c"])
            .arg(&bundle)
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["state"]["state"], "failed");
    assert_eq!(report["error"]["kind"], "authentication_rejected");
}
