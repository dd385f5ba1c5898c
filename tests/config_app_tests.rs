//! Applications built from YAML configuration

mod common;

use axum::http::{HeaderValue, StatusCode, header};
use common::*;
use model_rest::prelude::*;
use std::io::Write;

const CONFIG: &str = r#"
rest:
  supported_types: [json, xml]
auth:
  enabled: true
models:
  - name: accessToken
    base: AccessToken
  - name: user
    base: User
    relations:
      - name: accessTokens
        model: accessToken
        foreign_key: userId
  - name: Note
    properties:
      title: { type: string, required: true }
      userId: any
    auth:
      list: authenticated
      get: owner
      create: authenticated
"#;

fn config_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_models_from_yaml() {
    let file = config_file();
    let app = Application::from_yaml_file(file.path()).unwrap();

    assert!(app.is_auth_enabled());
    assert_eq!(
        app.registry().model_names(),
        vec!["accessToken", "user", "Note"]
    );
    assert_eq!(
        app.lookup("Note").unwrap().negotiator().supported(),
        &[MediaType::Json, MediaType::ApplicationXml]
    );
}

#[tokio::test]
async fn test_configured_policies() {
    let file = config_file();
    let app = Application::from_yaml_file(file.path()).unwrap();
    let alice = given_logged_in_user(&app, EMAIL).await;
    let bob = given_logged_in_user(&app, "bob@example.com").await;
    let server = server(&app);
    let as_alice = HeaderValue::from_str(&alice.id).unwrap();
    let as_bob = HeaderValue::from_str(&bob.id).unwrap();

    server
        .post("/notes")
        .json(&json!({ "title": "anonymous" }))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let response = server
        .post("/notes")
        .add_header(header::AUTHORIZATION, as_alice.clone())
        .json(&json!({ "title": "mine", "userId": alice.user_id }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let note_id = response.json::<Value>()["id"].as_str().unwrap().to_string();

    server
        .get(&format!("/notes/{}", note_id))
        .add_header(header::AUTHORIZATION, as_alice.clone())
        .await
        .assert_status_ok();
    server
        .get(&format!("/notes/{}", note_id))
        .add_header(header::AUTHORIZATION, as_bob.clone())
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    // update and delete keep the public default
    server
        .put(&format!("/notes/{}", note_id))
        .json(&json!({ "title": "edited" }))
        .await
        .assert_status_ok();

    let response = server
        .get("/notes")
        .add_header(header::AUTHORIZATION, as_bob)
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Vec<Value>>().len(), 1);
}

#[test]
fn test_missing_file_is_an_error() {
    let err = Application::from_yaml_file("/nonexistent/model-rest.yaml").unwrap_err();
    assert!(format!("{:#}", err).contains("/nonexistent/model-rest.yaml"));
}
