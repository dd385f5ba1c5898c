//! Notes API served from `demos/config.yaml`
//!
//! Run with `cargo run --example server`, then:
//!
//! ```text
//! curl -X POST localhost:3000/users -H 'content-type: application/json' \
//!      -d '{"email":"me@example.com","password":"pwd"}'
//! curl -X POST localhost:3000/users/login -H 'content-type: application/json' \
//!      -d '{"email":"me@example.com","password":"pwd"}'
//! curl localhost:3000/notes/mine -H 'Authorization: <token id>'
//! ```

use model_rest::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/config.yaml");
    let app = Application::from_yaml_file(path)?;
    tracing::info!(models = ?app.registry().model_names(), "loaded configuration");

    let notes = app
        .lookup("Note")
        .ok_or_else(|| anyhow::anyhow!("Note model missing from {}", path))?;

    // GET /notes/mine: notes owned by the caller
    app.remote_method(
        "Note",
        RemoteMethod::new("mine", Verb::Get, move |args: RemoteArgs| {
            let notes = notes.clone();
            async move {
                let user_id = args
                    .request()
                    .and_then(|ctx| ctx.user_id())
                    .map(str::to_string)
                    .ok_or(RestError::Unauthenticated)?;

                let mut by_owner = serde_json::Map::new();
                by_owner.insert("userId".to_string(), json!(user_id));
                let owned = notes.find(&Filter::matching(by_owner)).await?;

                Ok(Value::Array(
                    owned.iter().map(|n| notes.definition().present(n)).collect(),
                ))
            }
        })
        .accepts(ParamBinding::request("req"))
        .policy("authenticated"),
    )?;

    app.serve_configured().await
}
