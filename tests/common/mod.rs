//! Shared fixtures for the HTTP tests

#![allow(dead_code)]

use axum_test::TestServer;
use model_rest::prelude::*;

pub const EMAIL: &str = "user@example.com";
pub const PASSWORD: &str = "pwd";

pub fn server(app: &Application) -> TestServer {
    TestServer::new(app.rest())
}

/// App with a `MyModel` model holding an optional `name`
pub fn app_with_my_model() -> Application {
    let app = Application::new();
    app.model(
        ModelDefinition::new("MyModel").property("name", PropertyDef::optional(PropertyType::String)),
    )
    .unwrap();
    app
}

/// Register `accessToken` and `user` models linked by `userId`
pub fn given_user_model_with_auth(app: &Application) -> std::sync::Arc<ModelHandle> {
    app.model(ModelDefinition::access_token("accessToken")).unwrap();
    app.model(ModelDefinition::user("user").has_many("accessTokens", "accessToken", "userId"))
        .unwrap()
}

/// Create a user and log them in programmatically
pub async fn given_logged_in_user(app: &Application, email: &str) -> AccessToken {
    let users = app.lookup("user").unwrap();
    users
        .create(json!({ "email": email, "password": PASSWORD }))
        .await
        .unwrap();

    app.token_service_for(&users)
        .unwrap()
        .login(Credentials {
            email: email.to_string(),
            password: PASSWORD.to_string(),
            ttl: None,
        })
        .await
        .unwrap()
}
