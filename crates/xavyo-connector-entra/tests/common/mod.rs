//! Common test utilities for xavyo-connector-entra integration tests.

#![allow(dead_code)]

use secrecy::SecretString;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};
use xavyo_connector_entra::{
    EntraCloudEnvironment, EntraConfig, EntraCredentials, EntraDirectory, RetryConfig,
};
use xavyo_reconcile::ids::ObjectId;

pub const TENANT: &str = "contoso";

/// Deterministic object id from a small number.
pub fn oid(n: u32) -> ObjectId {
    ObjectId::parse(&format!("00000000-0000-0000-0000-{n:012x}")).unwrap()
}

/// Mounts the token endpoint on `server`.
pub async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/{TENANT}/oauth2/v2.0/token")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "expires_in": 3600,
            "access_token": "test-token"
        })))
        .mount(server)
        .await;
}

/// Config pointing both login and Graph at `server`.
pub fn test_config(server: &MockServer, page_size: u32) -> EntraConfig {
    EntraConfig::builder()
        .tenant_id(TENANT)
        .cloud_environment(EntraCloudEnvironment::Custom {
            login_endpoint: server.uri(),
            graph_endpoint: server.uri(),
        })
        .page_size(page_size)
        .retry(RetryConfig::for_testing())
        .build()
        .unwrap()
}

/// Starts a mock Graph with a working token endpoint.
pub async fn setup() -> (MockServer, EntraDirectory) {
    setup_with_page_size(100).await
}

pub async fn setup_with_page_size(page_size: u32) -> (MockServer, EntraDirectory) {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let directory = EntraDirectory::new(
        &test_config(&server, page_size),
        EntraCredentials {
            client_id: "client-id".to_string(),
            client_secret: SecretString::new("client-secret".to_string()),
        },
    )
    .unwrap();
    (server, directory)
}

/// Graph path under the API version root.
pub fn graph_path(rest: &str) -> String {
    format!("/v1.0/{rest}")
}

/// A directory object as returned by `/directoryObjects/{id}` or edge lists.
pub fn directory_object(id: &ObjectId, odata_type: &str, display_name: &str) -> Value {
    json!({
        "@odata.type": format!("#microsoft.graph.{odata_type}"),
        "id": id.as_str(),
        "displayName": display_name
    })
}

/// A security group resource.
pub fn group(id: &ObjectId, display_name: &str) -> Value {
    json!({
        "id": id.as_str(),
        "displayName": display_name,
        "description": null,
        "mailNickname": "a1b2c3",
        "securityEnabled": true,
        "mailEnabled": false,
        "groupTypes": []
    })
}

pub fn password_credential(key_id: &str, display_name: &str) -> Value {
    json!({
        "customKeyIdentifier": null,
        "displayName": display_name,
        "endDateTime": "2025-03-01T12:00:00Z",
        "hint": "abc",
        "keyId": key_id,
        "secretText": null,
        "startDateTime": "2024-03-01T12:00:00Z"
    })
}

pub fn key_credential(key_id: &str) -> Value {
    json!({
        "customKeyIdentifier": "QUJD",
        "displayName": "CN=ci",
        "endDateTime": "2025-03-01T12:00:00Z",
        "key": null,
        "keyId": key_id,
        "startDateTime": "2024-03-01T12:00:00Z",
        "type": "AsymmetricX509Cert",
        "usage": "Verify"
    })
}

/// Credential collections of an application or service principal.
pub fn credential_owner(id: &ObjectId, passwords: Vec<Value>, keys: Vec<Value>) -> Value {
    json!({
        "id": id.as_str(),
        "passwordCredentials": passwords,
        "keyCredentials": keys
    })
}

/// Wraps items in an OData collection page.
pub fn odata_page(items: Vec<Value>, next_link: Option<String>) -> Value {
    let mut page = json!({ "value": items });
    if let Some(link) = next_link {
        page["@odata.nextLink"] = json!(link);
    }
    page
}

/// A Graph error response.
pub fn graph_error(status: u16, code: &str, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "error": {
            "code": code,
            "message": message,
            "innerError": {
                "date": "2024-03-01T12:00:00",
                "request-id": "00000000-0000-0000-0000-000000000000"
            }
        }
    }))
}

/// Requests the server received for `http_method` on `request_path`.
pub async fn requests_to(server: &MockServer, http_method: &str, request_path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == http_method && r.url.path() == request_path)
        .collect()
}

/// JSON body of a received request.
pub fn body_json(request: &Request) -> Value {
    serde_json::from_slice(&request.body).unwrap()
}
