//! End-to-end tests over the HTTP surface, backed by the in-memory store.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use notification_api::{
    common_routes, notification_routes, AppConfig, AppState, MemoryStore, ObjectKey, ObjectStore, Registry,
    Scope, Secret,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const PREFIX: &str = "/apis/notification/v2";

struct TestApp {
    router: Router,
    state: AppState,
}

impl TestApp {
    async fn new() -> Self {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::default());
        let state = AppState::new(AppConfig::default(), Registry::builtin(), store)
            .await
            .unwrap();
        let router = Router::new()
            .merge(common_routes(state.clone()))
            .nest(PREFIX, notification_routes(state.clone()));
        TestApp { router, state }
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let uri = if path.starts_with('/') && !path.starts_with(PREFIX) && !is_common(path) {
            format!("{}{}", PREFIX, path)
        } else {
            path.to_string()
        };
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.send(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, path, Some(body)).await
    }

    async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> (StatusCode, Value) {
        self.send(Method::DELETE, path, None).await
    }

    /// Reads go through the watch cache; wait until it has caught up with every committed write.
    async fn settle(&self) {
        let (_, revision) = self.state.store.list("secrets").await.unwrap();
        assert!(
            self.state.cache.wait_for(revision, Duration::from_secs(2)).await,
            "cache did not reach revision {}",
            revision
        );
    }
}

fn is_common(path: &str) -> bool {
    ["/health", "/ready", "/version"].contains(&path)
}

fn object(name: &str, spec: Value) -> Value {
    json!({ "metadata": { "name": name }, "spec": spec })
}

fn item_names(list: &Value) -> Vec<String> {
    list["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["metadata"]["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn email_config_create_list_conflict_delete() {
    let app = TestApp::new().await;

    let (status, created) = app
        .post("/emailconfigs", object("smtp-default", json!({ "host": "smtp.example.com" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["kind"], "EmailConfig");
    assert!(created["metadata"]["uid"].is_string());
    app.settle().await;

    let (status, list) = app.get("/emailconfigs?name=smtp").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["totalItems"], 1);
    assert_eq!(item_names(&list), vec!["smtp-default"]);

    let (status, err) = app.post("/emailconfigs", object("smtp-default", json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"]["code"], "already_exists");
    assert_eq!(err["error"]["details"]["name"], "smtp-default");

    let (status, body) = app.delete("/emailconfigs/smtp-default").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "success");
    app.settle().await;

    let (status, err) = app.get("/emailconfigs/smtp-default").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"]["code"], "not_found");
}

#[tokio::test]
async fn pagination_over_twelve_objects() {
    let app = TestApp::new().await;
    for i in 0..12 {
        let (status, _) = app
            .post("/slackreceivers", object(&format!("r{:02}", i), json!({ "channel": "#alerts" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    app.settle().await;

    let (_, page2) = app.get("/slackreceivers?orderBy=name&ascending=true&page=2&limit=5").await;
    assert_eq!(page2["totalItems"], 12);
    assert_eq!(item_names(&page2), vec!["r05", "r06", "r07", "r08", "r09"]);

    let (_, page3) = app.get("/slackreceivers?orderBy=name&ascending=true&page=3&limit=5").await;
    assert_eq!(page3["totalItems"], 12);
    assert_eq!(item_names(&page3), vec!["r10", "r11"]);

    let (_, page4) = app.get("/slackreceivers?orderBy=name&ascending=true&page=4&limit=5").await;
    assert_eq!(page4["totalItems"], 12);
    assert!(item_names(&page4).is_empty());

    let (_, desc) = app.get("/slackreceivers?orderBy=name&ascending=false&limit=2").await;
    assert_eq!(item_names(&desc), vec!["r11", "r10"]);
}

#[tokio::test]
async fn list_rejects_bad_queries() {
    let app = TestApp::new().await;
    for query in ["orderBy=colour", "page=0", "limit=-1", "labelSelector=a%20in%20(b"] {
        let (status, err) = app.get(&format!("/webhookreceivers?{}", query)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", query);
        assert_eq!(err["error"]["code"], "invalid_query", "{}", query);
    }
}

#[tokio::test]
async fn label_selector_filters() {
    let app = TestApp::new().await;
    for (name, tier) in [("a", "gold"), ("b", "silver"), ("c", "gold")] {
        let body = json!({ "metadata": { "name": name, "labels": { "tier": tier } }, "spec": {} });
        app.post("/wechatreceivers", body).await;
    }
    app.settle().await;
    let (_, list) = app.get("/wechatreceivers?labelSelector=tier%3Dgold&orderBy=name").await;
    assert_eq!(item_names(&list), vec!["a", "c"]);
    let (_, list) = app.get("/wechatreceivers?labelSelector=tier%20notin%20(gold)").await;
    assert_eq!(item_names(&list), vec!["b"]);
}

#[tokio::test]
async fn tenants_do_not_see_each_other() {
    let app = TestApp::new().await;
    app.post("/users/alice/webhookreceivers", object("hook", json!({ "url": "https://a" })))
        .await;
    app.post("/users/bob/webhookreceivers", object("hook", json!({ "url": "https://b" })))
        .await;
    app.settle().await;

    let (_, alice) = app.get("/users/alice/webhookreceivers/hook").await;
    assert_eq!(alice["spec"]["url"], "https://a");
    assert_eq!(alice["metadata"]["user"], "alice");
    let (_, bob) = app.get("/users/bob/webhookreceivers").await;
    assert_eq!(bob["totalItems"], 1);
    assert_eq!(bob["items"][0]["spec"]["url"], "https://b");
    let (_, global) = app.get("/webhookreceivers").await;
    assert_eq!(global["totalItems"], 0);

    // Alice cannot rewrite Bob's object by naming him as owner.
    let forged = json!({ "metadata": { "name": "hook", "user": "bob" }, "spec": { "url": "https://evil" } });
    let (status, err) = app.put("/users/alice/webhookreceivers/hook", forged).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["error"]["code"], "forbidden");

    let (status, _) = app.delete("/users/alice/webhookreceivers/hook").await;
    assert_eq!(status, StatusCode::OK);
    app.settle().await;
    let (status, _) = app.get("/users/bob/webhookreceivers/hook").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn stale_update_conflicts() {
    let app = TestApp::new().await;
    let (_, created) = app.post("/dingtalkreceivers", object("bot", json!({ "chatid": "1" }))).await;
    let version = created["metadata"]["resourceVersion"].clone();

    let mut first = created.clone();
    first["spec"]["chatid"] = json!("2");
    let (status, _) = app.put("/dingtalkreceivers/bot", first).await;
    assert_eq!(status, StatusCode::OK);

    let mut stale = created;
    stale["metadata"]["resourceVersion"] = version;
    stale["spec"]["chatid"] = json!("3");
    let (status, err) = app.put("/dingtalkreceivers/bot", stale).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"]["code"], "conflict");
}

#[tokio::test]
async fn config_secrets_are_masked_and_served_separately() {
    let app = TestApp::new().await;
    let body = json!({
        "metadata": { "name": "bot" },
        "spec": { "webhook": "https://oapi.dingtalk.com/robot", "appKey": "key-1" },
        "secret": { "data": { "appSecret": "s3cret" } }
    });
    let (status, created) = app.post("/dingtalkconfigs", body).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(created["spec"].get("appKey").is_none());
    assert_eq!(created["secret"]["data"]["appKey"], "******");
    assert_eq!(created["secret"]["data"]["appSecret"], "******");
    app.settle().await;

    let (_, list) = app.get("/dingtalkconfigs").await;
    assert!(list["items"][0].get("secret").is_none());
    assert!(list["items"][0]["spec"].get("appKey").is_none());

    // Global config secrets are readable in plain form only through /secrets.
    let (status, secret) = app.get("/secrets/dingtalkconfigs-bot").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(secret["data"]["appKey"], "key-1");
    assert_eq!(secret["metadata"]["labels"]["notification/config-name"], "bot");

    // An explicitly empty secret removes it.
    let (_, current) = app.get("/dingtalkconfigs/bot").await;
    let mut cleared = current.clone();
    cleared["secret"] = json!({});
    let (status, updated) = app.put("/dingtalkconfigs/bot", cleared).await;
    assert_eq!(status, StatusCode::OK);
    assert!(updated.get("secret").is_none());
    app.settle().await;
    let (status, _) = app.get("/secrets/dingtalkconfigs-bot").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn tenant_config_secret_binds_to_the_tenant() {
    let app = TestApp::new().await;
    let key = ObjectKey::new("secrets", &Scope::tenant("alice"), "emailconfigs-smtp");
    let body = json!({
        "metadata": { "name": "smtp" },
        "spec": { "host": "smtp.example.com" },
        "secret": { "data": { "authPassword": "p" } }
    });
    let (status, created) = app.post("/users/alice/emailconfigs", body).await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);
    assert_eq!(created["metadata"]["user"], "alice");
    assert_eq!(created["secret"]["metadata"]["user"], "alice");
    assert_eq!(created["secret"]["data"]["authPassword"], "******");
    let stored = app.state.store.get(&key).await.unwrap().expect("tenant secret stored");
    assert_eq!(Secret::from_object(stored).unwrap().data["authPassword"], "p");
    app.settle().await;

    let (status, got) = app.get("/users/alice/emailconfigs/smtp").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(got["secret"]["data"]["authPassword"], "******");
    let (status, _) = app.get("/users/bob/emailconfigs/smtp").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.get("/secrets/emailconfigs-smtp").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.delete("/users/alice/emailconfigs/smtp").await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.state.store.get(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn secret_update_right_after_create_keeps_masked_values() {
    let app = TestApp::new().await;
    let with_secret = |data: Value| {
        json!({ "metadata": { "name": "smtp" }, "spec": { "host": "smtp.example.com" }, "secret": { "data": data } })
    };
    let (status, _) = app
        .post("/emailconfigs", with_secret(json!({ "authPassword": "p4ss", "authSecret": "s1" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // No settle: the update races the cache.
    let (status, _) = app
        .put("/emailconfigs/smtp", with_secret(json!({ "authPassword": "******", "authSecret": "s2" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    app.settle().await;
    let (_, secret) = app.get("/secrets/emailconfigs-smtp").await;
    assert_eq!(secret["data"]["authPassword"], "p4ss");
    assert_eq!(secret["data"]["authSecret"], "s2");

    app.put("/emailconfigs/smtp", with_secret(json!({ "authSecret": "s3" }))).await;
    let (status, cleared) = app.put("/emailconfigs/smtp", with_secret(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(cleared.get("secret").is_none());
    app.settle().await;
    let (status, _) = app.get("/secrets/emailconfigs-smtp").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn secret_endpoints_create_or_update() {
    let app = TestApp::new().await;
    let (status, created) = app
        .post("/secrets", json!({ "metadata": { "name": "smtp-auth" }, "data": { "password": "p1" } }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["type"], "Opaque");

    let (status, _) = app
        .put("/secrets/smtp-auth", json!({ "data": { "password": "p2" } }))
        .await;
    assert_eq!(status, StatusCode::OK);
    app.settle().await;
    let (_, got) = app.get("/secrets/smtp-auth").await;
    assert_eq!(got["data"]["password"], "p2");
    let (_, list) = app.get("/secrets?name=smtp").await;
    assert_eq!(list["totalItems"], 1);

    let (status, _) = app
        .put("/secrets/smtp-auth", json!({ "metadata": { "name": "other" }, "data": {} }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.delete("/secrets/smtp-auth").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.delete("/secrets/smtp-auth").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_kind_and_bad_user_are_rejected() {
    let app = TestApp::new().await;
    let (status, err) = app.get("/pagerdutyconfigs").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"]["code"], "kind_not_found");
    assert_eq!(err["error"]["details"]["kind"], "pagerdutyconfigs");

    let (status, err) = app.get("/users/Not_Valid/emailconfigs").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "bad_request");
}

#[tokio::test]
async fn status_subresource_only_touches_status() {
    let app = TestApp::new().await;
    app.post("/users/carol/emailreceivers", object("oncall", json!({ "to": ["a@example.com"] })))
        .await;
    let (status, updated) = app
        .put("/users/carol/emailreceivers/oncall/status", json!({ "status": { "verified": true } }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"]["verified"], true);
    assert_eq!(updated["spec"]["to"][0], "a@example.com");
}

#[tokio::test]
async fn operational_endpoints() {
    let app = TestApp::new().await;
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    let (status, body) = app.get("/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cache"], "synced");
    let (status, body) = app.get("/version").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "notification-api");
}
