use super::*;

#[tokio::test]
async fn operator_routes_require_the_key() {
    let ctx = TestContext::new();

    let response = call(ctx.app(), json_request("GET", "/ops/queue/stats", None, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = call(
        ctx.app(),
        json_request("GET", "/ops/queue/stats", Some("wrong-key"), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // A tenant token is not an operator key.
    let token = ctx.tenant_token("tenant-a");
    let response = call(ctx.app(), json_request("GET", "/ops/dead-letters", Some(&token), None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = call(
        ctx.app(),
        json_request("GET", "/ops/queue/stats", Some(OPERATOR_KEY), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["pending"], 0);
}

#[tokio::test]
async fn operator_api_is_absent_without_a_key() {
    let mut config = test_config();
    config.operator_api_key = None;
    let ctx = TestContext::with_config(config);

    let response = call(
        ctx.app(),
        json_request("GET", "/ops/queue/stats", Some(OPERATOR_KEY), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn operators_see_license_history() {
    let ctx = TestContext::new();
    ctx.provision("evt_1", "tenant-a", 100, json!({})).await;
    ctx.deliver(&event("evt_2", "subscription.suspended", "tenant-a", 200, json!({ "reason": "chargeback" })))
        .await;
    ctx.drain().await;

    let response = call(
        ctx.app(),
        json_request("GET", "/ops/tenants/tenant-a/license", Some(OPERATOR_KEY), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["license"]["status"], "suspended");
    assert!(body["license"].get("key_hash").is_none());

    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1]["from_status"], "active");
    assert_eq!(history[1]["to_status"], "suspended");
    assert_eq!(history[1]["reason"], "chargeback");

    let response = call(
        ctx.app(),
        json_request("GET", "/ops/tenants/tenant-q/license", Some(OPERATOR_KEY), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = call(
        ctx.app(),
        json_request("GET", "/ops/jobs/no-such-job", Some(OPERATOR_KEY), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
