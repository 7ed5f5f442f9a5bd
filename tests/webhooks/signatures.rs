use super::*;

fn raw_request(body: &str, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/events")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn valid_body() -> String {
    event("evt_sig", "checkout.completed", "tenant-a", 1, json!({})).to_string()
}

async fn assert_rejected_without_side_effects(ctx: &TestContext, request: Request<Body>, expected: StatusCode) {
    let response = call(ctx.app(), request).await;
    assert_eq!(response.status(), expected);

    let conn = ctx.conn();
    assert_eq!(queries::count_external_events(&conn).unwrap(), 0);
    assert_eq!(queries::job_stats(&conn).unwrap(), QueueStats::default());
}

#[tokio::test]
async fn missing_signature_is_401() {
    let ctx = TestContext::new();
    assert_rejected_without_side_effects(&ctx, raw_request(&valid_body(), None), StatusCode::UNAUTHORIZED).await;
}

#[tokio::test]
async fn wrong_secret_is_401() {
    let ctx = TestContext::new();
    let body = valid_body();
    let header = signature_header("whsec_other", now(), body.as_bytes()).unwrap();
    assert_rejected_without_side_effects(&ctx, raw_request(&body, Some(header)), StatusCode::UNAUTHORIZED).await;
}

#[tokio::test]
async fn tampered_body_is_401() {
    let ctx = TestContext::new();
    let body = valid_body();
    let header = signature_header(WEBHOOK_SECRET, now(), body.as_bytes()).unwrap();
    let tampered = body.replace("tenant-a", "tenant-b");

    let response = call(ctx.app(), raw_request(&tampered, Some(header))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["code"], "invalid_signature");
    assert_eq!(queries::count_external_events(&ctx.conn()).unwrap(), 0);
}

#[tokio::test]
async fn stale_timestamp_is_401() {
    let ctx = TestContext::new();
    let body = valid_body();
    let header = signature_header(WEBHOOK_SECRET, now() - 3_600, body.as_bytes()).unwrap();
    assert_rejected_without_side_effects(&ctx, raw_request(&body, Some(header)), StatusCode::UNAUTHORIZED).await;
}

#[tokio::test]
async fn signed_garbage_is_400() {
    let ctx = TestContext::new();
    for body in ["not json", r#"{"id":"","type":"checkout.completed","created":1,"data":{"tenant_id":"t"}}"#] {
        let header = signature_header(WEBHOOK_SECRET, now(), body.as_bytes()).unwrap();
        assert_rejected_without_side_effects(&ctx, raw_request(body, Some(header)), StatusCode::BAD_REQUEST).await;
    }
}

#[tokio::test]
async fn rotated_secrets_are_both_accepted() {
    let mut config = test_config();
    config.webhook_secrets = vec!["whsec_new".into(), WEBHOOK_SECRET.into()];
    let ctx = TestContext::with_config(config);

    let body = valid_body();
    let header = signature_header("whsec_new", now(), body.as_bytes()).unwrap();
    let response = call(ctx.app(), raw_request(&body, Some(header))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let ack = ctx
        .deliver(&event("evt_sig2", "checkout.completed", "tenant-b", 1, json!({})))
        .await;
    assert_eq!(ack["status"], "enqueued");
}
