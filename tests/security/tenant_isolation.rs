use super::*;

async fn two_tenants() -> (TestContext, License, License) {
    let ctx = TestContext::new();
    let a = ctx
        .provision("evt_a", "tenant-a", 100, json!({ "features": { "export": true } }))
        .await;
    let b = ctx
        .provision("evt_b", "tenant-b", 100, json!({ "features": { "export": true, "sso": true } }))
        .await;
    (ctx, a, b)
}

fn assert_untouched(ctx: &TestContext, before: &License) {
    let after = ctx.latest_license(&before.tenant_id);
    assert_eq!(after.version, before.version);
    assert_eq!(after.status, before.status);
    assert_eq!(after.validation_count, before.validation_count);
    assert_eq!(after.updated_at, before.updated_at);
}

#[tokio::test]
async fn tenant_sees_only_its_own_license() {
    let (ctx, a, b) = two_tenants().await;
    let token = ctx.tenant_token("tenant-a");

    let response = call(ctx.app(), json_request("GET", "/tenant/license", Some(&token), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], a.id.as_str());
    assert_eq!(body["masked_key"], format!("{}-*****-*****-*****-*****", a.key_prefix));
    assert!(body.get("key_hash").is_none());
    assert_ne!(body["id"], b.id.as_str());
}

#[tokio::test]
async fn tenant_in_query_is_refused() {
    let (ctx, _a, b) = two_tenants().await;
    let token = ctx.tenant_token("tenant-a");

    for uri in [
        "/tenant/license?tenant_id=tenant-b",
        "/tenant/license?tenantId=tenant-b",
        "/tenant/license?tenant=tenant-a",
    ] {
        let response = call(ctx.app(), json_request("GET", uri, Some(&token), None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body_json(response).await["code"], "tenant_spoofing");
    }
    assert_untouched(&ctx, &b);
}

#[tokio::test]
async fn tenant_in_body_is_refused() {
    let (ctx, a, b) = two_tenants().await;
    let token = ctx.tenant_token("tenant-a");

    let response = call(
        ctx.app(),
        json_request(
            "POST",
            "/tenant/license/check-feature",
            Some(&token),
            Some(json!({ "feature": "sso", "tenant_id": "tenant-b" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "tenant_spoofing");

    assert_untouched(&ctx, &a);
    assert_untouched(&ctx, &b);

    let response = call(
        ctx.app(),
        json_request(
            "POST",
            "/tenant/license/check-feature",
            Some(&token),
            Some(json!({ "feature": "sso", "filter": { "tenant_id": "tenant-b" } })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "tenant_spoofing");
}

#[tokio::test]
async fn tenant_header_is_refused() {
    let (ctx, _a, b) = two_tenants().await;
    let token = ctx.tenant_token("tenant-a");

    let mut request = json_request("GET", "/tenant/license", Some(&token), None);
    request
        .headers_mut()
        .insert("X-Tenant-Id", "tenant-b".parse().unwrap());
    let response = call(ctx.app(), request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "tenant_spoofing");
    assert_untouched(&ctx, &b);
}

#[tokio::test]
async fn feature_checks_use_the_token_tenant() {
    let (ctx, _a, _b) = two_tenants().await;
    let token = ctx.tenant_token("tenant-a");

    let check = |feature: &'static str| {
        json_request(
            "POST",
            "/tenant/license/check-feature",
            Some(&token),
            Some(json!({ "feature": feature })),
        )
    };

    let body = body_json(call(ctx.app(), check("export")).await).await;
    assert_eq!(body["enabled"], true);

    // tenant-b has sso, tenant-a does not.
    let body = body_json(call(ctx.app(), check("sso")).await).await;
    assert_eq!(body["feature"], "sso");
    assert_eq!(body["enabled"], false);
}

#[tokio::test]
async fn feature_is_disabled_while_suspended() {
    let (ctx, _a, _b) = two_tenants().await;
    ctx.deliver(&event("evt_s", "subscription.suspended", "tenant-a", 200, json!({})))
        .await;
    ctx.drain().await;

    let token = ctx.tenant_token("tenant-a");
    let response = call(
        ctx.app(),
        json_request(
            "POST",
            "/tenant/license/check-feature",
            Some(&token),
            Some(json!({ "feature": "export" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["enabled"], false);
}

#[tokio::test]
async fn missing_or_bad_tokens_are_unauthorized() {
    let (ctx, _a, _b) = two_tenants().await;

    let response = call(ctx.app(), json_request("GET", "/tenant/license", None, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = call(
        ctx.app(),
        json_request("GET", "/tenant/license", Some("not-a-token"), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Signed with another secret.
    let foreign = licensehook::jwt::TenantTokenKey::from_secret("some-other-secret")
        .mint("tenant-a", std::time::Duration::from_secs(3600))
        .unwrap();
    let response = call(
        ctx.app(),
        json_request("GET", "/tenant/license", Some(&foreign), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_and_deactivated_tenants_are_forbidden() {
    let (ctx, _a, _b) = two_tenants().await;

    let stranger = ctx.tenant_token("tenant-z");
    let response = call(ctx.app(), json_request("GET", "/tenant/license", Some(&stranger), None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = call(
        ctx.app(),
        json_request(
            "PUT",
            "/ops/tenants/tenant-a",
            Some(OPERATOR_KEY),
            Some(json!({ "active": false })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["active"], false);

    let token = ctx.tenant_token("tenant-a");
    let response = call(ctx.app(), json_request("GET", "/tenant/license", Some(&token), None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Other tenants are unaffected.
    let token = ctx.tenant_token("tenant-b");
    let response = call(ctx.app(), json_request("GET", "/tenant/license", Some(&token), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}
