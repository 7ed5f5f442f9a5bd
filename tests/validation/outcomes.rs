use super::*;

#[tokio::test]
async fn suspended_tenant_is_denied_without_affecting_others() {
    let ctx = TestContext::new();
    ctx.provision("evt_1", "tenant-1", 100, json!({ "plan": "pro" })).await;
    let key_1 = ctx.issued_key("tenant-1");
    ctx.provision("evt_2", "tenant-2", 100, json!({ "plan": "pro" })).await;
    let key_2 = ctx.issued_key("tenant-2");

    ctx.deliver(&event("evt_3", "subscription.suspended", "tenant-2", 200, json!({})))
        .await;
    ctx.drain().await;

    let body = validate(&ctx, json!({ "license_key": key_1 })).await;
    assert_eq!(body["valid"], true);

    let body = validate(&ctx, json!({ "license_key": key_2 })).await;
    assert_eq!(body["valid"], false);
    assert_eq!(body["reason"], "inactive:suspended");
    assert!(body.get("plan").is_none());

    let t1 = ctx.current_license("tenant-1").unwrap();
    assert_eq!(t1.validation_count, 1);
    assert!(t1.last_validated_at.is_some());

    let t2 = ctx.current_license("tenant-2").unwrap();
    assert_eq!(t2.validation_count, 0);
    assert!(t2.last_validated_at.is_none());
}

#[tokio::test]
async fn past_expiry_is_denied_before_the_sweep_runs() {
    let ctx = TestContext::new();
    ctx.provision("evt_1", "tenant-a", 100, json!({ "expires_at": now() - 5 }))
        .await;
    let key = ctx.issued_key("tenant-a");

    let body = validate(&ctx, json!({ "license_key": key })).await;
    assert_eq!(body["valid"], false);
    assert_eq!(body["reason"], "expired");

    // Still active in the store until the sweep catches up.
    let license = ctx.current_license("tenant-a").unwrap();
    assert_eq!(license.status, LicenseStatus::Active);
    assert_eq!(license.validation_count, 0);

    {
        let mut conn = ctx.conn();
        licensehook::licensing::expire_due_licenses(&mut conn, now()).unwrap();
    }
    let license = ctx.current_license("tenant-a").unwrap();
    assert_eq!(license.status, LicenseStatus::Expired);

    let body = validate(&ctx, json!({ "license_key": key })).await;
    assert_eq!(body["reason"], "expired");

    let history = {
        let conn = ctx.conn();
        TenantScope::new(&conn, "tenant-a").history(&license.id).unwrap()
    };
    let last = history.last().unwrap();
    assert_eq!(last.from_status, Some(LicenseStatus::Active));
    assert_eq!(last.to_status, LicenseStatus::Expired);
}

#[tokio::test]
async fn email_must_match_when_given() {
    let ctx = TestContext::new();
    ctx.provision(
        "evt_1",
        "tenant-a",
        100,
        json!({ "customer_email": "Buyer@Example.com" }),
    )
    .await;
    let key = ctx.issued_key("tenant-a");

    let body = validate(&ctx, json!({ "license_key": key, "email": "  buyer@example.COM " })).await;
    assert_eq!(body["valid"], true);

    let body = validate(&ctx, json!({ "license_key": key, "email": "someone@example.com" })).await;
    assert_eq!(body["valid"], false);
    assert_eq!(body["reason"], "not_found");

    let body = validate(&ctx, json!({ "license_key": key })).await;
    assert_eq!(body["valid"], true);

    assert_eq!(ctx.current_license("tenant-a").unwrap().validation_count, 2);
}

#[tokio::test]
async fn unknown_keys_are_not_found() {
    let ctx = TestContext::new();

    let body = validate(&ctx, json!({ "license_key": "LH-AAAAA-BBBBB-CCCCC-DDDDD-EEEEE" })).await;
    assert_eq!(body, json!({ "valid": false, "reason": "not_found" }));

    let body = validate(&ctx, json!({ "license_key": "   " })).await;
    assert_eq!(body["reason"], "not_found");

    let response = call(
        ctx.app(),
        json_request("POST", "/licenses/validate", None, Some(json!({ "key": "x" }))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn trial_validity_follows_policy() {
    let ctx = TestContext::new();
    ctx.provision("evt_1", "tenant-a", 100, json!({ "status": "trial" })).await;
    let body = validate(&ctx, json!({ "license_key": ctx.issued_key("tenant-a") })).await;
    assert_eq!(body["valid"], true);

    let mut config = test_config();
    config.validation = ValidationPolicy {
        trial_validates: false,
    };
    let strict = TestContext::with_config(config);
    strict.provision("evt_1", "tenant-a", 100, json!({ "status": "trial" })).await;
    let body = validate(&strict, json!({ "license_key": strict.issued_key("tenant-a") })).await;
    assert_eq!(body["valid"], false);
    assert_eq!(body["reason"], "inactive:trial");
}
