use super::*;

#[tokio::test]
async fn validation_is_throttled_per_caller() {
    let mut config = test_config();
    config.rate_limit.validation_rpm = 20;
    let ctx = TestContext::with_config(config);
    let app = ctx.app();

    let mut statuses = Vec::new();
    for _ in 0..25 {
        let response = call(
            app.clone(),
            from_peer(validate_request("LH-NOPE1-NOPE2-NOPE3-NOPE4-NOPE5"), "203.0.113.7:4000"),
        )
        .await;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after: u64 = response.headers()["retry-after"]
                .to_str()
                .unwrap()
                .parse()
                .unwrap();
            assert!((1..=60).contains(&retry_after));
        }
        statuses.push(response.status());
    }

    assert!(statuses[..20].iter().all(|s| *s == StatusCode::OK));
    assert!(statuses[20..].iter().all(|s| *s == StatusCode::TOO_MANY_REQUESTS));

    // Throttled calls never reach the store.
    assert_eq!(queries::count_validation_attempts(&ctx.conn()).unwrap(), 20);

    // A different caller has its own budget.
    let response = call(
        app.clone(),
        from_peer(validate_request("LH-NOPE1-NOPE2-NOPE3-NOPE4-NOPE5"), "198.51.100.2:4000"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn tenant_api_is_throttled() {
    let mut config = test_config();
    config.rate_limit.tenant_api_rpm = 2;
    let ctx = TestContext::with_config(config);
    ctx.provision("evt_1", "tenant-a", 100, json!({})).await;
    let token = ctx.tenant_token("tenant-a");
    let app = ctx.app();

    let request = || from_peer(json_request("GET", "/tenant/license", Some(&token), None), "203.0.113.9:5000");

    assert_eq!(call(app.clone(), request()).await.status(), StatusCode::OK);
    assert_eq!(call(app.clone(), request()).await.status(), StatusCode::OK);
    assert_eq!(
        call(app.clone(), request()).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}
