use super::*;

#[tokio::test]
async fn every_call_leaves_an_attempt_without_the_key() {
    let ctx = TestContext::new();
    let license = ctx.provision("evt_1", "tenant-a", 100, json!({})).await;
    let key = ctx.issued_key("tenant-a");

    call(ctx.app(), from_peer(validate_request(&key), "192.0.2.10:1234")).await;
    call(
        ctx.app(),
        from_peer(validate_request("LH-ZZZZZ-ZZZZZ-ZZZZZ-ZZZZZ-ZZZZZ"), "192.0.2.11:1234"),
    )
    .await;

    let response = call(
        ctx.app(),
        json_request("GET", "/ops/validation-attempts", Some(OPERATOR_KEY), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total"], 2);

    // Newest first.
    let items = body["items"].as_array().unwrap();
    assert_eq!(items[0]["result"], "not_found");
    assert_eq!(items[0]["license_id"], Value::Null);
    assert_eq!(items[0]["caller_ip"], "192.0.2.11");
    assert_eq!(items[1]["result"], "valid");
    assert_eq!(items[1]["license_id"], license.id.as_str());
    assert_eq!(items[1]["key_prefix"], license.key_prefix.as_str());

    let raw = body.to_string();
    assert!(!raw.contains(&key), "full keys must never be stored");

    let response = call(
        ctx.app(),
        json_request("GET", "/ops/validation-attempts?limit=1&offset=1", Some(OPERATOR_KEY), None),
    )
    .await;
    let page = body_json(response).await;
    assert_eq!(page["total"], 2);
    assert_eq!(page["limit"], 1);
    assert_eq!(page["offset"], 1);
    let items = page["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["result"], "valid");
}

#[tokio::test]
async fn cleanup_purges_old_rows_only() {
    let ctx = TestContext::new();
    ctx.provision("evt_1", "tenant-a", 100, json!({})).await;
    let key = ctx.issued_key("tenant-a");
    for _ in 0..3 {
        validate(&ctx, json!({ "license_key": key })).await;
    }

    let start = now();
    {
        let conn = ctx.conn();
        for _ in 0..2 {
            queries::insert_validation_attempt(&conn, None, None, Some("192.0.2.1"), "not_found", start - 100 * 86_400)
                .unwrap();
        }
    }

    let policy = licensehook::tasks::RetentionPolicy {
        job_retention_days: 30,
        validation_retention_days: 90,
    };

    // Nothing is old enough yet apart from the backdated attempts.
    let report = licensehook::tasks::run_cleanup(&ctx.conn(), &ctx.state, policy, start).unwrap();
    assert_eq!(report.jobs_purged, 0);
    assert_eq!(report.attempts_purged, 2);

    let later = start + 31 * 86_400;
    let report = licensehook::tasks::run_cleanup(&ctx.conn(), &ctx.state, policy, later).unwrap();
    assert_eq!(report.jobs_purged, 2, "provision and notify jobs");
    assert_eq!(report.attempts_purged, 0);

    let conn = ctx.conn();
    assert_eq!(queries::count_validation_attempts(&conn).unwrap(), 3);
    assert_eq!(queries::job_stats(&conn).unwrap(), QueueStats::default());

    // The license itself is untouched.
    assert_eq!(ctx.current_license("tenant-a").unwrap().validation_count, 3);

    let keep_all = licensehook::tasks::RetentionPolicy {
        job_retention_days: 0,
        validation_retention_days: 0,
    };
    let report = licensehook::tasks::run_cleanup(&conn, &ctx.state, keep_all, start + 1_000 * 86_400).unwrap();
    assert_eq!(report, licensehook::tasks::CleanupReport::default());
    assert_eq!(queries::count_validation_attempts(&conn).unwrap(), 3);
}
