use super::*;

#[tokio::test]
async fn provisioning_issues_a_working_key() {
    let ctx = TestContext::new();
    let license = ctx
        .provision(
            "evt_1",
            "tenant-a",
            100,
            json!({ "plan": "pro", "features": { "export": true, "sso": false } }),
        )
        .await;

    assert_eq!(license.status, LicenseStatus::Active);
    assert_eq!(license.plan, "pro");
    assert!(license.has_feature("export"));
    assert!(!license.has_feature("sso"));
    assert_eq!(license.last_event_at, 100);

    let deliveries = ctx.notifier.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].kind, NotificationKind::LicenseIssued);

    let key = ctx.issued_key("tenant-a");
    assert!(key.starts_with(&license.key_prefix));

    let response = call(ctx.app(), validate_request(&key)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["valid"], true);
    assert_eq!(body["plan"], "pro");
    assert_eq!(body["features"]["export"], true);
    assert_eq!(body["key_prefix"], license.key_prefix.as_str());

    let entries = history(&ctx, &license);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].from_status, None);
    assert_eq!(entries[0].to_status, LicenseStatus::Active);

    let stats = queries::job_stats(&ctx.conn()).unwrap();
    assert_eq!(stats.succeeded, 2, "provision and notify jobs both succeed");
}

#[tokio::test]
async fn stale_event_does_not_undo_newer_state() {
    let ctx = TestContext::new();
    ctx.provision("evt_p", "tenant-a", 100, json!({})).await;

    // Sent reactivate@200 then suspend@300, delivered in reverse.
    ctx.deliver(&event("evt_s", "subscription.suspended", "tenant-a", 300, json!({ "reason": "unpaid" })))
        .await;
    ctx.drain().await;
    ctx.deliver(&event("evt_r", "subscription.resumed", "tenant-a", 200, json!({})))
        .await;
    ctx.drain().await;

    let license = ctx.current_license("tenant-a").unwrap();
    assert_eq!(license.status, LicenseStatus::Suspended);
    assert_eq!(license.status_reason.as_deref(), Some("unpaid"));
    assert_eq!(license.version, 2);
    assert_eq!(license.last_event_at, 300);

    // The stale job is settled, not retried.
    assert_eq!(job_for(&ctx, "evt_r", JobType::Reactivate).status, JobStatus::Succeeded);
}

#[tokio::test]
async fn transition_before_provisioning_is_retried() {
    let ctx = TestContext::new();
    ctx.deliver(&event("evt_early", "subscription.suspended", "tenant-b", 200, json!({})))
        .await;
    ctx.drain().await;

    let job = job_for(&ctx, "evt_early", JobType::Suspend);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt_count, 1);
    assert!(job.last_error.unwrap().contains("not provisioned"));

    ctx.provision("evt_late", "tenant-b", 100, json!({})).await;
    assert_eq!(ctx.current_license("tenant-b").unwrap().status, LicenseStatus::Active);

    make_retries_due(&ctx);
    ctx.drain().await;

    let license = ctx.current_license("tenant-b").unwrap();
    assert_eq!(license.status, LicenseStatus::Suspended);
    let job = job_for(&ctx, "evt_early", JobType::Suspend);
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.attempt_count, 2);
}

#[tokio::test]
async fn revoked_license_is_never_reactivated() {
    let ctx = TestContext::new();
    ctx.provision("evt_p", "tenant-a", 100, json!({})).await;
    ctx.deliver(&event("evt_rv", "charge.refunded", "tenant-a", 200, json!({ "reason": "refund" })))
        .await;
    ctx.drain().await;
    ctx.deliver(&event("evt_ra", "subscription.reactivated", "tenant-a", 300, json!({})))
        .await;
    ctx.drain().await;

    let license = ctx.latest_license("tenant-a");
    assert_eq!(license.status, LicenseStatus::Revoked);
    assert_eq!(license.version, 2);
    assert!(ctx.current_license("tenant-a").is_none());

    let job = job_for(&ctx, "evt_ra", JobType::Reactivate);
    assert_eq!(job.status, JobStatus::DeadLettered);
    assert_eq!(job.dead_letter_reason, Some(DeadLetterReason::Rejected));
    assert_eq!(job.attempt_count, 1, "business failures are not retried");

    let entries = history(&ctx, &license);
    let statuses: Vec<_> = entries.iter().map(|e| e.to_status).collect();
    assert_eq!(statuses, vec![LicenseStatus::Active, LicenseStatus::Revoked]);

    let response = call(
        ctx.app(),
        json_request("GET", "/ops/dead-letters", Some(OPERATOR_KEY), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["id"], job.id.as_str());
    assert_eq!(body["items"][0]["dead_letter_reason"], "rejected");
}

#[tokio::test]
async fn new_purchase_after_revocation_issues_new_license() {
    let ctx = TestContext::new();
    let first = ctx.provision("evt_p1", "tenant-a", 100, json!({})).await;
    let first_key = ctx.issued_key("tenant-a");
    ctx.deliver(&event("evt_rv", "subscription.revoked", "tenant-a", 200, json!({})))
        .await;
    ctx.drain().await;

    // A purchase older than the revocation changes nothing.
    ctx.deliver(&event("evt_old", "checkout.completed", "tenant-a", 150, json!({})))
        .await;
    ctx.drain().await;
    assert!(ctx.current_license("tenant-a").is_none());

    ctx.deliver(&event("evt_p2", "checkout.completed", "tenant-a", 400, json!({ "plan": "team" })))
        .await;
    ctx.drain().await;

    let second = ctx.current_license("tenant-a").expect("new license");
    assert_ne!(second.id, first.id);
    assert_eq!(second.plan, "team");
    assert_eq!(second.version, 1);

    let second_key = ctx.issued_key("tenant-a");
    assert_ne!(second_key, first_key);

    let old = body_json(call(ctx.app(), validate_request(&first_key)).await).await;
    assert_eq!(old["valid"], false);
    assert_eq!(old["reason"], "inactive:revoked");

    let new = body_json(call(ctx.app(), validate_request(&second_key)).await).await;
    assert_eq!(new["valid"], true);
    assert_eq!(new["plan"], "team");
}

#[tokio::test]
async fn plan_update_changes_features_only() {
    let ctx = TestContext::new();
    ctx.provision("evt_p", "tenant-a", 100, json!({ "plan": "pro", "features": { "export": true } }))
        .await;
    ctx.deliver(&event(
        "evt_u",
        "subscription.updated",
        "tenant-a",
        200,
        json!({ "plan": "enterprise", "features": { "export": true, "sso": true } }),
    ))
    .await;
    ctx.drain().await;

    let license = ctx.current_license("tenant-a").unwrap();
    assert_eq!(license.status, LicenseStatus::Active);
    assert_eq!(license.plan, "enterprise");
    assert!(license.has_feature("sso"));
    assert_eq!(license.version, 2);

    let kinds: Vec<_> = ctx.notifier.deliveries().iter().map(|n| n.kind).collect();
    assert_eq!(kinds, vec![NotificationKind::LicenseIssued, NotificationKind::PlanChanged]);
}

#[tokio::test]
async fn job_naming_another_tenant_is_rejected() {
    let ctx = TestContext::new();
    let a = ctx.provision("evt_a", "tenant-a", 100, json!({})).await;
    let b = ctx.provision("evt_b", "tenant-b", 100, json!({})).await;

    // A job whose payload points tenant-a's verified event at tenant-b.
    let forged = ctx
        .state
        .queue
        .enqueue(
            &ctx.conn(),
            &NewJob {
                job_type: JobType::Suspend,
                correlation_id: "forged".into(),
                external_event_id: Some("evt_a".into()),
                payload: json!({
                    "external_event_id": "evt_a",
                    "tenant_id": "tenant-b",
                    "occurred_at": 500,
                }),
            },
            now(),
        )
        .unwrap();
    ctx.drain().await;

    let job = queries::get_job(&ctx.conn(), &forged.id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::DeadLettered);
    assert_eq!(job.dead_letter_reason, Some(DeadLetterReason::Rejected));
    assert!(job.last_error.unwrap().to_lowercase().contains("spoofing"));

    let b_after = ctx.current_license("tenant-b").unwrap();
    assert_eq!(b_after.version, b.version);
    assert_eq!(b_after.status, LicenseStatus::Active);
    assert_eq!(ctx.current_license("tenant-a").unwrap().version, a.version);
}

#[tokio::test]
async fn expiry_sweep_marks_overdue_licenses() {
    let ctx = TestContext::new();
    let overdue = ctx
        .provision("evt_1", "tenant-a", 100, json!({ "expires_at": now() - 60 }))
        .await;
    ctx.provision("evt_2", "tenant-b", 100, json!({ "expires_at": now() + 86_400 }))
        .await;

    let expired = {
        let mut conn = ctx.conn();
        licensehook::licensing::expire_due_licenses(&mut conn, now()).unwrap()
    };
    assert_eq!(expired, 1);

    let license = ctx.current_license("tenant-a").unwrap();
    assert_eq!(license.status, LicenseStatus::Expired);
    assert_eq!(license.version, overdue.version + 1);
    assert_eq!(ctx.current_license("tenant-b").unwrap().status, LicenseStatus::Active);

    // A renewal brings it back.
    ctx.deliver(&event(
        "evt_renew",
        "subscription.renewed",
        "tenant-a",
        200,
        json!({ "expires_at": now() + 86_400 }),
    ))
    .await;
    ctx.drain().await;
    assert_eq!(ctx.current_license("tenant-a").unwrap().status, LicenseStatus::Active);
}

#[tokio::test]
async fn job_timestamp_must_match_its_event() {
    let ctx = TestContext::new();
    let before = ctx.provision("evt_a", "tenant-a", 100, json!({})).await;

    let forged = ctx
        .state
        .queue
        .enqueue(
            &ctx.conn(),
            &NewJob {
                job_type: JobType::Suspend,
                correlation_id: "replayed".into(),
                external_event_id: Some("evt_a".into()),
                payload: json!({
                    "external_event_id": "evt_a",
                    "tenant_id": "tenant-a",
                    "occurred_at": 900,
                }),
            },
            now(),
        )
        .unwrap();
    ctx.drain().await;

    let job = queries::get_job(&ctx.conn(), &forged.id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::DeadLettered);
    assert_eq!(job.dead_letter_reason, Some(DeadLetterReason::Rejected));

    let after = ctx.current_license("tenant-a").unwrap();
    assert_eq!(after.status, LicenseStatus::Active);
    assert_eq!(after.version, before.version);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_lease_each_job_once() {
    let ctx = TestContext::new();
    let tenants: Vec<String> = (0..6).map(|i| format!("tenant-{}", i)).collect();
    for (i, tenant) in tenants.iter().enumerate() {
        ctx.deliver(&event(&format!("evt_p{}", i), "checkout.completed", tenant, 100, json!({})))
            .await;
    }

    let run_workers = |count: usize| {
        let handles: Vec<_> = (0..count)
            .map(|_| {
                let worker = Worker::new(ctx.state.clone());
                tokio::spawn(async move { worker.drain().await.unwrap() })
            })
            .collect();
        async move {
            let mut handled = 0;
            for handle in handles {
                handled += handle.await.unwrap();
            }
            handled
        }
    };

    // Notify jobs enqueued after a worker went idle are picked up by the final drain.
    let handled = run_workers(4).await + ctx.drain().await;
    assert_eq!(handled, 12, "one provision and one notify job per tenant, each run once");

    for (i, tenant) in tenants.iter().enumerate() {
        let license = ctx.current_license(tenant).expect("license provisioned");
        assert_eq!(license.version, 1);
        for job in queries::list_jobs_for_event(&ctx.conn(), &format!("evt_p{}", i)).unwrap() {
            assert_eq!(job.status, JobStatus::Succeeded);
            assert_eq!(job.attempt_count, 1, "job {} leased more than once", job.id);
        }
    }

    // Second wave: suspend half of the tenants concurrently.
    for (i, tenant) in tenants.iter().enumerate().filter(|(i, _)| i % 2 == 0) {
        ctx.deliver(&event(&format!("evt_s{}", i), "subscription.suspended", tenant, 200, json!({})))
            .await;
    }
    let handled = run_workers(4).await + ctx.drain().await;
    assert_eq!(handled, 6);

    for (i, tenant) in tenants.iter().enumerate() {
        let license = ctx.current_license(tenant).unwrap();
        if i % 2 == 0 {
            assert_eq!(license.status, LicenseStatus::Suspended);
            assert_eq!(license.version, 2);
        } else {
            assert_eq!(license.status, LicenseStatus::Active);
            assert_eq!(license.version, 1);
        }
    }

    let stats = queries::job_stats(&ctx.conn()).unwrap();
    assert_eq!(stats.succeeded, 18);
    assert_eq!(stats.failed + stats.dead_lettered + stats.pending + stats.in_progress, 0);
}
