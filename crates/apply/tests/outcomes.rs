#![forbid(unsafe_code)]

mod support;

use std::time::Duration;

use kopatch_apply::{apply_reaction_outcomes, PatchError, ReactionOutcome, RecordingLogger};
use serde_json::{json, Value as Json};
use support::*;
use tokio::sync::Notify;

fn body() -> Json {
    json!({
        "apiVersion": "group1/version1",
        "kind": "Kind1",
        "metadata": {"uid": "uid1", "name": "name1", "namespace": "ns1"}
    })
}

fn outcome(patch: Json) -> ReactionOutcome {
    ReactionOutcome { patch, delays: Vec::new() }
}

async fn notified(n: &Notify) -> bool {
    tokio::time::timeout(Duration::from_millis(20), n.notified()).await.is_ok()
}

#[tokio::test]
async fn mismatches_are_logged_verbatim() {
    let cases = [
        (
            json!({"status": {"akey": "avalue"}}),
            json!({}),
            r#"[{"path":"status.akey","got":null,"expected":"avalue"}]"#,
        ),
        (
            json!({"status": {"akey": {"bkey": "avalue"}}}),
            json!({}),
            r#"[{"path":"status.akey.bkey","got":null,"expected":"avalue"}]"#,
        ),
        (
            json!({"status": {"akey": {"bkey": {"ckey": "avalue"}}}}),
            json!({}),
            r#"[{"path":"status.akey.bkey.ckey","got":null,"expected":"avalue"}]"#,
        ),
        (
            json!({"status": {"akey": "avalue"}}),
            json!({"status": {"akey": "bvalue"}}),
            r#"[{"path":"status.akey","got":"bvalue","expected":"avalue"}]"#,
        ),
        (
            json!({"status": {"akey": null}}),
            json!({"status": {"akey": "avalue"}}),
            r#"[{"path":"status.akey","got":"avalue","expected":null}]"#,
        ),
        (
            json!({"status": {"akey": "avalue"}}),
            json!({"status": {"akey": "bvalue", "bkey": "cvalue"}}),
            r#"[{"path":"status.akey","got":"bvalue","expected":"avalue"}]"#,
        ),
    ];
    for (patch, new_body, mismatch) in cases {
        // configmaps have no status subresource: the whole patch goes through the body call.
        let server = FakeServer::answering(new_body);
        let logger = RecordingLogger::new();
        let replenished = Notify::new();
        let mut delays = Vec::new();

        apply_reaction_outcomes(&issuer(&server), &configmaps(), &body(), outcome(patch.clone()), &mut delays, &logger, &replenished)
            .await
            .expect("applied");

        assert_eq!(
            logger.messages(),
            vec![
                format!("Patching with: {}", patch),
                format!("Patched body does not match with patch: {}", mismatch),
            ]
        );
    }
}

#[tokio::test]
async fn faithful_server_logs_only_intent() {
    let server = FakeServer::storing(body());
    let logger = RecordingLogger::new();
    let patch = json!({"metadata": {"labels": {"a": "b"}}, "spec": {"replicas": 2}});

    apply_reaction_outcomes(&issuer(&server), &configmaps(), &body(), outcome(patch), &mut Vec::new(), &logger, &Notify::new())
        .await
        .expect("applied");

    assert_eq!(logger.messages(), vec![r#"Patching with: {"metadata":{"labels":{"a":"b"}},"spec":{"replicas":2}}"#]);
    assert_eq!(server.calls().len(), 1);
}

#[tokio::test]
async fn status_only_patch_is_judged_by_the_status_answer() {
    let server = FakeServer::storing(body());
    let logger = RecordingLogger::new();

    apply_reaction_outcomes(&issuer(&server), &kopfexamples(), &body(), outcome(json!({"status": {"akey": "avalue"}})), &mut Vec::new(), &logger, &Notify::new())
        .await
        .expect("applied");

    assert_eq!(server.urls(), vec![format!("{}/apis/kopf.dev/v1/namespaces/ns1/kopfexamples/name1/status", SERVER)]);
    assert_eq!(logger.messages(), vec![r#"Patching with: {"status":{"akey":"avalue"}}"#]);
}

#[tokio::test]
async fn status_only_patch_reports_what_the_status_call_dropped() {
    let answer = json!({"status": {"akey": "bvalue"}});
    let server = FakeServer::storing_answering(body(), "/status", answer);
    let logger = RecordingLogger::new();

    apply_reaction_outcomes(&issuer(&server), &kopfexamples(), &body(), outcome(json!({"status": {"akey": "avalue"}})), &mut Vec::new(), &logger, &Notify::new())
        .await
        .expect("applied");

    assert_eq!(
        logger.messages()[1],
        r#"Patched body does not match with patch: [{"path":"status.akey","got":"bvalue","expected":"avalue"}]"#
    );
}

#[tokio::test]
async fn empty_patch_skips_network_and_verification() {
    let server = FakeServer::storing(body());
    let logger = RecordingLogger::new();

    apply_reaction_outcomes(&issuer(&server), &kopfexamples(), &body(), outcome(json!({})), &mut Vec::new(), &logger, &Notify::new())
        .await
        .expect("applied");

    assert_eq!(logger.messages(), vec!["Patching with: {}"]);
    assert!(server.calls().is_empty());
}

#[tokio::test]
async fn gone_object_is_judged_against_the_pre_patch_body() {
    let server = FakeServer::failing(404);
    let logger = RecordingLogger::new();
    let patch = json!({"metadata": {"namespace": "ns1"}, "spec": {"x": 1}});

    apply_reaction_outcomes(&issuer(&server), &kopfexamples(), &body(), outcome(patch), &mut Vec::new(), &logger, &Notify::new())
        .await
        .expect("404 is not an error");

    // metadata.namespace already matches; only spec.x can be missing from the old body.
    assert_eq!(
        logger.messages()[1],
        r#"Patched body does not match with patch: [{"path":"spec.x","got":null,"expected":1}]"#
    );
}

#[tokio::test]
async fn patch_failures_fail_the_attempt() {
    let server = FakeServer::failing(500);
    let logger = RecordingLogger::new();
    let replenished = Notify::new();
    let mut delays = Vec::new();
    let decided = ReactionOutcome { patch: json!({"spec": {"x": 1}}), delays: vec![Duration::from_secs(1)] };

    let err = apply_reaction_outcomes(&issuer(&server), &kopfexamples(), &body(), decided, &mut delays, &logger, &replenished)
        .await
        .unwrap_err();

    assert!(matches!(err, PatchError::Transport(_)), "err={}", err);
    assert_eq!(logger.messages().len(), 1);
    assert!(delays.is_empty());
}

#[tokio::test]
async fn requested_delays_are_appended_and_signalled() {
    let server = FakeServer::storing(body());
    let logger = RecordingLogger::new();
    let replenished = Notify::new();
    let mut delays = vec![Duration::from_secs(5)];
    let decided = ReactionOutcome {
        patch: json!({"status": {"kopf": {"progress": {"h1": {"retries": 1}}}}}),
        delays: vec![Duration::from_secs(1), Duration::from_millis(2500)],
    };

    apply_reaction_outcomes(&issuer(&server), &kopfexamples(), &body(), decided, &mut delays, &logger, &replenished)
        .await
        .expect("applied");

    assert_eq!(delays, vec![Duration::from_secs(5), Duration::from_secs(1), Duration::from_millis(2500)]);
    assert!(notified(&replenished).await);
}

#[tokio::test]
async fn no_delays_no_signal() {
    let server = FakeServer::storing(body());
    let replenished = Notify::new();
    let mut delays = Vec::new();

    apply_reaction_outcomes(&issuer(&server), &kopfexamples(), &body(), outcome(json!({})), &mut delays, &RecordingLogger::new(), &replenished)
        .await
        .expect("applied");

    assert!(delays.is_empty());
    assert!(!notified(&replenished).await);
}
