use super::*;
use crate::clock::IntervalPolicy;
use crate::config::{Config, PollConfig};
use crate::db::NewRule;
use crate::registry::{PlainKeyDecryptor, Registry, UserStatus};
use crate::types::ItemId;
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Fixture {
    _dir: TempDir,
    registry: Arc<Registry>,
    config: Arc<Config>,
    active: Arc<ActivePolls>,
    user_db_path: String,
}

impl Fixture {
    async fn new(server: &MockServer) -> Self {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(
            Registry::new(&dir.path().join("registry.db"), Arc::new(PlainKeyDecryptor))
                .await
                .unwrap(),
        );

        let config = Arc::new(Config {
            api: crate::config::ApiConfig {
                base_url: server.uri(),
                version: "v1".to_string(),
                request_timeout: Duration::from_secs(5),
            },
            poll: PollConfig {
                stagger_window: Duration::ZERO,
                ..PollConfig::default()
            },
            ..Config::default()
        });

        let user_db_path = dir
            .path()
            .join("user.db")
            .to_string_lossy()
            .into_owned();

        Self {
            _dir: dir,
            registry,
            config,
            active: Arc::new(ActivePolls::new()),
            user_db_path,
        }
    }

    async fn seed_user(&self, id: &str) -> RegistryUser {
        let auth_id = AuthId::from(id);
        self.registry
            .upsert_user(&auth_id, &self.user_db_path)
            .await
            .unwrap();
        self.registry
            .set_api_key(&auth_id, "secret-key", None)
            .await
            .unwrap();
        self.registry
            .set_has_active_rules(&auth_id, true)
            .await
            .unwrap();
        self.registry.get_user(&auth_id).await.unwrap().unwrap()
    }

    /// Insert a match-everything rule with the given action into the user db
    async fn seed_rule(&self, action: serde_json::Value) {
        let db = Database::new(Path::new(&self.user_db_path)).await.unwrap();
        db.insert_rule(&NewRule {
            name: "match all".to_string(),
            enabled: true,
            trigger_config: None,
            conditions: json!({"conditions": [], "logicOperator": "and"}),
            action_config: action,
            metadata: None,
        })
        .await
        .unwrap();
        db.close().await;
    }

    fn poller(&self) -> UserPoller {
        UserPoller::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            Arc::clone(&self.active),
        )
    }
}

fn mylist_body(items: serde_json::Value) -> serde_json::Value {
    json!({"success": true, "data": items})
}

async fn mount_lists(server: &MockServer, items: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/v1/api/torrents/mylist"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mylist_body(items)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/api/queued/getqueued"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mylist_body(json!([]))))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_cycle_with_rule_execution() {
    let server = MockServer::start().await;
    mount_lists(
        &server,
        json!([{
            "id": 42,
            "name": "finished-item",
            "active": true,
            "download_finished": true,
            "download_present": true,
            "seeds": 3,
            "total_downloaded": 1000,
            "total_uploaded": 500
        }]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/v1/api/torrents/controltorrent"))
        .and(body_partial_json(json!({"operation": "stop_seeding"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let fixture = Fixture::new(&server).await;
    let user = fixture.seed_user("alice").await;
    fixture.seed_rule(json!({"type": "stop_seeding"})).await;

    let outcome = fixture.poller().poll(&user).await.unwrap();
    let report = match outcome {
        CycleOutcome::Completed(report) => report,
        other => panic!("expected completion, got {other:?}"),
    };

    assert_eq!(report.fetched, 1);
    assert_eq!(report.new_items, 1);
    assert_eq!(report.rules_evaluated, 1);
    assert_eq!(report.rules_executed, 1);
    assert_eq!(report.actions_succeeded, 1);
    assert_eq!(report.actions_failed, 0);
    assert_eq!(report.non_terminal, 1);

    // Registry got the write-back
    let refreshed = fixture.registry.get_user(&user.auth_id).await.unwrap().unwrap();
    assert_eq!(refreshed.non_terminal_torrent_count, 1);
    assert!(refreshed.next_poll_at.is_some());

    // The shadow and the execution log were written
    let db = Database::new(Path::new(&fixture.user_db_path)).await.unwrap();
    assert!(db.get_shadow(&ItemId::from("42")).await.unwrap().is_some());
    let rules = db.list_rules().await.unwrap();
    assert_eq!(rules[0].execution_count, 1);
    assert!(rules[0].last_evaluated_at.is_some());
    let log = db.execution_log_for_rule(rules[0].id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].success, 1);
    db.close().await;

    // The in-progress flag was released
    assert!(fixture.active.is_empty());
}

#[tokio::test]
async fn test_poll_skips_when_already_running() {
    let server = MockServer::start().await;
    let fixture = Fixture::new(&server).await;
    let user = fixture.seed_user("alice").await;

    let _held = fixture.active.try_begin(&user.auth_id).unwrap();

    let outcome = fixture.poller().poll(&user).await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Skipped(SkipReason::AlreadyRunning)
    ));

    // The skip must not have released the original claim
    assert!(fixture.active.is_running(&user.auth_id));
}

#[tokio::test]
async fn test_poll_skips_without_active_rules() {
    let server = MockServer::start().await;
    let fixture = Fixture::new(&server).await;
    let mut user = fixture.seed_user("alice").await;
    user.has_active_rules = false;

    let outcome = fixture.poller().poll(&user).await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Skipped(SkipReason::NoActiveRules)
    ));
    assert!(fixture.active.is_empty());
}

// A 403 with BAD_TOKEN deactivates the user, and the next due
// selection excludes them.
#[tokio::test]
async fn test_auth_failure_deactivates_user() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/api/torrents/mylist"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "success": false,
            "error": "BAD_TOKEN",
            "detail": "token revoked"
        })))
        .mount(&server)
        .await;

    let fixture = Fixture::new(&server).await;
    let user = fixture.seed_user("alice").await;
    fixture.seed_rule(json!({"type": "delete"})).await;

    let err = fixture.poller().poll(&user).await.unwrap_err();
    assert!(err.is_auth());

    let refreshed = fixture.registry.get_user(&user.auth_id).await.unwrap().unwrap();
    assert_eq!(refreshed.status, UserStatus::Inactive);
    assert!(fixture.registry.due_users(Utc::now()).await.unwrap().is_empty());
    assert!(fixture.active.is_empty());
}

#[tokio::test]
async fn test_transient_list_failure_completes_empty_cycle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/api/torrents/mylist"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/api/queued/getqueued"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fixture = Fixture::new(&server).await;
    let user = fixture.seed_user("alice").await;
    fixture.seed_rule(json!({"type": "delete"})).await;

    let outcome = fixture.poller().poll(&user).await.unwrap();
    let report = match outcome {
        CycleOutcome::Completed(report) => report,
        other => panic!("expected completion, got {other:?}"),
    };

    assert_eq!(report.fetched, 0);
    assert_eq!(report.rules_evaluated, 1);
    assert_eq!(report.rules_executed, 0);
    assert_eq!(report.non_terminal, 0);
}

#[test]
fn test_active_polls_exclusivity() {
    let active = Arc::new(ActivePolls::new());
    let alice = AuthId::from("alice");
    let bob = AuthId::from("bob");

    let guard = active.try_begin(&alice).unwrap();
    assert!(active.try_begin(&alice).is_none());
    // Other users are unaffected
    assert!(active.try_begin(&bob).is_some());

    drop(guard);
    assert!(!active.is_running(&alice));
    assert!(active.try_begin(&alice).is_some());
}

fn rule_with_interval(minutes: f64) -> Rule {
    Rule::from_row(&crate::db::RuleRow {
        id: crate::types::RuleId(1),
        name: "r".to_string(),
        enabled: 1,
        trigger_config: Some(json!({"type": "interval", "value": minutes}).to_string()),
        conditions: None,
        action_config: None,
        metadata: None,
        last_executed_at: None,
        last_evaluated_at: None,
        execution_count: 0,
        created_at: "2026-08-01T00:00:00.000Z".to_string(),
        updated_at: "2026-08-01T00:00:00.000Z".to_string(),
    })
}

#[test]
fn test_next_poll_delay_modes() {
    let policy = IntervalPolicy::production();

    // no-rules mode
    assert_eq!(
        next_poll_delay(&policy, &[], false, false, 0),
        chrono::Duration::minutes(60)
    );

    // idle mode ignores rule intervals entirely
    assert_eq!(
        next_poll_delay(&policy, &[rule_with_interval(10.0)], true, false, 5),
        chrono::Duration::minutes(60)
    );

    // active mode uses the smallest interval across enabled rules
    assert_eq!(
        next_poll_delay(
            &policy,
            &[rule_with_interval(45.0), rule_with_interval(10.0)],
            true,
            true,
            5
        ),
        chrono::Duration::minutes(10)
    );

    // active mode without interval rules: 5 min with work, 30 min without
    assert_eq!(
        next_poll_delay(&policy, &[], true, true, 3),
        chrono::Duration::minutes(5)
    );
    assert_eq!(
        next_poll_delay(&policy, &[], true, true, 0),
        chrono::Duration::minutes(30)
    );
}

#[test]
fn test_next_poll_delay_clamps_to_floor() {
    let production = IntervalPolicy::production();
    // A 1-minute interval rule cannot drive polling below the 5-minute floor
    assert_eq!(
        next_poll_delay(&production, &[rule_with_interval(1.0)], true, true, 5),
        chrono::Duration::minutes(5)
    );

    // A reduced multiplier switches to the test floor
    let test_policy = IntervalPolicy::new(0.1);
    assert_eq!(
        next_poll_delay(&test_policy, &[rule_with_interval(1.0)], true, true, 5),
        chrono::Duration::seconds(6)
    );
}
