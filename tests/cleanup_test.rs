use actix::Actor;
use chrono::{TimeDelta, Utc};
use geo_royale_server::config::GameTiming;
use geo_royale_server::db::models::Location;
use geo_royale_server::game::manager::BattleRoyaleManager;
use geo_royale_server::game::registry::{SessionRegistry, lock_registry};
use geo_royale_server::models::{Session, SessionSettings, SessionStatus};
use std::time::Duration;
use tokio::time::sleep;

const IDLE_TTL: Duration = Duration::from_secs(300);
const RETENTION: Duration = Duration::from_secs(600);

fn new_session() -> Session {
    Session::new(
        "CLEAN1".to_string(),
        "alice".to_string(),
        "Alice".to_string(),
        SessionSettings::default(),
        Utc::now(),
    )
}

#[test]
fn test_idle_session_expiry() {
    let session = new_session();
    let created = session.created_at;

    // 一度も接続がなければ作成時刻から数える
    assert!(!session.is_expired(created + TimeDelta::seconds(299), IDLE_TTL, RETENTION));
    assert!(session.is_expired(created + TimeDelta::seconds(301), IDLE_TTL, RETENTION));
}

#[test]
fn test_connected_session_never_expires() {
    let mut session = new_session();
    session.add_player("alice", "Alice", Utc::now()).unwrap();

    let later = Utc::now() + TimeDelta::hours(24);
    assert!(!session.is_expired(later, IDLE_TTL, RETENTION));
}

#[test]
fn test_idle_ttl_counts_from_last_disconnect() {
    let mut session = new_session();
    session.add_player("bob", "Bob", Utc::now()).unwrap();

    let left_at = Utc::now() + TimeDelta::seconds(1000);
    session.remove_player("bob", left_at).unwrap();
    assert_eq!(session.last_active_at, Some(left_at));

    assert!(!session.is_expired(left_at + TimeDelta::seconds(200), IDLE_TTL, RETENTION));
    assert!(session.is_expired(left_at + TimeDelta::seconds(400), IDLE_TTL, RETENTION));
}

#[test]
fn test_finished_session_retention() {
    let mut session = new_session();
    session.add_player("alice", "Alice", Utc::now()).unwrap();
    let location = Location {
        id: 1,
        name: "Table Mountain".to_string(),
        latitude: -33.9628,
        longitude: 18.4098,
        difficulty: "medium".to_string(),
        category: "nature".to_string(),
    };
    session.start("alice", vec![location], Utc::now()).unwrap();
    let outcome = session.resolve_round(Utc::now()).unwrap();
    assert!(outcome.finished);
    assert_eq!(session.status, SessionStatus::Finished);

    // 接続中でも保持期間を過ぎれば削除対象
    let finished_at = session.finished_at.unwrap();
    assert!(!session.is_expired(finished_at + TimeDelta::seconds(599), IDLE_TTL, RETENTION));
    assert!(session.is_expired(finished_at + TimeDelta::seconds(601), IDLE_TTL, RETENTION));
}

#[actix_rt::test]
async fn test_manager_purges_idle_sessions() {
    let sessions = SessionRegistry::new().shared();
    let timing = GameTiming {
        idle_session_ttl: Duration::ZERO,
        cleanup_interval: Duration::from_millis(100),
        ..Default::default()
    };
    let _manager = BattleRoyaleManager::new(sessions.clone(), timing).start();

    let code = lock_registry(&sessions)
        .create_session("alice", "Alice", SessionSettings::default(), Utc::now())
        .unwrap()
        .code
        .clone();

    sleep(Duration::from_millis(400)).await;

    let registry = lock_registry(&sessions);
    assert!(registry.get_session(&code).is_err());
    assert_eq!(registry.session_of("alice"), None);
    assert_eq!(registry.stats().sessions_created, 1);
}
