use chrono::Utc;
use geo_royale_server::db::models::Location;
use geo_royale_server::error::SessionError;
use geo_royale_server::game::registry::{
    CODE_LENGTH, CodeGenerator, RandomCodeGenerator, SessionRegistry,
};
use geo_royale_server::game::state::{JoinOutcome, LeaveOutcome};
use geo_royale_server::models::{Session, SessionSettings, SessionStatus};
use std::collections::VecDeque;
use std::time::Duration;

/// 決められた順にコードを返す。尽きたら最後のコードを返し続ける
struct ScriptedCodes {
    codes: VecDeque<String>,
    last: String,
}

impl ScriptedCodes {
    fn new(codes: &[&str]) -> Box<Self> {
        Box::new(Self {
            codes: codes.iter().map(|c| c.to_string()).collect(),
            last: codes.last().unwrap_or(&"AAAAAA").to_string(),
        })
    }
}

impl CodeGenerator for ScriptedCodes {
    fn next_code(&mut self) -> String {
        self.codes.pop_front().unwrap_or_else(|| self.last.clone())
    }
}

fn location(id: i64) -> Location {
    Location {
        id,
        name: format!("Location {}", id),
        latitude: 48.8584,
        longitude: 2.2945,
        difficulty: "easy".to_string(),
        category: "landmark".to_string(),
    }
}

fn create(registry: &mut SessionRegistry, owner: &str) -> String {
    registry
        .create_session(owner, owner, SessionSettings::default(), Utc::now())
        .expect("create session")
        .code
        .clone()
}

#[test]
fn test_session_codes_are_unique_on_collision() {
    let mut registry =
        SessionRegistry::with_code_generator(ScriptedCodes::new(&["AAAAAA", "AAAAAA", "BBBBBB"]));

    let first = create(&mut registry, "alice");
    let second = create(&mut registry, "bob");

    assert_eq!(first, "AAAAAA");
    assert_eq!(second, "BBBBBB");
    assert_eq!(registry.stats().total_sessions, 2);
}

#[test]
fn test_code_space_exhausted() {
    let mut registry = SessionRegistry::with_code_generator(ScriptedCodes::new(&["AAAAAA"]));
    create(&mut registry, "alice");

    let result = registry.create_session("bob", "Bob", SessionSettings::default(), Utc::now());
    assert_eq!(result.err(), Some(SessionError::CodeSpaceExhausted));
}

#[test]
fn test_random_codes_use_unambiguous_alphabet() {
    let mut generator = RandomCodeGenerator;
    for _ in 0..100 {
        let code = generator.next_code();
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(
            code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()),
            "unexpected code {}",
            code
        );
        assert!(!code.contains(['0', 'O', '1', 'I']), "ambiguous code {}", code);
    }
}

#[test]
fn test_lookup_is_case_insensitive_and_reports_not_found() {
    let mut registry = SessionRegistry::with_code_generator(ScriptedCodes::new(&["ABCDEF"]));
    create(&mut registry, "alice");

    assert!(registry.get_session("abcdef").is_ok());
    assert!(registry.get_session(" ABCDEF ").is_ok());
    assert_eq!(
        registry.get_session("ZZZZZZ").err(),
        Some(SessionError::NotFound("ZZZZZZ".to_string()))
    );
}

#[test]
fn test_create_session_validates_settings_and_identity() {
    let mut registry = SessionRegistry::new();

    let settings = SessionSettings {
        max_rounds: 0,
        ..Default::default()
    };
    assert!(matches!(
        registry.create_session("alice", "Alice", settings, Utc::now()),
        Err(SessionError::InvalidInput(_))
    ));

    assert!(matches!(
        registry.create_session("alice", "   ", SessionSettings::default(), Utc::now()),
        Err(SessionError::InvalidInput(_))
    ));
    assert_eq!(registry.stats().sessions_created, 0);
}

#[test]
fn test_creator_is_first_player_and_starts_disconnected() {
    let mut registry = SessionRegistry::new();
    let session = registry
        .create_session("alice", "Alice", SessionSettings::default(), Utc::now())
        .unwrap();

    assert_eq!(session.status, SessionStatus::Waiting);
    assert_eq!(session.players.len(), 1);
    assert_eq!(session.players[0].user_id, "alice");
    assert!(!session.players[0].is_connected);
    assert!(session.winner.is_none());
}

#[test]
fn test_start_requires_creator() {
    let mut registry = SessionRegistry::new();
    let code = create(&mut registry, "alice");
    registry.join_session(&code, "bob", "Bob", Utc::now()).unwrap();

    assert_eq!(
        registry.ensure_can_start(&code, "bob").err(),
        Some(SessionError::NotCreator)
    );
    assert_eq!(
        registry
            .start_session(&code, "bob", vec![location(1)], Utc::now())
            .err(),
        Some(SessionError::NotCreator)
    );
    assert_eq!(registry.get_session(&code).unwrap().status, SessionStatus::Waiting);
}

#[test]
fn test_start_requires_waiting_session() {
    let mut registry = SessionRegistry::new();
    let code = create(&mut registry, "alice");

    let round = registry
        .start_session(&code, "alice", vec![location(1)], Utc::now())
        .unwrap();
    assert_eq!(round.number, 1);

    let session = registry.get_session(&code).unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.current_round, 1);
    assert!(session.started_at.is_some());

    assert_eq!(
        registry
            .start_session(&code, "alice", vec![location(1)], Utc::now())
            .err(),
        Some(SessionError::NotWaiting(SessionStatus::Active))
    );
}

#[test]
fn test_start_without_locations_fails() {
    let mut registry = SessionRegistry::new();
    let code = create(&mut registry, "alice");

    assert_eq!(
        registry
            .start_session(&code, "alice", Vec::new(), Utc::now())
            .err(),
        Some(SessionError::NoLocations)
    );
    assert_eq!(registry.get_session(&code).unwrap().status, SessionStatus::Waiting);
}

#[test]
fn test_join_rules() {
    let mut registry = SessionRegistry::new();
    let settings = SessionSettings {
        max_players: 2,
        ..Default::default()
    };
    let code = registry
        .create_session("alice", "Alice", settings, Utc::now())
        .unwrap()
        .code
        .clone();

    // 作成者の参加は再接続扱い
    assert_eq!(
        registry.join_session(&code, "alice", "Alice", Utc::now()),
        Ok(JoinOutcome::Rejoined)
    );
    assert_eq!(
        registry.join_session(&code, "bob", "Bob", Utc::now()),
        Ok(JoinOutcome::Joined)
    );
    assert_eq!(
        registry.join_session(&code, "carol", "Carol", Utc::now()),
        Err(SessionError::SessionFull(2))
    );
    assert_eq!(
        registry.join_session("NOPE99", "carol", "Carol", Utc::now()),
        Err(SessionError::NotFound("NOPE99".to_string()))
    );
}

#[test]
fn test_cannot_join_active_or_finished_session() {
    let mut registry = SessionRegistry::new();
    let code = create(&mut registry, "alice");
    registry.join_session(&code, "bob", "Bob", Utc::now()).unwrap();
    registry
        .start_session(&code, "alice", vec![location(1)], Utc::now())
        .unwrap();

    assert_eq!(
        registry.join_session(&code, "carol", "Carol", Utc::now()),
        Err(SessionError::NotWaiting(SessionStatus::Active))
    );

    // 誰も推測しないまま最終ラウンドまで進める
    let mut finished = false;
    while !finished {
        let outcome = registry.resolve_round(&code, Utc::now()).unwrap();
        finished = outcome.finished;
        if !finished {
            registry.advance_round(&code, Utc::now()).unwrap();
        }
    }

    assert_eq!(
        registry.join_session(&code, "carol", "Carol", Utc::now()),
        Err(SessionError::AlreadyFinished)
    );
    assert_eq!(
        registry.join_session(&code, "bob", "Bob", Utc::now()),
        Err(SessionError::AlreadyFinished)
    );
}

#[test]
fn test_player_belongs_to_one_session_at_a_time() {
    let mut registry = SessionRegistry::new();
    let first = create(&mut registry, "alice");
    let second = create(&mut registry, "bob");

    assert_eq!(
        registry.join_session(&second, "alice", "Alice", Utc::now()),
        Err(SessionError::AlreadyInSession(first.clone()))
    );
    assert!(matches!(
        registry.create_session("alice", "Alice", SessionSettings::default(), Utc::now()),
        Err(SessionError::AlreadyInSession(_))
    ));
    assert_eq!(registry.session_of("alice"), Some(first.as_str()));
}

#[test]
fn test_finished_session_releases_memberships() {
    let mut registry = SessionRegistry::new();
    let settings = SessionSettings {
        max_rounds: 1,
        ..Default::default()
    };
    let code = registry
        .create_session("alice", "Alice", settings, Utc::now())
        .unwrap()
        .code
        .clone();
    registry
        .start_session(&code, "alice", vec![location(1)], Utc::now())
        .unwrap();
    let outcome = registry.resolve_round(&code, Utc::now()).unwrap();
    assert!(outcome.finished);

    assert_eq!(registry.session_of("alice"), None);
    assert!(
        registry
            .create_session("alice", "Alice", SessionSettings::default(), Utc::now())
            .is_ok()
    );
}

#[test]
fn test_creator_leaving_waiting_session_transfers_ownership() {
    let mut registry = SessionRegistry::new();
    let code = create(&mut registry, "alice");
    registry.join_session(&code, "bob", "Bob", Utc::now()).unwrap();
    registry.join_session(&code, "carol", "Carol", Utc::now()).unwrap();

    let outcome = registry.leave_session(&code, "alice", Utc::now()).unwrap();
    assert!(matches!(
        outcome,
        LeaveOutcome::Removed {
            session_empty: false,
            ..
        }
    ));

    let session = registry.get_session(&code).unwrap();
    assert_eq!(session.creator_id, "bob");
    assert_eq!(session.players.len(), 2);
    assert_eq!(registry.session_of("alice"), None);
    assert!(registry.ensure_can_start(&code, "bob").is_ok());
}

#[test]
fn test_empty_waiting_session_is_removed() {
    let mut registry = SessionRegistry::new();
    let code = create(&mut registry, "alice");

    let outcome = registry.leave_session(&code, "alice", Utc::now()).unwrap();
    assert!(matches!(
        outcome,
        LeaveOutcome::Removed {
            session_empty: true,
            ..
        }
    ));
    assert!(registry.get_session(&code).is_err());
    assert_eq!(registry.stats().total_sessions, 0);
}

#[test]
fn test_leaving_active_session_marks_disconnected() {
    let mut registry = SessionRegistry::new();
    let code = create(&mut registry, "alice");
    registry.join_session(&code, "bob", "Bob", Utc::now()).unwrap();
    registry
        .start_session(&code, "alice", vec![location(1)], Utc::now())
        .unwrap();

    let outcome = registry.leave_session(&code, "bob", Utc::now()).unwrap();
    assert!(matches!(outcome, LeaveOutcome::Disconnected { .. }));

    let session = registry.get_session(&code).unwrap();
    let bob = session.player("bob").unwrap();
    assert!(!bob.is_connected);
    assert!(bob.is_alive);
    // 進行中は所属を保持し、再接続できる
    assert_eq!(registry.session_of("bob"), Some(code.as_str()));
    assert_eq!(
        registry.join_session(&code, "bob", "Bob", Utc::now()),
        Ok(JoinOutcome::Rejoined)
    );
}

#[test]
fn test_leaderboard_ties_follow_join_order() {
    let now = Utc::now();
    let mut session = Session::new(
        "TIEBRK".to_string(),
        "alice".to_string(),
        "Alice".to_string(),
        SessionSettings::default(),
        now,
    );
    session.add_player("bob", "Bob", now).unwrap();
    session.add_player("carol", "Carol", now).unwrap();
    session.add_player("dave", "Dave", now).unwrap();

    session.players[0].score = 100; // alice
    session.players[1].score = 300; // bob
    session.players[2].score = 100; // carol
    session.players[3].score = 300; // dave

    let leaderboard = session.leaderboard();
    let order: Vec<&str> = leaderboard.iter().map(|e| e.user_id.as_str()).collect();
    assert_eq!(order, vec!["bob", "dave", "alice", "carol"]);
    let ranks: Vec<usize> = leaderboard.iter().map(|e| e.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);

    // 何度呼んでも同じ順序
    assert_eq!(session.leaderboard(), leaderboard);
}

#[test]
fn test_list_joinable_and_stats() {
    let mut registry =
        SessionRegistry::with_code_generator(ScriptedCodes::new(&["AAAAAA", "BBBBBB"]));
    let waiting = create(&mut registry, "alice");
    let active = create(&mut registry, "bob");
    registry.join_session(&waiting, "carol", "Carol", Utc::now()).unwrap();
    registry
        .start_session(&active, "bob", vec![location(1)], Utc::now())
        .unwrap();

    let joinable = registry.list_joinable();
    assert_eq!(joinable.len(), 1);
    assert_eq!(joinable[0].code, waiting);
    assert_eq!(joinable[0].player_count, 2);

    let stats = registry.stats();
    assert_eq!(stats.total_sessions, 2);
    assert_eq!(stats.waiting_sessions, 1);
    assert_eq!(stats.active_sessions, 1);
    assert_eq!(stats.finished_sessions, 0);
    assert_eq!(stats.total_players, 3);
    assert_eq!(stats.connected_players, 1);
    assert_eq!(stats.sessions_created, 2);
}

#[test]
fn test_purge_expired_sessions() {
    let mut registry =
        SessionRegistry::with_code_generator(ScriptedCodes::new(&["IDLE22", "LIVE33"]));
    let created_at = Utc::now() - chrono::Duration::seconds(120);
    registry
        .create_session("alice", "Alice", SessionSettings::default(), created_at)
        .unwrap();
    let live = create(&mut registry, "bob");
    registry.join_session(&live, "bob", "Bob", Utc::now()).unwrap();

    let removed = registry.purge_expired(
        Utc::now(),
        Duration::from_secs(60),
        Duration::from_secs(600),
    );

    assert_eq!(removed, vec!["IDLE22".to_string()]);
    assert!(registry.get_session("IDLE22").is_err());
    assert!(registry.get_session(&live).is_ok());
    assert_eq!(registry.session_of("alice"), None);
}
