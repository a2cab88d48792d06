use crate::db::models::Location;
use crate::error::SessionError;
use crate::game::state::{GuessOutcome, JoinOutcome, LeaveOutcome, RoundOutcome};
use crate::models::{
    LeaderboardEntry, RegistryStats, RoundState, Session, SessionSettings, SessionStatus,
    SessionSummary,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// 共有セッションレジストリ
pub type Sessions = Arc<Mutex<SessionRegistry>>;

/// レジストリをロックする（ロック中にパニックしたスレッドがあっても状態はそのまま使う）
pub fn lock_registry(sessions: &Sessions) -> MutexGuard<'_, SessionRegistry> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

pub const CODE_LENGTH: usize = 6;

/// 紛らわしい文字 (0/O, 1/I) を除いたコード用文字
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const MAX_CODE_ATTEMPTS: usize = 32;

/// セッションコードの生成元
pub trait CodeGenerator: Send {
    fn next_code(&mut self) -> String;
}

/// ランダムなセッションコード
#[derive(Debug, Default)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn next_code(&mut self) -> String {
        let mut rng = rand::rng();
        (0..CODE_LENGTH)
            .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

/// コード表記ゆれを吸収する
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// メモリ上の全セッションと、ユーザー→所属セッションの対応を管理する
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    /// 未終了セッションへの所属 (user_id → code)
    memberships: HashMap<String, String>,
    codes: Box<dyn CodeGenerator>,
    sessions_created: u64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_code_generator(Box::new(RandomCodeGenerator))
    }

    pub fn with_code_generator(codes: Box<dyn CodeGenerator>) -> Self {
        Self {
            sessions: HashMap::new(),
            memberships: HashMap::new(),
            codes,
            sessions_created: 0,
        }
    }

    pub fn shared(self) -> Sessions {
        Arc::new(Mutex::new(self))
    }

    /// 新規セッション作成（作成者が最初のプレイヤー）
    pub fn create_session(
        &mut self,
        owner_id: &str,
        display_name: &str,
        settings: SessionSettings,
        now: DateTime<Utc>,
    ) -> Result<&Session, SessionError> {
        validate_identity(owner_id, display_name)?;
        settings.validate()?;
        self.ensure_not_in_other_session(owner_id, None)?;

        let code = self.allocate_code()?;
        let session = Session::new(
            code.clone(),
            owner_id.to_string(),
            display_name.trim().to_string(),
            settings,
            now,
        );

        self.memberships.insert(owner_id.to_string(), code.clone());
        self.sessions_created += 1;
        info!("Session created: code={}, owner={}", code, owner_id);

        Ok(self.sessions.entry(code).or_insert(session))
    }

    fn allocate_code(&mut self) -> Result<String, SessionError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = normalize_code(&self.codes.next_code());
            if !self.sessions.contains_key(&code) {
                return Ok(code);
            }
            debug!("Session code collision: {}", code);
        }
        Err(SessionError::CodeSpaceExhausted)
    }

    fn ensure_not_in_other_session(
        &self,
        user_id: &str,
        code: Option<&str>,
    ) -> Result<(), SessionError> {
        match self.memberships.get(user_id) {
            Some(current) if Some(current.as_str()) != code => {
                Err(SessionError::AlreadyInSession(current.clone()))
            }
            _ => Ok(()),
        }
    }

    pub fn get_session(&self, code: &str) -> Result<&Session, SessionError> {
        let code = normalize_code(code);
        self.sessions
            .get(&code)
            .ok_or(SessionError::NotFound(code))
    }

    fn get_session_mut(&mut self, code: &str) -> Result<&mut Session, SessionError> {
        let code = normalize_code(code);
        self.sessions
            .get_mut(&code)
            .ok_or(SessionError::NotFound(code))
    }

    /// ユーザーが所属している未終了セッション
    pub fn session_of(&self, user_id: &str) -> Option<&str> {
        self.memberships.get(user_id).map(String::as_str)
    }

    pub fn join_session(
        &mut self,
        code: &str,
        user_id: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<JoinOutcome, SessionError> {
        validate_identity(user_id, display_name)?;
        let code = normalize_code(code);
        // 存在確認を先に行い、404を優先する
        self.get_session(&code)?;
        self.ensure_not_in_other_session(user_id, Some(&code))?;

        let outcome = self
            .get_session_mut(&code)?
            .add_player(user_id, display_name.trim(), now)?;
        self.memberships.insert(user_id.to_string(), code.clone());
        info!("Player {:?}: code={}, user_id={}", outcome, code, user_id);

        Ok(outcome)
    }

    /// 離脱/切断。待機中に全員抜けたセッションは削除する
    pub fn leave_session(
        &mut self,
        code: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LeaveOutcome, SessionError> {
        let code = normalize_code(code);
        let outcome = self.get_session_mut(&code)?.remove_player(user_id, now)?;

        if let LeaveOutcome::Removed { session_empty, .. } = &outcome {
            self.release_membership(user_id, &code);
            if *session_empty {
                self.sessions.remove(&code);
                info!("Session {} removed: no players left", code);
            }
        }

        Ok(outcome)
    }

    /// 開始前チェック。ロケーション取得に使う設定を返す
    pub fn ensure_can_start(
        &self,
        code: &str,
        requester_id: &str,
    ) -> Result<SessionSettings, SessionError> {
        let session = self.get_session(code)?;
        session.ensure_can_start(requester_id)?;
        Ok(session.settings.clone())
    }

    pub fn start_session(
        &mut self,
        code: &str,
        requester_id: &str,
        locations: Vec<Location>,
        now: DateTime<Utc>,
    ) -> Result<RoundState, SessionError> {
        let session = self.get_session_mut(code)?;
        let round = session.start(requester_id, locations, now)?.clone();
        info!(
            "Session {} started by {} with {} players",
            session.code,
            requester_id,
            session.players.len()
        );
        Ok(round)
    }

    pub fn submit_guess(
        &mut self,
        code: &str,
        user_id: &str,
        latitude: f64,
        longitude: f64,
        now: DateTime<Utc>,
    ) -> Result<GuessOutcome, SessionError> {
        self.get_session_mut(code)?
            .submit_guess(user_id, latitude, longitude, now)
    }

    /// ラウンドを締める。終了したセッションの所属は解放する
    pub fn resolve_round(&mut self, code: &str, now: DateTime<Utc>) -> Option<RoundOutcome> {
        let code = normalize_code(code);
        let outcome = self.sessions.get_mut(&code)?.resolve_round(now)?;
        if outcome.finished {
            self.release_session_memberships(&code);
            info!(
                "Session {} finished after round {}: winner={:?}",
                code, outcome.round, outcome.winner
            );
        }
        Some(outcome)
    }

    pub fn advance_round(&mut self, code: &str, now: DateTime<Utc>) -> Option<RoundState> {
        let code = normalize_code(code);
        self.sessions
            .get_mut(&code)?
            .advance_round(now)
            .cloned()
    }

    pub fn get_leaderboard(&self, code: &str) -> Result<Vec<LeaderboardEntry>, SessionError> {
        Ok(self.get_session(code)?.leaderboard())
    }

    /// 参加可能なセッション一覧（作成順）
    pub fn list_joinable(&self) -> Vec<SessionSummary> {
        let mut waiting: Vec<&Session> = self
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Waiting && s.players.len() < s.settings.max_players)
            .collect();
        waiting.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.code.cmp(&b.code)));
        waiting.into_iter().map(Session::summary).collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total_sessions: self.sessions.len(),
            sessions_created: self.sessions_created,
            ..Default::default()
        };
        for session in self.sessions.values() {
            match session.status {
                SessionStatus::Waiting => stats.waiting_sessions += 1,
                SessionStatus::Active => stats.active_sessions += 1,
                SessionStatus::Finished => stats.finished_sessions += 1,
            }
            stats.total_players += session.players.len();
            stats.connected_players += session.connected_count();
        }
        stats
    }

    /// 期限切れセッションを削除し、削除したコードを返す
    pub fn purge_expired(
        &mut self,
        now: DateTime<Utc>,
        idle_ttl: Duration,
        finished_retention: Duration,
    ) -> Vec<String> {
        let expired: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.is_expired(now, idle_ttl, finished_retention))
            .map(|s| s.code.clone())
            .collect();

        for code in &expired {
            self.release_session_memberships(code);
            self.sessions.remove(code);
            info!("Removing expired session: {}", code);
        }
        expired
    }

    fn release_membership(&mut self, user_id: &str, code: &str) {
        if self.memberships.get(user_id).is_some_and(|c| c == code) {
            self.memberships.remove(user_id);
        }
    }

    fn release_session_memberships(&mut self, code: &str) {
        self.memberships.retain(|_, c| c != code);
    }
}

fn validate_identity(user_id: &str, display_name: &str) -> Result<(), SessionError> {
    if user_id.trim().is_empty() {
        return Err(SessionError::InvalidInput("user_id must not be empty".to_string()));
    }
    if display_name.trim().is_empty() {
        return Err(SessionError::InvalidInput(
            "display_name must not be empty".to_string(),
        ));
    }
    Ok(())
}
