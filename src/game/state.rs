use crate::db::models::Location;
use crate::error::SessionError;
use crate::models::{
    EliminationRule, Guess, LeaderboardEntry, Player, PlayerRef, RoundResult, RoundState, Session,
    SessionSettings, SessionStatus, SessionSummary, SessionView,
};
use crate::utils::{haversine_km, is_valid_coordinate, score_for_distance};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

pub const MAX_ROUNDS_LIMIT: u32 = 20;
pub const MAX_PLAYERS_LIMIT: usize = 50;
pub const MIN_ROUND_TIME_SECS: u64 = 10;
pub const MAX_ROUND_TIME_SECS: u64 = 300;

/// 推測受付結果
#[derive(Debug, Clone, PartialEq)]
pub struct GuessOutcome {
    pub round: u32,
    pub distance_km: f64,
    pub points: u32,
    /// このラウンドの得点を加えた見込み累計
    pub total_score: u32,
    /// 生存中かつ接続中の全員が推測済みか
    pub round_complete: bool,
}

/// ラウンド集計結果
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub round: u32,
    pub location: Location,
    pub results: Vec<RoundResult>,
    pub eliminated: Vec<PlayerRef>,
    pub finished: bool,
    pub winner: Option<PlayerRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Rejoined,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeaveOutcome {
    /// 待機中のため除外された
    Removed { player: PlayerRef, session_empty: bool },
    /// 進行中/終了済みのため切断扱い
    Disconnected { player: PlayerRef },
}

impl SessionSettings {
    pub fn validate(&self) -> Result<(), SessionError> {
        if !(1..=MAX_ROUNDS_LIMIT).contains(&self.max_rounds) {
            return Err(SessionError::InvalidInput(format!(
                "max_rounds must be between 1 and {}",
                MAX_ROUNDS_LIMIT
            )));
        }
        if !(2..=MAX_PLAYERS_LIMIT).contains(&self.max_players) {
            return Err(SessionError::InvalidInput(format!(
                "max_players must be between 2 and {}",
                MAX_PLAYERS_LIMIT
            )));
        }
        if !(MIN_ROUND_TIME_SECS..=MAX_ROUND_TIME_SECS).contains(&self.round_time_secs) {
            return Err(SessionError::InvalidInput(format!(
                "round_time_secs must be between {} and {}",
                MIN_ROUND_TIME_SECS, MAX_ROUND_TIME_SECS
            )));
        }
        if let EliminationRule::Bottom(0) = self.elimination {
            return Err(SessionError::InvalidInput(
                "bottom elimination count must be at least 1".to_string(),
            ));
        }
        if matches!(&self.category, Some(c) if c.trim().is_empty()) {
            return Err(SessionError::InvalidInput("category must not be empty".to_string()));
        }
        Ok(())
    }
}

impl Session {
    /// 作成者を最初のプレイヤーとしてセッションを作成（ソケット接続までは未接続扱い）
    pub fn new(
        code: String,
        creator_id: String,
        display_name: String,
        settings: SessionSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let mut creator = Player::new(creator_id.clone(), display_name);
        creator.joined_at = now;

        Self {
            code,
            creator_id,
            status: SessionStatus::Waiting,
            players: vec![creator],
            current_round: 0,
            max_rounds: settings.max_rounds,
            settings,
            created_at: now,
            started_at: None,
            finished_at: None,
            last_active_at: None,
            winner: None,
            locations: Vec::new(),
            round: None,
        }
    }

    pub fn player(&self, user_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    fn player_mut(&mut self, user_id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.user_id == user_id)
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.player(user_id).is_some()
    }

    pub fn alive_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_alive).count()
    }

    pub fn connected_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_connected).count()
    }

    /// プレイヤー参加（既存メンバーは再接続扱い）
    pub fn add_player(
        &mut self,
        user_id: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<JoinOutcome, SessionError> {
        if self.status == SessionStatus::Finished {
            return Err(SessionError::AlreadyFinished);
        }

        if let Some(player) = self.player_mut(user_id) {
            player.is_connected = true;
            self.last_active_at = None;
            return Ok(JoinOutcome::Rejoined);
        }

        if self.status != SessionStatus::Waiting {
            return Err(SessionError::NotWaiting(self.status));
        }
        if self.players.len() >= self.settings.max_players {
            return Err(SessionError::SessionFull(self.settings.max_players));
        }

        let mut player = Player::new(user_id.to_string(), display_name.to_string());
        player.is_connected = true;
        player.joined_at = now;
        self.players.push(player);
        self.last_active_at = None;

        Ok(JoinOutcome::Joined)
    }

    /// プレイヤー離脱/切断
    pub fn remove_player(
        &mut self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LeaveOutcome, SessionError> {
        let Some(index) = self.players.iter().position(|p| p.user_id == user_id) else {
            return Err(SessionError::NotAPlayer(user_id.to_string()));
        };

        let outcome = if self.status == SessionStatus::Waiting {
            let removed = self.players.remove(index);
            // 作成者が抜けたら参加順で次のプレイヤーに引き継ぐ
            if removed.user_id == self.creator_id {
                if let Some(next) = self.players.first() {
                    self.creator_id = next.user_id.clone();
                }
            }
            LeaveOutcome::Removed {
                player: removed.to_ref(),
                session_empty: self.players.is_empty(),
            }
        } else {
            let player = &mut self.players[index];
            player.is_connected = false;
            LeaveOutcome::Disconnected {
                player: player.to_ref(),
            }
        };

        if self.connected_count() == 0 {
            self.last_active_at = Some(now);
        }

        Ok(outcome)
    }

    /// 開始可能か（作成者かつ待機中）
    pub fn ensure_can_start(&self, requester_id: &str) -> Result<(), SessionError> {
        if requester_id != self.creator_id {
            return Err(SessionError::NotCreator);
        }
        if self.status != SessionStatus::Waiting {
            return Err(SessionError::NotWaiting(self.status));
        }
        Ok(())
    }

    /// セッション開始（ラウンド1へ進む）
    pub fn start(
        &mut self,
        requester_id: &str,
        locations: Vec<Location>,
        now: DateTime<Utc>,
    ) -> Result<&RoundState, SessionError> {
        self.ensure_can_start(requester_id)?;
        if locations.is_empty() {
            return Err(SessionError::NoLocations);
        }

        self.status = SessionStatus::Active;
        self.started_at = Some(now);
        self.locations = locations;

        self.advance_round(now).ok_or(SessionError::RoundNotOpen)
    }

    /// 次のラウンドを開く
    pub fn advance_round(&mut self, now: DateTime<Utc>) -> Option<&RoundState> {
        if self.status != SessionStatus::Active || self.round.is_some() || self.locations.is_empty()
        {
            return None;
        }
        let next = self.current_round + 1;
        if next > self.max_rounds {
            return None;
        }

        let location = self.locations[(next as usize - 1) % self.locations.len()].clone();
        let round_time = TimeDelta::seconds(self.settings.round_time_secs as i64);

        self.current_round = next;
        self.round = Some(RoundState {
            number: next,
            location,
            started_at: now,
            deadline: now + round_time,
            guesses: HashMap::new(),
        });
        self.round.as_ref()
    }

    /// 推測を受け付けて採点
    pub fn submit_guess(
        &mut self,
        user_id: &str,
        latitude: f64,
        longitude: f64,
        now: DateTime<Utc>,
    ) -> Result<GuessOutcome, SessionError> {
        let Some(player) = self.player(user_id) else {
            return Err(SessionError::NotAPlayer(user_id.to_string()));
        };
        if !player.is_alive {
            return Err(SessionError::PlayerEliminated);
        }
        let current_score = player.score;

        if self.status != SessionStatus::Active {
            return Err(SessionError::RoundNotOpen);
        }
        if !is_valid_coordinate(latitude, longitude) {
            return Err(SessionError::InvalidGuess { latitude, longitude });
        }
        let Some(round) = self.round.as_mut() else {
            return Err(SessionError::RoundNotOpen);
        };
        if round.guesses.contains_key(user_id) {
            return Err(SessionError::AlreadyGuessed(round.number));
        }

        let distance_km = haversine_km(
            round.location.latitude,
            round.location.longitude,
            latitude,
            longitude,
        );
        let points = score_for_distance(distance_km);
        let round_number = round.number;

        round.guesses.insert(
            user_id.to_string(),
            Guess {
                latitude,
                longitude,
                distance_km,
                points,
                submitted_at: now,
            },
        );

        Ok(GuessOutcome {
            round: round_number,
            distance_km,
            points,
            total_score: current_score + points,
            round_complete: self.all_alive_connected_guessed(),
        })
    }

    /// 生存中かつ接続中の全員が推測済みか（該当者がいなければfalse）
    pub fn all_alive_connected_guessed(&self) -> bool {
        let Some(round) = &self.round else {
            return false;
        };
        let mut waiting_on = self
            .players
            .iter()
            .filter(|p| p.is_alive && p.is_connected)
            .peekable();
        if waiting_on.peek().is_none() {
            return false;
        }
        waiting_on.all(|p| round.guesses.contains_key(&p.user_id))
    }

    /// ラウンドを締めて採点・脱落判定を行う
    ///
    /// 未回答と締め切り時点の切断者は0点で脱落。回答者からはルールに従って脱落者を選ぶが、
    /// 生存者が1人も残らない場合は未回答者のみ脱落させる。全員未回答なら誰も脱落しない。
    pub fn resolve_round(&mut self, now: DateTime<Utc>) -> Option<RoundOutcome> {
        if self.status != SessionStatus::Active {
            return None;
        }
        let round = self.round.take()?;

        // ラウンド開始時点の生存者（参加順のインデックス）
        let alive: Vec<usize> = (0..self.players.len())
            .filter(|&i| self.players[i].is_alive)
            .collect();

        // 締め切り時点で切断中のプレイヤーは推測済みでも未回答扱い
        let counted = |p: &Player| p.is_connected && round.guesses.contains_key(&p.user_id);

        let mut round_points: HashMap<usize, u32> = HashMap::new();
        for &i in &alive {
            let points = if counted(&self.players[i]) {
                round
                    .guesses
                    .get(&self.players[i].user_id)
                    .map_or(0, |g| g.points)
            } else {
                0
            };
            let player = &mut self.players[i];
            player.score += points;
            player.last_round_points = Some(points);
            round_points.insert(i, points);
        }

        let (guessers, missed): (Vec<usize>, Vec<usize>) = alive
            .iter()
            .copied()
            .partition(|&i| counted(&self.players[i]));

        let mut eliminated: HashSet<usize> = HashSet::new();
        if !guessers.is_empty() {
            eliminated.extend(missed.iter().copied());
            eliminated.extend(select_by_rule(
                self.settings.elimination,
                &guessers,
                &round_points,
            ));
            if eliminated.len() >= alive.len() {
                eliminated = missed.iter().copied().collect();
            }
        }

        for &i in &eliminated {
            let player = &mut self.players[i];
            player.is_alive = false;
            player.eliminated_in_round = Some(round.number);
        }

        let results = alive
            .iter()
            .map(|&i| {
                let player = &self.players[i];
                RoundResult {
                    user_id: player.user_id.clone(),
                    display_name: player.display_name.clone(),
                    guess: round.guesses.get(&player.user_id).cloned(),
                    points: round_points.get(&i).copied().unwrap_or(0),
                    total_score: player.score,
                    eliminated: eliminated.contains(&i),
                }
            })
            .collect();

        // 参加順で通知する
        let mut eliminated_refs: Vec<usize> = eliminated.into_iter().collect();
        eliminated_refs.sort_unstable();
        let eliminated = eliminated_refs
            .into_iter()
            .map(|i| self.players[i].to_ref())
            .collect();

        let finished = self.alive_count() <= 1 || self.current_round >= self.max_rounds;
        if finished {
            self.finish(now);
        }

        Some(RoundOutcome {
            round: round.number,
            location: round.location,
            results,
            eliminated,
            finished,
            winner: self.winner_ref(),
        })
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.winner = self.pick_winner().map(|p| p.user_id.clone());
        self.status = SessionStatus::Finished;
        self.finished_at = Some(now);
        self.round = None;
    }

    /// 勝者候補: 生存者の最高得点（同点は参加順）、生存者がいなければリーダーボード首位
    fn pick_winner(&self) -> Option<&Player> {
        let any_alive = self.players.iter().any(|p| p.is_alive);
        // max_by_keyは同点なら最後の要素を返すため逆順に走査する
        self.players
            .iter()
            .filter(|p| p.is_alive || !any_alive)
            .rev()
            .max_by_key(|p| p.score)
    }

    pub fn winner_ref(&self) -> Option<PlayerRef> {
        let winner = self.winner.as_deref()?;
        self.player(winner).map(Player::to_ref)
    }

    /// 得点降順、同点は参加順
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let mut ordered: Vec<&Player> = self.players.iter().collect();
        // 安定ソートなので同点は参加順のまま
        ordered.sort_by(|a, b| b.score.cmp(&a.score));

        ordered
            .into_iter()
            .enumerate()
            .map(|(i, p)| LeaderboardEntry {
                rank: i + 1,
                user_id: p.user_id.clone(),
                display_name: p.display_name.clone(),
                score: p.score,
                is_alive: p.is_alive,
                eliminated_in_round: p.eliminated_in_round,
            })
            .collect()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            code: self.code.clone(),
            creator_id: self.creator_id.clone(),
            status: self.status,
            players: self.players.clone(),
            current_round: self.current_round,
            max_rounds: self.max_rounds,
            settings: self.settings.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            winner: self.winner_ref(),
            current_location: self.round.as_ref().map(|r| r.location.clone()),
            round_deadline: self.round.as_ref().map(|r| r.deadline),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            code: self.code.clone(),
            creator_id: self.creator_id.clone(),
            player_count: self.players.len(),
            max_players: self.settings.max_players,
            max_rounds: self.max_rounds,
            difficulty: self.settings.difficulty,
            category: self.settings.category.clone(),
            created_at: self.created_at,
        }
    }

    /// 掃除対象か
    /// - 終了後、保持期間を過ぎた
    /// - 接続者がいない状態でTTLを過ぎた（一度も接続がなければ作成時刻から）
    pub fn is_expired(
        &self,
        now: DateTime<Utc>,
        idle_ttl: Duration,
        finished_retention: Duration,
    ) -> bool {
        let to_delta = |d: Duration| TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX);

        if self.status == SessionStatus::Finished {
            return self
                .finished_at
                .is_some_and(|t| now.signed_duration_since(t) > to_delta(finished_retention));
        }

        if self.connected_count() > 0 {
            return false;
        }
        let since = self.last_active_at.unwrap_or(self.created_at);
        now.signed_duration_since(since) > to_delta(idle_ttl)
    }
}

/// 回答者の中からルールに従って脱落者を選ぶ
fn select_by_rule(
    rule: EliminationRule,
    guessers: &[usize],
    round_points: &HashMap<usize, u32>,
) -> Vec<usize> {
    let points_of = |i: &usize| round_points.get(i).copied().unwrap_or(0);

    match rule {
        EliminationRule::Lowest => {
            let Some(min) = guessers.iter().map(points_of).min() else {
                return Vec::new();
            };
            guessers
                .iter()
                .copied()
                .filter(|i| points_of(i) == min)
                .collect()
        }
        EliminationRule::Bottom(count) => {
            let mut ordered = guessers.to_vec();
            // 得点昇順、同点は後から参加した方を先に
            ordered.sort_by(|a, b| points_of(a).cmp(&points_of(b)).then(b.cmp(a)));
            ordered.truncate(count);
            ordered
        }
    }
}
