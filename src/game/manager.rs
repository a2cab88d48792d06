use crate::config::GameTiming;
use crate::db::models::Location;
use crate::error::SessionError;
use crate::game::registry::{Sessions, lock_registry, normalize_code};
use crate::game::state::{GuessOutcome, LeaveOutcome, RoundOutcome};
use crate::models::{RoundState, SessionStatus, SessionView, WsMessage};
use actix::prelude::*;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

type Subscriber = mpsc::UnboundedSender<WsMessage>;

/// バトルロイヤル進行アクター
///
/// ソケット由来の状態変更はすべてこのアクターを経由するため、
/// 「読み出し→変更→通知」がメッセージ単位で直列化される。
pub struct BattleRoyaleManager {
    sessions: Sessions,
    /// 通知先 (code -> (user_id -> sender))
    subscribers: HashMap<String, HashMap<String, Subscriber>>,
    /// ラウンド締め切り/次ラウンド開始タイマー (code -> handle)
    round_timers: HashMap<String, SpawnHandle>,
    timing: GameTiming,
}

impl BattleRoyaleManager {
    pub fn new(sessions: Sessions, timing: GameTiming) -> Self {
        Self {
            sessions,
            subscribers: HashMap::new(),
            round_timers: HashMap::new(),
            timing,
        }
    }

    /// セッション購読者全員に送信（ベストエフォート）
    fn broadcast(&self, code: &str, msg: WsMessage) {
        if let Some(senders) = self.subscribers.get(code) {
            for sender in senders.values() {
                let _ = sender.send(msg.clone());
            }
        }
    }

    fn broadcast_except(&self, code: &str, excluded_user_id: &str, msg: WsMessage) {
        if let Some(senders) = self.subscribers.get(code) {
            for (user_id, sender) in senders {
                if user_id != excluded_user_id {
                    let _ = sender.send(msg.clone());
                }
            }
        }
    }

    fn send_to(&self, code: &str, user_id: &str, msg: WsMessage) {
        if let Some(sender) = self.subscribers.get(code).and_then(|s| s.get(user_id)) {
            let _ = sender.send(msg);
        }
    }

    fn set_timer(&mut self, code: &str, handle: SpawnHandle, ctx: &mut Context<Self>) {
        if let Some(previous) = self.round_timers.insert(code.to_string(), handle) {
            ctx.cancel_future(previous);
        }
    }

    fn cancel_timer(&mut self, code: &str, ctx: &mut Context<Self>) {
        if let Some(handle) = self.round_timers.remove(code) {
            ctx.cancel_future(handle);
        }
    }

    /// ラウンド開始を通知し、締め切りタイマーを仕掛ける
    fn open_round(&mut self, code: &str, round: &RoundState, max_rounds: u32, ctx: &mut Context<Self>) {
        info!("Round {}/{} started: code={}", round.number, max_rounds, code);
        self.broadcast(
            code,
            WsMessage::RoundStarted {
                round: round.number,
                max_rounds,
                location: round.location.clone(),
                deadline: round.deadline,
            },
        );

        let wait = (round.deadline - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let timer_code = code.to_string();
        let number = round.number;
        let handle = ctx.run_later(wait, move |act, ctx| {
            act.round_timers.remove(&timer_code);
            act.on_round_timeout(&timer_code, number, ctx);
        });
        self.set_timer(code, handle, ctx);
    }

    fn on_round_timeout(&mut self, code: &str, number: u32, ctx: &mut Context<Self>) {
        let is_current = lock_registry(&self.sessions)
            .get_session(code)
            .ok()
            .and_then(|s| s.round.as_ref())
            .is_some_and(|r| r.number == number);

        if is_current {
            info!("Round {} timed out: code={}", number, code);
            self.resolve_round(code, ctx);
        }
    }

    /// ラウンドを締めて結果・脱落・終了を通知する
    fn resolve_round(&mut self, code: &str, ctx: &mut Context<Self>) {
        self.cancel_timer(code, ctx);

        let mut registry = lock_registry(&self.sessions);
        let Some(outcome) = registry.resolve_round(code, Utc::now()) else {
            return;
        };
        let leaderboard = if outcome.finished {
            registry.get_leaderboard(code).unwrap_or_default()
        } else {
            Vec::new()
        };
        drop(registry);

        let RoundOutcome {
            round,
            location,
            results,
            eliminated,
            finished,
            winner,
        } = outcome;

        self.broadcast(
            code,
            WsMessage::RoundEnded {
                round,
                location,
                results,
            },
        );
        for player in eliminated {
            info!("Player eliminated: code={}, user_id={}, round={}", code, player.user_id, round);
            self.broadcast(
                code,
                WsMessage::PlayerEliminated {
                    user_id: player.user_id,
                    display_name: player.display_name,
                    round,
                },
            );
        }

        if finished {
            self.broadcast(code, WsMessage::SessionEnded { winner, leaderboard });
            return;
        }

        let timer_code = code.to_string();
        let handle = ctx.run_later(self.timing.round_intermission, move |act, ctx| {
            act.round_timers.remove(&timer_code);
            act.begin_next_round(&timer_code, ctx);
        });
        self.set_timer(code, handle, ctx);
    }

    fn begin_next_round(&mut self, code: &str, ctx: &mut Context<Self>) {
        let mut registry = lock_registry(&self.sessions);
        let Some(round) = registry.advance_round(code, Utc::now()) else {
            return;
        };
        let max_rounds = registry
            .get_session(code)
            .map_or(round.number, |s| s.max_rounds);
        drop(registry);

        self.open_round(code, &round, max_rounds, ctx);
    }

    fn drop_session(&mut self, code: &str, ctx: &mut Context<Self>) {
        self.cancel_timer(code, ctx);
        self.subscribers.remove(code);
    }
}

impl Actor for BattleRoyaleManager {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        // 期限切れセッションの定期掃除
        ctx.run_interval(self.timing.cleanup_interval, |act, ctx| {
            let removed = lock_registry(&act.sessions).purge_expired(
                Utc::now(),
                act.timing.idle_session_ttl,
                act.timing.finished_retention,
            );
            for code in removed {
                act.drop_session(&code, ctx);
            }
        });
    }
}

// メッセージ: セッション参加（再接続を含む）
#[derive(Message)]
#[rtype(result = "Result<SessionView, SessionError>")]
pub struct JoinSession {
    pub code: String,
    pub user_id: String,
    pub display_name: String,
    pub sender: Subscriber,
}

impl Handler<JoinSession> for BattleRoyaleManager {
    type Result = Result<SessionView, SessionError>;

    fn handle(&mut self, msg: JoinSession, _ctx: &mut Self::Context) -> Self::Result {
        let mut registry = lock_registry(&self.sessions);
        let outcome = registry.join_session(&msg.code, &msg.user_id, &msg.display_name, Utc::now())?;
        let session = registry.get_session(&msg.code)?;
        let view = session.view();
        let player = session.player(&msg.user_id).cloned();
        let player_count = session.players.len();
        drop(registry);

        debug!("Join outcome {:?}: code={}, user_id={}", outcome, view.code, msg.user_id);

        self.subscribers
            .entry(view.code.clone())
            .or_default()
            .insert(msg.user_id.clone(), msg.sender.clone());

        let _ = msg.sender.send(WsMessage::SessionJoined {
            session: view.clone(),
        });
        if let Some(player) = player {
            self.broadcast_except(
                &view.code,
                &msg.user_id,
                WsMessage::PlayerJoined {
                    player,
                    player_count,
                },
            );
        }

        Ok(view)
    }
}

// メッセージ: 離脱/切断
#[derive(Message)]
#[rtype(result = "()")]
pub struct LeaveSession {
    pub code: String,
    pub user_id: String,
    /// 離脱元のソケット。別ソケットで再接続済みなら無視する
    pub sender: Subscriber,
}

impl Handler<LeaveSession> for BattleRoyaleManager {
    type Result = ();

    fn handle(&mut self, msg: LeaveSession, ctx: &mut Self::Context) {
        let code = normalize_code(&msg.code);

        let is_stale = self
            .subscribers
            .get(&code)
            .and_then(|s| s.get(&msg.user_id))
            .is_some_and(|current| !current.same_channel(&msg.sender));
        if is_stale {
            debug!("Ignoring leave from stale socket: code={}, user_id={}", code, msg.user_id);
            return;
        }

        let mut registry = lock_registry(&self.sessions);
        let outcome = match registry.leave_session(&code, &msg.user_id, Utc::now()) {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Leave ignored: {}", e);
                return;
            }
        };
        let remaining = registry.get_session(&code).ok().map(|s| {
            (
                s.players.len(),
                s.status == SessionStatus::Active && s.all_alive_connected_guessed(),
            )
        });
        drop(registry);

        if let Some(senders) = self.subscribers.get_mut(&code) {
            senders.remove(&msg.user_id);
        }

        let player = match outcome {
            LeaveOutcome::Removed { player, .. } | LeaveOutcome::Disconnected { player } => player,
        };
        info!("Player left: code={}, user_id={}", code, player.user_id);

        let Some((player_count, round_complete)) = remaining else {
            self.drop_session(&code, ctx);
            return;
        };

        self.broadcast(
            &code,
            WsMessage::PlayerLeft {
                user_id: player.user_id,
                display_name: player.display_name,
                player_count,
            },
        );

        if round_complete {
            self.resolve_round(&code, ctx);
        }
    }
}

// メッセージ: セッション開始（ロケーションは取得済み）
#[derive(Message)]
#[rtype(result = "Result<SessionView, SessionError>")]
pub struct StartSession {
    pub code: String,
    pub requester_id: String,
    pub locations: Vec<Location>,
}

impl Handler<StartSession> for BattleRoyaleManager {
    type Result = Result<SessionView, SessionError>;

    fn handle(&mut self, msg: StartSession, ctx: &mut Self::Context) -> Self::Result {
        let mut registry = lock_registry(&self.sessions);
        let round = registry.start_session(&msg.code, &msg.requester_id, msg.locations, Utc::now())?;
        let session = registry.get_session(&msg.code)?;
        let view = session.view();
        let max_rounds = session.max_rounds;
        drop(registry);

        self.broadcast(
            &view.code,
            WsMessage::SessionStarted {
                session: view.clone(),
            },
        );
        self.open_round(&view.code, &round, max_rounds, ctx);

        Ok(view)
    }
}

// メッセージ: 推測送信
#[derive(Message)]
#[rtype(result = "Result<GuessOutcome, SessionError>")]
pub struct SubmitGuess {
    pub code: String,
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Handler<SubmitGuess> for BattleRoyaleManager {
    type Result = Result<GuessOutcome, SessionError>;

    fn handle(&mut self, msg: SubmitGuess, ctx: &mut Self::Context) -> Self::Result {
        let code = normalize_code(&msg.code);

        let mut registry = lock_registry(&self.sessions);
        let outcome =
            registry.submit_guess(&code, &msg.user_id, msg.latitude, msg.longitude, Utc::now())?;
        let display_name = registry
            .get_session(&code)
            .ok()
            .and_then(|s| s.player(&msg.user_id))
            .map(|p| p.display_name.clone())
            .unwrap_or_default();
        drop(registry);

        debug!(
            "Guess accepted: code={}, user_id={}, distance_km={:.1}, points={}",
            code, msg.user_id, outcome.distance_km, outcome.points
        );

        self.send_to(
            &code,
            &msg.user_id,
            WsMessage::GuessConfirmed {
                round: outcome.round,
                distance_km: outcome.distance_km,
                points: outcome.points,
                total_score: outcome.total_score,
            },
        );
        self.broadcast(
            &code,
            WsMessage::GuessSubmitted {
                user_id: msg.user_id.clone(),
                display_name,
                round: outcome.round,
            },
        );

        if outcome.round_complete {
            self.resolve_round(&code, ctx);
        }

        Ok(outcome)
    }
}
