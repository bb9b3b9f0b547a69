//! The session manager: registry of active rooms, intent dispatch and
//! outbound fan-out.
//!
//! Concurrency model: the registry lock is held only long enough to
//! resolve a room code to its `Arc`; each room then has its own mutex,
//! so intents for one room are serialized while different rooms run in
//! parallel. Nothing inside a room's critical section does I/O beyond
//! pushing onto unbounded channels. Turn-timer expiries re-enter
//! through the same per-room path as any player intent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::Rng;
use uuid::Uuid;

use leastcount_protocol::{
    ClientToServer, DiscardEnd, GamePhase, Rules, RulesUpdate, ServerToClient,
};

use crate::error::GameError;
use crate::game::{ConnHandle, OutboundTx, Room, MAX_PLAYERS, TURN_SECONDS};

const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Clone, Default)]
pub struct Sessions {
    rooms: Arc<Mutex<HashMap<String, Arc<Mutex<Room>>>>>,
    /// Connection id → room code, for disconnect routing.
    conns: Arc<Mutex<HashMap<Uuid, String>>>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes one intent. Errors go back to the submitting connection
    /// only; every successful mutation broadcasts a fresh snapshot.
    pub fn dispatch(&self, conn_id: Uuid, tx: &OutboundTx, intent: ClientToServer) {
        let result = match intent {
            ClientToServer::CreateRoom {
                name,
                elimination_points,
            } => self.create_room(conn_id, tx, name, elimination_points),
            ClientToServer::JoinRoom { room_code, name } => {
                self.join_room(conn_id, tx, &room_code, name)
            }
            ClientToServer::EndRoom { room_code } => self.end_room(conn_id, &room_code),
            ClientToServer::UpdateRules { room_code, rules } => {
                self.update_rules(conn_id, &room_code, rules)
            }
            ClientToServer::ExitRoom { room_code } => self.exit_room(conn_id, &room_code),
            ClientToServer::StartGame { room_code } => self.start_game(conn_id, &room_code),
            ClientToServer::ViewScores { room_code } => self.view_scores(conn_id, &room_code),
            ClientToServer::Discard {
                room_code,
                card_ids,
            } => self.discard(conn_id, &room_code, card_ids),
            ClientToServer::DrawStock { room_code } => self.draw_stock(conn_id, &room_code),
            ClientToServer::DrawDiscard { room_code, end } => {
                self.draw_discard(conn_id, &room_code, end)
            }
            ClientToServer::Move { room_code } => self.turn_move(conn_id, &room_code),
            ClientToServer::Show { room_code } => self.show(conn_id, &room_code),
        };
        if let Err(err) = result {
            debug!("conn {}: intent rejected: {}", conn_id, err);
            let _ = tx.send(ServerToClient::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            });
        }
    }

    fn room(&self, code: &str) -> Result<Arc<Mutex<Room>>, GameError> {
        self.rooms
            .lock()
            .get(code)
            .cloned()
            .ok_or_else(|| GameError::RoomNotFound(code.to_string()))
    }

    /* ---------------- room lifecycle ---------------- */

    pub fn create_room(
        &self,
        conn_id: Uuid,
        tx: &OutboundTx,
        name: String,
        elimination_points: Option<u32>,
    ) -> Result<(), GameError> {
        let mut rules = Rules::default();
        if let Some(points) = elimination_points.filter(|p| *p > 0) {
            rules.elimination_at = points;
        }

        let mut rooms = self.rooms.lock();
        let code = loop {
            let candidate = random_room_code();
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };
        let mut room = Room::new(code.clone(), rules);
        let player_id = room.add_player(
            name.clone(),
            ConnHandle {
                conn_id,
                tx: tx.clone(),
            },
            true,
        );
        let entry = Arc::new(Mutex::new(room));
        rooms.insert(code.clone(), entry.clone());
        drop(rooms);
        self.conns.lock().insert(conn_id, code.clone());

        info!("room {}: created by {}", code, name);
        let r = entry.lock();
        let _ = tx.send(ServerToClient::Joined {
            snapshot: r.snapshot(),
            player_id,
            seat: 0,
        });
        broadcast_state(&r);
        Ok(())
    }

    pub fn join_room(
        &self,
        conn_id: Uuid,
        tx: &OutboundTx,
        code: &str,
        name: String,
    ) -> Result<(), GameError> {
        let room = self.room(code)?;
        let mut r = room.lock();

        // Reconnection: the seat persists across connections, only the
        // handle is rebound. A live handle means the name is taken.
        if let Some(existing) = r.players.iter_mut().find(|p| p.name == name) {
            if existing.conn.is_some() {
                return Err(GameError::NameTaken(name));
            }
            existing.conn = Some(ConnHandle {
                conn_id,
                tx: tx.clone(),
            });
            let player_id = existing.id;
            let seat = existing.seat;
            self.conns.lock().insert(conn_id, code.to_string());
            info!("room {}: {} reconnected", code, name);
            let _ = tx.send(ServerToClient::Joined {
                snapshot: r.snapshot(),
                player_id,
                seat,
            });
            send_hand(&r, player_id);
            broadcast_state(&r);
            return Ok(());
        }

        if r.phase != GamePhase::Lobby {
            return Err(GameError::GameInProgress);
        }
        if r.players.len() >= MAX_PLAYERS {
            return Err(GameError::RoomFull);
        }

        let player_id = r.add_player(
            name.clone(),
            ConnHandle {
                conn_id,
                tx: tx.clone(),
            },
            false,
        );
        self.conns.lock().insert(conn_id, code.to_string());
        let seat = r.player(player_id).map(|p| p.seat).unwrap_or_default();
        info!("room {}: {} joined at seat {}", code, name, seat);
        let _ = tx.send(ServerToClient::Joined {
            snapshot: r.snapshot(),
            player_id,
            seat,
        });
        broadcast_state(&r);
        Ok(())
    }

    pub fn end_room(&self, conn_id: Uuid, code: &str) -> Result<(), GameError> {
        let room = self.room(code)?;
        {
            let r = room.lock();
            let caller = r.player_by_conn(conn_id).ok_or(GameError::PlayerNotFound)?;
            if caller.id != r.host_id {
                return Err(GameError::NotHost);
            }
            broadcast(
                &r,
                ServerToClient::RoomEnded {
                    reason: "Host ended the room".to_string(),
                    host_left: false,
                },
            );
            self.forget_conns(&r);
        }
        self.rooms.lock().remove(code);
        info!("room {}: ended by host", code);
        Ok(())
    }

    pub fn exit_room(&self, conn_id: Uuid, code: &str) -> Result<(), GameError> {
        let room = self.room(code)?;
        let mut r = room.lock();
        let idx = r
            .players
            .iter()
            .position(|p| p.conn.as_ref().map(|c| c.conn_id) == Some(conn_id))
            .ok_or(GameError::PlayerNotFound)?;
        let leaving_id = r.players[idx].id;

        // Pass the turn on while the seat order is still intact; the
        // staged cards leave with the hand.
        let mut turn_passed = false;
        if r.active_player_id == Some(leaving_id) && r.turn_deadline.is_some() {
            r.card_slot = None;
            if let Some(next) = r.advance_turn() {
                broadcast(&r, ServerToClient::TurnEnded { next_player_id: next });
                turn_passed = true;
            }
        }

        let leaving = r.players.remove(idx);
        self.conns.lock().remove(&conn_id);
        info!("room {}: {} left", code, leaving.name);

        if r.players.is_empty() {
            drop(r);
            self.rooms.lock().remove(code);
            return Ok(());
        }

        // Voluntary host exit hands the room to the next seat. (A host
        // *disconnect* tears the room down instead; see `disconnect`.)
        if leaving.is_host {
            let new_host = r.players[0].id;
            if let Some(p) = r.player_mut(new_host) {
                p.is_host = true;
            }
            r.host_id = new_host;
            info!("room {}: host handed to {}", code, r.players[0].name);
        }

        self.end_game_if_short(&mut r);
        broadcast_state(&r);
        if turn_passed && r.phase != GamePhase::GameOver {
            emit_turn_begin(&r);
        }
        let seq = r.turn_seq;
        let in_turn = r.turn_deadline.is_some();
        drop(r);
        if turn_passed && in_turn {
            self.arm_turn_timer(code, seq);
        }
        Ok(())
    }

    /// A running game folds up once fewer than two players remain.
    fn end_game_if_short(&self, r: &mut Room) {
        if r.phase == GamePhase::Lobby || r.phase == GamePhase::GameOver {
            return;
        }
        if r.remaining_players() <= 1 {
            r.phase = GamePhase::GameOver;
            r.active_player_id = None;
            r.turn_deadline = None;
            info!("room {}: too few players left, game over", r.code);
        }
    }

    pub fn update_rules(
        &self,
        conn_id: Uuid,
        code: &str,
        update: RulesUpdate,
    ) -> Result<(), GameError> {
        let room = self.room(code)?;
        let mut r = room.lock();
        let caller = r.player_by_conn(conn_id).ok_or(GameError::PlayerNotFound)?;
        if caller.id != r.host_id {
            return Err(GameError::NotHost);
        }
        if r.phase != GamePhase::Lobby {
            return Err(GameError::GameInProgress);
        }
        let fields = [
            update.elimination_at,
            update.declare_threshold,
            update.bad_declare_penalty,
            update.hand_size,
        ];
        if fields.iter().flatten().any(|v| *v == 0) {
            return Err(GameError::InvalidRules);
        }
        if let Some(v) = update.elimination_at {
            r.rules.elimination_at = v;
        }
        if let Some(v) = update.declare_threshold {
            r.rules.declare_threshold = v;
        }
        if let Some(v) = update.bad_declare_penalty {
            r.rules.bad_declare_penalty = v;
        }
        if let Some(v) = update.hand_size {
            r.rules.hand_size = v;
        }
        info!("room {}: rules updated by host", code);
        broadcast(
            &r,
            ServerToClient::RulesUpdated {
                rules: r.rules.clone(),
            },
        );
        broadcast_state(&r);
        Ok(())
    }

    pub fn view_scores(&self, conn_id: Uuid, code: &str) -> Result<(), GameError> {
        let room = self.room(code)?;
        let r = room.lock();
        let caller = r.player_by_conn(conn_id).ok_or(GameError::PlayerNotFound)?;
        if let Some(c) = &caller.conn {
            let _ = c.tx.send(ServerToClient::Scores {
                players: r.players.iter().map(|p| p.public()).collect(),
                round_scores: r
                    .players
                    .iter()
                    .map(|p| (p.id, p.round_scores.clone()))
                    .collect(),
            });
        }
        Ok(())
    }

    /* ---------------- game flow ---------------- */

    pub fn start_game(&self, conn_id: Uuid, code: &str) -> Result<(), GameError> {
        let room = self.room(code)?;
        let mut r = room.lock();
        let caller = r.player_by_conn(conn_id).ok_or(GameError::PlayerNotFound)?;
        if caller.id != r.host_id {
            return Err(GameError::NotHost);
        }
        if r.phase != GamePhase::Lobby {
            return Err(GameError::WrongPhase(r.phase));
        }
        if r.players.len() < 2 {
            return Err(GameError::NotEnoughPlayers);
        }
        r.start_game()?;
        info!(
            "room {}: game started with {} players, joker {:?}",
            code,
            r.players.len(),
            r.current_joker
        );
        broadcast(&r, ServerToClient::GameStarted);
        send_all_hands(&r);
        broadcast_state(&r);
        emit_turn_begin(&r);
        let seq = r.turn_seq;
        drop(r);
        self.arm_turn_timer(code, seq);
        Ok(())
    }

    pub fn discard(
        &self,
        conn_id: Uuid,
        code: &str,
        card_ids: Vec<Uuid>,
    ) -> Result<(), GameError> {
        let room = self.room(code)?;
        let mut r = room.lock();
        let player_id = caller_id(&r, conn_id)?;
        let outcome = r.handle_discard(player_id, &card_ids)?;
        send_hand(&r, player_id);
        broadcast_state(&r);
        broadcast(
            &r,
            ServerToClient::TurnUpdated {
                discard_group: Some(outcome.group),
                drew_from: None,
                skipped_draw: Some(outcome.skipped_draw),
            },
        );
        Ok(())
    }

    pub fn draw_stock(&self, conn_id: Uuid, code: &str) -> Result<(), GameError> {
        let room = self.room(code)?;
        let mut r = room.lock();
        let player_id = caller_id(&r, conn_id)?;
        let drew = r.handle_draw_stock(player_id)?;
        send_hand(&r, player_id);
        broadcast_state(&r);
        broadcast(
            &r,
            ServerToClient::TurnUpdated {
                discard_group: None,
                drew_from: Some(drew),
                skipped_draw: None,
            },
        );
        Ok(())
    }

    pub fn draw_discard(
        &self,
        conn_id: Uuid,
        code: &str,
        end: DiscardEnd,
    ) -> Result<(), GameError> {
        let room = self.room(code)?;
        let mut r = room.lock();
        let player_id = caller_id(&r, conn_id)?;
        let drew = r.handle_draw_discard(player_id, end)?;
        send_hand(&r, player_id);
        broadcast_state(&r);
        broadcast(
            &r,
            ServerToClient::TurnUpdated {
                discard_group: None,
                drew_from: Some(drew),
                skipped_draw: None,
            },
        );
        Ok(())
    }

    pub fn turn_move(&self, conn_id: Uuid, code: &str) -> Result<(), GameError> {
        let room = self.room(code)?;
        let mut r = room.lock();
        let player_id = caller_id(&r, conn_id)?;
        r.handle_move(player_id)?;
        if let Some(next) = r.advance_turn() {
            broadcast(&r, ServerToClient::TurnEnded { next_player_id: next });
        }
        broadcast_state(&r);
        emit_turn_begin(&r);
        let seq = r.turn_seq;
        drop(r);
        self.arm_turn_timer(code, seq);
        Ok(())
    }

    pub fn show(&self, conn_id: Uuid, code: &str) -> Result<(), GameError> {
        let room = self.room(code)?;
        let mut r = room.lock();
        let player_id = caller_id(&r, conn_id)?;
        let res = r.handle_show(player_id)?;
        broadcast(
            &r,
            ServerToClient::ShowResult {
                ok: res.ok,
                caller_id: res.caller_id,
                scores_round: res.scores_round,
                final_hands: res.final_hands,
                penalty_applied: res.penalty_applied,
            },
        );
        self.settle_round(&mut r);
        let armed = r.turn_deadline.is_some();
        let seq = r.turn_seq;
        drop(r);
        if armed {
            self.arm_turn_timer(code, seq);
        }
        Ok(())
    }

    /// After a show has been scored: either the game is down to one
    /// player, or the next round deals.
    fn settle_round(&self, r: &mut Room) {
        if r.remaining_players() <= 1 {
            r.phase = GamePhase::GameOver;
            r.active_player_id = None;
            r.turn_deadline = None;
            info!("room {}: game over", r.code);
            broadcast_state(r);
            return;
        }
        match r.start_next_round() {
            Ok(()) => {
                info!("room {}: round {} dealt, joker {:?}", r.code, r.round, r.current_joker);
                send_all_hands(r);
                broadcast_state(r);
                emit_turn_begin(r);
            }
            Err(err) => {
                // the table cannot be redealt; close the game out
                warn!("room {}: could not deal round {}: {}", r.code, r.round, err);
                r.phase = GamePhase::GameOver;
                r.active_player_id = None;
                r.turn_deadline = None;
                broadcast_state(r);
            }
        }
    }

    /* ---------------- timers ---------------- */

    /// Arms the per-turn timeout. Expiry is injected through the same
    /// serialized per-room path as a player intent; `seq` keeps expired
    /// timers from touching a later turn.
    fn arm_turn_timer(&self, code: &str, seq: u64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let sessions = self.clone();
        let code = code.to_string();
        handle.spawn(async move {
            tokio::time::sleep(Duration::from_secs(TURN_SECONDS)).await;
            sessions.turn_timeout(&code, seq);
        });
    }

    pub fn turn_timeout(&self, code: &str, seq: u64) {
        let Ok(room) = self.room(code) else {
            return;
        };
        let mut r = room.lock();
        let Some(timed_out) = r.expire_turn(seq) else {
            return;
        };
        info!("room {}: turn timed out for {}", code, timed_out);
        if let Some(next) = r.advance_turn() {
            broadcast(
                &r,
                ServerToClient::TurnTimeout {
                    player_id: timed_out,
                    next_player_id: next,
                },
            );
            send_hand(&r, timed_out);
            broadcast_state(&r);
            emit_turn_begin(&r);
            let seq = r.turn_seq;
            drop(r);
            self.arm_turn_timer(code, seq);
        }
    }

    /* ---------------- disconnects ---------------- */

    /// Socket closed. Host gone tears the room down; anyone else keeps
    /// their seat for a reconnect if a game is running, or simply
    /// leaves the lobby.
    pub fn disconnect(&self, conn_id: Uuid) {
        let Some(code) = self.conns.lock().remove(&conn_id) else {
            return;
        };
        let Ok(room) = self.room(&code) else {
            return;
        };
        let mut r = room.lock();
        let Some(idx) = r
            .players
            .iter()
            .position(|p| p.conn.as_ref().map(|c| c.conn_id) == Some(conn_id))
        else {
            return;
        };

        if r.players[idx].is_host {
            info!("room {}: host disconnected, room torn down", code);
            broadcast(
                &r,
                ServerToClient::RoomEnded {
                    reason: "Host left the room".to_string(),
                    host_left: true,
                },
            );
            self.forget_conns(&r);
            drop(r);
            self.rooms.lock().remove(&code);
            return;
        }

        if r.phase == GamePhase::Lobby {
            let gone = r.players.remove(idx);
            info!("room {}: {} left the lobby", code, gone.name);
            if r.players.is_empty() {
                drop(r);
                self.rooms.lock().remove(&code);
                return;
            }
            broadcast_state(&r);
            return;
        }

        // Mid-game: unbind the handle, hold the seat for a reconnect.
        r.players[idx].conn = None;
        let player_id = r.players[idx].id;
        info!(
            "room {}: {} disconnected, seat held for reconnect",
            code, r.players[idx].name
        );
        let mut turn_passed = false;
        if r.active_player_id == Some(player_id) && r.turn_deadline.is_some() {
            // roll their turn back the way a timeout would
            if let Some(group) = r.card_slot.take() {
                if let Some(p) = r.player_mut(player_id) {
                    p.hand.extend(group.cards);
                }
            }
            if let Some(next) = r.advance_turn() {
                broadcast(&r, ServerToClient::TurnEnded { next_player_id: next });
                turn_passed = true;
            }
        }
        broadcast_state(&r);
        if turn_passed {
            emit_turn_begin(&r);
        }
        let seq = r.turn_seq;
        let in_turn = r.turn_deadline.is_some();
        drop(r);
        if turn_passed && in_turn {
            self.arm_turn_timer(&code, seq);
        }
    }

    fn forget_conns(&self, r: &Room) {
        let mut conns = self.conns.lock();
        for p in &r.players {
            if let Some(c) = &p.conn {
                conns.remove(&c.conn_id);
            }
        }
    }
}

/* ---------------- helpers ---------------- */

fn caller_id(r: &Room, conn_id: Uuid) -> Result<Uuid, GameError> {
    r.player_by_conn(conn_id)
        .map(|p| p.id)
        .ok_or(GameError::PlayerNotFound)
}

fn random_room_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_CHARS[rng.gen_range(0..ROOM_CODE_CHARS.len())] as char)
        .collect()
}

fn broadcast(r: &Room, event: ServerToClient) {
    for p in &r.players {
        if let Some(c) = &p.conn {
            let _ = c.tx.send(event.clone());
        }
    }
}

fn broadcast_state(r: &Room) {
    broadcast(r, ServerToClient::State(r.snapshot()));
}

fn emit_turn_begin(r: &Room) {
    if let Some(active) = r.active_player_id {
        broadcast(
            r,
            ServerToClient::TurnBegin {
                active_player_id: active,
                can_show: r.can_show,
            },
        );
    }
}

fn send_hand(r: &Room, player_id: Uuid) {
    if let Some(p) = r.player(player_id) {
        if let Some(c) = &p.conn {
            let _ = c.tx.send(ServerToClient::Hand {
                cards: p.hand.clone(),
            });
        }
    }
}

fn send_all_hands(r: &Room) {
    for p in &r.players {
        if let Some(c) = &p.conn {
            let _ = c.tx.send(ServerToClient::Hand {
                cards: p.hand.clone(),
            });
        }
    }
}
