//! Room state and the Least Count turn machine.
//!
//! A `Room` owns everything one game needs: the seats (with private
//! hands and rebindable connection handles), the stock, the visible
//! discard cluster and the staging slot. Every mutation happens through
//! the functions here, under the session layer's per-room lock, so a
//! card is always in exactly one place: a hand, the stock, the cluster
//! or the slot.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{info, warn};
use rand::seq::SliceRandom;
use rand::thread_rng;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use leastcount_protocol::{
    Card, Deck, DiscardEnd, DiscardGroup, DiscardKind, DrewFrom, GamePhase, PlayerStatus,
    PublicPlayer, Rank, RoomSnapshot, Rules, ServerToClient, TurnActions, TurnTimerView,
};

use crate::error::GameError;
use crate::validator;

pub const MAX_PLAYERS: usize = 8;
pub const TURN_SECONDS: u64 = 60;

pub type OutboundTx = UnboundedSender<ServerToClient>;

/// A live connection bound to a seat. Rebound on reconnect; the seat
/// itself (id, hand, score) never moves.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    pub conn_id: Uuid,
    pub tx: OutboundTx,
}

#[derive(Debug)]
pub struct PlayerSeat {
    /// Stable engine identity; survives reconnects.
    pub id: Uuid,
    pub name: String,
    pub seat: u8,
    pub status: PlayerStatus,
    pub hand: Vec<Card>,
    pub is_host: bool,
    pub score: u32,
    pub round_scores: Vec<u32>,
    pub conn: Option<ConnHandle>,
}

impl PlayerSeat {
    pub fn public(&self) -> PublicPlayer {
        PublicPlayer {
            id: self.id,
            name: self.name.clone(),
            seat: self.seat,
            status: self.status,
            is_host: self.is_host,
            connected: self.conn.is_some(),
            hand_count: self.hand.len(),
            score: self.score,
            round_scores: self.round_scores.clone(),
        }
    }
}

/// Outcome of a discard action, for the `turn:updated` event.
#[derive(Debug)]
pub struct DiscardOutcome {
    pub group: DiscardGroup,
    pub skipped_draw: bool,
}

/// Outcome of a show, for the `show:result` event.
#[derive(Debug)]
pub struct ShowResolution {
    pub ok: bool,
    pub caller_id: Uuid,
    pub scores_round: HashMap<Uuid, u32>,
    pub final_hands: HashMap<Uuid, Vec<Card>>,
    pub penalty_applied: Option<u32>,
}

#[derive(Debug)]
pub struct Room {
    pub code: String,
    /// Kept sorted by seat number.
    pub players: Vec<PlayerSeat>,
    pub host_id: Uuid,
    pub deck: Deck,
    pub top_discard: Option<DiscardGroup>,
    /// Cards discarded this turn but not yet committed by Move.
    pub card_slot: Option<DiscardGroup>,
    pub active_player_id: Option<Uuid>,
    pub phase: GamePhase,
    pub round: u32,
    pub rules: Rules,
    pub can_show: bool,
    pub turn_actions: Option<TurnActions>,
    pub current_joker: Option<Rank>,
    pub first_player_id: Option<Uuid>,
    /// Who committed the visible discard cluster.
    pub last_discarder: Option<Uuid>,
    pub turn_deadline: Option<Instant>,
    /// Bumped at every turn start; a timer expiry carrying an older
    /// value is stale and ignored.
    pub turn_seq: u64,
}

impl Room {
    pub fn new(code: String, rules: Rules) -> Self {
        Room {
            code,
            players: Vec::new(),
            host_id: Uuid::nil(),
            deck: Deck::new(),
            top_discard: None,
            card_slot: None,
            active_player_id: None,
            phase: GamePhase::Lobby,
            round: 0,
            rules,
            can_show: false,
            turn_actions: None,
            current_joker: None,
            first_player_id: None,
            last_discarder: None,
            turn_deadline: None,
            turn_seq: 0,
        }
    }

    /* ---------------- seats ---------------- */

    pub fn player(&self, id: Uuid) -> Option<&PlayerSeat> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: Uuid) -> Option<&mut PlayerSeat> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn player_by_conn(&self, conn_id: Uuid) -> Option<&PlayerSeat> {
        self.players
            .iter()
            .find(|p| p.conn.as_ref().map(|c| c.conn_id) == Some(conn_id))
    }

    /// Seats a new player at the lowest free seat and returns their
    /// stable id. Capacity and phase are the caller's business.
    pub fn add_player(&mut self, name: String, conn: ConnHandle, is_host: bool) -> Uuid {
        let mut seat = 0u8;
        while self.players.iter().any(|p| p.seat == seat) {
            seat += 1;
        }
        let id = Uuid::new_v4();
        self.players.push(PlayerSeat {
            id,
            name,
            seat,
            status: PlayerStatus::Active,
            hand: Vec::new(),
            is_host,
            score: 0,
            round_scores: Vec::new(),
            conn: Some(conn),
        });
        self.players.sort_by_key(|p| p.seat);
        if is_host {
            self.host_id = id;
        }
        id
    }

    /// Players still in the game, whatever round-local state they are in.
    pub fn remaining_players(&self) -> usize {
        self.players
            .iter()
            .filter(|p| p.status != PlayerStatus::Dropped)
            .count()
    }

    fn active_ids(&self) -> Vec<Uuid> {
        self.players
            .iter()
            .filter(|p| p.status == PlayerStatus::Active)
            .map(|p| p.id)
            .collect()
    }

    /// Next active player after `id` in circular seat order, skipping
    /// dropped seats without renumbering them.
    pub fn next_active_after(&self, id: Uuid) -> Option<Uuid> {
        let from_seat = self.player(id).map(|p| p.seat)?;
        self.players
            .iter()
            .filter(|p| p.status == PlayerStatus::Active && p.id != id)
            .min_by_key(|p| {
                if p.seat > from_seat {
                    p.seat - from_seat
                } else {
                    p.seat + MAX_PLAYERS as u8 - from_seat
                }
            })
            .map(|p| p.id)
    }

    /* ---------------- rounds ---------------- */

    /// Host pressed start: first round of a fresh game.
    pub fn start_game(&mut self) -> Result<(), GameError> {
        self.round = 1;
        self.rotate_first_player();
        if let Err(err) = self.deal_round() {
            // roll back to the lobby instead of leaving a half-dealt table
            for p in self.players.iter_mut() {
                p.hand.clear();
            }
            self.deck = Deck::new();
            self.top_discard = None;
            self.card_slot = None;
            self.current_joker = None;
            self.active_player_id = None;
            self.first_player_id = None;
            self.phase = GamePhase::Lobby;
            self.round = 0;
            return Err(err);
        }
        self.begin_turn();
        Ok(())
    }

    /// Round after a show: rotate the starter, redeal, fresh joker.
    pub fn start_next_round(&mut self) -> Result<(), GameError> {
        self.round += 1;
        for p in self.players.iter_mut() {
            if p.status == PlayerStatus::Shown {
                p.status = PlayerStatus::Active;
            }
        }
        self.rotate_first_player();
        self.deal_round()?;
        self.begin_turn();
        Ok(())
    }

    /// Fresh stock sized by the active table, full hands, a joker rank
    /// for the round and a seeded discard cluster.
    fn deal_round(&mut self) -> Result<(), GameError> {
        let active = self.active_ids().len();
        self.deck.reset(Deck::decks_for_players(active));
        self.deck.shuffle();

        for p in self.players.iter_mut() {
            p.hand.clear();
        }
        for _ in 0..self.rules.hand_size {
            for i in 0..self.players.len() {
                if self.players[i].status != PlayerStatus::Active {
                    continue;
                }
                match self.deck.draw() {
                    Some(card) => self.players[i].hand.push(card),
                    None => {
                        warn!("room {}: deck exhausted while dealing", self.code);
                        return Err(GameError::DeckExhausted);
                    }
                }
            }
        }

        self.current_joker = Rank::STANDARD.choose(&mut thread_rng()).copied();
        self.seed_discard()?;
        self.card_slot = None;
        self.last_discarder = None;
        Ok(())
    }

    /// Opens the discard cluster with one stock card that is not of the
    /// joker rank. Skipped cards slide back under the stock so nothing
    /// leaves play.
    fn seed_discard(&mut self) -> Result<(), GameError> {
        let mut skipped = Vec::new();
        let seed = loop {
            match self.deck.draw() {
                Some(c) if Some(c.rank) == self.current_joker => skipped.push(c),
                Some(c) => break c,
                None => {
                    warn!("room {}: deck exhausted while seeding the discard pile", self.code);
                    return Err(GameError::DeckExhausted);
                }
            }
        };
        for c in skipped {
            self.deck.return_to_bottom(c);
        }
        self.top_discard = Some(DiscardGroup {
            kind: DiscardKind::Single,
            cards: vec![seed],
            ordered: false,
        });
        Ok(())
    }

    /// First player of the round: the next active seat after whoever
    /// started the previous round.
    fn rotate_first_player(&mut self) {
        let active = self.active_ids();
        if active.is_empty() {
            return;
        }
        self.first_player_id = match self.first_player_id {
            Some(prev) => self.next_active_after(prev).or_else(|| active.first().copied()),
            None => active.first().copied(),
        };
        self.active_player_id = self.first_player_id;
    }

    /* ---------------- turns ---------------- */

    /// Opens the active player's turn: discard phase, show window
    /// computed from their hand, fresh action flags, timer armed.
    pub fn begin_turn(&mut self) {
        self.phase = GamePhase::TurnDiscard;
        let joker = self.current_joker;
        let threshold = self.rules.declare_threshold;
        self.can_show = self
            .active_player_id
            .and_then(|id| self.player(id))
            .map(|p| validator::hand_total(&p.hand, joker) <= threshold)
            .unwrap_or(false);
        self.turn_actions = Some(TurnActions::default());
        self.turn_seq += 1;
        self.turn_deadline = Some(Instant::now() + Duration::from_secs(TURN_SECONDS));
    }

    /// Passes the turn to the next active player and opens it. Returns
    /// the new active player's id.
    pub fn advance_turn(&mut self) -> Option<Uuid> {
        let current = self.active_player_id?;
        let next = self.next_active_after(current).or_else(|| {
            // current player may no longer be active (shown, dropped, gone)
            self.active_ids().first().copied()
        })?;
        self.active_player_id = Some(next);
        self.begin_turn();
        Some(next)
    }

    fn expect_turn(&self, player_id: Uuid, phase: GamePhase) -> Result<(), GameError> {
        if self.active_player_id != Some(player_id) {
            return Err(GameError::NotYourTurn);
        }
        if self.phase != phase {
            return Err(GameError::WrongPhase(self.phase));
        }
        Ok(())
    }

    /// Discard into the staging slot. A single that matches a rank in
    /// the visible cluster skips the draw phase outright.
    pub fn handle_discard(
        &mut self,
        player_id: Uuid,
        card_ids: &[Uuid],
    ) -> Result<DiscardOutcome, GameError> {
        self.expect_turn(player_id, GamePhase::TurnDiscard)?;
        let player = self.player(player_id).ok_or(GameError::PlayerNotFound)?;

        let mut cards = Vec::with_capacity(card_ids.len());
        for id in card_ids {
            if cards.iter().any(|c: &Card| c.id == *id) {
                return Err(GameError::CardsNotInHand);
            }
            match player.hand.iter().find(|c| c.id == *id) {
                Some(c) => cards.push(c.clone()),
                None => return Err(GameError::CardsNotInHand),
            }
        }
        let kind = validator::validate_discard(&cards)?;

        // validated; mutate
        let skipped = kind == DiscardKind::Single && self.matches_visible_cluster(&cards[0]);
        let group = validator::discard_group(cards, kind);
        let player = self.player_mut(player_id).ok_or(GameError::PlayerNotFound)?;
        player.hand.retain(|c| !card_ids.contains(&c.id));
        self.card_slot = Some(group.clone());
        let actions = self.turn_actions.get_or_insert_with(TurnActions::default);
        actions.has_discarded = true;
        actions.has_drawn = skipped;
        self.can_show = false;
        self.phase = if skipped {
            GamePhase::AwaitMove
        } else {
            GamePhase::TurnDraw
        };
        Ok(DiscardOutcome {
            group,
            skipped_draw: skipped,
        })
    }

    fn matches_visible_cluster(&self, card: &Card) -> bool {
        self.top_discard
            .as_ref()
            .map_or(false, |g| g.cards.iter().any(|c| c.rank == card.rank))
    }

    pub fn handle_draw_stock(&mut self, player_id: Uuid) -> Result<DrewFrom, GameError> {
        self.expect_turn(player_id, GamePhase::TurnDraw)?;
        if self.deck.remaining() == 0 {
            return Err(GameError::EmptyStock);
        }
        let card = self.deck.draw().ok_or(GameError::EmptyStock)?;
        let player = self.player_mut(player_id).ok_or(GameError::PlayerNotFound)?;
        player.hand.push(card);
        if let Some(a) = self.turn_actions.as_mut() {
            a.has_drawn = true;
        }
        self.phase = GamePhase::AwaitMove;
        Ok(DrewFrom::Stock)
    }

    /// Picks up one end of the visible cluster, never the middle and
    /// never a cluster the caller's own Move committed.
    pub fn handle_draw_discard(
        &mut self,
        player_id: Uuid,
        end: DiscardEnd,
    ) -> Result<DrewFrom, GameError> {
        self.expect_turn(player_id, GamePhase::TurnDraw)?;
        if self.last_discarder == Some(player_id) {
            return Err(GameError::OwnDiscard);
        }
        let group = self.top_discard.as_mut().ok_or(GameError::EmptyDiscard)?;
        if group.cards.is_empty() {
            return Err(GameError::EmptyDiscard);
        }
        let idx = match end {
            DiscardEnd::First => 0,
            DiscardEnd::Last => group.cards.len() - 1,
        };
        let card = group.cards.remove(idx);
        if group.cards.is_empty() {
            // an emptied cluster is absent, not an empty group
            self.top_discard = None;
        }
        let player = self.player_mut(player_id).ok_or(GameError::PlayerNotFound)?;
        player.hand.push(card);
        if let Some(a) = self.turn_actions.as_mut() {
            a.has_drawn = true;
        }
        self.phase = GamePhase::AwaitMove;
        Ok(match end {
            DiscardEnd::First => DrewFrom::DiscardFirst,
            DiscardEnd::Last => DrewFrom::DiscardLast,
        })
    }

    /// Commits the staged cards as the new visible cluster and closes
    /// the turn. Only legal once both discard and draw have happened.
    pub fn handle_move(&mut self, player_id: Uuid) -> Result<(), GameError> {
        self.expect_turn(player_id, GamePhase::AwaitMove)?;
        let actions = self.turn_actions.unwrap_or_default();
        if !actions.has_discarded || !actions.has_drawn {
            return Err(GameError::IncompleteTurn);
        }
        self.commit_card_slot(player_id);
        Ok(())
    }

    fn commit_card_slot(&mut self, player_id: Uuid) {
        if let Some(group) = self.card_slot.take() {
            self.top_discard = Some(group);
            self.last_discarder = Some(player_id);
            if let Some(a) = self.turn_actions.as_mut() {
                a.discarded_from_card_slot = true;
            }
        }
    }

    /* ---------------- show ---------------- */

    /// Declares the lowest hand. Only open at the very start of the
    /// caller's turn while `can_show` holds.
    pub fn handle_show(&mut self, player_id: Uuid) -> Result<ShowResolution, GameError> {
        self.expect_turn(player_id, GamePhase::TurnDiscard)?;
        if !self.can_show {
            return Err(GameError::CannotShow);
        }
        Ok(self.resolve_show(player_id))
    }

    /// Scores the round. The caller wins iff they hold the minimum
    /// count among players who entered the round (ties favor the
    /// caller); otherwise the caller alone eats the penalty.
    fn resolve_show(&mut self, caller_id: Uuid) -> ShowResolution {
        let joker = self.current_joker;
        self.phase = GamePhase::Reveal;
        self.active_player_id = None;
        self.turn_deadline = None;
        self.card_slot = None;
        if let Some(p) = self.player_mut(caller_id) {
            p.status = PlayerStatus::Shown;
        }

        let contenders: Vec<(Uuid, u32)> = self
            .players
            .iter()
            .filter(|p| matches!(p.status, PlayerStatus::Active | PlayerStatus::Shown))
            .map(|p| (p.id, validator::hand_total(&p.hand, joker)))
            .collect();
        let final_hands: HashMap<Uuid, Vec<Card>> = self
            .players
            .iter()
            .filter(|p| matches!(p.status, PlayerStatus::Active | PlayerStatus::Shown))
            .map(|p| (p.id, p.hand.clone()))
            .collect();

        let caller_total = contenders
            .iter()
            .find(|(id, _)| *id == caller_id)
            .map(|(_, t)| *t)
            .unwrap_or(0);
        let min_total = contenders.iter().map(|(_, t)| *t).min().unwrap_or(0);
        let ok = caller_total <= min_total;
        let penalty = self.rules.bad_declare_penalty;

        let mut scores_round = HashMap::new();
        for (id, total) in &contenders {
            let pts = match (ok, *id == caller_id) {
                (true, true) => 0,
                (true, false) => *total,
                (false, true) => penalty,
                (false, false) => 0,
            };
            scores_round.insert(*id, pts);
            if let Some(p) = self.player_mut(*id) {
                p.round_scores.push(pts);
                p.score += pts;
            }
        }

        let elimination_at = self.rules.elimination_at;
        for p in self.players.iter_mut() {
            if p.status != PlayerStatus::Dropped && p.score >= elimination_at {
                info!(
                    "room {}: {} eliminated at {} points",
                    self.code, p.name, p.score
                );
                p.status = PlayerStatus::Dropped;
            }
        }

        info!(
            "room {}: show by {} resolved ok={} (caller {} vs min {})",
            self.code,
            caller_id,
            ok,
            caller_total,
            min_total
        );

        ShowResolution {
            ok,
            caller_id,
            scores_round,
            final_hands,
            penalty_applied: (!ok).then_some(penalty),
        }
    }

    /* ---------------- timer ---------------- */

    /// Resolves an expired turn: a finished turn commits like a normal
    /// Move, an unfinished one rolls its staged cards back and is
    /// skipped. Returns the timed-out player, or `None` for a stale or
    /// out-of-turn expiry.
    pub fn expire_turn(&mut self, seq: u64) -> Option<Uuid> {
        if seq != self.turn_seq {
            return None;
        }
        if !matches!(
            self.phase,
            GamePhase::TurnDiscard | GamePhase::TurnDraw | GamePhase::AwaitMove
        ) {
            return None;
        }
        let player_id = self.active_player_id?;
        let actions = self.turn_actions.unwrap_or_default();
        if actions.has_discarded && actions.has_drawn {
            self.commit_card_slot(player_id);
        } else if let Some(group) = self.card_slot.take() {
            if let Some(p) = self.player_mut(player_id) {
                p.hand.extend(group.cards);
            }
        }
        Some(player_id)
    }

    /* ---------------- snapshot ---------------- */

    pub fn snapshot(&self) -> RoomSnapshot {
        let in_turn = matches!(
            self.phase,
            GamePhase::TurnDiscard | GamePhase::TurnDraw | GamePhase::AwaitMove
        );
        RoomSnapshot {
            room_code: self.code.clone(),
            players: self.players.iter().map(PlayerSeat::public).collect(),
            host_id: self.host_id,
            stock_count: self.deck.remaining(),
            top_discard: self.top_discard.clone(),
            card_slot_preview: self
                .card_slot
                .as_ref()
                .map(|g| g.cards.clone())
                .unwrap_or_default(),
            active_player_id: self.active_player_id,
            phase: self.phase,
            round: self.round,
            rules: self.rules.clone(),
            can_show: self.can_show,
            turn_actions: self.turn_actions,
            current_joker: self.current_joker,
            first_player_id: self.first_player_id,
            turn_timer: self.turn_deadline.map(|d| TurnTimerView {
                time_left: d.saturating_duration_since(Instant::now()).as_secs(),
                max_time: TURN_SECONDS,
                is_running: in_turn,
            }),
        }
    }
}
