//! Wire types shared between the Least Count session server and its
//! clients: cards, rules, room snapshots and the intent/event enums.
//!
//! Everything here is plain data. The server is the only writer of game
//! state; clients send [`ClientToServer`] intents and render the
//! [`RoomSnapshot`] broadcast back at them.

pub mod cards;

pub use cards::{Card, Deck, Rank, Suit};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// ---- Player status ----
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Active,
    /// Eliminated. Never reverts.
    Dropped,
    /// Declared this round; reset to active when the next round deals.
    Shown,
}

/// ---- Game phases ----
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GamePhase {
    #[serde(rename = "lobby")]
    Lobby,
    #[serde(rename = "turn-discard")]
    TurnDiscard,
    #[serde(rename = "turn-draw")]
    TurnDraw,
    #[serde(rename = "await-move")]
    AwaitMove,
    #[serde(rename = "reveal")]
    Reveal,
    #[serde(rename = "game-over")]
    GameOver,
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GamePhase::Lobby => "lobby",
            GamePhase::TurnDiscard => "turn-discard",
            GamePhase::TurnDraw => "turn-draw",
            GamePhase::AwaitMove => "await-move",
            GamePhase::Reveal => "reveal",
            GamePhase::GameOver => "game-over",
        };
        write!(f, "{}", s)
    }
}

/// ---- Rules ----
///
/// Fixed at room creation; the host may adjust the numeric fields while
/// the room is still in the lobby.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Rules {
    pub hand_size: u32,
    pub declare_threshold: u32,
    pub bad_declare_penalty: u32,
    pub ends_only_pickup: bool,
    pub jokers_wild_in_runs: bool,
    pub elimination_at: u32,
}

impl Default for Rules {
    fn default() -> Self {
        Rules {
            hand_size: 7,
            declare_threshold: 10,
            bad_declare_penalty: 40,
            ends_only_pickup: true,
            jokers_wild_in_runs: true,
            elimination_at: 200,
        }
    }
}

/// Host-adjustable subset of [`Rules`]. Anything not listed here is not
/// changeable over the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RulesUpdate {
    pub elimination_at: Option<u32>,
    pub declare_threshold: Option<u32>,
    pub bad_declare_penalty: Option<u32>,
    pub hand_size: Option<u32>,
}

/// ---- Discards ----
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiscardKind {
    Single,
    Set,
    Run,
}

/// The visible top-of-discard cluster. Committing a new group replaces
/// the previous one for good; there is no discard history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscardGroup {
    #[serde(rename = "type")]
    pub kind: DiscardKind,
    pub cards: Vec<Card>,
    pub ordered: bool,
}

/// Which end of the discard cluster to pick up from. The middle is
/// never reachable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiscardEnd {
    First,
    Last,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DrewFrom {
    #[serde(rename = "stock")]
    Stock,
    #[serde(rename = "discard-first")]
    DiscardFirst,
    #[serde(rename = "discard-last")]
    DiscardLast,
}

/// ---- Turn bookkeeping ----
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TurnActions {
    pub has_discarded: bool,
    pub has_drawn: bool,
    pub discarded_from_card_slot: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TurnTimerView {
    pub time_left: u64,
    pub max_time: u64,
    pub is_running: bool,
}

/// ---- Snapshots ----
///
/// What everyone at the table may see of a player. Hands stay on the
/// server; each player's own cards arrive on a private `player:hand`
/// event instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicPlayer {
    pub id: Uuid,
    pub name: String,
    pub seat: u8,
    pub status: PlayerStatus,
    pub is_host: bool,
    pub connected: bool,
    pub hand_count: usize,
    pub score: u32,
    pub round_scores: Vec<u32>,
}

/// Full public view of one room, broadcast after every mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_code: String,
    pub players: Vec<PublicPlayer>,
    pub host_id: Uuid,
    pub stock_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_discard: Option<DiscardGroup>,
    pub card_slot_preview: Vec<Card>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_player_id: Option<Uuid>,
    pub phase: GamePhase,
    pub round: u32,
    pub rules: Rules,
    pub can_show: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_actions: Option<TurnActions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_joker: Option<Rank>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_player_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_timer: Option<TurnTimerView>,
}

/// ---- Intents ----
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientToServer {
    #[serde(rename = "room:create", rename_all = "camelCase")]
    CreateRoom {
        name: String,
        #[serde(default)]
        elimination_points: Option<u32>,
    },
    #[serde(rename = "room:join", rename_all = "camelCase")]
    JoinRoom { room_code: String, name: String },
    #[serde(rename = "room:end", rename_all = "camelCase")]
    EndRoom { room_code: String },
    #[serde(rename = "room:updateRules", rename_all = "camelCase")]
    UpdateRules { room_code: String, rules: RulesUpdate },
    #[serde(rename = "room:exit", rename_all = "camelCase")]
    ExitRoom { room_code: String },
    #[serde(rename = "game:start", rename_all = "camelCase")]
    StartGame { room_code: String },
    #[serde(rename = "game:viewScores", rename_all = "camelCase")]
    ViewScores { room_code: String },
    #[serde(rename = "turn:discard", rename_all = "camelCase")]
    Discard { room_code: String, card_ids: Vec<Uuid> },
    #[serde(rename = "turn:drawStock", rename_all = "camelCase")]
    DrawStock { room_code: String },
    #[serde(rename = "turn:drawDiscard", rename_all = "camelCase")]
    DrawDiscard { room_code: String, end: DiscardEnd },
    #[serde(rename = "turn:move", rename_all = "camelCase")]
    Move { room_code: String },
    #[serde(rename = "turn:show", rename_all = "camelCase")]
    Show { room_code: String },
}

/// ---- Events ----
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerToClient {
    #[serde(rename = "room:state")]
    State(RoomSnapshot),
    /// Sent to the joining connection only, so a client learns its
    /// stable player id.
    #[serde(rename = "room:joined", rename_all = "camelCase")]
    Joined {
        snapshot: RoomSnapshot,
        player_id: Uuid,
        seat: u8,
    },
    /// The recipient's own hand. Never broadcast.
    #[serde(rename = "player:hand")]
    Hand { cards: Vec<Card> },
    #[serde(rename = "room:ended", rename_all = "camelCase")]
    RoomEnded { reason: String, host_left: bool },
    #[serde(rename = "room:rulesUpdated")]
    RulesUpdated { rules: Rules },
    #[serde(rename = "game:started")]
    GameStarted,
    #[serde(rename = "game:scores", rename_all = "camelCase")]
    Scores {
        players: Vec<PublicPlayer>,
        round_scores: HashMap<Uuid, Vec<u32>>,
    },
    #[serde(rename = "turn:begin", rename_all = "camelCase")]
    TurnBegin {
        active_player_id: Uuid,
        can_show: bool,
    },
    #[serde(rename = "turn:updated", rename_all = "camelCase")]
    TurnUpdated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        discard_group: Option<DiscardGroup>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        drew_from: Option<DrewFrom>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        skipped_draw: Option<bool>,
    },
    #[serde(rename = "turn:ended", rename_all = "camelCase")]
    TurnEnded { next_player_id: Uuid },
    #[serde(rename = "turn:timeout", rename_all = "camelCase")]
    TurnTimeout {
        player_id: Uuid,
        next_player_id: Uuid,
    },
    #[serde(rename = "show:result", rename_all = "camelCase")]
    ShowResult {
        ok: bool,
        caller_id: Uuid,
        scores_round: HashMap<Uuid, u32>,
        final_hands: HashMap<Uuid, Vec<Card>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        penalty_applied: Option<u32>,
    },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}
