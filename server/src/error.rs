use leastcount_protocol::GamePhase;
use thiserror::Error;

/// Everything an intent can be rejected for. None of these are fatal to
/// a room: a rejected intent leaves state untouched and the error goes
/// back to the offending connection only.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("room {0} not found")]
    RoomNotFound(String),
    #[error("you are not in this room")]
    PlayerNotFound,
    #[error("some of those cards are not in your hand")]
    CardsNotInHand,
    #[error("only the host can do that")]
    NotHost,
    #[error("not your turn")]
    NotYourTurn,
    #[error("the name {0} is already taken in this room")]
    NameTaken(String),
    #[error("cannot do that in phase {0}")]
    WrongPhase(GamePhase),
    #[error("game already in progress")]
    GameInProgress,
    #[error("room is full")]
    RoomFull,
    #[error("need at least 2 players to start")]
    NotEnoughPlayers,
    #[error("invalid discard: {0}")]
    InvalidDiscard(&'static str),
    #[error("can only show at the start of your turn while under the declare threshold")]
    CannotShow,
    #[error("must discard and draw before ending the turn")]
    IncompleteTurn,
    #[error("cannot pick up your own discard")]
    OwnDiscard,
    #[error("rule values must be positive numbers")]
    InvalidRules,
    #[error("stock pile is empty")]
    EmptyStock,
    #[error("discard pile is empty")]
    EmptyDiscard,
    #[error("deck exhausted while dealing")]
    DeckExhausted,
}

impl GameError {
    /// Stable machine-readable code carried on the error event.
    pub fn code(&self) -> &'static str {
        match self {
            GameError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            GameError::PlayerNotFound => "PLAYER_NOT_FOUND",
            GameError::CardsNotInHand => "INVALID_CARDS",
            GameError::NotHost => "NOT_HOST",
            GameError::NotYourTurn => "NOT_YOUR_TURN",
            GameError::NameTaken(_) => "NAME_TAKEN",
            GameError::WrongPhase(_) => "WRONG_PHASE",
            GameError::GameInProgress => "GAME_IN_PROGRESS",
            GameError::RoomFull => "ROOM_FULL",
            GameError::NotEnoughPlayers => "NOT_ENOUGH_PLAYERS",
            GameError::InvalidDiscard(_) => "INVALID_DISCARD",
            GameError::CannotShow => "CANNOT_SHOW",
            GameError::IncompleteTurn => "INCOMPLETE_TURN",
            GameError::OwnDiscard => "OWN_DISCARD",
            GameError::InvalidRules => "INVALID_RULES",
            GameError::EmptyStock => "EMPTY_STOCK",
            GameError::EmptyDiscard => "EMPTY_DISCARD",
            GameError::DeckExhausted => "DECK_EXHAUSTED",
        }
    }
}
