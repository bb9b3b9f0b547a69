//! Pure classification and counting over card selections. No state in
//! here; the turn machine decides what to do with the answers.

use leastcount_protocol::{Card, DiscardGroup, DiscardKind, Rank};

use crate::error::GameError;

/// What a selection of cards amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Invalid,
    Single,
    Set,
    Run,
}

pub fn classify(cards: &[Card]) -> Selection {
    match cards.len() {
        0 => Selection::Invalid,
        1 => Selection::Single,
        _ if is_set(cards) => Selection::Set,
        _ if is_run(cards) => Selection::Run,
        _ => Selection::Invalid,
    }
}

/// Discard legality is stricter than classification: runs classify (the
/// client shows them as such) but only singles and sets may actually be
/// discarded in this ruleset.
pub fn validate_discard(cards: &[Card]) -> Result<DiscardKind, GameError> {
    match classify(cards) {
        Selection::Single => Ok(DiscardKind::Single),
        Selection::Set => Ok(DiscardKind::Set),
        Selection::Run => Err(GameError::InvalidDiscard("runs cannot be discarded")),
        Selection::Invalid => Err(GameError::InvalidDiscard(
            "must be a single card or a set of one rank",
        )),
    }
}

pub fn discard_group(cards: Vec<Card>, kind: DiscardKind) -> DiscardGroup {
    DiscardGroup {
        kind,
        ordered: kind == DiscardKind::Run,
        cards,
    }
}

/// Counts a hand under the round's joker rank. A card of the joker rank
/// counts 0 whatever its face says; the printed joker always counts 0.
pub fn hand_total(hand: &[Card], joker_rank: Option<Rank>) -> u32 {
    hand.iter()
        .map(|c| {
            if joker_rank == Some(c.rank) {
                0
            } else {
                c.rank.value()
            }
        })
        .sum()
}

fn is_set(cards: &[Card]) -> bool {
    if cards.len() < 2 {
        return false;
    }
    // jokers poison a set
    if cards.iter().any(Card::is_joker) {
        return false;
    }
    let rank = cards[0].rank;
    cards.iter().all(|c| c.rank == rank)
}

fn is_run(cards: &[Card]) -> bool {
    if cards.len() < 3 {
        return false;
    }
    let real: Vec<&Card> = cards.iter().filter(|c| !c.is_joker()).collect();
    if real.is_empty() {
        return false;
    }
    let suit = real[0].suit;
    if real.iter().any(|c| c.suit != suit) {
        return false;
    }
    let jokers = cards.len() - real.len();
    // a lone anchor card needs at least two jokers around it
    if real.len() == 1 {
        return jokers >= 2;
    }
    let mut seq: Vec<u8> = real.iter().filter_map(|c| c.rank.sequence()).collect();
    seq.sort_unstable();
    if seq.windows(2).any(|w| w[0] == w[1]) {
        return false;
    }
    // jokers must fill the interior gaps exactly
    let gaps: usize = seq
        .windows(2)
        .map(|w| (w[1] - w[0]) as usize - 1)
        .sum();
    jokers == gaps
}
