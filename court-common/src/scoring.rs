//! The match scoring state machine.
//!
//! Every operation takes the current snapshot by reference and returns the
//! complete next snapshot. Nothing here can fail: out of range requests are
//! clamped at the boundaries instead.

use crate::{
    bundles::SideBundle,
    match_snapshot::{
        BestOf, MatchMeta, MatchSnapshot, Point, Timestamp, country_code_or_unset, truncate_name,
    },
    side::{PlayerSlot, Side},
};
use log::*;
use serde::{Deserialize, Serialize};

const GAMES_PER_SET: u32 = 6;
const TIEBREAK_POINTS: u32 = 7;
const WINNING_MARGIN: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Direction {
    Increment,
    Decrement,
}

impl From<Direction> for i8 {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Increment => 1,
            Direction::Decrement => -1,
        }
    }
}

impl TryFrom<i8> for Direction {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Increment),
            -1 => Ok(Self::Decrement),
            v => Err(format!("direction must be 1 or -1, got {v}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlayerField {
    Name,
    CountryCode,
}

/// Meta values to use for a new match instead of the ones carried over
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaOverrides {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub best_of: Option<BestOf>,
    #[serde(default)]
    pub golden_point: Option<bool>,
}

/// Every change a controller can make to a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MatchAction {
    Point {
        side: Side,
        direction: Direction,
    },
    ToggleServer,
    ResetGameCorrection,
    NewMatch(MetaOverrides),
    #[serde(rename_all = "camelCase")]
    SetBestOf {
        best_of: BestOf,
    },
    ToggleGoldenPoint,
    UpdatePlayer {
        slot: PlayerSlot,
        field: PlayerField,
        value: String,
    },
}

/// Runs one controller action against a snapshot. `now` is only used by
/// actions that stamp the result themselves.
pub fn apply_action(
    snapshot: &MatchSnapshot,
    action: &MatchAction,
    now: Timestamp,
) -> MatchSnapshot {
    match action {
        MatchAction::Point { side, direction } => apply_point(snapshot, *side, *direction),
        MatchAction::ToggleServer => toggle_server(snapshot),
        MatchAction::ResetGameCorrection => reset_game_correction(snapshot),
        MatchAction::NewMatch(overrides) => new_match(snapshot, overrides, now),
        MatchAction::SetBestOf { best_of } => set_best_of(snapshot, *best_of),
        MatchAction::ToggleGoldenPoint => toggle_golden_point(snapshot),
        MatchAction::UpdatePlayer { slot, field, value } => {
            update_player(snapshot, *slot, *field, value)
        }
    }
}

pub fn apply_point(snapshot: &MatchSnapshot, side: Side, direction: Direction) -> MatchSnapshot {
    if snapshot.tiebreak {
        return tiebreak_point(snapshot, side, direction);
    }

    match direction {
        Direction::Increment => point_won(snapshot, side),
        Direction::Decrement => {
            let mut next = snapshot.clone();
            next.points[side] = next.points[side].regress();
            debug!("{side} point removed, points now {}", next.points);
            next
        }
    }
}

fn point_won(snapshot: &MatchSnapshot, side: Side) -> MatchSnapshot {
    let mine = snapshot.points[side];
    let theirs = snapshot.points[side.other()];

    let mut next = snapshot.clone();
    if snapshot.meta.golden_point {
        match (mine, theirs) {
            (Point::Forty, Point::Forty) => {
                debug!("{side} wins the golden point");
                return win_game(snapshot, side);
            }
            (Point::Forty, _) | (Point::Advantage, _) => return win_game(snapshot, side),
            _ => next.points[side] = mine.advance(),
        }
    } else {
        match (mine, theirs) {
            (Point::Advantage, _) => return win_game(snapshot, side),
            (Point::Forty, Point::Advantage) => next.points[side.other()] = Point::Forty,
            (Point::Forty, Point::Forty) => next.points[side] = Point::Advantage,
            (Point::Forty, _) => return win_game(snapshot, side),
            _ => next.points[side] = mine.advance(),
        }
    }

    debug!("{side} point won, points now {}", next.points);
    next
}

/// Awards the current game to `side` and settles the set if that finished it
pub fn win_game(snapshot: &MatchSnapshot, side: Side) -> MatchSnapshot {
    let mut next = snapshot.clone();
    next.games[side] = next.games[side].saturating_add(1);
    next.points = SideBundle::default();

    let (a, b) = (next.games.side1, next.games.side2);
    info!("{side} wins the game, games now {}", next.games);

    if a.max(b) >= GAMES_PER_SET && a.abs_diff(b) >= WINNING_MARGIN {
        next.sets.side1.push(a);
        next.sets.side2.push(b);
        next.games = SideBundle::default();
        next.tiebreak = false;
        next.tiebreak_points = SideBundle::default();
        info!("Set complete {a}-{b}, {} sets played", next.sets.side1.len());
    } else if a == GAMES_PER_SET && b == GAMES_PER_SET {
        next.tiebreak = true;
        next.tiebreak_points = SideBundle::default();
        info!("Games level at {a}-{b}, starting tiebreak");
    }

    next
}

fn tiebreak_point(snapshot: &MatchSnapshot, side: Side, direction: Direction) -> MatchSnapshot {
    let mut next = snapshot.clone();
    match direction {
        Direction::Increment => {
            next.tiebreak_points[side] = next.tiebreak_points[side].saturating_add(1);
        }
        Direction::Decrement => {
            next.tiebreak_points[side] = next.tiebreak_points[side].saturating_sub(1);
            debug!("{side} tiebreak point removed, now {}", next.tiebreak_points);
            return next;
        }
    }

    let (a, b) = (next.tiebreak_points.side1, next.tiebreak_points.side2);
    let finished = a.max(b) >= TIEBREAK_POINTS && a.abs_diff(b) >= WINNING_MARGIN;
    if let Some(winner) = next.tiebreak_points.leader().filter(|_| finished) {
        let loser = winner.other();
        let winner_games = next.games[winner].saturating_add(1);
        let loser_games = next.games[loser];
        next.sets[winner].push(winner_games);
        next.sets[loser].push(loser_games);
        next.games = SideBundle::default();
        next.points = SideBundle::default();
        next.tiebreak = false;
        next.tiebreak_points = SideBundle::default();
        info!("{winner} wins the tiebreak {a}-{b}, set complete");
    } else {
        debug!("{side} tiebreak point won, now {}", next.tiebreak_points);
    }

    next
}

pub fn toggle_server(snapshot: &MatchSnapshot) -> MatchSnapshot {
    let mut next = snapshot.clone();
    next.server = snapshot.server.other();
    info!("Server changed to {}", next.server);
    next
}

/// Takes one game back from the side currently ahead in the set and clears
/// the points. Completed sets and tiebreak state are left alone.
pub fn reset_game_correction(snapshot: &MatchSnapshot) -> MatchSnapshot {
    let mut next = snapshot.clone();
    if let Some(leader) = snapshot.games.leader() {
        next.games[leader] = next.games[leader].saturating_sub(1);
        info!("Removed a game from {leader}, games now {}", next.games);
    } else {
        info!("Games are level, only clearing points");
    }
    next.points = SideBundle::default();
    next
}

pub fn new_match(
    snapshot: &MatchSnapshot,
    overrides: &MetaOverrides,
    now: Timestamp,
) -> MatchSnapshot {
    let meta = MatchMeta {
        name: overrides
            .name
            .clone()
            .unwrap_or_else(|| snapshot.meta.name.clone()),
        best_of: overrides.best_of.unwrap_or(snapshot.meta.best_of),
        golden_point: overrides.golden_point.unwrap_or(snapshot.meta.golden_point),
    };
    info!(
        "Starting new match \"{}\" ({}, golden point: {})",
        meta.name, meta.best_of, meta.golden_point
    );
    MatchSnapshot {
        updated_at: now,
        ..MatchSnapshot::with_meta(meta)
    }
}

pub fn set_best_of(snapshot: &MatchSnapshot, best_of: BestOf) -> MatchSnapshot {
    let mut next = snapshot.clone();
    next.meta.best_of = best_of;
    info!("Match format set to {best_of}");
    next
}

pub fn toggle_golden_point(snapshot: &MatchSnapshot) -> MatchSnapshot {
    let mut next = snapshot.clone();
    next.meta.golden_point = !snapshot.meta.golden_point;
    if next.meta.golden_point && next.points.iter().any(|(_, p)| *p == Point::Advantage) {
        next.points = SideBundle::new(Point::Forty, Point::Forty);
    }
    info!("Golden point set to {}", next.meta.golden_point);
    next
}

pub fn update_player(
    snapshot: &MatchSnapshot,
    slot: PlayerSlot,
    field: PlayerField,
    value: &str,
) -> MatchSnapshot {
    let mut next = snapshot.clone();
    let player = &mut next.players[slot];
    match field {
        PlayerField::Name => player.name = truncate_name(value),
        PlayerField::CountryCode => player.country_code = country_code_or_unset(value),
    }
    debug!("Player {slot} updated: {player:?}");
    next
}
