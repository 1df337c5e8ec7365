use crate::{
    bundles::SideBundle,
    side::{PlayerSlot, Side},
};
use core::ops::{Index, IndexMut};
use derivative::Derivative;
use enum_iterator::all;
use log::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

pub const MAX_NAME_LEN: usize = 30;
pub const UNSET_COUNTRY_CODE: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSnapshot {
    pub meta: MatchMeta,
    pub players: Players,
    pub points: SideBundle<Point>,
    /// Games won in the current, unfinished set
    pub games: SideBundle<u32>,
    /// Final game counts of each completed set, always the same length for both sides
    pub sets: SideBundle<Vec<u32>>,
    pub tiebreak: bool,
    pub tiebreak_points: SideBundle<u32>,
    pub server: Side,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchMeta {
    pub name: String,
    pub best_of: BestOf,
    pub golden_point: bool,
}

#[derive(Derivative, Serialize, Deserialize)]
#[derivative(Debug, Default, PartialEq, Eq, Clone, Copy)]
#[serde(try_from = "u8", into = "u8")]
pub enum BestOf {
    #[derivative(Default)]
    Three,
    Five,
}

impl BestOf {
    pub fn sets_to_win(self) -> usize {
        match self {
            Self::Three => 2,
            Self::Five => 3,
        }
    }
}

impl From<BestOf> for u8 {
    fn from(best_of: BestOf) -> Self {
        match best_of {
            BestOf::Three => 3,
            BestOf::Five => 5,
        }
    }
}

impl TryFrom<u8> for BestOf {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(Self::Three),
            5 => Ok(Self::Five),
            v => Err(format!("best of {v} is not supported, must be 3 or 5")),
        }
    }
}

impl core::fmt::Display for BestOf {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "Best of {}", u8::from(*self))
    }
}

/// A rung of the game scoring ladder
#[derive(Derivative, Serialize, Deserialize)]
#[derivative(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum Point {
    #[derivative(Default)]
    #[serde(rename = "0")]
    Love,
    #[serde(rename = "15")]
    Fifteen,
    #[serde(rename = "30")]
    Thirty,
    #[serde(rename = "40")]
    Forty,
    #[serde(rename = "Ad")]
    Advantage,
}

impl Point {
    /// Moves one rung up, capped at 40. Advantage is never reached this way.
    pub fn advance(self) -> Self {
        match self {
            Self::Love => Self::Fifteen,
            Self::Fifteen => Self::Thirty,
            Self::Thirty | Self::Forty => Self::Forty,
            Self::Advantage => Self::Advantage,
        }
    }

    /// Moves one rung down, clamped at 0
    pub fn regress(self) -> Self {
        match self {
            Self::Love | Self::Fifteen => Self::Love,
            Self::Thirty => Self::Fifteen,
            Self::Forty => Self::Thirty,
            Self::Advantage => Self::Forty,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Love => "0",
            Self::Fifteen => "15",
            Self::Thirty => "30",
            Self::Forty => "40",
            Self::Advantage => "Ad",
        }
    }

    fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(s)) => match s.trim() {
                "0" => Self::Love,
                "15" => Self::Fifteen,
                "30" => Self::Thirty,
                "40" => Self::Forty,
                "Ad" | "AD" | "ad" | "A" => Self::Advantage,
                _ => Self::Love,
            },
            Some(Value::Number(n)) => match n.as_u64() {
                Some(15) => Self::Fifteen,
                Some(30) => Self::Thirty,
                Some(40) => Self::Forty,
                _ => Self::Love,
            },
            _ => Self::Love,
        }
    }
}

impl core::fmt::Display for Point {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub name: String,
    pub country_code: String,
}

impl Default for Player {
    fn default() -> Self {
        Self {
            name: String::new(),
            country_code: UNSET_COUNTRY_CODE.to_string(),
        }
    }
}

impl Player {
    pub fn new(name: &str, country_code: &str) -> Self {
        Self {
            name: truncate_name(name),
            country_code: country_code_or_unset(country_code),
        }
    }
}

pub fn truncate_name(name: &str) -> String {
    name.chars().take(MAX_NAME_LEN).collect()
}

pub fn country_code_or_unset(code: &str) -> String {
    let code = code.trim();
    if code.is_empty() {
        UNSET_COUNTRY_CODE.to_string()
    } else {
        code.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Players {
    pub side1a: Player,
    pub side1b: Player,
    pub side2a: Player,
    pub side2b: Player,
}

impl Index<PlayerSlot> for Players {
    type Output = Player;

    fn index(&self, slot: PlayerSlot) -> &Self::Output {
        match slot {
            PlayerSlot::Side1A => &self.side1a,
            PlayerSlot::Side1B => &self.side1b,
            PlayerSlot::Side2A => &self.side2a,
            PlayerSlot::Side2B => &self.side2b,
        }
    }
}

impl IndexMut<PlayerSlot> for Players {
    fn index_mut(&mut self, slot: PlayerSlot) -> &mut Self::Output {
        match slot {
            PlayerSlot::Side1A => &mut self.side1a,
            PlayerSlot::Side1B => &mut self.side1b,
            PlayerSlot::Side2A => &mut self.side2a,
            PlayerSlot::Side2B => &mut self.side2b,
        }
    }
}

impl MatchSnapshot {
    /// A fresh match carrying the given meta
    pub fn with_meta(meta: MatchMeta) -> Self {
        Self {
            meta,
            ..Default::default()
        }
    }

    pub fn completed_sets(&self) -> usize {
        self.sets.side1.len()
    }

    /// Parses a stored snapshot. Anything unparseable is treated as "no data yet".
    pub fn from_json_str(data: &str) -> Self {
        match serde_json::from_str::<Value>(data) {
            Ok(value) => normalize(&value),
            Err(e) => {
                warn!("Stored snapshot is not valid JSON, using defaults: {e}");
                Self::default()
            }
        }
    }
}

/// Builds a snapshot from untrusted stored data. Missing or out of domain
/// fields fall back to their defaults, nothing is rejected.
pub fn normalize(value: &Value) -> MatchSnapshot {
    if !value.is_object() {
        if !value.is_null() {
            warn!("Stored snapshot is not an object, using defaults");
        }
        return MatchSnapshot::default();
    }

    let meta = normalize_meta(value.get("meta"));

    let mut players = Players::default();
    let stored_players = value.get("players");
    for slot in all::<PlayerSlot>() {
        players[slot] = normalize_player(stored_players.and_then(|p| p.get(slot.key())));
    }

    let mut points = side_bundle(value.get("points"), Point::from_value);
    let games = side_bundle(value.get("games"), counter);
    let mut sets = side_bundle(value.get("sets"), set_list);
    let tiebreak = flag(value.get("tiebreak"));
    let mut tiebreak_points = side_bundle(value.get("tiebreakPoints"), counter);

    let len = sets.side1.len().min(sets.side2.len());
    if sets.side1.len() != sets.side2.len() {
        warn!("Stored sets have mismatched lengths, truncating both to {len}");
    }
    sets.side1.truncate(len);
    sets.side2.truncate(len);

    if !tiebreak {
        tiebreak_points = SideBundle::default();
    }

    if meta.golden_point && points.iter().any(|(_, p)| *p == Point::Advantage) {
        points = SideBundle::new(Point::Forty, Point::Forty);
    }

    let server = value
        .get("server")
        .and_then(Value::as_str)
        .and_then(Side::from_key)
        .unwrap_or_default();

    let updated_at = match value.get("updatedAt") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .unwrap_or(0),
        _ => 0,
    };

    MatchSnapshot {
        meta,
        players,
        points,
        games,
        sets,
        tiebreak,
        tiebreak_points,
        server,
        updated_at,
    }
}

fn normalize_meta(value: Option<&Value>) -> MatchMeta {
    let Some(value) = value else {
        return MatchMeta::default();
    };
    let best_of = value
        .get("bestOf")
        .and_then(Value::as_u64)
        .and_then(|v| u8::try_from(v).ok())
        .and_then(|v| BestOf::try_from(v).ok())
        .unwrap_or_default();
    MatchMeta {
        name: value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        best_of,
        golden_point: flag(value.get("goldenPoint")),
    }
}

fn normalize_player(value: Option<&Value>) -> Player {
    let Some(value) = value else {
        return Player::default();
    };
    Player::new(
        value.get("name").and_then(Value::as_str).unwrap_or_default(),
        value
            .get("countryCode")
            .and_then(Value::as_str)
            .unwrap_or_default(),
    )
}

fn side_bundle<T, F: Fn(Option<&Value>) -> T>(value: Option<&Value>, f: F) -> SideBundle<T> {
    SideBundle {
        side1: f(value.and_then(|v| v.get("side1"))),
        side2: f(value.and_then(|v| v.get("side2"))),
    }
}

fn flag(value: Option<&Value>) -> bool {
    value.and_then(Value::as_bool).unwrap_or(false)
}

fn counter(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_u64() {
                u32::try_from(v).unwrap_or(u32::MAX)
            } else {
                // `as` saturates, so huge values clamp to u32::MAX
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f as u32)
                    .unwrap_or(0)
            }
        }
        _ => 0,
    }
}

fn set_list(value: Option<&Value>) -> Vec<u32> {
    match value {
        Some(Value::Array(items)) => items.iter().map(|item| counter(Some(item))).collect(),
        _ => Vec::new(),
    }
}
