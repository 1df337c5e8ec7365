//! What the read-only views show for a court, derived from its snapshot.

use crate::{
    bundles::SideBundle,
    match_snapshot::{BestOf, MatchSnapshot},
    side::Side,
};
use serde::Serialize;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourtView {
    pub name: String,
    pub completed_sets: usize,
    /// Completed set scores followed by the games of the set in progress
    pub set_columns: SideBundle<Vec<u32>>,
    pub displayed_point: SideBundle<String>,
    pub sets_won: SideBundle<usize>,
    pub best_of: BestOf,
    /// Set once a side has won enough sets. Scoring is not blocked by it.
    pub match_winner: Option<Side>,
    pub server: Side,
    pub tiebreak: bool,
}

impl From<&MatchSnapshot> for CourtView {
    fn from(snapshot: &MatchSnapshot) -> Self {
        let displayed_point = if snapshot.tiebreak {
            snapshot.tiebreak_points.map(|p| p.to_string())
        } else {
            snapshot.points.map(|p| p.label().to_string())
        };

        let mut set_columns = snapshot.sets.clone();
        set_columns.side1.push(snapshot.games.side1);
        set_columns.side2.push(snapshot.games.side2);

        let mut sets_won = SideBundle::<usize>::default();
        for (a, b) in snapshot.sets.side1.iter().zip(snapshot.sets.side2.iter()) {
            if let Some(winner) = SideBundle::new(a, b).leader() {
                sets_won[winner] += 1;
            }
        }

        let best_of = snapshot.meta.best_of;
        let match_winner = sets_won
            .iter()
            .find(|(_, won)| **won >= best_of.sets_to_win())
            .map(|(side, _)| side);

        Self {
            name: snapshot.meta.name.clone(),
            completed_sets: snapshot.completed_sets(),
            set_columns,
            displayed_point,
            sets_won,
            best_of,
            match_winner,
            server: snapshot.server,
            tiebreak: snapshot.tiebreak,
        }
    }
}

impl Display for CourtView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let row = |side: Side| {
            let columns: Vec<String> = self.set_columns[side].iter().map(u32::to_string).collect();
            let serve = if self.server == side { "*" } else { " " };
            format!("{serve}{} [{}]", columns.join(" "), self.displayed_point[side])
        };
        write!(f, "{} | {}", row(Side::One), row(Side::Two))?;
        if self.tiebreak {
            write!(f, " (tiebreak)")?;
        }
        if let Some(winner) = self.match_winner {
            write!(f, " ({winner} wins)")?;
        }
        Ok(())
    }
}
