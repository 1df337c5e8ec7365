use crate::side::Side;
use core::ops::{Index, IndexMut};
use derivative::Derivative;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// One value per side, serialized as `{"side1": .., "side2": ..}`
#[derive(Derivative, Serialize, Deserialize)]
#[derivative(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideBundle<T> {
    pub side1: T,
    pub side2: T,
}

impl<T> SideBundle<T> {
    pub fn new(side1: T, side2: T) -> Self {
        Self { side1, side2 }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Side, &T)> {
        self.into_iter()
    }

    pub fn map<U, F: FnMut(T) -> U>(self, mut f: F) -> SideBundle<U> {
        SideBundle {
            side1: f(self.side1),
            side2: f(self.side2),
        }
    }
}

impl<T: Ord> SideBundle<T> {
    /// The side holding the strictly larger value, if any
    pub fn leader(&self) -> Option<Side> {
        match self.side1.cmp(&self.side2) {
            core::cmp::Ordering::Greater => Some(Side::One),
            core::cmp::Ordering::Less => Some(Side::Two),
            core::cmp::Ordering::Equal => None,
        }
    }
}

impl<T> Index<Side> for SideBundle<T> {
    type Output = T;

    fn index(&self, side: Side) -> &Self::Output {
        match side {
            Side::One => &self.side1,
            Side::Two => &self.side2,
        }
    }
}

impl<T> IndexMut<Side> for SideBundle<T> {
    fn index_mut(&mut self, side: Side) -> &mut Self::Output {
        match side {
            Side::One => &mut self.side1,
            Side::Two => &mut self.side2,
        }
    }
}

impl<T: Display> Display for SideBundle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Side 1: {}, Side 2: {}", self.side1, self.side2)
    }
}

pub struct SideBundleIterator<'a, T> {
    bundle: &'a SideBundle<T>,
    index: usize,
}

impl<'a, T> Iterator for SideBundleIterator<'a, T> {
    type Item = (Side, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let value = match self.index {
            0 => (Side::One, &self.bundle.side1),
            1 => (Side::Two, &self.bundle.side2),
            _ => return None,
        };

        self.index += 1;
        Some(value)
    }
}

impl<'a, T> IntoIterator for &'a SideBundle<T> {
    type Item = (Side, &'a T);
    type IntoIter = SideBundleIterator<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        SideBundleIterator {
            bundle: self,
            index: 0,
        }
    }
}

impl<T> IntoIterator for SideBundle<T> {
    type Item = (Side, T);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        vec![(Side::One, self.side1), (Side::Two, self.side2)].into_iter()
    }
}

impl<T: Default> FromIterator<(Side, T)> for SideBundle<T> {
    fn from_iter<I: IntoIterator<Item = (Side, T)>>(iter: I) -> Self {
        let mut bundle = SideBundle::default();
        for (side, value) in iter {
            bundle[side] = value;
        }
        bundle
    }
}
