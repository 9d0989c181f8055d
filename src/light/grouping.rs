use crate::math::{angle_difference, is_vertical};
use itertools::Itertools;
use smallvec::SmallVec;
use std::f64::consts::PI;

/// The macro-phase a street belongs to when streets can't be paired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Axis {
    NorthSouth,
    EastWest,
}

/// A set of streets (by index into the bearings) which share a phase.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct StreetGroup {
    pub members: SmallVec<[usize; 2]>,
    pub axis: Axis,
}

impl Axis {
    pub fn of_bearing(angle: f64) -> Self {
        if is_vertical(angle) {
            Self::NorthSouth
        } else {
            Self::EastWest
        }
    }
}

/// Groups the streets leaving an intersection into phases.
///
/// Streets are paired greedily by how close they are to running in opposite directions,
/// ignoring pairs further than `tolerance` from opposite. Leftover streets share a group
/// with one other leftover on the same axis. If nothing pairs up, streets are grouped
/// north-south versus east-west instead.
pub(crate) fn group_bearings(bearings: &[f64], tolerance: f64) -> Vec<StreetGroup> {
    let closeness =
        |i: usize, j: usize| (PI - angle_difference(bearings[i], bearings[j]).abs()).abs();

    let candidates = (0..bearings.len())
        .tuple_combinations()
        .map(|(i, j)| (i, j, closeness(i, j)))
        .filter(|(_, _, c)| *c <= tolerance)
        .sorted_by(|a, b| a.2.total_cmp(&b.2));

    let mut used = vec![false; bearings.len()];
    let mut groups = vec![];
    for (i, j, _) in candidates {
        if used[i] || used[j] {
            continue;
        }
        used[i] = true;
        used[j] = true;
        groups.push(StreetGroup {
            members: SmallVec::from_slice(&[i, j]),
            axis: Axis::of_bearing(bearings[i]),
        });
    }

    if groups.is_empty() {
        return group_by_axis(bearings);
    }

    let first_single = groups.len();
    for idx in (0..bearings.len()).filter(|i| !used[*i]) {
        let axis = Axis::of_bearing(bearings[idx]);
        let partner = groups[first_single..]
            .iter_mut()
            .find(|g| g.axis == axis && g.members.len() == 1);
        match partner {
            Some(group) => group.members.push(idx),
            None => groups.push(StreetGroup {
                members: SmallVec::from_slice(&[idx]),
                axis,
            }),
        }
    }
    groups
}

/// Groups streets into north-south and east-west phases.
/// If every street lies on the same axis, each gets its own phase.
fn group_by_axis(bearings: &[f64]) -> Vec<StreetGroup> {
    let mut groups = [Axis::NorthSouth, Axis::EastWest]
        .into_iter()
        .map(|axis| StreetGroup {
            members: (0..bearings.len())
                .filter(|i| Axis::of_bearing(bearings[*i]) == axis)
                .collect(),
            axis,
        })
        .filter(|g| !g.members.is_empty())
        .collect::<Vec<_>>();

    if groups.len() == 1 {
        let axis = groups[0].axis;
        groups = (0..bearings.len())
            .map(|i| StreetGroup {
                members: SmallVec::from_slice(&[i]),
                axis,
            })
            .collect();
    }
    groups
}

#[cfg(test)]
mod test {
    use super::*;

    fn deg(angles: &[f64]) -> Vec<f64> {
        angles.iter().map(|a| a.to_radians()).collect()
    }

    const TOL: f64 = 0.25 * PI;

    #[test]
    fn four_way_pairs_opposites() {
        let groups = group_bearings(&deg(&[0.0, 90.0, 180.0, 270.0]), TOL);
        assert_eq!(groups.len(), 2);
        let mut members = groups
            .iter()
            .map(|g| (g.axis, g.members.to_vec()))
            .collect::<Vec<_>>();
        members.sort_by_key(|(_, m)| m[0]);
        assert_eq!(members[0], (Axis::EastWest, vec![0, 2]));
        assert_eq!(members[1], (Axis::NorthSouth, vec![1, 3]));
    }

    #[test]
    fn skewed_four_way_pairs_closest() {
        let groups = group_bearings(&deg(&[5.0, 80.0, 190.0, 265.0]), TOL);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().any(|g| g.members.as_slice() == [0, 2]));
        assert!(groups.iter().any(|g| g.members.as_slice() == [1, 3]));
    }

    #[test]
    fn tee_has_singleton() {
        let groups = group_bearings(&deg(&[0.0, 180.0, 270.0]), TOL);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].members.as_slice(), [0, 1]);
        assert_eq!(groups[1].members.as_slice(), [2]);
        assert_eq!(groups[1].axis, Axis::NorthSouth);
    }

    #[test]
    fn wye_falls_back_to_axes() {
        let groups = group_bearings(&deg(&[0.0, 120.0, 240.0]), TOL);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].axis, Axis::NorthSouth);
        assert_eq!(groups[0].members.as_slice(), [1, 2]);
        assert_eq!(groups[1].members.as_slice(), [0]);
    }

    #[test]
    fn same_axis_falls_back_to_singletons() {
        let groups = group_bearings(&deg(&[0.0, 20.0, 160.0 + 60.0]), 0.05);
        assert_eq!(groups.len(), 3);
    }
}
