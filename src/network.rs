use crate::error::NetworkError;
use crate::math::{bearing, distance, rot90, unit_vector, Point2d, Vector2d};
use crate::{LocationId, StreetId};
use cgmath::prelude::*;
use slotmap::SlotMap;
use smallvec::SmallVec;

/// The maximum number of streets that may meet at a location.
pub const MAX_STREETS_PER_LOCATION: usize = 4;

/// A point in the road network which streets connect to.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Location {
    id: LocationId,
    name: String,
    pos: Point2d,
}

/// The role of a location, derived from the number of streets connected to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocationKind {
    /// No connected streets.
    Island,
    /// A dead end where vehicles spawn and despawn.
    Parking,
    /// Two streets joined end to end.
    Corner,
    ThreeWay,
    FourWay,
    /// Five or more streets.
    Intersection,
}

/// A street between two locations, which vehicles may travel in either direction.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Street {
    id: StreetId,
    name: String,
    from: LocationId,
    to: LocationId,
    width: f64,
}

/// The direction of travel along a street.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// From the street's `from` location to its `to` location.
    Forward,
    /// From the street's `to` location to its `from` location.
    Backward,
}

/// The static road graph shared by both comparison panels.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Network {
    locations: SlotMap<LocationId, Location>,
    streets: SlotMap<StreetId, Street>,
}

impl Location {
    pub fn id(&self) -> LocationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The location's world coordinates.
    pub fn pos(&self) -> Point2d {
        self.pos
    }
}

impl LocationKind {
    /// Classifies a location by the number of streets connected to it.
    pub fn from_street_count(count: usize) -> Self {
        match count {
            0 => Self::Island,
            1 => Self::Parking,
            2 => Self::Corner,
            3 => Self::ThreeWay,
            4 => Self::FourWay,
            _ => Self::Intersection,
        }
    }

    /// Whether traffic lights control this location.
    pub fn is_signalised(&self) -> bool {
        matches!(self, Self::ThreeWay | Self::FourWay | Self::Intersection)
    }
}

impl Street {
    pub fn id(&self) -> StreetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn from(&self) -> LocationId {
        self.from
    }

    pub fn to(&self) -> LocationId {
        self.to
    }

    /// The street's width in world units.
    pub fn width(&self) -> f64 {
        self.width
    }

    /// Whether the street starts or ends at the given location.
    pub fn touches(&self, loc: LocationId) -> bool {
        self.from == loc || self.to == loc
    }

    /// The location a vehicle travelling in `dir` starts from.
    pub fn entry(&self, dir: Direction) -> LocationId {
        match dir {
            Direction::Forward => self.from,
            Direction::Backward => self.to,
        }
    }

    /// The location a vehicle travelling in `dir` is heading towards.
    pub fn exit(&self, dir: Direction) -> LocationId {
        self.entry(dir.reverse())
    }

    /// The end of the street opposite to `loc`.
    pub fn far_end(&self, loc: LocationId) -> LocationId {
        if self.from == loc {
            self.to
        } else {
            self.from
        }
    }

    /// The direction of travel leaving `loc` along this street.
    pub fn direction_from(&self, loc: LocationId) -> Direction {
        if self.from == loc {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }
}

impl Network {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a location to the network.
    pub fn add_location(&mut self, name: &str, pos: Point2d) -> LocationId {
        self.locations.insert_with_key(|id| Location {
            id,
            name: name.to_owned(),
            pos,
        })
    }

    /// Adds a street between two existing locations.
    pub fn add_street(
        &mut self,
        name: &str,
        from: LocationId,
        to: LocationId,
        width: f64,
    ) -> Result<StreetId, NetworkError> {
        for loc in [from, to] {
            if !self.locations.contains_key(loc) {
                return Err(NetworkError::UnknownLocation(loc));
            }
            if self.street_count(loc) >= MAX_STREETS_PER_LOCATION {
                return Err(NetworkError::TooManyStreets(loc));
            }
        }
        if from == to {
            return Err(NetworkError::SelfLoop);
        }
        Ok(self.streets.insert_with_key(|id| Street {
            id,
            name: name.to_owned(),
            from,
            to,
            width,
        }))
    }

    /// Removes a street.
    pub fn remove_street(&mut self, id: StreetId) -> Result<Street, NetworkError> {
        self.streets
            .remove(id)
            .ok_or(NetworkError::UnknownStreet(id))
    }

    /// Removes a location along with every street connected to it.
    /// Returns the IDs of the removed streets.
    pub fn remove_location(&mut self, id: LocationId) -> Result<Vec<StreetId>, NetworkError> {
        self.locations
            .remove(id)
            .ok_or(NetworkError::UnknownLocation(id))?;
        let removed = self.streets_at(id).into_iter().collect::<Vec<_>>();
        for street_id in &removed {
            self.streets.remove(*street_id);
        }
        Ok(removed)
    }

    pub fn location(&self, id: LocationId) -> Option<&Location> {
        self.locations.get(id)
    }

    pub fn street(&self, id: StreetId) -> Option<&Street> {
        self.streets.get(id)
    }

    pub fn iter_locations(&self) -> impl Iterator<Item = &Location> {
        self.locations.values()
    }

    pub fn iter_streets(&self) -> impl Iterator<Item = &Street> {
        self.streets.values()
    }

    /// The streets connected to a location.
    pub fn streets_at(&self, loc: LocationId) -> SmallVec<[StreetId; 4]> {
        self.streets
            .values()
            .filter(|s| s.touches(loc))
            .map(|s| s.id)
            .collect()
    }

    /// The number of streets connected to a location.
    pub fn street_count(&self, loc: LocationId) -> usize {
        self.streets.values().filter(|s| s.touches(loc)).count()
    }

    /// The derived kind of a location.
    pub fn kind(&self, loc: LocationId) -> LocationKind {
        LocationKind::from_street_count(self.street_count(loc))
    }

    /// The IDs of all parking lots.
    pub fn parking_lots(&self) -> impl Iterator<Item = LocationId> + '_ {
        self.locations
            .keys()
            .filter(|id| self.kind(*id) == LocationKind::Parking)
    }

    /// The world coordinates of both ends of a street, in the given direction of travel.
    pub fn street_ends(&self, id: StreetId, dir: Direction) -> Option<(Point2d, Point2d)> {
        let street = self.streets.get(id)?;
        let a = self.locations.get(street.entry(dir))?.pos;
        let b = self.locations.get(street.exit(dir))?.pos;
        Some((a, b))
    }

    /// The length of a street in world units.
    pub fn street_length(&self, id: StreetId) -> Option<f64> {
        self.street_ends(id, Direction::Forward)
            .map(|(a, b)| distance(a, b))
    }

    /// A unit vector along the direction of travel.
    pub fn heading(&self, id: StreetId, dir: Direction) -> Option<Vector2d> {
        let (a, b) = self.street_ends(id, dir)?;
        Some(unit_vector(bearing(a, b)))
    }

    /// The bearing from `loc` towards the far end of a street connected to it.
    pub fn bearing_from(&self, loc: LocationId, street: StreetId) -> Option<f64> {
        let street = self.streets.get(street)?;
        let here = self.locations.get(loc)?.pos;
        let there = self.locations.get(street.far_end(loc))?.pos;
        Some(bearing(here, there))
    }

    /// The world position of a vehicle at `progress` along a street, including
    /// its offset to the right-hand side of the centre line.
    pub fn point_along(&self, id: StreetId, dir: Direction, progress: f64) -> Option<Point2d> {
        let street = self.streets.get(id)?;
        let (a, b) = self.street_ends(id, dir)?;
        let tan = (b - a).normalize();
        let lane_offset = -0.25 * street.width * rot90(tan);
        Some(a + progress * (b - a) + lane_offset)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn star(arms: usize) -> (Network, LocationId, Vec<LocationId>) {
        let mut net = Network::new();
        let centre = net.add_location("centre", Point2d::new(0.0, 0.0));
        let ends = (0..arms)
            .map(|i| {
                let angle = i as f64 * std::f64::consts::TAU / arms as f64;
                let end = net.add_location("end", Point2d::from_vec(100.0 * unit_vector(angle)));
                net.add_street("arm", centre, end, 20.0).unwrap();
                end
            })
            .collect();
        (net, centre, ends)
    }

    #[test]
    fn kinds_follow_street_count() {
        let (net, centre, ends) = star(3);
        assert_eq!(net.kind(centre), LocationKind::ThreeWay);
        assert!(ends.iter().all(|e| net.kind(*e) == LocationKind::Parking));
        assert_eq!(net.parking_lots().count(), 3);
        assert_eq!(LocationKind::from_street_count(0), LocationKind::Island);
        assert_eq!(LocationKind::from_street_count(7), LocationKind::Intersection);
    }

    #[test]
    fn rejects_fifth_street() {
        let (mut net, centre, _) = star(4);
        let extra = net.add_location("extra", Point2d::new(50.0, 50.0));
        assert_eq!(
            net.add_street("x", extra, centre, 20.0),
            Err(NetworkError::TooManyStreets(centre))
        );
        assert_eq!(
            net.add_street("x", extra, extra, 20.0),
            Err(NetworkError::SelfLoop)
        );
    }

    #[test]
    fn removing_location_cascades() {
        let (mut net, centre, ends) = star(4);
        let removed = net.remove_location(centre).unwrap();
        assert_eq!(removed.len(), 4);
        assert_eq!(net.iter_streets().count(), 0);
        assert_eq!(net.kind(ends[0]), LocationKind::Island);
    }

    #[test]
    fn position_along_street() {
        let (net, centre, ends) = star(4);
        let street = net.streets_at(ends[0])[0];
        let dir = net.street(street).unwrap().direction_from(centre);
        assert_eq!(dir, Direction::Forward);
        assert_approx_eq!(net.street_length(street).unwrap(), 100.0);
        // Heading +x, so the right-hand lane sits at -y.
        let p = net.point_along(street, dir, 0.5).unwrap();
        assert_approx_eq!(p.x, 50.0);
        assert_approx_eq!(p.y, -5.0);
        let q = net.point_along(street, dir.reverse(), 0.5).unwrap();
        assert_approx_eq!(q.y, 5.0);
    }
}
