use crate::{LocationId, StreetId};
use thiserror::Error;

/// A rejected structural edit of the road network.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    #[error("location {0:?} does not exist")]
    UnknownLocation(LocationId),
    #[error("street {0:?} does not exist")]
    UnknownStreet(StreetId),
    #[error("a street cannot start and end at the same location")]
    SelfLoop,
    #[error("location {0:?} already has the maximum number of streets")]
    TooManyStreets(LocationId),
}

/// A rejected vehicle spawn request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    #[error("spawn request is missing the {0}")]
    MissingField(&'static str),
    #[error("location {0:?} does not exist")]
    UnknownLocation(LocationId),
    #[error("street {0:?} does not exist")]
    UnknownStreet(StreetId),
    #[error("location {0:?} is not a parking lot")]
    NotParking(LocationId),
    #[error("street {street:?} does not connect to parking lot {parking:?}")]
    Disconnected {
        parking: LocationId,
        street: StreetId,
    },
    #[error("street {street:?} does not lead away from parking lot {parking:?} in that direction")]
    WrongDirection {
        parking: LocationId,
        street: StreetId,
    },
    #[error("the start of street {street:?} at parking lot {parking:?} is occupied")]
    Blocked {
        parking: LocationId,
        street: StreetId,
    },
}
