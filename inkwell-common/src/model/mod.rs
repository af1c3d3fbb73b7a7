pub mod auth;
pub mod comment;
pub mod post;
pub mod user;

use crate::model::user::InvalidUsernameError;
use derive_where::derive_where;
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use std::{
    fmt::{Display, Formatter},
    marker::PhantomData,
    num::ParseIntError,
    str::FromStr,
};
use thiserror::Error;

#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    Username(#[from] InvalidUsernameError),
    #[error(transparent)]
    Id(#[from] InvalidIdError),
    #[error("Invalid timestamp: {0}")]
    Timestamp(#[from] time::error::Parse),
}

#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum InvalidIdError {
    #[error("Id is not a number: {0}")]
    NotANumber(ParseIntError),
    #[error("Id must be positive, got {0}")]
    NotPositive(i64),
}

/// Server-assigned entity id.
///
/// The server hands out strictly positive ids. Negative values are reserved for
/// placeholders standing in for records that were created locally and have not been
/// confirmed yet, so the two can never collide.
#[derive_where(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct Id<Marker>(i64, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(id: i64) -> Option<Self> {
        (id > 0).then_some(Self(id, PhantomData))
    }

    /// Panics if `id` is not positive.
    #[must_use]
    pub fn new_unchecked(id: i64) -> Self {
        Self::new(id).expect("Id was not positive.")
    }

    /// The `sequence`-th placeholder id. Distinct sequences give distinct ids.
    #[must_use]
    pub fn placeholder(sequence: u32) -> Self {
        Self(-1 - i64::from(sequence), PhantomData)
    }

    #[must_use]
    pub fn is_placeholder(self) -> bool {
        self.0 < 0
    }

    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> TryFrom<i64> for Id<Marker> {
    type Error = InvalidIdError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidIdError::NotPositive(value))
    }
}

impl<Marker> FromStr for Id<Marker> {
    type Err = InvalidIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        i64::from_str(s)
            .map_err(InvalidIdError::NotANumber)?
            .try_into()
    }
}

impl<Marker> From<Id<Marker>> for i64 {
    fn from(value: Id<Marker>) -> Self {
        value.get()
    }
}

impl<'de, Marker> Deserialize<'de> for Id<Marker> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = i64::deserialize(deserializer)?;
        Self::new(inner)
            .ok_or_else(|| Error::invalid_value(Unexpected::Signed(inner), &"a positive id"))
    }
}
