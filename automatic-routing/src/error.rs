//! Routing-layer error taxonomy.

use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};

pub enum RoutingError {
    /// An entry payload failed to decode into a declaration. The event is
    /// dropped and logged; the previous routing view stays in place.
    MalformedDeclaration(String),
    /// A host-side table sink or subscription action failed. Logged; the
    /// next processed event pushes the full replacement state again.
    SinkUnavailable(String),
}

impl Debug for RoutingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RoutingError::MalformedDeclaration(detail) => {
                write!(f, "MalformedDeclaration({detail})")
            }
            RoutingError::SinkUnavailable(detail) => write!(f, "SinkUnavailable({detail})"),
        }
    }
}

impl Display for RoutingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RoutingError::MalformedDeclaration(detail) => {
                write!(f, "Declaration payload failed to decode: {detail}")
            }
            RoutingError::SinkUnavailable(detail) => {
                write!(f, "Routing sink unavailable: {detail}")
            }
        }
    }
}

impl Error for RoutingError {}
