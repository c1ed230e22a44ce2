//! Generated wire types for axon's remoting layer, plus a few hand-written
//! ergonomics for `actor.PID` which is used pervasively as a map key.

use std::fmt;
use std::hash::{Hash, Hasher};

pub mod actor {
    include!(concat!(env!("OUT_DIR"), "/actor.rs"));
}

pub mod remote {
    include!(concat!(env!("OUT_DIR"), "/remote.rs"));
}

pub use actor::Pid;

impl Pid {
    pub fn new(address: impl Into<String>, id: impl Into<String>) -> Pid {
        Pid {
            address: address.into(),
            id: id.into(),
        }
    }
}

impl Eq for Pid {}

impl Hash for Pid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.id)
    }
}
