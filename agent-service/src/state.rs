use std::fmt;

use crate::error::ServiceError;

/// Agent-level service states, translated by each handler into whatever
/// the host service manager understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Running,
    Stopped,
}

impl ServiceState {
    pub fn code(self) -> u32 {
        match self {
            ServiceState::Running => 1,
            ServiceState::Stopped => 2,
        }
    }
}

impl TryFrom<u32> for ServiceState {
    type Error = ServiceError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(ServiceState::Running),
            2 => Ok(ServiceState::Stopped),
            other => Err(ServiceError::UnknownState(other)),
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Running => f.write_str("running"),
            ServiceState::Stopped => f.write_str("stopped"),
        }
    }
}
