use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// How batches of acknowledgements are ordered relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcknowledgementOrdering {
    /// Batches are committed concurrently, with no ordering between them.
    Parallel,
    /// Batches are committed one after the other, in submission order.
    Ordered,
    /// Batches are committed in submission order within each message group,
    /// and concurrently across groups.
    OrderedByGroup,
}

impl AcknowledgementOrdering {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcknowledgementOrdering::Parallel => "parallel",
            AcknowledgementOrdering::Ordered => "ordered",
            AcknowledgementOrdering::OrderedByGroup => "ordered_by_group",
        }
    }
}

impl fmt::Display for AcknowledgementOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcknowledgementOrdering {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parallel" => Ok(AcknowledgementOrdering::Parallel),
            "ordered" => Ok(AcknowledgementOrdering::Ordered),
            "ordered_by_group" => Ok(AcknowledgementOrdering::OrderedByGroup),
            _ => Err(ConfigError::InvalidOrdering(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ordering() {
        assert_eq!(
            "parallel".parse::<AcknowledgementOrdering>(),
            Ok(AcknowledgementOrdering::Parallel)
        );
        assert_eq!(
            "ORDERED".parse::<AcknowledgementOrdering>(),
            Ok(AcknowledgementOrdering::Ordered)
        );
        assert_eq!(
            "ordered_by_group".parse::<AcknowledgementOrdering>(),
            Ok(AcknowledgementOrdering::OrderedByGroup)
        );
        assert_eq!(
            "fifo".parse::<AcknowledgementOrdering>(),
            Err(ConfigError::InvalidOrdering("fifo".to_owned()))
        );
    }
}
