use std::fmt;

/// How an incoming event relates to the effective event for its stream.
///
/// | prior event | value   | descriptor | type            |
/// |-------------|---------|------------|-----------------|
/// | none        |         |            | `Original`      |
/// | yes         | same    | same       | `Identical`     |
/// | yes         | differs | same       | `Corrective`    |
/// | yes         | same    | differs    | `Contextual`    |
/// | yes         | differs | differs    | `Comprehensive` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventConflictType {
    Original,
    Identical,
    Corrective,
    Contextual,
    Comprehensive,
}

impl EventConflictType {
    /// Classify a conflict against an existing effective event.
    pub fn classify(measurement_equal: bool, descriptor_equal: bool) -> Self {
        match (measurement_equal, descriptor_equal) {
            (true, true) => EventConflictType::Identical,
            (false, true) => EventConflictType::Corrective,
            (true, false) => EventConflictType::Contextual,
            (false, false) => EventConflictType::Comprehensive,
        }
    }

    /// The prior value has to be cancelled before the incoming one counts.
    pub fn requires_deduction(self) -> bool {
        matches!(
            self,
            EventConflictType::Corrective
                | EventConflictType::Contextual
                | EventConflictType::Comprehensive
        )
    }

    pub fn saves_incoming_event(self) -> bool {
        !matches!(self, EventConflictType::Identical)
    }
}

impl fmt::Display for EventConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventConflictType::Original => write!(f, "original"),
            EventConflictType::Identical => write!(f, "identical"),
            EventConflictType::Corrective => write!(f, "corrective"),
            EventConflictType::Contextual => write!(f, "contextual"),
            EventConflictType::Comprehensive => write!(f, "comprehensive"),
        }
    }
}
