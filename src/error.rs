//! Errors of the flux solver.

/// Possible flux solver errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FluxError {
    /// The inputs don't have the expected shape(s)
    InconsistentInputs,
    /// No region decomposition is implemented for this many regions
    UnsupportedRegionCount(usize),
    /// A configuration value is out of its allowed range
    InvalidConfig(&'static str),
    /// An array is not contiguous when it was assumed to be
    NotContiguous,
    /// The operation was aborted early
    Cancelled,
}

impl std::fmt::Display for FluxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FluxError::InconsistentInputs => {
                write!(f, "inputs to the flux solver have the wrong shape")
            }
            FluxError::UnsupportedRegionCount(num_regions) => {
                write!(f, "{num_regions} regions are not supported (expected 2 or 3)")
            }
            FluxError::InvalidConfig(reason) => write!(f, "invalid configuration: {reason}"),
            FluxError::NotContiguous => write!(f, "array slice not contiguous in memory"),
            FluxError::Cancelled => write!(f, "operation cancelled early"),
        }
    }
}

impl std::error::Error for FluxError {}
