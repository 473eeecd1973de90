#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// The benchmark comparison found regressions or novel errors.
    ComparisonFailed = 11,

    /// Invalid CLI/workload/config input (bad flags, unknown connection
    /// types, unknown comparison targets, malformed workload files).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, target failures, worker failures).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}
