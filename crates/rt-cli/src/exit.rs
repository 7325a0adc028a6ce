//! Process exit codes (§6). One variant per listed failure class, in the
//! order the spec enumerates them, so the numeric value is stable across
//! builds rather than an implementation detail of match-arm order.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    PreinitFailure = 1,
    TooManyArgs = 2,
    MissingParameter = 3,
    RedundantAction = 4,
    SubsystemInitFailure = 5,
    PersonaLoadFailure = 6,
    WasmLoadFailure = 7,
    AppInitFailure = 8,
    AppShutdownFailure = 9,
    ExtensionFailure = 10,
    InvalidPath = 11,
    Unknown = 12,
}

impl ExitCode {
    #[must_use]
    pub const fn code(self) -> i32 {
        self as u8 as i32
    }
}

impl From<&rt_orchestrator::Error> for ExitCode {
    fn from(e: &rt_orchestrator::Error) -> Self {
        match e {
            rt_orchestrator::Error::Resolve(_) => Self::PersonaLoadFailure,
            rt_orchestrator::Error::Interp(_) => Self::WasmLoadFailure,
            rt_orchestrator::Error::Host(_) | rt_orchestrator::Error::Cache(_) | rt_orchestrator::Error::Config(_) => {
                Self::SubsystemInitFailure
            }
            rt_orchestrator::Error::AppInitFailed(_) => Self::AppInitFailure,
            rt_orchestrator::Error::AppShutdownFailed(_) => Self::AppShutdownFailure,
            rt_orchestrator::Error::NoFallbackAvailable => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_zero() {
        assert_eq!(ExitCode::Success.code(), 0);
    }

    #[test]
    fn codes_are_stable_and_distinct() {
        let all = [
            ExitCode::Success,
            ExitCode::PreinitFailure,
            ExitCode::TooManyArgs,
            ExitCode::MissingParameter,
            ExitCode::RedundantAction,
            ExitCode::SubsystemInitFailure,
            ExitCode::PersonaLoadFailure,
            ExitCode::WasmLoadFailure,
            ExitCode::AppInitFailure,
            ExitCode::AppShutdownFailure,
            ExitCode::ExtensionFailure,
            ExitCode::InvalidPath,
            ExitCode::Unknown,
        ];
        for (i, code) in all.iter().enumerate() {
            assert_eq!(code.code(), i as i32);
        }
    }
}
