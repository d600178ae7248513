// ABOUTME: Diagnostics accumulator for non-fatal warnings during a tick.
// ABOUTME: Collects problems that don't fail the tick but should be summarised at its end.

/// Collects non-fatal warnings during one iteration of the control loop.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Log a one-line summary if anything was collected.
    pub fn summarise(&self) {
        if self.has_warnings() {
            tracing::warn!(count = self.warnings.len(), "Tick finished with warnings");
        }
    }
}

/// A non-fatal warning collected during a tick.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    /// The branch tip could not be read; the tick is skipped.
    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::SourceUnavailable,
            message: message.into(),
        }
    }

    /// A successful deploy could not be persisted.
    pub fn state_write(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::StateWrite,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Change detection failed (network, auth, missing branch).
    SourceUnavailable,
    /// State file write failed; a restart would redeploy the same commit.
    StateWrite,
}
