pub mod backfill;
pub mod backtest;
pub mod orchestrator;

/// What a top-level command reports back to the process boundary. `partial`
/// maps to exit code 2: the stage finished but some rows carry risk flags or
/// inputs were missing.
#[derive(Debug, Default)]
pub struct RunReport {
    pub partial: bool,
}

impl RunReport {
    pub fn absorb(&mut self, partial: bool) {
        self.partial = self.partial || partial;
    }
}
