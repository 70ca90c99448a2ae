use std::time::{Duration, Instant};

/// Measures one synchronous pass of work (e.g. writing a cache to disk) against a soft time budget.
///
/// Exceeding the budget is never an error; callers just use [`WorkTimer::over_budget`] to decide whether to complain.
pub struct WorkTimer {
    start: Instant,
    budget: Duration,
    items_completed: u32,
}

impl WorkTimer {
    pub fn start(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
            items_completed: 0,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn items_completed(&self) -> u32 {
        self.items_completed
    }

    pub fn complete_items(&mut self, n: u32) {
        self.items_completed += n;
    }

    /// Returns the elapsed time if it exceeds the budget.
    pub fn over_budget(&self) -> Option<Duration> {
        let elapsed = self.elapsed();
        (elapsed > self.budget).then(|| elapsed)
    }

    pub fn average_item_time_us(&self) -> u32 {
        let elapsed_us: u32 = self.elapsed().as_micros().try_into().unwrap_or(u32::MAX);

        elapsed_us / self.items_completed.max(1)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
