use std::fmt;

use super::core::TaskManager;

const NAME_WIDTH: usize = 32;
const COL_WIDTH: usize = 10;
const RULE: &str = "-------------------------------------------------------------------------";

impl fmt::Display for TaskManager {
    /// Table of active, pending and deferred tasks with their timings.
    ///
    /// Removed-but-unreaped tasks are prefixed `(R)`, pending ones `(P)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state();
        writeln!(f, "Task manager is handling:")?;
        writeln!(
            f,
            "{:<NAME_WIDTH$}{:>COL_WIDTH$}{:>COL_WIDTH$}{:>COL_WIDTH$}{:>COL_WIDTH$}",
            "active", "dt(ms)", "avg", "max", "sort"
        )?;
        writeln!(f, "{RULE}")?;

        let (mut total_dt, mut total_avg) = (0.0, 0.0);
        for bucket in st.buckets.iter() {
            for task in bucket.iter() {
                let stats = task.stats();
                total_dt += stats.dt;
                total_avg += stats.avg_dt;
                let name = if task.is_removed() {
                    format!("(R){}", task.name())
                } else {
                    task.name().to_string()
                };
                writeln!(
                    f,
                    "{:<NAME_WIDTH$}{:>COL_WIDTH$.2}{:>COL_WIDTH$.2}{:>COL_WIDTH$.2}{:>COL_WIDTH$}",
                    name,
                    stats.dt * 1000.0,
                    stats.avg_dt * 1000.0,
                    stats.max_dt * 1000.0,
                    bucket.sort()
                )?;
            }
        }

        writeln!(f, "{RULE}")?;
        writeln!(f, "pending")?;
        writeln!(f, "{RULE}")?;
        let staged = st.staged.iter().flat_map(|b| b.iter());
        for task in staged.chain(st.pending.values().flatten()) {
            let prefix = if task.is_removed() { "(PR)" } else { "(P)" };
            writeln!(
                f,
                "  {:<width$}{:>COL_WIDTH$}",
                format!("{prefix}{}", task.name()),
                task.sort(),
                width = NAME_WIDTH - 2
            )?;
        }

        writeln!(f, "{RULE}")?;
        writeln!(
            f,
            "{:<NAME_WIDTH$}{:>COL_WIDTH$.2}{:>COL_WIDTH$.2}",
            "total",
            total_dt * 1000.0,
            total_avg * 1000.0
        )?;
        writeln!(f, "{RULE}")?;
        writeln!(f, "{:<NAME_WIDTH$}{:>COL_WIDTH$}", "deferred", "wait(s)")?;
        writeln!(f, "{RULE}")?;

        let mut deferred: Vec<_> = st.deferred.tasks().collect();
        deferred.sort_by(|a, b| {
            let (a_wake, b_wake) = (a.wake_time().unwrap_or(f64::MAX), b.wake_time().unwrap_or(f64::MAX));
            a_wake.total_cmp(&b_wake)
        });
        for task in deferred {
            let remaining = task.wake_time().unwrap_or(st.current_time) - st.current_time;
            writeln!(
                f,
                "  {:<width$}{:>COL_WIDTH$.2}",
                task.name(),
                remaining,
                width = NAME_WIDTH - 2
            )?;
        }
        writeln!(f, "{RULE}")?;
        write!(f, "End of task manager info")
    }
}

impl TaskManager {
    /// The [`Display`](fmt::Display) table as a string.
    pub fn report(&self) -> String {
        self.to_string()
    }
}
