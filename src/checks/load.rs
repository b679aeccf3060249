//! System load relative to the number of CPUs

use async_trait::async_trait;
use sysinfo::{CpuRefreshKind, RefreshKind, System};

use super::{Check, CheckError};
use crate::measurement::Reading;

/// One-minute load average as an integer percentage of all logical CPUs
///
/// A fully busy machine reports 100 regardless of its CPU count.
#[derive(Debug)]
pub struct LoadAverage {
    cpus: usize,
}

impl LoadAverage {
    pub fn new() -> Self {
        let sys =
            System::new_with_specifics(RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing()));
        Self::with_cpus(sys.cpus().len())
    }

    pub fn with_cpus(cpus: usize) -> Self {
        Self { cpus: cpus.max(1) }
    }

    fn percentage(&self, one_minute: f64) -> Result<i64, CheckError> {
        if !one_minute.is_finite() || one_minute < 0.0 {
            return Err(CheckError::UnexpectedValue {
                what: "load average",
                value: one_minute.to_string(),
            });
        }
        Ok((one_minute * 100.0 / self.cpus as f64).round() as i64)
    }
}

impl Default for LoadAverage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Check for LoadAverage {
    fn name(&self) -> &str {
        "loadavg"
    }

    async fn execute(&mut self) -> Result<Vec<Reading>, CheckError> {
        let load = System::load_average();
        Ok(vec![Reading::new(self.percentage(load.one)?)])
    }
}
