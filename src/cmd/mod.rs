//! Command-line entry points.

use clap::Args;

use crate::{config::Config, prelude::*};

pub mod crop;
pub mod extract;
pub mod ocr_crops;
pub mod parse;
pub mod repair;
pub mod schema;

/// Options for loading our config file.
#[derive(Debug, Clone, Args)]
pub struct ConfigOpts {
    /// A TOML or JSON config file. Anything not specified uses the defaults.
    #[clap(long)]
    pub config: Option<PathBuf>,
}

impl ConfigOpts {
    /// Load our config.
    pub async fn load(&self) -> Result<Config> {
        Config::load(self.config.as_deref()).await
    }
}

/// Options for commands which run a worker pool.
#[derive(Debug, Clone, Args)]
pub struct PoolOpts {
    /// Number of workers to run at once. Defaults to the number of CPUs.
    #[clap(short = 'j', long = "jobs")]
    job_count: Option<usize>,
}

impl PoolOpts {
    /// How many workers should we run?
    pub fn worker_count(&self) -> usize {
        self.job_count.unwrap_or_else(num_cpus::get).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_is_never_zero() {
        assert_eq!(PoolOpts { job_count: Some(0) }.worker_count(), 1);
        assert_eq!(PoolOpts { job_count: Some(3) }.worker_count(), 3);
        assert!(PoolOpts { job_count: None }.worker_count() >= 1);
    }
}
