use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use tokio::sync::Semaphore;

/// How long a request waits for an admission slot before it is rejected.
///
/// Fixed rather than derived from `--fetch-timeout`: the two limits guard
/// different resources and are tuned independently.
pub const ADMISSION_WAIT: Duration = Duration::from_secs(1);

/// How long a request body may stall before the request is rejected.
pub const REQUEST_BODY_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on the graceful drain once a shutdown signal arrives.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runtime configuration for the `multiplex-server` binary.
///
/// These settings control the two concurrency ceilings of the service: how
/// many batches may be processed at once, and how many outbound fetches a
/// single batch may have in flight. All values are parsed from CLI arguments
/// or environment variables and are fixed for the lifetime of the process.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "multiplex-server",
    version,
    about = "An HTTP service that fetches batches of URLs concurrently"
)]
pub struct CliArgs {
    /// Maximum number of batches processed concurrently across all clients.
    ///
    /// Requests beyond this limit wait up to one second for a free slot and
    /// are then rejected with `429 Too Many Requests`.
    ///
    /// Environment variable: `MAX_BATCHES`
    #[arg(long, env = "MAX_BATCHES", default_value_t = 100)]
    pub max_batches: usize,

    /// Maximum number of simultaneous outbound fetches for each batch.
    ///
    /// Environment variable: `MAX_WORKERS`
    #[arg(long, env = "MAX_WORKERS", default_value_t = 4)]
    pub max_workers: usize,

    /// Maximum number of URLs accepted in a single batch.
    ///
    /// Larger batches are rejected with `400 Bad Request` before any fetch
    /// starts.
    ///
    /// Environment variable: `MAX_TASKS`
    #[arg(long, env = "MAX_TASKS", default_value_t = 20)]
    pub max_tasks: usize,

    /// Deadline, in seconds, for each outbound fetch.
    ///
    /// Environment variable: `FETCH_TIMEOUT`
    #[arg(long, env = "FETCH_TIMEOUT", default_value_t = 1)]
    pub fetch_timeout: u64,

    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:9000" or "/tmp/multiplex.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:9000"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_batches: usize,
    pub max_workers: usize,
    pub max_tasks: usize,
    pub fetch_timeout: Duration,
    pub admission_wait: Duration,
    pub body_timeout: Duration,
    pub shutdown_grace: Duration,
    pub server_addr: String,
    pub uds: bool,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_batches == 0 {
            bail!("MAX_BATCHES must be greater than 0");
        }

        if args.max_batches > Semaphore::MAX_PERMITS {
            bail!(
                "MAX_BATCHES must not exceed {} (got {})",
                Semaphore::MAX_PERMITS,
                args.max_batches
            );
        }

        if args.max_workers == 0 {
            bail!("MAX_WORKERS must be greater than 0");
        }

        if args.fetch_timeout == 0 {
            bail!("FETCH_TIMEOUT must be greater than 0");
        }

        Ok(Self {
            max_batches: args.max_batches,
            max_workers: args.max_workers,
            max_tasks: args.max_tasks,
            fetch_timeout: Duration::from_secs(args.fetch_timeout),
            admission_wait: ADMISSION_WAIT,
            body_timeout: REQUEST_BODY_TIMEOUT,
            shutdown_grace: SHUTDOWN_GRACE,
            server_addr: args.server_addr,
            uds: args.uds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let argv = core::iter::once("multiplex-server").chain(args.iter().copied());
        ServerConfig::try_from(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.max_batches, 100);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.max_tasks, 20);
        assert_eq!(config.fetch_timeout, Duration::from_secs(1));
        assert_eq!(config.admission_wait, ADMISSION_WAIT);
        assert_eq!(config.body_timeout, REQUEST_BODY_TIMEOUT);
        assert_eq!(config.shutdown_grace, SHUTDOWN_GRACE);
        assert_eq!(config.server_addr, "0.0.0.0:9000");
        assert!(!config.uds);
    }

    #[test]
    fn admission_wait_does_not_follow_fetch_timeout() {
        let config = parse(&["--fetch-timeout", "30"]).unwrap();
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.admission_wait, Duration::from_secs(1));
    }

    #[test]
    fn rejects_zero_limits() {
        assert!(parse(&["--max-batches", "0"]).is_err());
        assert!(parse(&["--max-workers", "0"]).is_err());
        assert!(parse(&["--fetch-timeout", "0"]).is_err());
    }

    #[test]
    fn rejects_gate_larger_than_semaphore_allows() {
        let too_many = (Semaphore::MAX_PERMITS + 1).to_string();
        let err = parse(&["--max-batches", &too_many]).unwrap_err();
        assert!(err.to_string().contains("MAX_BATCHES"), "{err}");

        let max = Semaphore::MAX_PERMITS.to_string();
        assert!(parse(&["--max-batches", &max]).is_ok());
    }

    #[test]
    fn allows_zero_task_ceiling() {
        let config = parse(&["--max-tasks", "0"]).unwrap();
        assert_eq!(config.max_tasks, 0);
    }
}
