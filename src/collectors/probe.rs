use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

const LOOPBACK: &str = "127.0.0.1";

/// Sends one ICMP echo to the loopback address through the system `ping`.
/// Any spawn failure, non-zero exit or timeout counts as unreachable.
pub fn ping_loopback(timeout: Duration) -> bool {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            warn!(error = %err, "cannot start runtime for loopback probe");
            return false;
        }
    };
    runtime.block_on(run_ping(timeout))
}

fn ping_args() -> [&'static str; 3] {
    if cfg!(target_os = "windows") {
        ["-n", "1", LOOPBACK]
    } else {
        ["-c", "1", LOOPBACK]
    }
}

async fn run_ping(timeout: Duration) -> bool {
    let start = Instant::now();
    let mut cmd = Command::new("ping");
    cmd.args(ping_args())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match time::timeout(timeout, cmd.status()).await {
        Ok(Ok(status)) => {
            debug!(
                code = ?status.code(),
                latency_ms = start.elapsed().as_millis() as u64,
                "loopback probe finished"
            );
            status.success()
        }
        Ok(Err(err)) => {
            warn!(error = %err, "loopback probe failed to start");
            false
        }
        Err(_elapsed) => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "loopback probe timeout"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_packet_to_loopback() {
        let args = ping_args();
        assert_eq!(args[1], "1");
        assert_eq!(args[2], "127.0.0.1");
        if cfg!(target_os = "windows") {
            assert_eq!(args[0], "-n");
        } else {
            assert_eq!(args[0], "-c");
        }
    }

    #[test]
    fn zero_timeout_reports_unreachable() {
        assert!(!ping_loopback(Duration::ZERO));
    }
}
