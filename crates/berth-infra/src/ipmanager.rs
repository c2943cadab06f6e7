//! Static IP manager.
//!
//! Adds and removes a secondary address on a local network interface
//! via the `ip` tool. Both directions are idempotent: "already exists"
//! on add and "cannot assign" on delete are swallowed, so a crashed
//! mount can safely re-run the assignment.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use berth_core::{CoreError, CoreResult};

/// Runs an external command, returning (success, combined stderr).
/// The driver tests inject a scripted runner so they never touch a
/// real interface.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str]) -> CoreResult<(bool, String)>;
}

/// Runner backed by `tokio::process`.
pub struct SysCommandRunner;

#[async_trait]
impl CommandRunner for SysCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> CoreResult<(bool, String)> {
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| CoreError::Internal(format!("exec {program}: {e}")))?;
        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

/// Idempotent secondary-IP assignment on a named interface.
pub struct IpManager {
    runner: Arc<dyn CommandRunner>,
}

impl IpManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Manager backed by the real `ip` tool.
    pub fn system() -> Self {
        Self::new(Arc::new(SysCommandRunner))
    }

    /// Add `ip/cidr_bits` as a secondary address on `ifname`.
    pub async fn assign(&self, ip: &str, cidr_bits: u32, ifname: &str) -> CoreResult<()> {
        let addr = format!("{ip}/{cidr_bits}");
        let (ok, stderr) = self
            .runner
            .run("ip", &["addr", "add", &addr, "dev", ifname])
            .await?;
        if ok || stderr.contains("File exists") {
            debug!(%addr, %ifname, "static ip assigned");
            return Ok(());
        }
        Err(CoreError::Internal(format!(
            "ip addr add {addr} dev {ifname}: {}",
            stderr.trim()
        )))
    }

    /// Remove `ip/cidr_bits` from `ifname`.
    pub async fn unassign(&self, ip: &str, cidr_bits: u32, ifname: &str) -> CoreResult<()> {
        let addr = format!("{ip}/{cidr_bits}");
        let (ok, stderr) = self
            .runner
            .run("ip", &["addr", "del", &addr, "dev", ifname])
            .await?;
        if ok || stderr.contains("Cannot assign") {
            debug!(%addr, %ifname, "static ip unassigned");
            return Ok(());
        }
        Err(CoreError::Internal(format!(
            "ip addr del {addr} dev {ifname}: {}",
            stderr.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted runner: pops canned (success, stderr) results and
    /// records the invocations.
    struct FakeRunner {
        results: Mutex<Vec<(bool, String)>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn new(results: Vec<(bool, &str)>) -> Self {
            Self {
                results: Mutex::new(
                    results
                        .into_iter()
                        .rev()
                        .map(|(ok, s)| (ok, s.to_string()))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, program: &str, args: &[&str]) -> CoreResult<(bool, String)> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{program} {}", args.join(" ")));
            Ok(self.results.lock().unwrap().pop().unwrap())
        }
    }

    #[tokio::test]
    async fn assign_builds_the_expected_command() {
        let runner = Arc::new(FakeRunner::new(vec![(true, "")]));
        let mgr = IpManager::new(runner.clone());
        mgr.assign("10.0.0.9", 24, "eth0").await.unwrap();
        assert_eq!(
            runner.calls.lock().unwrap().as_slice(),
            ["ip addr add 10.0.0.9/24 dev eth0"]
        );
    }

    #[tokio::test]
    async fn assign_swallows_already_exists() {
        let mgr = IpManager::new(Arc::new(FakeRunner::new(vec![(
            false,
            "RTNETLINK answers: File exists",
        )])));
        mgr.assign("10.0.0.9", 24, "eth0").await.unwrap();
    }

    #[tokio::test]
    async fn unassign_swallows_not_present() {
        let mgr = IpManager::new(Arc::new(FakeRunner::new(vec![(
            false,
            "RTNETLINK answers: Cannot assign requested address",
        )])));
        mgr.unassign("10.0.0.9", 24, "eth0").await.unwrap();
    }

    #[tokio::test]
    async fn other_failures_surface() {
        let mgr = IpManager::new(Arc::new(FakeRunner::new(vec![(
            false,
            "Operation not permitted",
        )])));
        let err = mgr.assign("10.0.0.9", 24, "eth0").await.unwrap_err();
        assert!(matches!(err, CoreError::Internal(_)));
    }
}
