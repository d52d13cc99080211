//! Application deployment: spawn a command inside a subnet's namespace,
//! detach, and record it. The control plane does not supervise beyond the
//! spawn; VPC deletion sends a best-effort SIGKILL to the recorded group.

use std::process::Stdio;

use tracing::info;

use crate::error::{Result, VpcError};
use crate::store::VpcStore;
use crate::types::AppRecord;

pub async fn deploy(
    store: &VpcStore,
    vpc: &str,
    subnet: &str,
    app: &str,
    cmd: &str,
) -> Result<AppRecord> {
    crate::name::validate(vpc)?;
    crate::name::validate(subnet)?;
    let mut record = store
        .get(vpc)
        .await?
        .ok_or_else(|| VpcError::VpcNotFound(vpc.to_string()))?;
    let entry = record
        .subnets
        .get_mut(subnet)
        .ok_or_else(|| VpcError::SubnetNotFound(subnet.to_string()))?;

    let mut command = tokio::process::Command::new("ip");
    command
        .args(["netns", "exec", &entry.netns, "sh", "-c", cmd])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0);
    let child = command
        .spawn()
        .map_err(|e| VpcError::Spawn(format!("{cmd}: {e}")))?;
    let pid = child.id();
    // Detached: the child owns its process group and outlives this process.
    drop(child);

    let deployed = AppRecord { name: app.to_string(), cmd: cmd.to_string(), pid };
    match entry.apps.iter_mut().find(|a| a.name == app) {
        Some(slot) => *slot = deployed.clone(),
        None => entry.apps.push(deployed.clone()),
    }
    store.put(&record).await?;

    info!(vpc, subnet, app, pid, "application deployed");
    Ok(deployed)
}

/// SIGKILL the process group of a recorded pid. The pid may be stale; any
/// failure is ignored.
pub(crate) fn kill_process_group(pid: u32) {
    if let Ok(pid) = i32::try_from(pid) {
        let pgid = nix::unistd::Pid::from_raw(pid);
        let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL);
    }
}
