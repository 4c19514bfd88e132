//! Per-adapter status mappers (spec §4.1.4). Domain code never branches on
//! raw external strings/enums - it only ever sees `AdapterStatus`.

use super::AdapterStatus;

/// Maps a Kubernetes-style Job's aggregate pod counts to `AdapterStatus`
/// (spec §4.1.2).
pub fn map_cluster_job_status(active: i32, succeeded: i32, failed: i32) -> AdapterStatus {
    if active > 0 {
        AdapterStatus::Active
    } else if succeeded > 0 {
        AdapterStatus::Succeeded
    } else if failed > 0 {
        AdapterStatus::Failed
    } else {
        AdapterStatus::Pending
    }
}

/// Maps an ECS-style task's `lastStatus` string to `AdapterStatus`
/// (spec §4.1.3). Unknown strings are logged and mapped to Failed.
pub fn map_cloud_task_status(last_status: Option<&str>) -> AdapterStatus {
    match last_status {
        Some("RUNNING") => AdapterStatus::Active,
        Some("PENDING") | Some("ACTIVATING") | Some("PROVISIONING") => AdapterStatus::Pending,
        Some("STOPPED") | Some("DEPROVISIONING") => AdapterStatus::Stopped,
        Some(other) => {
            tracing::warn!(status = other, "unrecognized ECS task status, mapping to Failed");
            AdapterStatus::Failed
        }
        None => AdapterStatus::Failed,
    }
}

/// Maps the pool/PaaS backend's deployment description status to
/// `AdapterStatus` (spec §4.1.1's DEPLOYING->HEALTHY/ERROR transition).
pub fn map_pool_deployment_status(status: Option<&str>) -> AdapterStatus {
    match status {
        Some("running") => AdapterStatus::Active,
        Some("finished") | Some("exited") => AdapterStatus::Succeeded,
        Some("failed") | Some("error") => AdapterStatus::Failed,
        Some(other) => {
            tracing::warn!(status = other, "unrecognized pool deployment status, mapping to Pending");
            AdapterStatus::Pending
        }
        None => AdapterStatus::Pending,
    }
}
