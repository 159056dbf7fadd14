use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::RenderError;

// ============================================================================
// Enumerations
// ============================================================================

/// Container runtime a cluster provisions its nodes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Docker,
    Rkt,
}

impl Runtime {
    pub fn as_str(self) -> &'static str {
        match self {
            Runtime::Docker => "docker",
            Runtime::Rkt => "rkt",
        }
    }
}

impl FromSql for Runtime {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "docker" => Ok(Runtime::Docker),
            "rkt" => Ok(Runtime::Rkt),
            other => Err(FromSqlError::Other(
                format!("unknown runtime {:?} (expected \"docker\" or \"rkt\")", other).into(),
            )),
        }
    }
}

impl ToSql for Runtime {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

/// Etcd protocol versions this portal knows how to configure.
///
/// Clusters store the raw integer; it is validated here at assembly time so
/// an unknown version aborts instead of silently degrading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtcdVersion {
    V2,
    V3,
}

impl EtcdVersion {
    pub fn from_raw(raw: i64) -> Result<Self, RenderError> {
        match raw {
            2 => Ok(EtcdVersion::V2),
            3 => Ok(EtcdVersion::V3),
            other => Err(RenderError::UnknownEtcdVersion(other)),
        }
    }

    /// Systemd unit that runs the etcd server for this protocol version.
    pub fn unit_name(self) -> &'static str {
        match self {
            EtcdVersion::V2 => "etcd2.service",
            EtcdVersion::V3 => "etcd-member.service",
        }
    }
}

/// Relation between a node's target and active configuration versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigState {
    /// The node has confirmed booting the configuration the operator wants.
    Converged,
    /// The node still has to apply (or report) the target configuration.
    Pending,
}

impl ConfigState {
    pub fn derive(target_version: i64, active_version: i64) -> Self {
        if target_version == active_version {
            ConfigState::Converged
        } else {
            ConfigState::Pending
        }
    }
}

// ============================================================================
// Stored records
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: String,
    pub name: String,
    pub etcd_version: i64,
    pub k8s_runtime: Runtime,
    pub k8s_is_rbac_enabled: bool,
    pub assert_etcd_cluster_exists: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub cluster_id: String,
    pub name: String,
    pub ssh_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub cluster_id: String,
    pub ip: String,
    pub fqdn: String,
    pub maintenance_mode: bool,
    pub debug_boot: bool,
    pub coreos_autologin: bool,
    pub additional_kernel_cmdline: String,
    pub is_etcd_server: bool,
    pub is_k8s_schedulable: bool,
    pub is_k8s_master: bool,
    pub target_config_version: i64,
    pub active_config_version: i64,
    // Credential PEMs stay out of API responses.
    #[serde(skip_serializing, default)]
    pub cert: String,
    #[serde(skip_serializing, default)]
    pub key: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disk {
    pub disk_id: String,
    pub node_id: String,
    pub device: String,
    pub wipe_next_boot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mountpoint {
    pub mountpoint_id: String,
    pub node_id: String,
    pub what: String,
    pub where_path: String,
    pub wanted_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub address_id: String,
    pub node_id: String,
    pub interface: String,
    pub ip: String,
}

/// One report cycle, append-only. Never mutated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provision {
    pub provision_id: String,
    pub node_id: String,
    pub config_version: i64,
    pub ignition_config: String,
    pub ipxe_config: Option<String>,
    pub created_at: i64,
}

/// Everything a boot-time request needs to render configuration for one node.
#[derive(Debug, Clone)]
pub struct BootBundle {
    pub node: Node,
    pub cluster: Cluster,
    pub users: Vec<User>,
    /// All nodes of the cluster (the booting node included), insertion order.
    pub peers: Vec<Node>,
    pub mountpoints: Vec<Mountpoint>,
    pub addresses: Vec<Address>,
}

// ============================================================================
// Operator API types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClusterRequest {
    pub name: String,
    #[serde(default = "default_etcd_version")]
    pub etcd_version: i64,
    #[serde(default = "default_runtime")]
    pub k8s_runtime: Runtime,
    #[serde(default = "default_true")]
    pub k8s_is_rbac_enabled: bool,
}

fn default_etcd_version() -> i64 {
    3
}

fn default_runtime() -> Runtime {
    Runtime::Docker
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClusterResponse {
    pub cluster_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListClustersResponse {
    pub clusters: Vec<Cluster>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    #[serde(default)]
    pub ssh_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserResponse {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountpointSpec {
    pub what: String,
    pub where_path: String,
    #[serde(default = "default_wanted_by")]
    pub wanted_by: String,
}

fn default_wanted_by() -> String {
    "multi-user.target".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressSpec {
    pub interface: String,
    pub ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeRequest {
    /// Cluster name the node joins.
    pub cluster: String,
    pub fqdn: String,
    pub ip: String,
    #[serde(default)]
    pub maintenance_mode: bool,
    #[serde(default)]
    pub debug_boot: bool,
    #[serde(default)]
    pub coreos_autologin: bool,
    #[serde(default)]
    pub additional_kernel_cmdline: String,
    #[serde(default)]
    pub is_etcd_server: bool,
    #[serde(default)]
    pub is_k8s_schedulable: bool,
    #[serde(default)]
    pub is_k8s_master: bool,
    #[serde(default)]
    pub disks: Vec<String>,
    #[serde(default)]
    pub mountpoints: Vec<MountpointSpec>,
    #[serde(default)]
    pub addresses: Vec<AddressSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeResponse {
    pub node_id: String,
    pub target_config_version: i64,
}

/// Partial node edit; every present field is applied and the target
/// configuration version is bumped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateNodeRequest {
    pub fqdn: Option<String>,
    pub maintenance_mode: Option<bool>,
    pub debug_boot: Option<bool>,
    pub coreos_autologin: Option<bool>,
    pub additional_kernel_cmdline: Option<String>,
    pub is_etcd_server: Option<bool>,
    pub is_k8s_schedulable: Option<bool>,
    pub is_k8s_master: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListNodesResponse {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDetailResponse {
    pub node: Node,
    pub disks: Vec<Disk>,
    pub mountpoints: Vec<Mountpoint>,
    pub addresses: Vec<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDiskRequest {
    #[serde(default)]
    pub wipe_next_boot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReissueResponse {
    pub target_config_version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListProvisionsResponse {
    pub provisions: Vec<Provision>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
