//! Boot configuration rendering: template resolution, Ignition assembly,
//! iPXE scripts.

pub mod ignition;
pub mod ipxe;
pub mod templates;

pub use templates::{FixedContext, RoleClass, TemplateRegistry};

use serde::{Deserialize, Serialize};

use crate::types::{BootBundle, Runtime};

/// Node fields exposed to templates and assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeView {
    pub fqdn: String,
    pub ip: String,
    pub maintenance_mode: bool,
    pub debug_boot: bool,
    pub coreos_autologin: bool,
    pub additional_kernel_cmdline: String,
    pub is_etcd_server: bool,
    pub is_k8s_schedulable: bool,
    pub is_k8s_master: bool,
    pub target_config_version: i64,
    pub active_config_version: i64,
    pub mountpoints: Vec<MountpointView>,
    pub addresses: Vec<AddressView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountpointView {
    pub what: String,
    pub where_path: String,
    pub wanted_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressView {
    pub interface: String,
    pub ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub name: String,
    pub ssh_key: String,
}

/// Cluster member as seen from templates (`cluster.nodes`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerView {
    pub fqdn: String,
    pub ip: String,
    pub is_etcd_server: bool,
}

/// Cluster fields exposed to templates and assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterView {
    pub name: String,
    pub etcd_version: i64,
    pub k8s_runtime: Runtime,
    pub k8s_is_rbac_enabled: bool,
    pub assert_etcd_cluster_exists: bool,
    /// Cluster users in list order; SSH keys are collected from here.
    pub users: Vec<UserView>,
    /// Every node of the cluster in insertion order.
    pub nodes: Vec<PeerView>,
}

/// Immutable render input for one node: everything assembly and templates
/// may look at. Built from a [`BootBundle`] read from storage.
#[derive(Debug, Clone)]
pub struct BootContext {
    pub node: NodeView,
    pub cluster: ClusterView,
}

impl BootContext {
    pub fn from_bundle(bundle: &BootBundle) -> Self {
        let node = NodeView {
            fqdn: bundle.node.fqdn.clone(),
            ip: bundle.node.ip.clone(),
            maintenance_mode: bundle.node.maintenance_mode,
            debug_boot: bundle.node.debug_boot,
            coreos_autologin: bundle.node.coreos_autologin,
            additional_kernel_cmdline: bundle.node.additional_kernel_cmdline.clone(),
            is_etcd_server: bundle.node.is_etcd_server,
            is_k8s_schedulable: bundle.node.is_k8s_schedulable,
            is_k8s_master: bundle.node.is_k8s_master,
            target_config_version: bundle.node.target_config_version,
            active_config_version: bundle.node.active_config_version,
            mountpoints: bundle
                .mountpoints
                .iter()
                .map(|m| MountpointView {
                    what: m.what.clone(),
                    where_path: m.where_path.clone(),
                    wanted_by: m.wanted_by.clone(),
                })
                .collect(),
            addresses: bundle
                .addresses
                .iter()
                .map(|a| AddressView {
                    interface: a.interface.clone(),
                    ip: a.ip.clone(),
                })
                .collect(),
        };

        let cluster = ClusterView {
            name: bundle.cluster.name.clone(),
            etcd_version: bundle.cluster.etcd_version,
            k8s_runtime: bundle.cluster.k8s_runtime,
            k8s_is_rbac_enabled: bundle.cluster.k8s_is_rbac_enabled,
            assert_etcd_cluster_exists: bundle.cluster.assert_etcd_cluster_exists,
            users: bundle
                .users
                .iter()
                .map(|u| UserView {
                    name: u.name.clone(),
                    ssh_key: u.ssh_key.clone(),
                })
                .collect(),
            nodes: bundle
                .peers
                .iter()
                .map(|n| PeerView {
                    fqdn: n.fqdn.clone(),
                    ip: n.ip.clone(),
                    is_etcd_server: n.is_etcd_server,
                })
                .collect(),
        };

        BootContext { node, cluster }
    }

    /// Template search chain the node renders with.
    pub fn role_class(&self) -> RoleClass {
        if self.node.is_etcd_server {
            RoleClass::Etcd
        } else {
            RoleClass::Kubernetes
        }
    }
}

#[cfg(test)]
impl BootContext {
    /// Hand-built context for renderer tests; one node, two users (one
    /// without an SSH key), one peer.
    pub fn for_tests(
        runtime: Runtime,
        etcd_version: i64,
        with_ssh_users: bool,
        is_etcd_server: bool,
    ) -> Self {
        let users = if with_ssh_users {
            vec![
                UserView {
                    name: "alice".to_string(),
                    ssh_key: "ssh-ed25519 AAAAC3Alice alice".to_string(),
                },
                UserView {
                    name: "bob".to_string(),
                    ssh_key: String::new(),
                },
                UserView {
                    name: "carol".to_string(),
                    ssh_key: "ssh-ed25519 AAAAC3Carol carol".to_string(),
                },
            ]
        } else {
            vec![UserView {
                name: "bob".to_string(),
                ssh_key: String::new(),
            }]
        };

        BootContext {
            node: NodeView {
                fqdn: "node1.example.com".to_string(),
                ip: "10.0.0.1".to_string(),
                maintenance_mode: false,
                debug_boot: false,
                coreos_autologin: false,
                additional_kernel_cmdline: String::new(),
                is_etcd_server,
                is_k8s_schedulable: true,
                is_k8s_master: false,
                target_config_version: 1,
                active_config_version: 0,
                mountpoints: Vec::new(),
                addresses: Vec::new(),
            },
            cluster: ClusterView {
                name: "test".to_string(),
                etcd_version,
                k8s_runtime: runtime,
                k8s_is_rbac_enabled: true,
                assert_etcd_cluster_exists: false,
                users,
                nodes: vec![
                    PeerView {
                        fqdn: "node1.example.com".to_string(),
                        ip: "10.0.0.1".to_string(),
                        is_etcd_server,
                    },
                    PeerView {
                        fqdn: "node2.example.com".to_string(),
                        ip: "10.0.0.2".to_string(),
                        is_etcd_server: false,
                    },
                ],
            },
        }
    }
}
