use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::pki::CertPair;
use crate::types::{
    Address, BootBundle, CreateNodeRequest, Disk, Mountpoint, Node, UpdateNodeRequest,
};

use super::{clusters, unix_now};

const NODE_COLUMNS: &str = "node_id, cluster_id, ip, fqdn, maintenance_mode, debug_boot, \
     coreos_autologin, additional_kernel_cmdline, is_etcd_server, is_k8s_schedulable, \
     is_k8s_master, target_config_version, active_config_version, cert, key, created_at";

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        node_id: row.get(0)?,
        cluster_id: row.get(1)?,
        ip: row.get(2)?,
        fqdn: row.get(3)?,
        maintenance_mode: row.get(4)?,
        debug_boot: row.get(5)?,
        coreos_autologin: row.get(6)?,
        additional_kernel_cmdline: row.get(7)?,
        is_etcd_server: row.get(8)?,
        is_k8s_schedulable: row.get(9)?,
        is_k8s_master: row.get(10)?,
        target_config_version: row.get(11)?,
        active_config_version: row.get(12)?,
        cert: row.get(13)?,
        key: row.get(14)?,
        created_at: row.get(15)?,
    })
}

/// Create a node with its owned disks, mountpoints and addresses in one
/// transaction. Credentials are issued by the caller before insertion.
pub fn create_node(
    conn: &mut Connection,
    cluster_id: &str,
    req: &CreateNodeRequest,
    creds: &CertPair,
) -> Result<String> {
    let node_id = Uuid::new_v4().to_string();
    let tx = conn.transaction().context("Failed to open transaction")?;

    tx.execute(
        "INSERT INTO nodes (node_id, cluster_id, ip, fqdn, maintenance_mode, debug_boot, \
         coreos_autologin, additional_kernel_cmdline, is_etcd_server, is_k8s_schedulable, \
         is_k8s_master, target_config_version, active_config_version, cert, key, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1, 0, ?12, ?13, ?14)",
        rusqlite::params![
            node_id,
            cluster_id,
            req.ip,
            req.fqdn,
            req.maintenance_mode,
            req.debug_boot,
            req.coreos_autologin,
            req.additional_kernel_cmdline,
            req.is_etcd_server,
            req.is_k8s_schedulable,
            req.is_k8s_master,
            creds.cert,
            creds.key,
            unix_now()
        ],
    )
    .context("Failed to insert node")?;

    for device in &req.disks {
        tx.execute(
            "INSERT INTO disks (disk_id, node_id, device, wipe_next_boot) VALUES (?1, ?2, ?3, 0)",
            rusqlite::params![Uuid::new_v4().to_string(), node_id, device],
        )
        .context("Failed to insert disk")?;
    }

    for mountpoint in &req.mountpoints {
        tx.execute(
            "INSERT INTO mountpoints (mountpoint_id, node_id, what, where_path, wanted_by) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                node_id,
                mountpoint.what,
                mountpoint.where_path,
                mountpoint.wanted_by
            ],
        )
        .context("Failed to insert mountpoint")?;
    }

    for address in &req.addresses {
        tx.execute(
            "INSERT INTO addresses (address_id, node_id, interface, ip) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![Uuid::new_v4().to_string(), node_id, address.interface, address.ip],
        )
        .context("Failed to insert address")?;
    }

    tx.commit().context("Failed to commit node creation")?;
    Ok(node_id)
}

pub fn get_node_by_ip(conn: &Connection, ip: &str) -> Result<Option<Node>> {
    conn.query_row(
        &format!("SELECT {} FROM nodes WHERE ip = ?1", NODE_COLUMNS),
        rusqlite::params![ip],
        node_from_row,
    )
    .optional()
    .context("Failed to query node")
}

pub fn get_node_by_fqdn(conn: &Connection, fqdn: &str) -> Result<Option<Node>> {
    conn.query_row(
        &format!("SELECT {} FROM nodes WHERE fqdn = ?1", NODE_COLUMNS),
        rusqlite::params![fqdn],
        node_from_row,
    )
    .optional()
    .context("Failed to query node")
}

pub fn list_nodes(conn: &Connection) -> Result<Vec<Node>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {} FROM nodes ORDER BY rowid", NODE_COLUMNS))
        .context("Failed to prepare statement")?;

    let nodes = stmt
        .query_map([], node_from_row)
        .context("Failed to query nodes")?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to collect nodes")?;

    Ok(nodes)
}

fn cluster_nodes(conn: &Connection, cluster_id: &str) -> Result<Vec<Node>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM nodes WHERE cluster_id = ?1 ORDER BY rowid",
            NODE_COLUMNS
        ))
        .context("Failed to prepare statement")?;

    let nodes = stmt
        .query_map(rusqlite::params![cluster_id], node_from_row)
        .context("Failed to query cluster nodes")?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to collect cluster nodes")?;

    Ok(nodes)
}

/// Apply a partial edit and bump the target configuration version.
pub fn update_node(conn: &Connection, fqdn: &str, req: &UpdateNodeRequest) -> Result<Option<Node>> {
    let Some(node) = get_node_by_fqdn(conn, fqdn)? else {
        return Ok(None);
    };

    let new_fqdn = req.fqdn.clone().unwrap_or(node.fqdn);
    let maintenance_mode = req.maintenance_mode.unwrap_or(node.maintenance_mode);
    let debug_boot = req.debug_boot.unwrap_or(node.debug_boot);
    let coreos_autologin = req.coreos_autologin.unwrap_or(node.coreos_autologin);
    let additional_kernel_cmdline = req
        .additional_kernel_cmdline
        .clone()
        .unwrap_or(node.additional_kernel_cmdline);
    let is_etcd_server = req.is_etcd_server.unwrap_or(node.is_etcd_server);
    let is_k8s_schedulable = req.is_k8s_schedulable.unwrap_or(node.is_k8s_schedulable);
    let is_k8s_master = req.is_k8s_master.unwrap_or(node.is_k8s_master);

    conn.execute(
        "UPDATE nodes SET fqdn = ?1, maintenance_mode = ?2, debug_boot = ?3, \
         coreos_autologin = ?4, additional_kernel_cmdline = ?5, is_etcd_server = ?6, \
         is_k8s_schedulable = ?7, is_k8s_master = ?8, \
         target_config_version = target_config_version + 1 WHERE node_id = ?9",
        rusqlite::params![
            new_fqdn,
            maintenance_mode,
            debug_boot,
            coreos_autologin,
            additional_kernel_cmdline,
            is_etcd_server,
            is_k8s_schedulable,
            is_k8s_master,
            node.node_id
        ],
    )
    .context("Failed to update node")?;

    get_node_by_fqdn(conn, &new_fqdn)
}

/// Delete a node; owned disks, mountpoints, addresses and provisions
/// cascade away with it.
pub fn delete_node(conn: &Connection, fqdn: &str) -> Result<bool> {
    let rows = conn
        .execute("DELETE FROM nodes WHERE fqdn = ?1", rusqlite::params![fqdn])
        .context("Failed to delete node")?;
    Ok(rows > 0)
}

/// Replace the node's credential pair and bump the target version. Returns
/// the new target version.
pub fn update_credentials(conn: &Connection, node_id: &str, creds: &CertPair) -> Result<i64> {
    conn.execute(
        "UPDATE nodes SET cert = ?1, key = ?2, target_config_version = target_config_version + 1 \
         WHERE node_id = ?3",
        rusqlite::params![creds.cert, creds.key, node_id],
    )
    .context("Failed to update credentials")?;

    conn.query_row(
        "SELECT target_config_version FROM nodes WHERE node_id = ?1",
        rusqlite::params![node_id],
        |row| row.get(0),
    )
    .context("Failed to read target version")
}

/// Record the configuration version a node claims to be running. The report
/// path is the only caller.
pub fn set_active_version(conn: &Connection, node_id: &str, version: i64) -> Result<()> {
    conn.execute(
        "UPDATE nodes SET active_config_version = ?1 WHERE node_id = ?2",
        rusqlite::params![version, node_id],
    )
    .context("Failed to set active version")?;

    Ok(())
}

pub fn upsert_disk(conn: &Connection, node_id: &str, device: &str, wipe_next_boot: bool) -> Result<()> {
    conn.execute(
        "INSERT INTO disks (disk_id, node_id, device, wipe_next_boot) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT (node_id, device) DO UPDATE SET wipe_next_boot = ?4",
        rusqlite::params![Uuid::new_v4().to_string(), node_id, device, wipe_next_boot],
    )
    .context("Failed to upsert disk")?;

    Ok(())
}

pub fn list_disks(conn: &Connection, node_id: &str) -> Result<Vec<Disk>> {
    let mut stmt = conn
        .prepare("SELECT disk_id, node_id, device, wipe_next_boot FROM disks WHERE node_id = ?1 ORDER BY rowid")
        .context("Failed to prepare statement")?;

    let disks = stmt
        .query_map(rusqlite::params![node_id], |row| {
            Ok(Disk {
                disk_id: row.get(0)?,
                node_id: row.get(1)?,
                device: row.get(2)?,
                wipe_next_boot: row.get(3)?,
            })
        })
        .context("Failed to query disks")?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to collect disks")?;

    Ok(disks)
}

/// Consume every pending wipe flag on the node's disks.
pub fn clear_wipe_flags(conn: &Connection, node_id: &str) -> Result<usize> {
    conn.execute(
        "UPDATE disks SET wipe_next_boot = 0 WHERE node_id = ?1",
        rusqlite::params![node_id],
    )
    .context("Failed to clear wipe flags")
}

pub fn list_mountpoints(conn: &Connection, node_id: &str) -> Result<Vec<Mountpoint>> {
    let mut stmt = conn
        .prepare("SELECT mountpoint_id, node_id, what, where_path, wanted_by FROM mountpoints \
                  WHERE node_id = ?1 ORDER BY rowid")
        .context("Failed to prepare statement")?;

    let mountpoints = stmt
        .query_map(rusqlite::params![node_id], |row| {
            Ok(Mountpoint {
                mountpoint_id: row.get(0)?,
                node_id: row.get(1)?,
                what: row.get(2)?,
                where_path: row.get(3)?,
                wanted_by: row.get(4)?,
            })
        })
        .context("Failed to query mountpoints")?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to collect mountpoints")?;

    Ok(mountpoints)
}

pub fn list_addresses(conn: &Connection, node_id: &str) -> Result<Vec<Address>> {
    let mut stmt = conn
        .prepare("SELECT address_id, node_id, interface, ip FROM addresses WHERE node_id = ?1 ORDER BY rowid")
        .context("Failed to prepare statement")?;

    let addresses = stmt
        .query_map(rusqlite::params![node_id], |row| {
            Ok(Address {
                address_id: row.get(0)?,
                node_id: row.get(1)?,
                interface: row.get(2)?,
                ip: row.get(3)?,
            })
        })
        .context("Failed to query addresses")?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to collect addresses")?;

    Ok(addresses)
}

fn load_bundle(conn: &Connection, node: Node) -> Result<BootBundle> {
    let cluster = clusters::get_cluster(conn, &node.cluster_id)?
        .context("Node references a missing cluster")?;
    let users = clusters::list_users(conn, &node.cluster_id)?;
    let peers = cluster_nodes(conn, &node.cluster_id)?;
    let mountpoints = list_mountpoints(conn, &node.node_id)?;
    let addresses = list_addresses(conn, &node.node_id)?;

    Ok(BootBundle {
        node,
        cluster,
        users,
        peers,
        mountpoints,
        addresses,
    })
}

pub fn boot_bundle_by_ip(conn: &Connection, ip: &str) -> Result<Option<BootBundle>> {
    match get_node_by_ip(conn, ip)? {
        Some(node) => Ok(Some(load_bundle(conn, node)?)),
        None => Ok(None),
    }
}

pub fn boot_bundle_by_fqdn(conn: &Connection, fqdn: &str) -> Result<Option<BootBundle>> {
    match get_node_by_fqdn(conn, fqdn)? {
        Some(node) => Ok(Some(load_bundle(conn, node)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::test_conn;
    use crate::types::{MountpointSpec, Runtime};

    fn dummy_creds() -> CertPair {
        CertPair {
            cert: "node-cert".to_string(),
            key: "node-key".to_string(),
        }
    }

    fn create_test_cluster(conn: &Connection) -> String {
        clusters::create_cluster(
            conn,
            "prod",
            3,
            Runtime::Docker,
            true,
            &CertPair {
                cert: "ca-cert".to_string(),
                key: "ca-key".to_string(),
            },
        )
        .unwrap()
    }

    fn node_request(fqdn: &str, ip: &str) -> CreateNodeRequest {
        CreateNodeRequest {
            cluster: "prod".to_string(),
            fqdn: fqdn.to_string(),
            ip: ip.to_string(),
            maintenance_mode: false,
            debug_boot: false,
            coreos_autologin: false,
            additional_kernel_cmdline: String::new(),
            is_etcd_server: true,
            is_k8s_schedulable: true,
            is_k8s_master: false,
            disks: vec!["/dev/sda".to_string()],
            mountpoints: vec![MountpointSpec {
                what: "/dev/sdb1".to_string(),
                where_path: "/var/lib/data".to_string(),
                wanted_by: "multi-user.target".to_string(),
            }],
            addresses: vec![],
        }
    }

    #[test]
    fn test_create_node_with_owned_rows() {
        let mut conn = test_conn();
        let cluster_id = create_test_cluster(&conn);
        let node_id = create_node(
            &mut conn,
            &cluster_id,
            &node_request("node1.example.com", "10.0.0.1"),
            &dummy_creds(),
        )
        .unwrap();

        let node = get_node_by_ip(&conn, "10.0.0.1").unwrap().unwrap();
        assert_eq!(node.node_id, node_id);
        assert_eq!(node.target_config_version, 1);
        assert_eq!(node.active_config_version, 0);
        assert_eq!(node.cert, "node-cert");

        assert_eq!(list_disks(&conn, &node_id).unwrap().len(), 1);
        assert_eq!(list_mountpoints(&conn, &node_id).unwrap().len(), 1);
    }

    #[test]
    fn test_update_bumps_target_version() {
        let mut conn = test_conn();
        let cluster_id = create_test_cluster(&conn);
        create_node(
            &mut conn,
            &cluster_id,
            &node_request("node1.example.com", "10.0.0.1"),
            &dummy_creds(),
        )
        .unwrap();

        let req = UpdateNodeRequest {
            maintenance_mode: Some(true),
            ..Default::default()
        };
        let node = update_node(&conn, "node1.example.com", &req).unwrap().unwrap();
        assert!(node.maintenance_mode);
        assert_eq!(node.target_config_version, 2);
        // active is untouched by the admin path
        assert_eq!(node.active_config_version, 0);
    }

    #[test]
    fn test_reissue_bumps_target_and_replaces_pair() {
        let mut conn = test_conn();
        let cluster_id = create_test_cluster(&conn);
        let node_id = create_node(
            &mut conn,
            &cluster_id,
            &node_request("node1.example.com", "10.0.0.1"),
            &dummy_creds(),
        )
        .unwrap();

        let fresh = CertPair {
            cert: "fresh-cert".to_string(),
            key: "fresh-key".to_string(),
        };
        let target = update_credentials(&conn, &node_id, &fresh).unwrap();
        assert_eq!(target, 2);

        let node = get_node_by_ip(&conn, "10.0.0.1").unwrap().unwrap();
        assert_eq!(node.cert, "fresh-cert");
    }

    #[test]
    fn test_delete_cascades_to_owned_rows() {
        let mut conn = test_conn();
        let cluster_id = create_test_cluster(&conn);
        let node_id = create_node(
            &mut conn,
            &cluster_id,
            &node_request("node1.example.com", "10.0.0.1"),
            &dummy_creds(),
        )
        .unwrap();

        assert!(delete_node(&conn, "node1.example.com").unwrap());
        assert!(get_node_by_ip(&conn, "10.0.0.1").unwrap().is_none());
        assert!(list_disks(&conn, &node_id).unwrap().is_empty());
        assert!(list_mountpoints(&conn, &node_id).unwrap().is_empty());
        assert!(!delete_node(&conn, "node1.example.com").unwrap());
    }

    #[test]
    fn test_wipe_flags_cleared_in_one_call() {
        let mut conn = test_conn();
        let cluster_id = create_test_cluster(&conn);
        let node_id = create_node(
            &mut conn,
            &cluster_id,
            &node_request("node1.example.com", "10.0.0.1"),
            &dummy_creds(),
        )
        .unwrap();

        upsert_disk(&conn, &node_id, "/dev/sda", true).unwrap();
        upsert_disk(&conn, &node_id, "/dev/sdb", true).unwrap();
        assert!(list_disks(&conn, &node_id).unwrap().iter().all(|d| d.wipe_next_boot));

        clear_wipe_flags(&conn, &node_id).unwrap();
        assert!(list_disks(&conn, &node_id).unwrap().iter().all(|d| !d.wipe_next_boot));
    }

    #[test]
    fn test_etcd_configured_after_all_servers_report() {
        let mut conn = test_conn();
        let cluster_id = create_test_cluster(&conn);
        let first = create_node(
            &mut conn,
            &cluster_id,
            &node_request("node1.example.com", "10.0.0.1"),
            &dummy_creds(),
        )
        .unwrap();
        let second = create_node(
            &mut conn,
            &cluster_id,
            &node_request("node2.example.com", "10.0.0.2"),
            &dummy_creds(),
        )
        .unwrap();

        assert!(!clusters::are_etcd_nodes_configured(&conn, &cluster_id).unwrap());

        set_active_version(&conn, &first, 1).unwrap();
        assert!(!clusters::are_etcd_nodes_configured(&conn, &cluster_id).unwrap());

        set_active_version(&conn, &second, 1).unwrap();
        assert!(clusters::are_etcd_nodes_configured(&conn, &cluster_id).unwrap());
    }

    #[test]
    fn test_boot_bundle_collects_cluster_state() {
        let mut conn = test_conn();
        let cluster_id = create_test_cluster(&conn);
        clusters::add_user(&conn, &cluster_id, "alice", "key-a").unwrap();
        create_node(
            &mut conn,
            &cluster_id,
            &node_request("node1.example.com", "10.0.0.1"),
            &dummy_creds(),
        )
        .unwrap();
        create_node(
            &mut conn,
            &cluster_id,
            &node_request("node2.example.com", "10.0.0.2"),
            &dummy_creds(),
        )
        .unwrap();

        let bundle = boot_bundle_by_ip(&conn, "10.0.0.1").unwrap().unwrap();
        assert_eq!(bundle.node.fqdn, "node1.example.com");
        assert_eq!(bundle.cluster.name, "prod");
        assert_eq!(bundle.users.len(), 1);
        assert_eq!(bundle.peers.len(), 2);
        assert_eq!(bundle.peers[0].fqdn, "node1.example.com");
        assert_eq!(bundle.mountpoints.len(), 1);

        assert!(boot_bundle_by_ip(&conn, "10.9.9.9").unwrap().is_none());
    }
}
