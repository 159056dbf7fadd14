use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::pki::CertPair;
use crate::types::{Cluster, User};

use super::unix_now;

fn cluster_from_row(row: &Row<'_>) -> rusqlite::Result<Cluster> {
    Ok(Cluster {
        cluster_id: row.get(0)?,
        name: row.get(1)?,
        etcd_version: row.get(2)?,
        k8s_runtime: row.get(3)?,
        k8s_is_rbac_enabled: row.get(4)?,
        assert_etcd_cluster_exists: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const CLUSTER_COLUMNS: &str = "cluster_id, name, etcd_version, k8s_runtime, \
     k8s_is_rbac_enabled, assert_etcd_cluster_exists, created_at";

/// Create a cluster with its freshly generated CA credentials.
pub fn create_cluster(
    conn: &Connection,
    name: &str,
    etcd_version: i64,
    k8s_runtime: crate::types::Runtime,
    k8s_is_rbac_enabled: bool,
    ca: &CertPair,
) -> Result<String> {
    let cluster_id = Uuid::new_v4().to_string();

    conn.execute(
        "INSERT INTO clusters (cluster_id, name, etcd_version, k8s_runtime, k8s_is_rbac_enabled, \
         assert_etcd_cluster_exists, ca_cert, ca_key, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8)",
        rusqlite::params![
            cluster_id,
            name,
            etcd_version,
            k8s_runtime,
            k8s_is_rbac_enabled,
            ca.cert,
            ca.key,
            unix_now()
        ],
    )
    .context("Failed to insert cluster")?;

    Ok(cluster_id)
}

pub fn get_cluster_by_name(conn: &Connection, name: &str) -> Result<Option<Cluster>> {
    conn.query_row(
        &format!("SELECT {} FROM clusters WHERE name = ?1", CLUSTER_COLUMNS),
        rusqlite::params![name],
        cluster_from_row,
    )
    .optional()
    .context("Failed to query cluster")
}

pub fn get_cluster(conn: &Connection, cluster_id: &str) -> Result<Option<Cluster>> {
    conn.query_row(
        &format!("SELECT {} FROM clusters WHERE cluster_id = ?1", CLUSTER_COLUMNS),
        rusqlite::params![cluster_id],
        cluster_from_row,
    )
    .optional()
    .context("Failed to query cluster")
}

pub fn list_clusters(conn: &Connection) -> Result<Vec<Cluster>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {} FROM clusters ORDER BY created_at", CLUSTER_COLUMNS))
        .context("Failed to prepare statement")?;

    let clusters = stmt
        .query_map([], cluster_from_row)
        .context("Failed to query clusters")?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to collect clusters")?;

    Ok(clusters)
}

/// CA credential pair owned by a cluster.
pub fn ca_credentials(conn: &Connection, cluster_id: &str) -> Result<Option<CertPair>> {
    conn.query_row(
        "SELECT ca_cert, ca_key FROM clusters WHERE cluster_id = ?1",
        rusqlite::params![cluster_id],
        |row| {
            Ok(CertPair {
                cert: row.get(0)?,
                key: row.get(1)?,
            })
        },
    )
    .optional()
    .context("Failed to query CA credentials")
}

pub fn add_user(conn: &Connection, cluster_id: &str, name: &str, ssh_key: &str) -> Result<String> {
    let user_id = Uuid::new_v4().to_string();

    conn.execute(
        "INSERT INTO users (user_id, cluster_id, name, ssh_key) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![user_id, cluster_id, name, ssh_key],
    )
    .context("Failed to insert user")?;

    Ok(user_id)
}

/// Users in list (insertion) order; SSH key collection depends on it.
pub fn list_users(conn: &Connection, cluster_id: &str) -> Result<Vec<User>> {
    let mut stmt = conn
        .prepare("SELECT user_id, cluster_id, name, ssh_key FROM users WHERE cluster_id = ?1 ORDER BY rowid")
        .context("Failed to prepare statement")?;

    let users = stmt
        .query_map(rusqlite::params![cluster_id], |row| {
            Ok(User {
                user_id: row.get(0)?,
                cluster_id: row.get(1)?,
                name: row.get(2)?,
                ssh_key: row.get(3)?,
            })
        })
        .context("Failed to query users")?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to collect users")?;

    Ok(users)
}

/// Whether every etcd server of the cluster has confirmed at least one boot.
/// A cluster without etcd servers never satisfies this.
pub fn are_etcd_nodes_configured(conn: &Connection, cluster_id: &str) -> Result<bool> {
    let (total, configured): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), COALESCE(SUM(active_config_version > 0), 0) \
             FROM nodes WHERE cluster_id = ?1 AND is_etcd_server = 1",
            rusqlite::params![cluster_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .context("Failed to query etcd node state")?;

    Ok(total > 0 && total == configured)
}

pub fn set_assert_etcd_cluster_exists(conn: &Connection, cluster_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE clusters SET assert_etcd_cluster_exists = 1 WHERE cluster_id = ?1",
        rusqlite::params![cluster_id],
    )
    .context("Failed to update cluster")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::test_conn;
    use crate::types::Runtime;

    fn dummy_ca() -> CertPair {
        CertPair {
            cert: "cert".to_string(),
            key: "key".to_string(),
        }
    }

    #[test]
    fn test_create_and_fetch_cluster() {
        let conn = test_conn();
        let id = create_cluster(&conn, "prod", 3, Runtime::Docker, true, &dummy_ca()).unwrap();

        let cluster = get_cluster_by_name(&conn, "prod").unwrap().unwrap();
        assert_eq!(cluster.cluster_id, id);
        assert_eq!(cluster.etcd_version, 3);
        assert_eq!(cluster.k8s_runtime, Runtime::Docker);
        assert!(!cluster.assert_etcd_cluster_exists);

        assert!(get_cluster_by_name(&conn, "missing").unwrap().is_none());

        let ca = ca_credentials(&conn, &id).unwrap().unwrap();
        assert_eq!(ca.cert, "cert");
    }

    #[test]
    fn test_users_keep_insertion_order() {
        let conn = test_conn();
        let id = create_cluster(&conn, "prod", 3, Runtime::Docker, true, &dummy_ca()).unwrap();
        add_user(&conn, &id, "alice", "key-a").unwrap();
        add_user(&conn, &id, "bob", "").unwrap();
        add_user(&conn, &id, "carol", "key-c").unwrap();

        let users = list_users(&conn, &id).unwrap();
        let names: Vec<&str> = users.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_etcd_configured_requires_at_least_one_server() {
        let conn = test_conn();
        let id = create_cluster(&conn, "prod", 3, Runtime::Docker, true, &dummy_ca()).unwrap();

        // no etcd servers at all: condition never holds
        assert!(!are_etcd_nodes_configured(&conn, &id).unwrap());
    }
}
