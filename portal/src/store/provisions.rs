use anyhow::{Context, Result};
use rusqlite::Connection;
use uuid::Uuid;

use crate::types::Provision;

use super::unix_now;

/// Append one report record. Records are immutable once written; they form
/// the provisioning audit trail.
pub fn insert_provision(
    conn: &Connection,
    node_id: &str,
    config_version: i64,
    ignition_config: &str,
    ipxe_config: Option<&str>,
) -> Result<String> {
    let provision_id = Uuid::new_v4().to_string();

    conn.execute(
        "INSERT INTO provisions (provision_id, node_id, config_version, ignition_config, \
         ipxe_config, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            provision_id,
            node_id,
            config_version,
            ignition_config,
            ipxe_config,
            unix_now()
        ],
    )
    .context("Failed to insert provision")?;

    Ok(provision_id)
}

pub fn list_provisions(conn: &Connection, node_id: &str) -> Result<Vec<Provision>> {
    let mut stmt = conn
        .prepare(
            "SELECT provision_id, node_id, config_version, ignition_config, ipxe_config, \
             created_at FROM provisions WHERE node_id = ?1 ORDER BY rowid",
        )
        .context("Failed to prepare statement")?;

    let provisions = stmt
        .query_map(rusqlite::params![node_id], |row| {
            Ok(Provision {
                provision_id: row.get(0)?,
                node_id: row.get(1)?,
                config_version: row.get(2)?,
                ignition_config: row.get(3)?,
                ipxe_config: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .context("Failed to query provisions")?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to collect provisions")?;

    Ok(provisions)
}
