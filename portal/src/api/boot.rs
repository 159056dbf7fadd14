//! Node-facing boot surface. Nodes are identified by their peer address;
//! an address with no node record is refused.

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use crate::db::{execute_async, execute_async_mut};
use crate::renderer::{ignition, ipxe, BootContext};
use crate::store::{clusters, nodes, provisions};
use crate::types::{BootBundle, ConfigState};

use super::{internal_error, render_error, ApiError, AppState};

async fn bundle_for_peer(
    state: &Arc<AppState>,
    addr: SocketAddr,
    request_name: &'static str,
) -> Result<BootBundle, ApiError> {
    let ip = addr.ip().to_string();
    info!("{} request from {}", request_name, ip);

    let lookup_ip = ip.clone();
    let bundle = execute_async(&state.db, move |conn| {
        nodes::boot_bundle_by_ip(conn, &lookup_ip)
    })
    .await
    .map_err(internal_error)?;

    bundle.ok_or_else(|| {
        error!("Node {} is unknown", ip);
        (StatusCode::FORBIDDEN, "unknown node".to_string())
    })
}

/// GET /ignition - assembled Ignition document, compact unless `indent`
pub async fn ignition(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let bundle = bundle_for_peer(&state, addr, "Ignition config").await?;
    let ctx = BootContext::from_bundle(&bundle);

    let doc = ignition::assemble(&state.config, &state.registry, &ctx).map_err(render_error)?;
    let body = doc
        .to_json(params.contains_key("indent"))
        .map_err(|e| internal_error(e.into()))?;

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// GET /ipxe - boot script for the requesting node
pub async fn ipxe_boot(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Response, ApiError> {
    let bundle = bundle_for_peer(&state, addr, "iPXE boot").await?;
    let ctx = BootContext::from_bundle(&bundle);

    let script = ipxe::render(&state.config, &state.registry, &ctx).map_err(render_error)?;
    Ok(([(header::CONTENT_TYPE, "text/plain")], script).into_response())
}

/// GET /credentials/{ca|node|node-key}.pem - PEM download for the node
pub async fn credentials(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let bundle = bundle_for_peer(&state, addr, "Credentials download").await?;

    let Some(cred_type) = filename.strip_suffix(".pem") else {
        return Err((StatusCode::NOT_FOUND, "unknown credential type".to_string()));
    };

    let body = match cred_type {
        "ca" => {
            let cluster_id = bundle.cluster.cluster_id.clone();
            let ca = execute_async(&state.db, move |conn| {
                clusters::ca_credentials(conn, &cluster_id)
            })
            .await
            .map_err(internal_error)?
            .ok_or_else(|| internal_error(anyhow::anyhow!("cluster CA is missing")))?;
            ca.cert
        }
        "node" => bundle.node.cert.clone(),
        "node-key" => bundle.node.key.clone(),
        _ => return Err((StatusCode::NOT_FOUND, "unknown credential type".to_string())),
    };

    Ok(([(header::CONTENT_TYPE, "text/plain")], body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub version: Option<String>,
}

/// POST /report?version= - node reports the configuration it booted.
///
/// Outside maintenance mode this validates the claim, appends a provision
/// record and records the active version; a report of the target version
/// additionally snapshots the boot script as proof of convergence. Disk
/// wipe flags are consumed unconditionally. Everything commits in a single
/// transaction.
pub async fn report(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<ReportQuery>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let bundle = bundle_for_peer(&state, addr, "Provision report").await?;
    let node = bundle.node.clone();

    let mut claimed_version = None;
    if !node.maintenance_mode {
        let version = query
            .version
            .as_deref()
            .and_then(|raw| raw.parse::<i64>().ok())
            .ok_or_else(|| {
                (
                    StatusCode::BAD_REQUEST,
                    "missing or malformed version".to_string(),
                )
            })?;

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or("").trim().to_string())
            .unwrap_or_default();
        if content_type != "application/json" {
            return Err((
                StatusCode::BAD_REQUEST,
                "content type must be application/json".to_string(),
            ));
        }

        claimed_version = Some(version);
    }

    // Render the snapshot outside the transaction; it depends only on state
    // already read.
    let ipxe_snapshot = match claimed_version {
        Some(version)
            if ConfigState::derive(node.target_config_version, version)
                == ConfigState::Converged =>
        {
            let ctx = BootContext::from_bundle(&bundle);
            Some(ipxe::render(&state.config, &state.registry, &ctx).map_err(render_error)?)
        }
        _ => None,
    };

    let node_id = node.node_id.clone();
    let cluster_id = node.cluster_id.clone();
    execute_async_mut(&state.db, move |conn| {
        let tx = conn.transaction()?;

        if let Some(version) = claimed_version {
            nodes::set_active_version(&tx, &node_id, version)?;
            provisions::insert_provision(&tx, &node_id, version, &body, ipxe_snapshot.as_deref())?;
        }

        // Consumed exactly once, maintenance mode included.
        nodes::clear_wipe_flags(&tx, &node_id)?;

        if clusters::are_etcd_nodes_configured(&tx, &cluster_id)? {
            clusters::set_assert_etcd_cluster_exists(&tx, &cluster_id)?;
        }

        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(internal_error)?;

    Ok(([(header::CONTENT_TYPE, "application/json")], "ok").into_response())
}
