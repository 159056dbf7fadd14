//! Operator surface: cluster, user and node management plus configuration
//! previews. Every state-changing edit bumps the node's target version;
//! `active_config_version` is never written here.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::info;

use crate::db::{execute_async, execute_async_mut};
use crate::pki;
use crate::renderer::{ignition, ipxe, BootContext};
use crate::store::{clusters, nodes, provisions};
use crate::types::{
    BootBundle, CreateClusterRequest, CreateClusterResponse, CreateNodeRequest,
    CreateNodeResponse, CreateUserRequest, CreateUserResponse, ListClustersResponse,
    ListNodesResponse, ListProvisionsResponse, Node, NodeDetailResponse, ReissueResponse,
    SetDiskRequest, UpdateNodeRequest,
};

use super::{internal_error, render_error, ApiError, AppState};

/// Validity used for node identity certificates.
const NODE_CERT_DAYS: i64 = 10000;

fn not_found(what: &str) -> ApiError {
    (StatusCode::NOT_FOUND, format!("unknown {}", what))
}

/// POST /api/clusters - create a cluster and generate its CA
pub async fn create_cluster(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateClusterRequest>,
) -> Result<Json<CreateClusterResponse>, ApiError> {
    info!("Creating cluster: name={}", req.name);

    let ca = pki::generate_ca(&format!("{} cluster CA", req.name)).map_err(internal_error)?;

    let cluster_id = execute_async(&state.db, move |conn| {
        clusters::create_cluster(
            conn,
            &req.name,
            req.etcd_version,
            req.k8s_runtime,
            req.k8s_is_rbac_enabled,
            &ca,
        )
    })
    .await
    .map_err(internal_error)?;

    Ok(Json(CreateClusterResponse { cluster_id }))
}

/// GET /api/clusters
pub async fn list_clusters(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListClustersResponse>, ApiError> {
    let clusters = execute_async(&state.db, clusters::list_clusters)
        .await
        .map_err(internal_error)?;

    Ok(Json(ListClustersResponse { clusters }))
}

/// POST /api/clusters/:name/users
pub async fn add_user(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<CreateUserResponse>, ApiError> {
    let user_id = execute_async(&state.db, move |conn| {
        let Some(cluster) = clusters::get_cluster_by_name(conn, &name)? else {
            return Ok(None);
        };
        clusters::add_user(conn, &cluster.cluster_id, &req.name, &req.ssh_key).map(Some)
    })
    .await
    .map_err(internal_error)?
    .ok_or_else(|| not_found("cluster"))?;

    Ok(Json(CreateUserResponse { user_id }))
}

/// POST /api/nodes - create a node and issue its identity credentials
pub async fn create_node(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateNodeRequest>,
) -> Result<Json<CreateNodeResponse>, ApiError> {
    info!("Creating node: fqdn={}, ip={}", req.fqdn, req.ip);

    let ip: IpAddr = req
        .ip
        .parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid ip {:?}", req.ip)))?;

    let cluster_name = req.cluster.clone();
    let cluster = execute_async(&state.db, move |conn| {
        clusters::get_cluster_by_name(conn, &cluster_name)
    })
    .await
    .map_err(internal_error)?
    .ok_or_else(|| not_found("cluster"))?;

    let cluster_id = cluster.cluster_id.clone();
    let ca_cluster_id = cluster_id.clone();
    let ca = execute_async(&state.db, move |conn| {
        clusters::ca_credentials(conn, &ca_cluster_id)
    })
    .await
    .map_err(internal_error)?
    .ok_or_else(|| internal_error(anyhow::anyhow!("cluster CA is missing")))?;

    let creds = pki::issue_certificate(
        &format!("system:node:{}", req.fqdn),
        &ca.cert,
        &ca.key,
        &["system:nodes"],
        &[req.fqdn.clone()],
        &[ip],
        NODE_CERT_DAYS,
    )
    .map_err(internal_error)?;

    let node_id = execute_async_mut(&state.db, move |conn| {
        nodes::create_node(conn, &cluster_id, &req, &creds)
    })
    .await
    .map_err(internal_error)?;

    Ok(Json(CreateNodeResponse {
        node_id,
        target_config_version: 1,
    }))
}

/// GET /api/nodes
pub async fn list_nodes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListNodesResponse>, ApiError> {
    let nodes = execute_async(&state.db, nodes::list_nodes)
        .await
        .map_err(internal_error)?;

    Ok(Json(ListNodesResponse { nodes }))
}

/// GET /api/nodes/:fqdn
pub async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(fqdn): Path<String>,
) -> Result<Json<NodeDetailResponse>, ApiError> {
    let detail = execute_async(&state.db, move |conn| {
        let Some(node) = nodes::get_node_by_fqdn(conn, &fqdn)? else {
            return Ok(None);
        };
        let disks = nodes::list_disks(conn, &node.node_id)?;
        let mountpoints = nodes::list_mountpoints(conn, &node.node_id)?;
        let addresses = nodes::list_addresses(conn, &node.node_id)?;
        Ok(Some(NodeDetailResponse {
            node,
            disks,
            mountpoints,
            addresses,
        }))
    })
    .await
    .map_err(internal_error)?
    .ok_or_else(|| not_found("node"))?;

    Ok(Json(detail))
}

/// PATCH /api/nodes/:fqdn - partial edit, bumps target version
pub async fn update_node(
    State(state): State<Arc<AppState>>,
    Path(fqdn): Path<String>,
    Json(req): Json<UpdateNodeRequest>,
) -> Result<Json<Node>, ApiError> {
    let node = execute_async(&state.db, move |conn| nodes::update_node(conn, &fqdn, &req))
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("node"))?;

    Ok(Json(node))
}

/// DELETE /api/nodes/:fqdn
pub async fn delete_node(
    State(state): State<Arc<AppState>>,
    Path(fqdn): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = execute_async(&state.db, move |conn| nodes::delete_node(conn, &fqdn))
        .await
        .map_err(internal_error)?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("node"))
    }
}

/// POST /api/nodes/:fqdn/credentials/reissue
pub async fn reissue_credentials(
    State(state): State<Arc<AppState>>,
    Path(fqdn): Path<String>,
) -> Result<Json<ReissueResponse>, ApiError> {
    info!("Reissuing credentials for node {}", fqdn);

    let lookup_fqdn = fqdn.clone();
    let node = execute_async(&state.db, move |conn| {
        nodes::get_node_by_fqdn(conn, &lookup_fqdn)
    })
    .await
    .map_err(internal_error)?
    .ok_or_else(|| not_found("node"))?;

    let cluster_id = node.cluster_id.clone();
    let ca = execute_async(&state.db, move |conn| {
        clusters::ca_credentials(conn, &cluster_id)
    })
    .await
    .map_err(internal_error)?
    .ok_or_else(|| internal_error(anyhow::anyhow!("cluster CA is missing")))?;

    let creds = pki::issue_certificate(
        &format!("system:node:{}", node.fqdn),
        &ca.cert,
        &ca.key,
        &["system:nodes"],
        &[node.fqdn.clone()],
        &node.ip.parse::<IpAddr>().map(|ip| vec![ip]).unwrap_or_default(),
        NODE_CERT_DAYS,
    )
    .map_err(internal_error)?;

    let node_id = node.node_id.clone();
    let target_config_version = execute_async(&state.db, move |conn| {
        nodes::update_credentials(conn, &node_id, &creds)
    })
    .await
    .map_err(internal_error)?;

    Ok(Json(ReissueResponse {
        target_config_version,
    }))
}

/// PUT /api/nodes/:fqdn/disks/:device - upsert a disk, set its wipe flag
pub async fn set_disk(
    State(state): State<Arc<AppState>>,
    Path((fqdn, device)): Path<(String, String)>,
    Json(req): Json<SetDiskRequest>,
) -> Result<StatusCode, ApiError> {
    execute_async(&state.db, move |conn| {
        let Some(node) = nodes::get_node_by_fqdn(conn, &fqdn)? else {
            return Ok(None);
        };
        nodes::upsert_disk(conn, &node.node_id, &device, req.wipe_next_boot).map(Some)
    })
    .await
    .map_err(internal_error)?
    .ok_or_else(|| not_found("node"))?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/nodes/:fqdn/provisions - report audit trail
pub async fn list_provisions(
    State(state): State<Arc<AppState>>,
    Path(fqdn): Path<String>,
) -> Result<Json<ListProvisionsResponse>, ApiError> {
    let provisions = execute_async(&state.db, move |conn| {
        let Some(node) = nodes::get_node_by_fqdn(conn, &fqdn)? else {
            return Ok(None);
        };
        provisions::list_provisions(conn, &node.node_id).map(Some)
    })
    .await
    .map_err(internal_error)?
    .ok_or_else(|| not_found("node"))?;

    Ok(Json(ListProvisionsResponse { provisions }))
}

async fn bundle_by_fqdn(state: &Arc<AppState>, fqdn: String) -> Result<BootBundle, ApiError> {
    execute_async(&state.db, move |conn| {
        nodes::boot_bundle_by_fqdn(conn, &fqdn)
    })
    .await
    .map_err(internal_error)?
    .ok_or_else(|| not_found("node"))
}

/// GET /api/nodes/:fqdn/ignition - indented preview of the current document
pub async fn preview_ignition(
    State(state): State<Arc<AppState>>,
    Path(fqdn): Path<String>,
) -> Result<Response, ApiError> {
    let bundle = bundle_by_fqdn(&state, fqdn).await?;
    let ctx = BootContext::from_bundle(&bundle);

    let doc = ignition::assemble(&state.config, &state.registry, &ctx).map_err(render_error)?;
    let body = doc.to_json(true).map_err(|e| internal_error(e.into()))?;

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// GET /api/nodes/:fqdn/ipxe - preview of the current boot script
pub async fn preview_ipxe(
    State(state): State<Arc<AppState>>,
    Path(fqdn): Path<String>,
) -> Result<Response, ApiError> {
    let bundle = bundle_by_fqdn(&state, fqdn).await?;
    let ctx = BootContext::from_bundle(&bundle);

    let script = ipxe::render(&state.config, &state.registry, &ctx).map_err(render_error)?;
    Ok(([(header::CONTENT_TYPE, "text/plain")], script).into_response())
}
