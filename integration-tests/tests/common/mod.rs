use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use bootforge_portal::api::{create_router, AppState};
use bootforge_portal::config::Config;
use bootforge_portal::db;
use bootforge_portal::renderer::TemplateRegistry;

pub const ADMIN_TOKEN: &str = "test-token";

/// A portal instance served in-process on an ephemeral port.
///
/// Running in-process means the test's own requests arrive from 127.0.0.1,
/// so nodes registered with that address are recognized by the boot surface.
pub struct TestPortal {
    pub base_url: String,
    pub client: reqwest::Client,
    server: tokio::task::JoinHandle<()>,
    _temp_dir: TempDir,
}

impl TestPortal {
    pub async fn start() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("portal.db");

        let pool = db::init_db(Some(db_path)).expect("Failed to initialize database");
        let registry = TemplateRegistry::new().expect("Failed to build template registry");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind ephemeral port");
        let addr = listener.local_addr().expect("No local addr");
        let base_url = format!("http://{}", addr);

        let config = Config {
            external_url: format!("{}/", base_url),
            ca_cert_path: "/etc/kubernetes/ssl/ca.pem".to_string(),
            node_cert_path: "/etc/kubernetes/ssl/node.pem".to_string(),
            node_key_path: "/etc/kubernetes/ssl/node-key.pem".to_string(),
            install_etc_hosts: true,
            kernel_image_url: "http://images.example.com/coreos_production_pxe.vmlinuz".to_string(),
            initrd_image_url: "http://images.example.com/coreos_production_pxe_image.cpio.gz"
                .to_string(),
            admin_token: ADMIN_TOKEN.to_string(),
        };

        let state = Arc::new(AppState {
            db: pool,
            config: Arc::new(config),
            registry: Arc::new(registry),
        });

        let router = create_router(state);
        let server = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("Server error");
        });

        let portal = Self {
            base_url,
            client: reqwest::Client::new(),
            server,
            _temp_dir: temp_dir,
        };
        portal.wait_for_health().await;
        portal
    }

    async fn wait_for_health(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if tokio::time::Instant::now() > deadline {
                panic!("Timed out waiting for portal to become healthy");
            }
            if let Ok(resp) = self.client.get(self.url("/health")).send().await {
                if resp.status().is_success() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn admin_get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header("x-api-key", ADMIN_TOKEN)
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn admin_post(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("x-api-key", ADMIN_TOKEN)
            .json(&body)
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn admin_patch(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .patch(self.url(path))
            .header("x-api-key", ADMIN_TOKEN)
            .json(&body)
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn admin_put(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .put(self.url(path))
            .header("x-api-key", ADMIN_TOKEN)
            .json(&body)
            .send()
            .await
            .expect("Request failed")
    }

    /// Create a cluster with the given settings, panicking on failure.
    pub async fn create_cluster(&self, name: &str, etcd_version: i64, runtime: &str) {
        let resp = self
            .admin_post(
                "/api/clusters",
                serde_json::json!({
                    "name": name,
                    "etcd_version": etcd_version,
                    "k8s_runtime": runtime,
                }),
            )
            .await;
        assert!(
            resp.status().is_success(),
            "Cluster creation failed: {}",
            resp.status()
        );
    }

    /// Register a node at 127.0.0.1 so the test process itself can act as it.
    pub async fn create_local_node(&self, cluster: &str, fqdn: &str, extra: serde_json::Value) {
        let mut body = serde_json::json!({
            "cluster": cluster,
            "fqdn": fqdn,
            "ip": "127.0.0.1",
        });
        if let (Some(map), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                map.insert(k.clone(), v.clone());
            }
        }
        let resp = self.admin_post("/api/nodes", body).await;
        assert!(
            resp.status().is_success(),
            "Node creation failed: {}",
            resp.status()
        );
    }

    /// Report a boot of the given configuration version as the local node.
    pub async fn report(&self, version: i64) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/report?version={}", version)))
            .header("content-type", "application/json")
            .body("{}")
            .send()
            .await
            .expect("Request failed")
    }
}

impl Drop for TestPortal {
    fn drop(&mut self) {
        self.server.abort();
    }
}
