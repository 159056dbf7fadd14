use serde::Serialize;

/// Process-wide portal configuration, lowered from CLI arguments once at
/// startup and shared immutably through [`crate::api::AppState`].
///
/// Serializes into the template render context under the `config` key, so
/// every field here (except the admin token) is visible to templates.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// External base URL nodes use to reach this portal, always with a
    /// trailing slash. Used to build absolute credential-download links.
    pub external_url: String,

    /// Where the cluster CA certificate lands on a provisioned node.
    pub ca_cert_path: String,
    /// Where the node certificate lands on a provisioned node.
    pub node_cert_path: String,
    /// Where the node private key lands on a provisioned node.
    pub node_key_path: String,

    /// Embed a rendered /etc/hosts into every Ignition document.
    pub install_etc_hosts: bool,

    pub kernel_image_url: String,
    pub initrd_image_url: String,

    #[serde(skip_serializing)]
    pub admin_token: String,
}

impl Config {
    pub fn url_root(&self) -> &str {
        &self.external_url
    }
}

/// Ensure a base URL carries exactly one trailing slash.
pub fn normalize_url_root(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    format!("{}/", trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url_root() {
        assert_eq!(normalize_url_root("https://boot.example.com"), "https://boot.example.com/");
        assert_eq!(normalize_url_root("https://boot.example.com/"), "https://boot.example.com/");
        assert_eq!(normalize_url_root("https://boot.example.com//"), "https://boot.example.com/");
    }
}
