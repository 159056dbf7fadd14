use thiserror::Error;

/// Fatal errors raised while assembling or rendering boot configuration.
///
/// Every variant aborts the whole request: a partially built document is
/// never serialized.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Cluster configuration names an etcd protocol version this portal
    /// does not know. Treated as a data-integrity problem, never defaulted.
    #[error("unknown etcd version {0} (expected 2 or 3)")]
    UnknownEtcdVersion(i64),

    #[error("template {name:?} not found in search roots {chain:?}")]
    TemplateNotFound {
        name: String,
        chain: &'static [&'static str],
    },

    /// A per-call context extension tried to shadow one of the fixed
    /// template context keys (`config`, `node`, `cluster`, `url_root`).
    #[error("template context key {0:?} collides with a fixed key")]
    ContextCollision(String),

    #[error("template render failed: {0}")]
    Template(#[from] minijinja::Error),
}
