//! Template registry: role-aware resolution of boot configuration templates.
//!
//! Templates are embedded at compile time, grouped into named roots. Each
//! role class owns an ordered chain of roots; a role-specific template
//! shadows a shared one with the same relative name. The per-role
//! environments are built once at startup and shared by reference.

use minijinja::{Environment, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::Config;
use crate::error::RenderError;
use crate::renderer::{ClusterView, NodeView};

/// Template root collections keyed by a stable identifier.
type Root = &'static [(&'static str, &'static str)];

const BASE_ROOT: Root = &[
    (
        "units/provision-report.service",
        include_str!("../../templates/base/units/provision-report.service"),
    ),
    ("hosts", include_str!("../../templates/base/hosts")),
    ("ipxe.txt", include_str!("../../templates/base/ipxe.txt")),
];

const K8S_ROOT: Root = &[
    (
        "units/kubelet.service",
        include_str!("../../templates/k8s/units/kubelet.service"),
    ),
    (
        "units/k8s-addons.service",
        include_str!("../../templates/k8s/units/k8s-addons.service"),
    ),
    (
        "units/rkt-api.service",
        include_str!("../../templates/k8s/units/rkt-api.service"),
    ),
    (
        "units/load-rkt-stage1.service",
        include_str!("../../templates/k8s/units/load-rkt-stage1.service"),
    ),
    (
        "dropins/flanneld.service/40-ExecStartPre-symlink.conf",
        include_str!("../../templates/k8s/dropins/flanneld.service/40-ExecStartPre-symlink.conf"),
    ),
    (
        "dropins/docker.service/40-flannel.conf",
        include_str!("../../templates/k8s/dropins/docker.service/40-flannel.conf"),
    ),
];

const ETCD_ROOT: Root = &[
    (
        "dropins/etcd-member.service/40-etcd-cluster.conf",
        include_str!("../../templates/etcd/dropins/etcd-member.service/40-etcd-cluster.conf"),
    ),
    (
        "dropins/etcd2.service/40-etcd-cluster.conf",
        include_str!("../../templates/etcd/dropins/etcd2.service/40-etcd-cluster.conf"),
    ),
    (
        "dropins/locksmithd.service/40-etcd-lock.conf",
        include_str!("../../templates/etcd/dropins/locksmithd.service/40-etcd-lock.conf"),
    ),
];

fn root_templates(root: &str) -> Root {
    match root {
        "base" => BASE_ROOT,
        "k8s" => K8S_ROOT,
        "etcd" => ETCD_ROOT,
        other => panic!("unknown template root {:?}", other),
    }
}

/// Role classes a node can render templates as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleClass {
    Kubernetes,
    Etcd,
}

const ALL_ROLES: [RoleClass; 2] = [RoleClass::Kubernetes, RoleClass::Etcd];

/// Static search-path table: most specific root first, shared root last.
pub const fn search_roots(role: RoleClass) -> &'static [&'static str] {
    match role {
        RoleClass::Kubernetes => &["k8s", "base"],
        RoleClass::Etcd => &["etcd", "k8s", "base"],
    }
}

/// Context keys every render receives; per-call extensions may not shadow
/// them.
pub const FIXED_CONTEXT_KEYS: [&str; 4] = ["config", "node", "cluster", "url_root"];

/// The fixed portion of the template render context.
pub struct FixedContext<'a> {
    pub config: &'a Config,
    pub node: &'a NodeView,
    pub cluster: &'a ClusterView,
    pub url_root: &'a str,
}

pub struct TemplateRegistry {
    envs: HashMap<RoleClass, Environment<'static>>,
}

impl TemplateRegistry {
    /// Build one environment per role class from the static root table.
    pub fn new() -> Result<Self, RenderError> {
        let mut envs = HashMap::new();
        for role in ALL_ROLES {
            let roots: Vec<Root> = search_roots(role)
                .iter()
                .map(|name| root_templates(name))
                .collect();
            envs.insert(role, build_env(&roots)?);
        }
        Ok(Self { envs })
    }

    /// Resolve a template through the role's search chain.
    pub fn resolve(
        &self,
        role: RoleClass,
        name: &str,
    ) -> Result<minijinja::Template<'_, '_>, RenderError> {
        let env = self
            .envs
            .get(&role)
            .expect("registry covers every role class");
        env.get_template(name)
            .map_err(|_| RenderError::TemplateNotFound {
                name: name.to_string(),
                chain: search_roots(role),
            })
    }

    /// Render a template with the fixed context plus per-call extensions.
    pub fn render(
        &self,
        role: RoleClass,
        name: &str,
        fixed: &FixedContext<'_>,
        extra: &[(&str, Value)],
    ) -> Result<String, RenderError> {
        let template = self.resolve(role, name)?;

        let mut context: BTreeMap<String, Value> = BTreeMap::new();
        context.insert("config".into(), Value::from_serialize(fixed.config));
        context.insert("node".into(), Value::from_serialize(fixed.node));
        context.insert("cluster".into(), Value::from_serialize(fixed.cluster));
        context.insert("url_root".into(), Value::from(fixed.url_root));

        for (key, value) in extra {
            if FIXED_CONTEXT_KEYS.contains(key) {
                return Err(RenderError::ContextCollision(key.to_string()));
            }
            context.insert(key.to_string(), value.clone());
        }

        Ok(template.render(Value::from_serialize(&context))?)
    }
}

fn build_env(roots: &[Root]) -> Result<Environment<'static>, RenderError> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);

    let mut seen: HashSet<&'static str> = HashSet::new();
    for root in roots {
        for (name, source) in root.iter() {
            // First root in the chain wins; later roots are shadowed.
            if seen.insert(name) {
                env.add_template(name, source)?;
            }
        }
    }

    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::BootContext;
    use crate::types::Runtime;

    fn test_config() -> Config {
        Config {
            external_url: "https://boot.example.com/".to_string(),
            ca_cert_path: "/etc/kubernetes/ssl/ca.pem".to_string(),
            node_cert_path: "/etc/kubernetes/ssl/node.pem".to_string(),
            node_key_path: "/etc/kubernetes/ssl/node-key.pem".to_string(),
            install_etc_hosts: true,
            kernel_image_url: "https://boot.example.com/images/kernel".to_string(),
            initrd_image_url: "https://boot.example.com/images/initrd".to_string(),
            admin_token: "secret".to_string(),
        }
    }

    fn test_views() -> (NodeView, ClusterView) {
        let ctx = BootContext::for_tests(Runtime::Docker, 3, true, false);
        (ctx.node, ctx.cluster)
    }

    #[test]
    fn test_role_chain_reaches_shared_roots() {
        let registry = TemplateRegistry::new().unwrap();

        // etcd chain sees its own dropins plus k8s and base templates
        assert!(registry
            .resolve(RoleClass::Etcd, "dropins/etcd-member.service/40-etcd-cluster.conf")
            .is_ok());
        assert!(registry.resolve(RoleClass::Etcd, "units/kubelet.service").is_ok());
        assert!(registry.resolve(RoleClass::Etcd, "hosts").is_ok());

        // kubernetes chain does not see etcd templates
        assert!(registry
            .resolve(RoleClass::Kubernetes, "dropins/etcd-member.service/40-etcd-cluster.conf")
            .is_err());
    }

    #[test]
    fn test_missing_template_names_chain() {
        let registry = TemplateRegistry::new().unwrap();
        let err = registry.resolve(RoleClass::Etcd, "units/nonexistent.service").unwrap_err();
        match err {
            RenderError::TemplateNotFound { name, chain } => {
                assert_eq!(name, "units/nonexistent.service");
                assert_eq!(chain, &["etcd", "k8s", "base"]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_first_root_shadows_later_roots() {
        const SPECIFIC: Root = &[("greeting", "specific {{ url_root }}")];
        const SHARED: Root = &[("greeting", "shared"), ("only-shared", "fallback")];

        let env = build_env(&[SPECIFIC, SHARED]).unwrap();
        assert_eq!(
            env.get_template("greeting").unwrap().render(minijinja::context! { url_root => "x" }).unwrap(),
            "specific x"
        );
        assert_eq!(env.get_template("only-shared").unwrap().render(()).unwrap(), "fallback");
    }

    #[test]
    fn test_extra_context_collision_rejected() {
        let registry = TemplateRegistry::new().unwrap();
        let config = test_config();
        let (node, cluster) = test_views();
        let fixed = FixedContext {
            config: &config,
            node: &node,
            cluster: &cluster,
            url_root: "https://boot.example.com/",
        };

        let err = registry
            .render(RoleClass::Kubernetes, "hosts", &fixed, &[("node", Value::from(1))])
            .unwrap_err();
        assert!(matches!(err, RenderError::ContextCollision(key) if key == "node"));
    }

    #[test]
    fn test_render_hosts() {
        let registry = TemplateRegistry::new().unwrap();
        let config = test_config();
        let (node, cluster) = test_views();
        let fixed = FixedContext {
            config: &config,
            node: &node,
            cluster: &cluster,
            url_root: "https://boot.example.com/",
        };

        let rendered = registry.render(RoleClass::Kubernetes, "hosts", &fixed, &[]).unwrap();
        assert!(rendered.contains("127.0.0.1 localhost"));
        assert!(rendered.contains(&node.fqdn));
    }
}
