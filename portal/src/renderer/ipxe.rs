//! iPXE boot script rendering.
//!
//! Much simpler than Ignition assembly: a single template resolved through
//! the node's role chain. The rendered script is also snapshotted into a
//! provision record when a node reports its target version.

use crate::config::Config;
use crate::error::RenderError;
use crate::renderer::{BootContext, FixedContext, TemplateRegistry};

pub fn render(
    config: &Config,
    registry: &TemplateRegistry,
    ctx: &BootContext,
) -> Result<String, RenderError> {
    let fixed = FixedContext {
        config,
        node: &ctx.node,
        cluster: &ctx.cluster,
        url_root: config.url_root(),
    };
    registry.render(ctx.role_class(), "ipxe.txt", &fixed, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn test_ipxe_script_points_at_ignition() {
        let registry = TemplateRegistry::new().unwrap();
        let ctx = BootContext::for_tests(Runtime::Docker, 3, true, false);
        let script = render(&test_config(), &registry, &ctx).unwrap();

        assert!(script.starts_with("#!ipxe"));
        assert!(script.contains("coreos.config.url=https://boot.example.com/ignition"));
        assert!(script.contains("https://boot.example.com/images/kernel"));
    }

    #[test]
    fn test_maintenance_boot_skips_first_boot_config() {
        let registry = TemplateRegistry::new().unwrap();
        let mut ctx = BootContext::for_tests(Runtime::Docker, 3, true, false);
        ctx.node.maintenance_mode = true;
        let script = render(&test_config(), &registry, &ctx).unwrap();

        assert!(!script.contains("coreos.first_boot"));
        assert!(script.contains("maintenance boot"));
    }

    #[test]
    fn test_autologin_is_off_unless_enabled() {
        let registry = TemplateRegistry::new().unwrap();
        let mut ctx = BootContext::for_tests(Runtime::Docker, 3, true, false);
        let script = render(&test_config(), &registry, &ctx).unwrap();
        assert!(!script.contains("coreos.autologin"));

        ctx.node.coreos_autologin = true;
        let script = render(&test_config(), &registry, &ctx).unwrap();
        assert!(script.contains("coreos.autologin=tty1"));
    }

    #[test]
    fn test_extra_kernel_cmdline_is_appended() {
        let registry = TemplateRegistry::new().unwrap();
        let mut ctx = BootContext::for_tests(Runtime::Docker, 3, true, false);
        ctx.node.additional_kernel_cmdline = "console=ttyS0,115200n8 ipv6.disable=1".to_string();
        let script = render(&test_config(), &registry, &ctx).unwrap();

        let kernel_line = script
            .lines()
            .find(|l| l.starts_with("kernel "))
            .unwrap();
        assert!(kernel_line.ends_with("console=ttyS0,115200n8 ipv6.disable=1"));
    }
}
