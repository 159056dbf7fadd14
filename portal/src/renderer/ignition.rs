//! Ignition document assembly.
//!
//! `assemble` is a pure function of (config, node, cluster) state: two calls
//! with no intervening state change produce byte-identical serialized output.
//! Units and files are appended to ordered sequences through a typed builder;
//! any error discards the builder, so a partial document is never emitted.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::RenderError;
use crate::renderer::{BootContext, FixedContext, RoleClass, TemplateRegistry};
use crate::types::{EtcdVersion, Runtime};

/// Ignition schema version emitted in every document.
const IGNITION_VERSION: &str = "2.0.0";

/// The system account that receives collected SSH keys.
const CORE_USER: &str = "core";

// ============================================================================
// Document schema (field declaration order fixes JSON key order)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub ignition: IgnitionMeta,
    pub storage: Storage,
    pub networkd: Empty,
    pub passwd: Passwd,
    pub systemd: Systemd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgnitionMeta {
    pub version: String,
    pub config: Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub filesystem: String,
    pub path: String,
    pub mode: u32,
    pub contents: FileContents,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContents {
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passwd {
    pub users: Vec<PasswdUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswdUser {
    pub name: String,
    #[serde(rename = "sshAuthorizedKeys")]
    pub ssh_authorized_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Systemd {
    pub units: Vec<UnitEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitEntry {
    pub name: String,
    pub enable: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub contents: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dropins: Option<Vec<DropinEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropinEntry {
    pub name: String,
    pub contents: String,
}

impl ConfigDocument {
    /// Serialize either compact (boot path) or indented (operator preview).
    /// Purely a formatting choice; content and ordering never differ.
    pub fn to_json(&self, indent: bool) -> serde_json::Result<String> {
        if indent {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }
}

// ============================================================================
// Data URLs
// ============================================================================

/// Characters left unescaped match python's `urllib.parse.quote` defaults
/// so textual data URLs stay human-diffable.
const DATA_URL_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

pub fn to_data_url(data: &str, mediatype: &str, b64: bool) -> String {
    if b64 {
        format!("data:{};base64,{}", mediatype, BASE64.encode(data.as_bytes()))
    } else {
        format!("data:{},{}", mediatype, utf8_percent_encode(data, DATA_URL_SET))
    }
}

// ============================================================================
// Assembly
// ============================================================================

struct Assembler<'a> {
    config: &'a Config,
    registry: &'a TemplateRegistry,
    ctx: &'a BootContext,
    role: RoleClass,
    files: Vec<FileEntry>,
    units: Vec<UnitEntry>,
}

impl<'a> Assembler<'a> {
    fn new(config: &'a Config, registry: &'a TemplateRegistry, ctx: &'a BootContext) -> Self {
        Self {
            config,
            registry,
            ctx,
            role: ctx.role_class(),
            files: Vec::new(),
            units: Vec::new(),
        }
    }

    fn render(&self, name: &str) -> Result<String, RenderError> {
        let fixed = FixedContext {
            config: self.config,
            node: &self.ctx.node,
            cluster: &self.ctx.cluster,
            url_root: self.config.url_root(),
        };
        self.registry.render(self.role, name, &fixed, &[])
    }

    /// A file entry referencing a credential download by URL. Credentials
    /// are never inlined: the node fetches them over the already secured
    /// channel, and rotation must not require republishing configuration.
    fn credential_file(&mut self, path: &str, mode: u32, cred_name: &str) {
        self.files.push(FileEntry {
            filesystem: "root".to_string(),
            path: path.to_string(),
            mode,
            contents: FileContents {
                source: format!("{}credentials/{}.pem", self.config.url_root(), cred_name),
            },
        });
    }

    /// A file whose content is inlined as a data URL, for files that must
    /// exist before any network fetch can succeed.
    fn inline_file(&mut self, path: &str, mode: u32, template: &str) -> Result<(), RenderError> {
        let content = self.render(template)?;
        self.files.push(FileEntry {
            filesystem: "root".to_string(),
            path: path.to_string(),
            mode,
            contents: FileContents {
                source: to_data_url(&content, "", false),
            },
        });
        Ok(())
    }

    /// A unit enabled with rendered contents.
    fn enabled_unit(&mut self, name: &str) -> Result<(), RenderError> {
        let contents = self.render(&format!("units/{}", name))?;
        self.units.push(UnitEntry {
            name: name.to_string(),
            enable: true,
            contents: Some(contents),
            dropins: None,
        });
        Ok(())
    }

    /// A unit carrying only a dropin fragment. The unit itself is enabled
    /// only when `enable` is set; otherwise the dropin is the sole material.
    fn dropin_unit(&mut self, name: &str, dropin: &str, enable: bool) -> Result<(), RenderError> {
        let contents = self.render(&format!("dropins/{}/{}", name, dropin))?;
        self.units.push(UnitEntry {
            name: name.to_string(),
            enable,
            contents: None,
            dropins: Some(vec![DropinEntry {
                name: dropin.to_string(),
                contents,
            }]),
        });
        Ok(())
    }
}

/// Assemble the full Ignition document for one node.
pub fn assemble(
    config: &Config,
    registry: &TemplateRegistry,
    ctx: &BootContext,
) -> Result<ConfigDocument, RenderError> {
    let mut a = Assembler::new(config, registry, ctx);

    // Credential files first, fixed order and modes.
    a.credential_file(&config.ca_cert_path, 0o444, "ca");
    a.credential_file(&config.node_cert_path, 0o444, "node");
    a.credential_file(&config.node_key_path, 0o400, "node-key");

    if config.install_etc_hosts {
        a.inline_file("/etc/hosts", 0o644, "hosts")?;
    }

    // Base unit set, order is part of the contract.
    a.enabled_unit("provision-report.service")?;
    a.dropin_unit("flanneld.service", "40-ExecStartPre-symlink.conf", false)?;
    a.dropin_unit("docker.service", "40-flannel.conf", false)?;
    a.enabled_unit("kubelet.service")?;
    a.enabled_unit("k8s-addons.service")?;

    if ctx.cluster.k8s_runtime == Runtime::Rkt {
        a.enabled_unit("rkt-api.service")?;
        a.enabled_unit("load-rkt-stage1.service")?;
    }

    if ctx.node.is_etcd_server {
        let version = EtcdVersion::from_raw(ctx.cluster.etcd_version)?;
        a.dropin_unit(version.unit_name(), "40-etcd-cluster.conf", true)?;
        a.dropin_unit("locksmithd.service", "40-etcd-lock.conf", false)?;
    }

    let ssh_keys: Vec<String> = ctx
        .cluster
        .users
        .iter()
        .filter(|user| !user.ssh_key.is_empty())
        .map(|user| user.ssh_key.clone())
        .collect();

    Ok(ConfigDocument {
        ignition: IgnitionMeta {
            version: IGNITION_VERSION.to_string(),
            config: Empty {},
        },
        storage: Storage { files: a.files },
        networkd: Empty {},
        passwd: Passwd {
            users: vec![PasswdUser {
                name: CORE_USER.to_string(),
                ssh_authorized_keys: ssh_keys,
            }],
        },
        systemd: Systemd { units: a.units },
    })
}
