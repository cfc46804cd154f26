//! Describes the configuration of the services section.
use crate::config::node::Node;
use std::path::PathBuf;

/// Describes a service which exposes outputs.
#[derive(Debug, Clone)]
pub enum ServiceConfig {
    /// An HTTP or HTTPS server.
    Http(HttpConfig),
}

/// Contains the settings of an HTTP service.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Contains the address to bind to.
    pub listen: String,
    /// Contains the certificate chain and the private key if HTTPS is enabled.
    pub tls: Option<TlsConfig>,
    /// Contains the names of the exposed outputs or `None` to expose all.
    pub outputs: Option<Vec<String>>,
}

/// Contains the PEM files used for HTTPS.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Contains the path of the certificate chain.
    pub certificate: PathBuf,
    /// Contains the path of the private key.
    pub private_key: PathBuf,
}

impl ServiceConfig {
    /// Reads a service from the given node.
    pub fn parse(node: &Node) -> anyhow::Result<ServiceConfig> {
        let type_name = node.type_name()?;
        match type_name.as_str() {
            "http" => {
                node.ensure_keys(&["type", "listen", "certificate", "privateKey", "outputs"])?;
                let tls = match (
                    node.optional_string("certificate")?,
                    node.optional_string("privateKey")?,
                ) {
                    (Some(certificate), Some(private_key)) => Some(TlsConfig {
                        certificate: PathBuf::from(certificate),
                        private_key: PathBuf::from(private_key),
                    }),
                    (None, None) => None,
                    _ => {
                        return Err(node.error(
                            "Either both, 'certificate' and 'privateKey' or none of them have to be given",
                        ))
                    }
                };

                Ok(ServiceConfig::Http(HttpConfig {
                    listen: node.string_or("listen", "127.0.0.1:0")?,
                    tls,
                    outputs: node.string_list("outputs")?,
                }))
            }
            other => Err(node.unknown_type(other, &["http"])),
        }
    }
}
