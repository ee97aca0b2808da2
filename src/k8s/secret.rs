//! Secret objects — TLS key/cert pairs or opaque CA bundles.

use super::meta::{Kind, ObjectMeta, Resource};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub metadata: ObjectMeta,
    pub data: SecretData,
}

impl Resource for Secret {
    const KIND: Kind = Kind::Secret;
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SecretData {
    /// `tls.crt` + `tls.key`, base64-decoded PEM bytes.
    TlsKeyPair { cert: Vec<u8>, key: Vec<u8> },
    /// `ca.crt`, a CA bundle used for upstream validation.
    CaBundle { ca_cert: Vec<u8> },
}
