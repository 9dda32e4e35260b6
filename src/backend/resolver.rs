use async_trait::async_trait;
use log::debug;

use super::{TargetRef, TargetResolver};
use crate::error::ResolveError;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_POD_PREFIX: &str = "pod-";

/// Convenzione di naming: l'utente `Alice` vive nel pod `pod-alice`.
///
/// La risoluzione è una funzione pura dello username, quindi non cambia mai
/// durante una sessione. Se il nome risultante non è una label DNS-1123
/// valida l'utente non ha un target.
#[derive(Debug, Clone)]
pub struct NamingConvention {
    namespace: String,
    prefix: String,
}

impl NamingConvention {
    pub fn new(namespace: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            prefix: prefix.into(),
        }
    }

    pub fn pod_name(&self, username: &str) -> String {
        format!("{}{}", self.prefix, username.to_lowercase())
    }
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE, DEFAULT_POD_PREFIX)
    }
}

#[async_trait]
impl TargetResolver for NamingConvention {
    async fn resolve(&self, username: &str) -> Result<TargetRef, ResolveError> {
        let pod = self.pod_name(username);
        if username.is_empty() || !is_dns_label(&pod) {
            debug!("username {:?} does not map to a valid pod name", username);
            return Err(ResolveError::NoTarget(username.to_string()));
        }
        Ok(TargetRef::new(self.namespace.clone(), pod))
    }
}

fn is_dns_label(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 63 {
        return false;
    }
    let valid_char = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-';
    bytes.iter().all(valid_char)
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
}
