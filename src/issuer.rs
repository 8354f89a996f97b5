// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Issuer resources.
//!
//! A `ScepIssuer` names a SCEP server and the secret holding its challenge
//! password. Namespaced issuers read the secret from their own namespace;
//! cluster issuers from the controller's cluster resource namespace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::condition::IssuerStatus;
use crate::error::{Result, ScepError};

/// Key of the challenge password inside the credentials secret.
pub const CHALLENGE_SECRET_KEY: &str = "challenge";

/// Resource kind of an issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IssuerKind {
    /// Namespaced `SCEPIssuer`.
    #[serde(rename = "SCEPIssuer")]
    Issuer,
    /// Cluster-scoped `SCEPClusterIssuer`.
    #[serde(rename = "SCEPClusterIssuer")]
    ClusterIssuer,
}

impl IssuerKind {
    /// The resource kind name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issuer => "SCEPIssuer",
            Self::ClusterIssuer => "SCEPClusterIssuer",
        }
    }
}

impl fmt::Display for IssuerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A namespace/name pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    /// Namespace, `None` for cluster-scoped objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Object name.
    pub name: String,
}

impl NamespacedName {
    /// A namespaced name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// A cluster-scoped name.
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}", namespace, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Identifies one issuer resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IssuerKey {
    /// Resource kind.
    pub kind: IssuerKind,
    /// Namespace and name.
    pub name: NamespacedName,
}

impl IssuerKey {
    /// Key of a namespaced issuer.
    pub fn issuer(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: IssuerKind::Issuer,
            name: NamespacedName::new(namespace, name),
        }
    }

    /// Key of a cluster issuer.
    pub fn cluster_issuer(name: impl Into<String>) -> Self {
        Self {
            kind: IssuerKind::ClusterIssuer,
            name: NamespacedName::cluster(name),
        }
    }
}

impl fmt::Display for IssuerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Object metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object name.
    pub name: String,
    /// Namespace, absent for cluster-scoped resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Desired state of an issuer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSpec {
    /// SCEP server URL.
    pub url: String,
    /// Name of the secret holding the challenge password.
    pub auth_secret_name: String,
}

/// A SCEP issuer resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScepIssuer {
    /// Resource kind.
    pub kind: IssuerKind,
    /// Metadata.
    pub metadata: ObjectMeta,
    /// Spec.
    #[serde(default)]
    pub spec: IssuerSpec,
    /// Status subresource.
    #[serde(default)]
    pub status: IssuerStatus,
}

impl ScepIssuer {
    /// A new namespaced issuer with empty status.
    pub fn namespaced(
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: IssuerSpec,
    ) -> Self {
        Self {
            kind: IssuerKind::Issuer,
            metadata: ObjectMeta {
                name: name.into(),
                namespace: Some(namespace.into()),
            },
            spec,
            status: IssuerStatus::default(),
        }
    }

    /// A new cluster issuer with empty status.
    pub fn cluster(name: impl Into<String>, spec: IssuerSpec) -> Self {
        Self {
            kind: IssuerKind::ClusterIssuer,
            metadata: ObjectMeta {
                name: name.into(),
                namespace: None,
            },
            spec,
            status: IssuerStatus::default(),
        }
    }

    /// The store key of this issuer.
    pub fn key(&self) -> IssuerKey {
        IssuerKey {
            kind: self.kind,
            name: NamespacedName {
                namespace: self.metadata.namespace.clone(),
                name: self.metadata.name.clone(),
            },
        }
    }
}

/// Where an issuer's credentials secret lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuerScope {
    /// The secret is in the issuer's own namespace.
    Namespaced,
    /// The secret is in a fixed namespace.
    ClusterScoped {
        /// Namespace configured for cluster resources.
        fallback_namespace: String,
    },
}

impl IssuerScope {
    /// Resolve the scope of an issuer kind.
    pub fn resolve(kind: IssuerKind, cluster_resource_namespace: &str) -> Self {
        match kind {
            IssuerKind::Issuer => Self::Namespaced,
            IssuerKind::ClusterIssuer => Self::ClusterScoped {
                fallback_namespace: cluster_resource_namespace.to_string(),
            },
        }
    }

    /// Name of the credentials secret for `spec`, reconciled under `request`.
    ///
    /// # Errors
    ///
    /// Returns an error if a namespaced issuer is requested without a
    /// namespace.
    pub fn secret_key(
        &self,
        request: &NamespacedName,
        spec: &IssuerSpec,
    ) -> Result<NamespacedName> {
        let namespace = match self {
            Self::Namespaced => request.namespace.clone().ok_or_else(|| {
                ScepError::config(format!("namespaced issuer {} has no namespace", request))
            })?,
            Self::ClusterScoped { fallback_namespace } => fallback_namespace.clone(),
        };
        Ok(NamespacedName::new(namespace, spec.auth_secret_name.clone()))
    }
}
