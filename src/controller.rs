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

//! Issuer reconciliation.
//!
//! Each pass over an issuer resolves its credentials secret, health-checks
//! its SCEP server and records the outcome in the Ready condition:
//!
//! ```text
//! (absent) --first pass--> Unknown("First seen")
//! Unknown | False --secret and health check ok--> True("Success")
//! Unknown | True --secret or health check fails--> False(<error>)
//! ```
//!
//! The status is written back on every pass, successful or not.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ScepClient;
use crate::condition::ConditionStatus;
use crate::config::ControllerConfig;
use crate::error::{Result, ScepError};
use crate::issuer::{IssuerKey, IssuerScope, IssuerSpec, ScepIssuer};
use crate::store::{IssuerStore, SecretData, SecretStore, challenge_from_secret};
use crate::transport::{HttpTransport, ScepTransport};

/// Reason recorded on every Ready condition written by the reconciler.
pub const READY_CONDITION_REASON: &str = "ScepIssuerController.Reconcile";

/// Something that can tell whether an issuer's CA is usable.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Succeeds if the CA can currently be used.
    async fn check(&self) -> Result<()>;
}

/// Builds a [`HealthChecker`] for an issuer.
pub trait HealthCheckerBuilder: Send + Sync {
    /// Build a checker from the issuer spec and its credentials secret.
    fn build(&self, spec: &IssuerSpec, secret: &SecretData) -> Result<Box<dyn HealthChecker>>;
}

impl<F> HealthCheckerBuilder for F
where
    F: Fn(&IssuerSpec, &SecretData) -> Result<Box<dyn HealthChecker>> + Send + Sync,
{
    fn build(&self, spec: &IssuerSpec, secret: &SecretData) -> Result<Box<dyn HealthChecker>> {
        self(spec, secret)
    }
}

/// Something that turns a CSR into a certificate.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Enroll `csr_pem` and return the issued certificate as PEM.
    async fn sign(&self, csr_pem: &[u8], cancel: &CancellationToken) -> Result<String>;
}

/// Builds a [`Signer`] for an issuer.
pub trait SignerBuilder: Send + Sync {
    /// Build a signer from the issuer spec and its credentials secret.
    fn build(&self, spec: &IssuerSpec, secret: &SecretData) -> Result<Box<dyn Signer>>;
}

impl<F> SignerBuilder for F
where
    F: Fn(&IssuerSpec, &SecretData) -> Result<Box<dyn Signer>> + Send + Sync,
{
    fn build(&self, spec: &IssuerSpec, secret: &SecretData) -> Result<Box<dyn Signer>> {
        self(spec, secret)
    }
}

#[async_trait]
impl<T: ScepTransport + 'static> HealthChecker for ScepClient<T> {
    async fn check(&self) -> Result<()> {
        ScepClient::check(self).await
    }
}

#[async_trait]
impl<T: ScepTransport + 'static> Signer for ScepClient<T> {
    async fn sign(&self, csr_pem: &[u8], cancel: &CancellationToken) -> Result<String> {
        self.sign_with_cancel(csr_pem, cancel).await
    }
}

/// Builds SCEP clients over HTTP from the controller configuration.
#[derive(Debug, Clone, Default)]
pub struct ScepClientFactory {
    config: ControllerConfig,
}

impl ScepClientFactory {
    /// A factory applying `config` to every client.
    pub fn new(config: ControllerConfig) -> Self {
        Self { config }
    }

    /// Build a client for an issuer.
    pub fn client(&self, spec: &IssuerSpec, secret: &SecretData) -> Result<ScepClient> {
        let challenge = challenge_from_secret(secret)?;
        let config = self.config.client_config(&spec.url, &challenge)?;
        let transport = HttpTransport::new(&config)?;
        Ok(ScepClient::with_transport(config, transport))
    }
}

impl HealthCheckerBuilder for ScepClientFactory {
    fn build(&self, spec: &IssuerSpec, secret: &SecretData) -> Result<Box<dyn HealthChecker>> {
        Ok(Box::new(self.client(spec, secret)?))
    }
}

impl SignerBuilder for ScepClientFactory {
    fn build(&self, spec: &IssuerSpec, secret: &SecretData) -> Result<Box<dyn Signer>> {
        Ok(Box::new(self.client(spec, secret)?))
    }
}

/// What the scheduler should do after a reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Reconcile again after the given delay.
    Requeue(Duration),
    /// Nothing to do until the resource changes.
    AwaitChange,
}

/// Reconciles issuer resources.
pub struct IssuerReconciler {
    issuers: Arc<dyn IssuerStore>,
    secrets: Arc<dyn SecretStore>,
    health_checker_builder: Arc<dyn HealthCheckerBuilder>,
    signer_builder: Arc<dyn SignerBuilder>,
    cluster_resource_namespace: String,
    health_check_interval: Duration,
}

impl std::fmt::Debug for IssuerReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerReconciler")
            .field("cluster_resource_namespace", &self.cluster_resource_namespace)
            .field("health_check_interval", &self.health_check_interval)
            .finish_non_exhaustive()
    }
}

impl IssuerReconciler {
    /// A reconciler that checks and signs through SCEP over HTTP.
    pub fn new(
        issuers: Arc<dyn IssuerStore>,
        secrets: Arc<dyn SecretStore>,
        config: &ControllerConfig,
    ) -> Self {
        let factory = Arc::new(ScepClientFactory::new(config.clone()));
        Self {
            issuers,
            secrets,
            health_checker_builder: factory.clone(),
            signer_builder: factory,
            cluster_resource_namespace: config.controller.cluster_resource_namespace.clone(),
            health_check_interval: config.controller.health_check_interval(),
        }
    }

    /// Replace the health checker builder.
    pub fn with_health_checker_builder(mut self, builder: Arc<dyn HealthCheckerBuilder>) -> Self {
        self.health_checker_builder = builder;
        self
    }

    /// Replace the signer builder.
    pub fn with_signer_builder(mut self, builder: Arc<dyn SignerBuilder>) -> Self {
        self.signer_builder = builder;
        self
    }

    /// Interval between health checks of an issuer.
    pub fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }

    /// Run one reconcile pass for `key`.
    ///
    /// Any failure is recorded as Ready=False before it is returned. If the
    /// status cannot be written, the write error is aggregated with the
    /// pass's own error.
    pub async fn reconcile(&self, key: &IssuerKey) -> Result<Action> {
        let Some(mut issuer) = self.issuers.get(key).await? else {
            info!(issuer = %key, "Not found. Ignoring.");
            return Ok(Action::AwaitChange);
        };

        let result = self.evaluate(key, &mut issuer).await;
        if let Err(e) = &result {
            issuer
                .status
                .set_ready(ConditionStatus::False, READY_CONDITION_REASON, e.to_string());
        }

        match (result, self.issuers.update_status(&issuer).await) {
            (result, Ok(())) => result,
            (Ok(_), Err(update_err)) => Err(ScepError::aggregate([update_err])),
            (Err(e), Err(update_err)) => Err(ScepError::aggregate([e, update_err])),
        }
    }

    async fn evaluate(&self, key: &IssuerKey, issuer: &mut ScepIssuer) -> Result<Action> {
        if issuer.status.ready_condition().is_none() {
            issuer
                .status
                .set_ready(ConditionStatus::Unknown, READY_CONDITION_REASON, "First seen");
            return Ok(Action::Requeue(Duration::ZERO));
        }

        let secret = self.credentials(key, issuer).await?;

        let checker = self
            .health_checker_builder
            .build(&issuer.spec, &secret)
            .map_err(|e| ScepError::config(format!("failed to build the healthchecker: {}", e)))?;
        checker.check().await.map_err(|e| match e {
            ScepError::HealthCheck(_) => e,
            other => ScepError::HealthCheck(other.to_string()),
        })?;

        issuer
            .status
            .set_ready(ConditionStatus::True, READY_CONDITION_REASON, "Success");
        debug!(issuer = %key, "issuer ready");
        Ok(Action::Requeue(self.health_check_interval))
    }

    async fn credentials(&self, key: &IssuerKey, issuer: &ScepIssuer) -> Result<SecretData> {
        let scope = IssuerScope::resolve(issuer.kind, &self.cluster_resource_namespace);
        let secret_name = scope.secret_key(&key.name, &issuer.spec)?;
        self.secrets.get(&secret_name).await.map_err(|e| {
            ScepError::Secret(format!(
                "failed to get Secret containing Issuer credentials, secret name: {}, reason: {}",
                secret_name, e
            ))
        })
    }

    /// Reconcile `key` on its schedule until it asks to wait for a change
    /// or `cancel` fires.
    ///
    /// A failed pass is retried after the health check interval.
    pub async fn run(&self, key: &IssuerKey, cancel: &CancellationToken) {
        loop {
            let delay = match self.reconcile(key).await {
                Ok(Action::AwaitChange) => return,
                Ok(Action::Requeue(delay)) => delay,
                Err(e) => {
                    warn!(issuer = %key, "reconcile failed: {}", e);
                    self.health_check_interval
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Sign a CSR with a ready issuer.
    ///
    /// # Errors
    ///
    /// Returns [`ScepError::NotReady`] unless the issuer's Ready condition is
    /// True, otherwise any error from the secret lookup or the enrollment.
    pub async fn sign_certificate_request(
        &self,
        key: &IssuerKey,
        csr_pem: &[u8],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let issuer = self
            .issuers
            .get(key)
            .await?
            .ok_or_else(|| ScepError::store(format!("{} not found", key)))?;
        if !issuer.status.is_ready() {
            return Err(ScepError::NotReady(key.to_string()));
        }

        let secret = self.credentials(key, &issuer).await?;
        let signer = self.signer_builder.build(&issuer.spec, &secret)?;
        let certificate = signer.sign(csr_pem, cancel).await?;
        info!(issuer = %key, "signed certificate request");
        Ok(certificate)
    }
}
