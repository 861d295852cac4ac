/**
 * REMOTE POWER-OFF - suspends the primary device over SSH
 *
 * ROLE: load the private key, open an authenticated session, run the
 * suspend command, close. Key problems are reported before any connection
 * is attempted; connection and auth problems come back as `Connect`.
 *
 * The caller updates the stored state on success, not this module.
 */

use crate::models::SshEndpoint;
use async_trait::async_trait;
use russh::client;
use russh::keys::{self, PrivateKeyWithHashAlg};
use russh::Disconnect;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum PowerOffError {
    #[error("SSH key requires a passphrase but none was provided.")]
    AuthConfig,
    #[error("Error loading SSH key: {0}")]
    KeyLoad(String),
    #[error("SSH Connect Error: {0}")]
    Connect(String),
}

#[async_trait]
pub trait PowerOffExecutor: Send + Sync {
    async fn power_off(&self, endpoint: &SshEndpoint) -> Result<(), PowerOffError>;
}

pub struct SshPowerOff {
    connect_timeout: Duration,
}

impl Default for SshPowerOff {
    fn default() -> Self {
        Self { connect_timeout: Duration::from_secs(5) }
    }
}

/// Accepts any host key, the panel only talks to devices on its own LAN.
struct AcceptAnyHost;

impl client::Handler for AcceptAnyHost {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

fn load_key(endpoint: &SshEndpoint) -> Result<keys::PrivateKey, PowerOffError> {
    match keys::load_secret_key(&endpoint.key_path, endpoint.key_passphrase.as_deref()) {
        Ok(key) => Ok(key),
        Err(keys::Error::KeyIsEncrypted) => Err(PowerOffError::AuthConfig),
        Err(e) => Err(PowerOffError::KeyLoad(e.to_string())),
    }
}

impl SshPowerOff {
    async fn run(&self, endpoint: &SshEndpoint, key: keys::PrivateKey) -> Result<(), russh::Error> {
        let config = Arc::new(client::Config::default());
        let addr = (endpoint.host.as_str(), endpoint.port);

        let mut session = tokio::time::timeout(
            self.connect_timeout,
            client::connect(config, addr, AcceptAnyHost),
        )
        .await
        .map_err(|_| russh::Error::ConnectionTimeout)??;

        let hash_alg = session.best_supported_rsa_hash().await?.flatten();
        let auth = session
            .authenticate_publickey(
                endpoint.username.as_str(),
                PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
            )
            .await?;
        if !auth.success() {
            return Err(russh::Error::NotAuthenticated);
        }
        info!("SSH connection successful");

        let channel = session.channel_open_session().await?;
        info!("executing shutdown command");
        channel.exec(true, endpoint.command.as_str()).await?;

        session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PowerOffExecutor for SshPowerOff {
    async fn power_off(&self, endpoint: &SshEndpoint) -> Result<(), PowerOffError> {
        info!("attempting SSH connection for shutdown to {}:{}", endpoint.host, endpoint.port);

        let key = load_key(endpoint).inspect_err(|e| error!("{e}"))?;
        info!("key loaded successfully");

        self.run(endpoint, key).await.map_err(|e| {
            error!("SSH Connect Error: {e}");
            PowerOffError::Connect(e.to_string())
        })?;
        info!("shutdown command executed successfully");
        Ok(())
    }
}
