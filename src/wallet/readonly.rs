//! Watch-only wallet for headless use: knows an address, cannot sign.
//!
//! Lets the service restore a session from a stored token without a
//! browser wallet attached. Anything that needs the user's key fails with
//! [`WalletError::Unavailable`].

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use super::{WalletConnection, WalletProvider};
use crate::error::WalletError;

const NO_SIGNER: &str = "watch-only wallet has no signer";

pub struct ReadOnlyWallet {
    tx: watch::Sender<WalletConnection>,
}

impl ReadOnlyWallet {
    pub fn new(address: Option<String>) -> Self {
        let connection = match address.filter(|a| !a.trim().is_empty()) {
            Some(address) => WalletConnection::connected(address),
            None => WalletConnection::disconnected(),
        };
        let (tx, _rx) = watch::channel(connection);
        Self { tx }
    }

    /// Report a connection change (e.g. relayed from the browser).
    pub fn set_connection(&self, connection: WalletConnection) {
        self.tx.send_replace(connection);
    }

    fn current(&self) -> WalletConnection {
        self.tx.borrow().clone()
    }
}

#[async_trait]
impl WalletProvider for ReadOnlyWallet {
    async fn connect(&self) -> Result<String, WalletError> {
        self.address().ok_or(WalletError::NotConnected)
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        self.set_connection(WalletConnection::disconnected());
        Ok(())
    }

    fn address(&self) -> Option<String> {
        let connection = self.current();
        connection.address.filter(|_| connection.connected)
    }

    fn is_connected(&self) -> bool {
        self.current().connected
    }

    fn connection_events(&self) -> BoxStream<'static, WalletConnection> {
        WatchStream::new(self.tx.subscribe()).boxed()
    }

    async fn request(
        &self,
        method: &str,
        _params: serde_json::Value,
    ) -> Result<serde_json::Value, WalletError> {
        Err(WalletError::Unavailable(format!("{NO_SIGNER} ({method})")))
    }

    async fn sign_message(&self, _address: &str, _message: &str) -> Result<String, WalletError> {
        Err(WalletError::Unavailable(NO_SIGNER.to_string()))
    }
}
