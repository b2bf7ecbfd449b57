//! Ownership challenge and signing.

use tracing::debug;

use crate::error::AuthError;
use crate::wallet::WalletProvider;

/// The message a wallet signs to prove it owns `address`.
///
/// Deterministic per address; the server reconstructs it to verify.
pub fn challenge_message(address: &str) -> String {
    format!(
        "Welcome to Helios! Please sign this message to verify your wallet ownership.\n\nWallet: {address}"
    )
}

/// Ask the wallet to sign the challenge for `address`.
///
/// Rejections (code 4001 or a "rejected"/"denied" message) come back as
/// [`AuthError::UserRejectedSignature`].
pub async fn sign_challenge(
    wallet: &dyn WalletProvider,
    address: &str,
) -> Result<String, AuthError> {
    debug!(wallet = %address, "Requesting challenge signature");
    let message = challenge_message(address);
    let signature = wallet.sign_message(address, &message).await?;
    if signature.trim().is_empty() {
        return Err(AuthError::AuthenticationFailed(
            "Wallet returned an empty signature".to_string(),
        ));
    }
    Ok(signature)
}
