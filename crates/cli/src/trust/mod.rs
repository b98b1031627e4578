//! Key and signature tooling for exercising the payment webhooks outside
//! production: generate an Alipay-style Ed25519 keypair and sign test
//! notifications for either provider.

pub mod keygen;
pub mod sign_webhook;
